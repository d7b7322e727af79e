pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gamification;
pub mod images;
pub mod models;
pub mod oauth;
pub mod openapi;
pub mod repo;
pub mod routes;
pub mod storage;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
