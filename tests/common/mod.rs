#![allow(dead_code)]

use std::path::Path;

use tempfile::TempDir;
use trailwatch::config::{AppConfig, OAuthConfig};
use trailwatch::models::{Account, NewAccount, NewReport, Report};
use trailwatch::repo::sql::SqlRepo;
use trailwatch::repo::{AccountRepo, ReportRepo};

pub const SECRET: &str = "test-secret-must-be-32-bytes-long!!";

/// Fresh migrated database in its own directory. Keep the `TempDir` alive for
/// the duration of the test.
pub async fn repo() -> (SqlRepo, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let repo = SqlRepo::connect(&url, 5).await.unwrap();
    repo.migrate().await.unwrap();
    (repo, dir)
}

pub fn app_config(upload_dir: &Path, admins: &[&str], oauth: Option<OAuthConfig>) -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".into(),
        database_url: "sqlite::memory:".into(),
        db_max_connections: 1,
        jwt_secret: SECRET.into(),
        upload_dir: upload_dir.to_path_buf(),
        bootstrap_admins: admins.iter().map(|s| s.to_string()).collect(),
        oauth,
    }
}

/// Account without a usable password; hashing is skipped to keep tests fast.
pub async fn account(repo: &SqlRepo, name: &str) -> Account {
    let new = NewAccount::new(name, format!("{}@example.com", name.to_lowercase()));
    repo.create_account(new).await.unwrap()
}

pub async fn account_with_password(repo: &SqlRepo, name: &str, password: &str) -> Account {
    let mut new = NewAccount::new(name, format!("{}@example.com", name.to_lowercase()));
    new.set_password(password).unwrap();
    repo.create_account(new).await.unwrap()
}

pub async fn report(repo: &SqlRepo, owner: i64, description: &str) -> Report {
    repo.create_report(NewReport {
        account_id: owner,
        latitude: 40.0,
        longitude: -73.0,
        image_path: None,
        description: description.into(),
        trail: None,
    })
    .await
    .unwrap()
}

/// Hand-built multipart body. `files` entries are sent with a filename and an
/// octet-stream content type.
pub fn multipart(fields: &[(&str, &str)], files: &[(&str, &[u8])]) -> (String, Vec<u8>) {
    let boundary = "----trailwatch-test-boundary";
    let mut body: Vec<u8> = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    for (name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"upload.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([20, 140, 60]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Application state over a fresh database, uploads under the same temp dir.
pub async fn state(admins: &[&str]) -> (trailwatch::AppState, TempDir) {
    let (repo, dir) = repo().await;
    let uploads = dir.path().join("uploads");
    let cfg = app_config(&uploads, admins, None);
    let store = std::sync::Arc::new(trailwatch::storage::FsImageStore::new(&uploads));
    let state = trailwatch::AppState::new(cfg, std::sync::Arc::new(repo), store).unwrap();
    (state, dir)
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}
