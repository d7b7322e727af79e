use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::credentials::{self, CredentialError};

pub type Id = i64;

/// Current instant at the precision the store keeps (microseconds), so a
/// timestamp read back compares equal to the one that was written.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Account {
    pub id: Id,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_admin: bool,
    pub exp: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn set_password(&mut self, plaintext: &str) -> Result<(), CredentialError> {
        self.password_hash = credentials::hash_password(plaintext)?;
        Ok(())
    }

    pub fn check_password(&self, plaintext: &str) -> bool {
        credentials::verify_password(&self.password_hash, plaintext)
    }

    pub fn profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            is_admin: self.is_admin,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password_hash: String::new(),
            is_admin: false,
        }
    }

    pub fn set_password(&mut self, plaintext: &str) -> Result<(), CredentialError> {
        self.password_hash = credentials::hash_password(plaintext)?;
        Ok(())
    }
}

/// Owner/author fields copied into reports and comments at query time.
/// A snapshot, not a live view of the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PublicProfile {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Report {
    pub id: Id,
    pub account_id: Id,
    pub owner: PublicProfile,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_path: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReport {
    pub account_id: Id,
    pub latitude: f64,
    pub longitude: f64,
    pub image_path: Option<String>,
    pub description: String,
    pub trail: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("latitude must be within [-90, 90]")]
    Latitude,
    #[error("longitude must be within [-180, 180]")]
    Longitude,
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{0}")]
    Invalid(String),
}

impl NewReport {
    /// Checks the fields the store does not enforce itself.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::Latitude);
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::Longitude);
        }
        if self.description.trim().is_empty() {
            return Err(ValidationError::Missing("description"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Comment {
    pub id: Id,
    pub report_id: Id,
    pub account_id: Id,
    pub author: PublicProfile,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub report_id: Id,
    pub account_id: Id,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntry {
    pub position: i64,
    pub account: PublicProfile,
    pub exp: i64,
}

/// `rank` is 1 + number of accounts with strictly more experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Rank {
    pub rank: i64,
    pub exp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(lat: f64, lon: f64, description: &str) -> NewReport {
        NewReport {
            account_id: 1,
            latitude: lat,
            longitude: lon,
            image_path: None,
            description: description.into(),
            trail: None,
        }
    }

    #[test]
    fn coordinates_bounds_are_inclusive() {
        assert!(report(90.0, -180.0, "x").validate().is_ok());
        assert!(report(-90.0, 180.0, "x").validate().is_ok());
        assert_eq!(report(90.5, 0.0, "x").validate(), Err(ValidationError::Latitude));
        assert_eq!(report(0.0, -180.1, "x").validate(), Err(ValidationError::Longitude));
        assert_eq!(report(f64::NAN, 0.0, "x").validate(), Err(ValidationError::Latitude));
    }

    #[test]
    fn blank_description_rejected() {
        assert_eq!(
            report(1.0, 1.0, "   ").validate(),
            Err(ValidationError::Missing("description"))
        );
    }

    #[test]
    fn now_has_microsecond_precision() {
        assert_eq!(now().timestamp_subsec_nanos() % 1_000, 0);
    }
}
