use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::models::Id;
use crate::routes::AppState;

pub const TOKEN_TTL_HOURS: i64 = 72;
const ALGORITHM: Algorithm = Algorithm::HS256;

/// The complete claim set. Tokens carrying any other field are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Claims {
    pub account_id: Id,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    Signature,
    #[error("token expired")]
    Expired,
    #[error("token encoding failed: {0}")]
    Encode(String),
}

/// Issues and validates HS256 bearer tokens with a fixed 72h lifetime.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(config: &AppConfig) -> Self {
        Self::from_secret(config.jwt_secret.as_bytes())
    }

    pub fn from_secret(secret: &[u8]) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        // expiry is checked against an explicit clock in `validate_at`
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims.clear();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn issue(&self, account_id: Id) -> Result<String, TokenError> {
        self.issue_at(account_id, Utc::now())
    }

    pub fn issue_at(&self, account_id: Id, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims {
            account_id,
            issued_at: now.timestamp(),
            expires_at: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
        };
        encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Returns the account id the token was issued for. The account itself is
    /// not looked up.
    pub fn validate(&self, token: &str) -> Result<Id, TokenError> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Id, TokenError> {
        match algorithm_tag(token) {
            Some(alg) if alg == "HS256" => {}
            Some(_) => return Err(TokenError::Signature),
            None => return Err(TokenError::Malformed),
        }
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::Signature,
                _ => TokenError::Malformed,
            }
        })?;
        if now.timestamp() >= data.claims.expires_at {
            return Err(TokenError::Expired);
        }
        Ok(data.claims.account_id)
    }
}

/// Raw `alg` value of the header, read before any library parsing so an
/// unknown tag ("none", "HS512", ...) is reported as a signature failure.
fn algorithm_tag(token: &str) -> Option<String> {
    let header = token.split('.').next()?;
    let bytes = URL_SAFE_NO_PAD.decode(header).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("alg")?.as_str().map(String::from)
}

/// Extractor yielding the authenticated account id.
#[derive(Debug, Clone, Copy)]
pub struct Auth(pub Id);

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            tracing::error!("AppState missing from app data");
            return ready(Err(ApiError::Internal));
        };
        let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() else {
            return ready(Err(ApiError::Unauthorized("authorization required".into())));
        };
        ready(
            state
                .tokens
                .validate(bearer.token())
                .map(Auth)
                .map_err(ApiError::from),
        )
    }
}
