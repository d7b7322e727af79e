use std::path::PathBuf;
use std::time::Duration;

pub const MIN_SECRET_LEN: usize = 32;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("JWT_SECRET must be at least {MIN_SECRET_LEN} characters long")]
    WeakSecret,
    #[error("{name} is not a valid number: {value}")]
    Invalid { name: &'static str, value: String },
}

/// External identity provider settings. Endpoints default to Google's and can
/// be overridden (tests point them at a local mock).
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub timeout: Duration,
}

impl OAuthConfig {
    pub fn google(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            auth_url: GOOGLE_AUTH_URL.into(),
            token_url: GOOGLE_TOKEN_URL.into(),
            userinfo_url: GOOGLE_USERINFO_URL.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Process configuration, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub upload_dir: PathBuf,
    pub bootstrap_admins: Vec<String>,
    pub oauth: Option<OAuthConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // blank values count as unset
        let get = |name: &str| get(name).filter(|v| !v.trim().is_empty());
        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }

        let db_max_connections = parse_or(&get, "DB_MAX_CONNECTIONS", 5u32)?;

        let bootstrap_admins = get("BOOTSTRAP_ADMIN_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let oauth = match (
            get("GOOGLE_CLIENT_ID"),
            get("GOOGLE_CLIENT_SECRET"),
            get("GOOGLE_REDIRECT_URL"),
        ) {
            (Some(id), Some(secret), Some(redirect)) => {
                let mut oauth = OAuthConfig::google(id, secret, redirect);
                if let Some(url) = get("GOOGLE_AUTH_URL") {
                    oauth.auth_url = url;
                }
                if let Some(url) = get("GOOGLE_TOKEN_URL") {
                    oauth.token_url = url;
                }
                if let Some(url) = get("GOOGLE_USERINFO_URL") {
                    oauth.userinfo_url = url;
                }
                oauth.timeout = Duration::from_secs(parse_or(&get, "OAUTH_TIMEOUT_SECS", 10u64)?);
                Some(oauth)
            }
            _ => None,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://data/trailwatch.db".into()),
            db_max_connections,
            jwt_secret,
            upload_dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            bootstrap_admins,
            oauth,
        })
    }

    pub fn is_bootstrap_admin(&self, email: &str) -> bool {
        self.bootstrap_admins.iter().any(|e| e.eq_ignore_ascii_case(email))
    }
}

fn parse_or<F, T>(get: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
