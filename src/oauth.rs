use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::{TokenError, TokenService};
use crate::config::OAuthConfig;
use crate::credentials;
use crate::models::{Account, NewAccount};
use crate::repo::{AccountRepo, RepoError};

const SCOPES: &str = "email profile";

#[derive(Debug, thiserror::Error)]
pub enum FederatedLoginError {
    #[error("authorization code exchange failed: {0}")]
    Exchange(String),
    #[error("provider profile fetch failed: {0}")]
    ProfileFetch(String),
    #[error("account creation failed: {0}")]
    AccountCreation(String),
    #[error(transparent)]
    Token(#[from] TokenError),
}

#[derive(Deserialize)]
struct ProviderTokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: Option<String>,
}

#[derive(Deserialize)]
struct ProviderProfile {
    email: String,
    #[serde(default)]
    name: Option<String>,
}

/// Outcome of a completed federated login.
#[derive(Debug)]
pub struct FederatedLogin {
    pub token: String,
    pub account: Account,
    pub created: bool,
}

/// Authorization-code login against an external provider, mapped onto local
/// accounts by email.
pub struct FederatedLoginBroker {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl FederatedLoginBroker {
    pub fn new(config: &OAuthConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config: config.clone(), http })
    }

    /// Provider URL the caller redirects the browser to. Creates no state.
    pub fn begin_login(&self) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}",
            self.config.auth_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_url),
            urlencoding::encode(SCOPES),
        )
    }

    pub async fn complete_login<R>(
        &self,
        accounts: &R,
        tokens: &TokenService,
        code: &str,
    ) -> Result<FederatedLogin, FederatedLoginError>
    where
        R: AccountRepo + ?Sized,
    {
        let access_token = self.exchange_code(code).await?;
        let profile = self.fetch_profile(&access_token).await?;
        let (account, created) = self.resolve_account(accounts, profile).await?;
        let token = tokens.issue(account.id)?;
        info!(account_id = account.id, created, "federated login completed");
        Ok(FederatedLogin { token, account, created })
    }

    async fn exchange_code(&self, code: &str) -> Result<String, FederatedLoginError> {
        let resp = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_url.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FederatedLoginError::Exchange(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FederatedLoginError::Exchange(format!("{status}: {body}")));
        }
        let token: ProviderTokenResponse = resp
            .json()
            .await
            .map_err(|e| FederatedLoginError::Exchange(format!("invalid token response: {e}")))?;
        Ok(token.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, FederatedLoginError> {
        let resp = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| FederatedLoginError::ProfileFetch(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FederatedLoginError::ProfileFetch(format!("status {}", resp.status())));
        }
        let profile: ProviderProfile = resp
            .json()
            .await
            .map_err(|e| FederatedLoginError::ProfileFetch(format!("invalid profile: {e}")))?;
        let email = profile.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(FederatedLoginError::ProfileFetch("profile has no email".into()));
        }
        Ok(ProviderProfile { email, ..profile })
    }

    async fn resolve_account<R>(
        &self,
        accounts: &R,
        profile: ProviderProfile,
    ) -> Result<(Account, bool), FederatedLoginError>
    where
        R: AccountRepo + ?Sized,
    {
        let lookup_err = |e: RepoError| FederatedLoginError::AccountCreation(e.to_string());
        if let Some(existing) = accounts.get_account_by_email(&profile.email).await.map_err(lookup_err)? {
            return Ok((existing, false));
        }

        let name = profile
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| profile.email.split('@').next().unwrap_or_default().to_string());
        let mut new = NewAccount::new(name, profile.email.clone());
        new.set_password(&credentials::generate_password())
            .map_err(|e| FederatedLoginError::AccountCreation(e.to_string()))?;

        match accounts.create_account(new).await {
            Ok(account) => Ok((account, true)),
            // lost a race with a concurrent first login for the same email
            Err(RepoError::Conflict) => {
                warn!(email = %profile.email, "account appeared concurrently, reusing it");
                accounts
                    .get_account_by_email(&profile.email)
                    .await
                    .map_err(lookup_err)?
                    .map(|a| (a, false))
                    .ok_or_else(|| FederatedLoginError::AccountCreation("account vanished".into()))
            }
            Err(e) => Err(lookup_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_url_carries_scopes_and_redirect() {
        let broker = FederatedLoginBroker::new(&OAuthConfig::google(
            "client-1",
            "secret",
            "http://localhost:8080/api/v1/auth/google/callback",
        ))
        .unwrap();
        let url = broker.begin_login();
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("scope=email%20profile"));
        assert!(url.contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fapi%2Fv1%2Fauth%2Fgoogle%2Fcallback"
        ));
        assert!(url.contains("response_type=code"));
    }
}
