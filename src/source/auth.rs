//! Vendor API authentication
//!
//! Supports a static API-key header or an OAuth2 client-credentials bearer
//! token that is cached and refreshed ahead of its expiry.

use reqwest::{header, Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{ConfigError, SourceError};

/// Token lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Authentication as written in the vendor config file.
///
/// Secrets are referenced by environment variable name, never inlined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    ApiKey {
        header: String,
        key_env: String,
    },
    #[serde(rename = "oauth2")]
    OAuth2 {
        token_url: String,
        client_id: String,
        client_secret_env: String,
        #[serde(default)]
        scopes: Vec<String>,
        /// Refresh this many seconds before the token expires
        #[serde(default = "default_refresh_margin_secs")]
        refresh_margin_secs: u64,
    },
}

fn default_refresh_margin_secs() -> u64 {
    60
}

impl AuthConfig {
    /// Resolve secret references against the process environment
    pub fn resolve(&self) -> Result<Credentials, ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(&self, lookup: F) -> Result<Credentials, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret =
            |name: &str| lookup(name).ok_or_else(|| ConfigError::MissingEnv(name.to_string()));

        Ok(match self {
            AuthConfig::None => Credentials::None,
            AuthConfig::ApiKey { header, key_env } => Credentials::ApiKey {
                header: header.clone(),
                key: secret(key_env)?,
            },
            AuthConfig::OAuth2 {
                token_url,
                client_id,
                client_secret_env,
                scopes,
                refresh_margin_secs,
            } => Credentials::OAuth2 {
                token_url: token_url.clone(),
                client_id: client_id.clone(),
                client_secret: secret(client_secret_env)?,
                scopes: scopes.clone(),
                refresh_margin: Duration::from_secs(*refresh_margin_secs),
            },
        })
    }
}

/// Resolved credentials
#[derive(Clone)]
pub enum Credentials {
    None,
    ApiKey {
        header: String,
        key: String,
    },
    OAuth2 {
        token_url: String,
        client_id: String,
        client_secret: String,
        scopes: Vec<String>,
        refresh_margin: Duration,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::ApiKey { header, .. } => write!(f, "ApiKey {{ header: {header}, key: *** }}"),
            Self::OAuth2 {
                token_url,
                client_id,
                ..
            } => write!(
                f,
                "OAuth2 {{ token_url: {token_url}, client_id: {client_id}, client_secret: *** }}"
            ),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Applies credentials to outgoing requests, fetching tokens as needed
pub struct Authenticator {
    http: Client,
    credentials: Credentials,
    token: Option<CachedToken>,
    transient_statuses: Vec<u16>,
}

impl Authenticator {
    /// `transient_statuses` from the token endpoint are reported as
    /// [`SourceError::Transient`] instead of an auth rejection
    pub fn new(http: Client, credentials: Credentials, transient_statuses: Vec<u16>) -> Self {
        Self {
            http,
            credentials,
            token: None,
            transient_statuses,
        }
    }

    /// Drop the cached token so the next request fetches a fresh one
    pub fn invalidate(&mut self) {
        self.token = None;
    }

    pub fn uses_token(&self) -> bool {
        matches!(self.credentials, Credentials::OAuth2 { .. })
    }

    pub async fn apply(&mut self, builder: RequestBuilder) -> Result<RequestBuilder, SourceError> {
        let builder = match &self.credentials {
            Credentials::None => return Ok(builder),
            Credentials::ApiKey { header, key } => {
                return Ok(builder.header(header.as_str(), key.as_str()))
            }
            Credentials::OAuth2 { .. } => builder,
        };
        let token = self.bearer_token().await?;
        Ok(builder.header(header::AUTHORIZATION, format!("Bearer {token}")))
    }

    async fn bearer_token(&mut self) -> Result<String, SourceError> {
        if let Some(cached) = &self.token {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.access_token.clone());
            }
            debug!("Bearer token is about to expire, refreshing");
        }

        let Credentials::OAuth2 {
            token_url,
            client_id,
            client_secret,
            scopes,
            refresh_margin,
        } = &self.credentials
        else {
            return Err(SourceError::Config(
                "bearer token requested without OAuth2 credentials".into(),
            ));
        };

        let mut params = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", client_id.clone()),
            ("client_secret", client_secret.clone()),
        ];
        if !scopes.is_empty() {
            params.push(("scope", scopes.join(" ")));
        }

        let response = self
            .http
            .post(token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| SourceError::Transient {
                url: token_url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if self.transient_statuses.contains(&status.as_u16()) {
            return Err(SourceError::Transient {
                url: token_url.clone(),
                message: format!("token endpoint returned {status}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Auth(format!(
                "token endpoint returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Auth(format!("unparseable token response: {e}")))?;

        let ttl = Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS));
        let refresh_at = Instant::now() + ttl.saturating_sub(*refresh_margin);
        info!(ttl_secs = ttl.as_secs(), "Obtained vendor bearer token");

        self.token = Some(CachedToken {
            access_token: token.access_token.clone(),
            refresh_at,
        });
        Ok(token.access_token)
    }
}
