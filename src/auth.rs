//! Bearer credential management: persistence, refresh, device authorization.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;

use crate::config::{Config, state_dir};

/// OAuth scopes needed for card upload
const SCOPES: &str = "profile offline_access openid";

/// Access/refresh credential pair for one card service identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl TokenSet {
    /// True if the access token can be used without a network call.
    pub fn is_usable(&self) -> bool {
        !self.access_token.is_empty() && OffsetDateTime::now_utc() < self.expires_at
    }
}

/// Token endpoint response for both refresh and device-code grants
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    86400
}

/// Device authorization handshake issued by the auth host
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    #[serde(default = "default_device_interval")]
    pub interval: u64,
    #[serde(default = "default_device_expiry")]
    pub expires_in: u64,
}

fn default_device_interval() -> u64 {
    5
}

fn default_device_expiry() -> u64 {
    900
}

impl DeviceCode {
    /// URL the user should open; prefers the variant with the code embedded.
    pub fn verification_url(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .unwrap_or(&self.verification_uri)
    }
}

/// One round of polling the token endpoint during device authorization.
#[derive(Debug, Clone)]
pub enum DevicePoll {
    Granted(TokenGrant),
    Pending,
    SlowDown,
    Denied(String),
}

/// The OAuth token endpoints, abstracted so credential behavior is testable
/// without a network.
pub trait TokenExchange: Send {
    fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;
    fn request_device_code(&self) -> Result<DeviceCode>;
    fn poll_device_token(&self, device_code: &str) -> Result<DevicePoll>;
}

/// ureq implementation against the auth host.
pub struct HttpTokenExchange {
    agent: ureq::Agent,
    auth_url: String,
    client_id: String,
    audience: String,
}

impl HttpTokenExchange {
    pub fn new(config: &Config) -> Result<Self> {
        if config.client_id.is_empty() {
            bail!("client_id is not configured; run: cardsmith config set client_id <id>");
        }
        let agent = ureq::builder()
            .timeout(config.limits.http_timeout())
            .build();
        Ok(Self {
            agent,
            auth_url: config.auth_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            audience: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn token_endpoint(&self) -> String {
        format!("{}/oauth/token", self.auth_url)
    }
}

#[derive(Debug, Deserialize)]
struct OauthErrorBody {
    #[serde(default)]
    error: String,
}

impl TokenExchange for HttpTokenExchange {
    fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let response = self
            .agent
            .post(&self.token_endpoint())
            .send_json(serde_json::json!({
                "grant_type": "refresh_token",
                "client_id": self.client_id,
                "refresh_token": refresh_token,
            }))
            .context("token refresh request failed")?;
        let grant: TokenGrant = response
            .into_json()
            .context("failed to parse token refresh response")?;
        Ok(grant)
    }

    fn request_device_code(&self) -> Result<DeviceCode> {
        let response = self
            .agent
            .post(&format!("{}/oauth/device/code", self.auth_url))
            .send_json(serde_json::json!({
                "client_id": self.client_id,
                "scope": SCOPES,
                "audience": self.audience,
            }))
            .context("device code request failed")?;
        let code: DeviceCode = response
            .into_json()
            .context("failed to parse device code response")?;
        Ok(code)
    }

    fn poll_device_token(&self, device_code: &str) -> Result<DevicePoll> {
        let result = self
            .agent
            .post(&self.token_endpoint())
            .send_json(serde_json::json!({
                "grant_type": "urn:ietf:params:oauth:grant-type:device_code",
                "client_id": self.client_id,
                "device_code": device_code,
            }));

        match result {
            Ok(response) => {
                let grant: TokenGrant = response
                    .into_json()
                    .context("failed to parse device token response")?;
                Ok(DevicePoll::Granted(grant))
            }
            // The endpoint reports pending/denied states as 4xx with an
            // error code in the body.
            Err(ureq::Error::Status(_, response)) => {
                let body: OauthErrorBody = response
                    .into_json()
                    .context("failed to parse device token error")?;
                match body.error.as_str() {
                    "authorization_pending" => Ok(DevicePoll::Pending),
                    "slow_down" => Ok(DevicePoll::SlowDown),
                    "expired_token" | "access_denied" => Ok(DevicePoll::Denied(body.error)),
                    other => bail!("device authorization failed: {other}"),
                }
            }
            Err(err) => Err(err).context("device token poll failed"),
        }
    }
}

/// Path of the persisted token pair (~/.cardsmith/tokens.json)
pub fn tokens_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("tokens.json"))
}

/// Owns the credential pair for one card service identity and its on-disk
/// persistence. Every successful exchange overwrites the token file so a
/// later process start resumes without re-authorizing.
pub struct Authenticator {
    exchange: Box<dyn TokenExchange>,
    tokens: Option<TokenSet>,
    store_path: PathBuf,
}

impl Authenticator {
    /// Create an authenticator backed by the given store file, loading any
    /// previously saved tokens. A missing or unreadable file just means no
    /// credential yet.
    pub fn new(exchange: Box<dyn TokenExchange>, store_path: PathBuf) -> Self {
        let tokens = fs::read_to_string(&store_path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok());
        Self {
            exchange,
            tokens,
            store_path,
        }
    }

    /// Authenticator at the default per-user token location.
    pub fn from_home(exchange: Box<dyn TokenExchange>) -> Result<Self> {
        Ok(Self::new(exchange, tokens_path()?))
    }

    /// True if a non-expired access token is held.
    pub fn is_valid(&self) -> bool {
        self.tokens.as_ref().is_some_and(TokenSet::is_usable)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access_token.as_str())
    }

    /// Make sure a usable access token is held, refreshing if the current one
    /// has expired. Returns whether a usable credential now exists; refresh
    /// failure is reported as `false`, never raised.
    pub fn ensure_valid(&mut self) -> bool {
        if self.is_valid() {
            return true;
        }
        let Some(refresh_token) = self.tokens.as_ref().and_then(|t| t.refresh_token.clone())
        else {
            return false;
        };
        match self.exchange.refresh(&refresh_token) {
            Ok(grant) => {
                self.apply_grant(grant);
                true
            }
            Err(err) => {
                tracing::warn!("token refresh failed: {err:#}");
                false
            }
        }
    }

    /// Run the interactive device authorization flow: print the verification
    /// URL and user code, then poll the token endpoint until the user
    /// completes authorization, is denied, or the handshake expires.
    pub fn authorize(&mut self) -> Result<bool> {
        let code = self.exchange.request_device_code()?;

        println!();
        println!("  To authorize, visit: {}", code.verification_url());
        println!("  Your code: {}", code.user_code);

        let deadline = OffsetDateTime::now_utc() + Duration::from_secs(code.expires_in);
        let mut interval = code.interval;

        while OffsetDateTime::now_utc() < deadline {
            std::thread::sleep(Duration::from_secs(interval));
            match self.exchange.poll_device_token(&code.device_code)? {
                DevicePoll::Granted(grant) => {
                    self.apply_grant(grant);
                    return Ok(true);
                }
                DevicePoll::Pending => continue,
                DevicePoll::SlowDown => {
                    interval += 2;
                }
                DevicePoll::Denied(reason) => {
                    println!("  Authorization failed: {reason}");
                    return Ok(false);
                }
            }
        }

        println!("  Authorization timed out.");
        Ok(false)
    }

    fn apply_grant(&mut self, grant: TokenGrant) {
        // A refresh response may omit the refresh token; keep the old one.
        let refresh_token = grant
            .refresh_token
            .or_else(|| self.tokens.as_ref().and_then(|t| t.refresh_token.clone()));
        let tokens = TokenSet {
            access_token: grant.access_token,
            refresh_token,
            expires_at: OffsetDateTime::now_utc() + Duration::from_secs(grant.expires_in),
        };
        if let Err(err) = self.save(&tokens) {
            tracing::warn!("failed to persist tokens: {err:#}");
        }
        self.tokens = Some(tokens);
    }

    /// Overwrite the token file atomically (write-then-rename).
    fn save(&self, tokens: &TokenSet) -> Result<()> {
        if let Some(dir) = self.store_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_string_pretty(tokens)?;
        let tmp = self.store_path.with_extension("json.tmp");
        fs::write(&tmp, data)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.store_path)
            .with_context(|| format!("failed to replace {}", self.store_path.display()))?;
        Ok(())
    }
}
