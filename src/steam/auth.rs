//! Steam account login.
//!
//! Uses the `IAuthenticationService` web API:
//! 1. `GetPasswordRSAPublicKey`: per-account RSA key
//! 2. `BeginAuthSessionViaCredentials`: encrypted password
//! 3. `UpdateAuthSessionWithSteamGuardCode`: the generated Steam Guard code
//! 4. `PollAuthSessionStatus`: until tokens are issued
//!
//! The access token becomes the `steamLoginSecure` cookie for
//! steamcommunity.com. The refresh token is kept so the session can be
//! renewed with `GenerateAccessTokenForApp` before the access token expires.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{check_eresult, AccountSession, USER_AGENT, WEB_API_URL};
use crate::types::{LogOnDetails, SteamId, WebSession};

const AUTH_SERVICE: &str = "IAuthenticationService";

/// `EAuthSessionGuardType::DeviceCode`.
const GUARD_DEVICE_CODE: i32 = 3;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLLS: u32 = 12;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    response: T,
}

#[derive(Debug, Deserialize)]
struct RsaKeyResponse {
    publickey_mod: String,
    publickey_exp: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct BeginAuthResponse {
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    interval: Option<f64>,
    #[serde(default)]
    steamid: Option<String>,
    #[serde(default)]
    allowed_confirmations: Vec<AllowedConfirmation>,
}

#[derive(Debug, Deserialize)]
struct AllowedConfirmation {
    confirmation_type: i32,
}

/// Token pair returned by `PollAuthSessionStatus` and
/// `GenerateAccessTokenForApp`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: i64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Logs accounts into Steam with password + Steam Guard code.
pub struct SteamAuthenticator {
    http: Client,
    base_url: String,
}

impl SteamAuthenticator {
    pub fn new() -> Result<Self> {
        Self::with_base_url(WEB_API_URL)
    }

    /// Point the authenticator at another web API host (for testing).
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client for Steam login")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{AUTH_SERVICE}/{method}/v1/", self.base_url)
    }

    async fn fetch_rsa_key(&self, account_name: &str) -> Result<RsaKeyResponse> {
        let resp = self
            .http
            .get(self.endpoint("GetPasswordRSAPublicKey"))
            .query(&[("account_name", account_name)])
            .send()
            .await
            .context("RSA key request failed")?;

        check_eresult(&resp, "RSA key request")?;
        let body: ApiResponse<RsaKeyResponse> = resp
            .error_for_status()
            .context("RSA key request returned an error status")?
            .json()
            .await
            .context("Failed to parse RSA key response")?;
        Ok(body.response)
    }

    async fn begin_session(
        &self,
        details: &LogOnDetails,
        encrypted_password: &str,
        timestamp: &str,
    ) -> Result<BeginAuthResponse> {
        let resp = self
            .http
            .post(self.endpoint("BeginAuthSessionViaCredentials"))
            .form(&[
                ("account_name", details.account_name.as_str()),
                ("encrypted_password", encrypted_password),
                ("encryption_timestamp", timestamp),
                ("remember_login", "true"),
                ("persistence", "1"),
                ("website_id", "Community"),
                ("device_friendly_name", "card-shuttle"),
            ])
            .send()
            .await
            .context("Begin auth session request failed")?;

        check_eresult(&resp, "Login")?;
        let body: ApiResponse<BeginAuthResponse> = resp
            .json()
            .await
            .context("Failed to parse begin auth session response")?;
        Ok(body.response)
    }

    async fn submit_guard_code(&self, client_id: &str, steam_id: &str, code: &str) -> Result<()> {
        let code_type = GUARD_DEVICE_CODE.to_string();
        let resp = self
            .http
            .post(self.endpoint("UpdateAuthSessionWithSteamGuardCode"))
            .form(&[
                ("client_id", client_id),
                ("steamid", steam_id),
                ("code", code),
                ("code_type", code_type.as_str()),
            ])
            .send()
            .await
            .context("Steam Guard code submission failed")?;

        check_eresult(&resp, "Steam Guard code")
    }

    async fn poll_tokens(
        &self,
        client_id: &str,
        request_id: &str,
        interval: Duration,
    ) -> Result<(String, String)> {
        for attempt in 1..=MAX_POLLS {
            let resp = self
                .http
                .post(self.endpoint("PollAuthSessionStatus"))
                .form(&[("client_id", client_id), ("request_id", request_id)])
                .send()
                .await
                .context("Auth session poll failed")?;

            check_eresult(&resp, "Auth session poll")?;
            let body: ApiResponse<TokenResponse> = resp
                .json()
                .await
                .context("Failed to parse auth session poll response")?;

            if let (Some(access), Some(refresh)) = (body.response.access_token, body.response.refresh_token) {
                return Ok((access, refresh));
            }

            debug!(attempt, "Auth session not approved yet");
            tokio::time::sleep(interval).await;
        }

        anyhow::bail!("Steam did not issue tokens after {MAX_POLLS} polls")
    }

    async fn generate_access_token(&self, steam_id: SteamId, refresh_token: &str) -> Result<TokenResponse> {
        let steam_id_str = steam_id.to_string();
        let resp = self
            .http
            .post(self.endpoint("GenerateAccessTokenForApp"))
            .form(&[("refresh_token", refresh_token), ("steamid", steam_id_str.as_str())])
            .send()
            .await
            .context("Access token renewal request failed")?;

        check_eresult(&resp, "Access token renewal")?;
        let body: ApiResponse<TokenResponse> = resp
            .error_for_status()
            .context("Access token renewal returned an error status")?
            .json()
            .await
            .context("Failed to parse access token renewal response")?;
        Ok(body.response)
    }
}

#[async_trait]
impl AccountSession for SteamAuthenticator {
    async fn log_on(&self, details: &LogOnDetails) -> Result<WebSession> {
        info!(account = %details.account_name, "Logging in to Steam...");

        let key = self.fetch_rsa_key(&details.account_name).await?;
        let encrypted = encrypt_password(&key, &details.password)?;

        let session = self
            .begin_session(details, &encrypted, &key.timestamp)
            .await?;
        let client_id = session
            .client_id
            .context("Login rejected: no client id returned")?;
        let request_id = session
            .request_id
            .context("Login rejected: no request id returned")?;
        let steam_id_str = session.steamid.context("Login rejected: no steam id returned")?;
        let steam_id = SteamId(
            steam_id_str
                .parse()
                .with_context(|| format!("Invalid steam id in login response: {steam_id_str}"))?,
        );

        if session
            .allowed_confirmations
            .iter()
            .any(|c| c.confirmation_type == GUARD_DEVICE_CODE)
        {
            self.submit_guard_code(&client_id, &steam_id_str, &details.two_factor_code)
                .await?;
        } else {
            warn!(account = %details.account_name, "Steam did not ask for a Steam Guard code");
        }

        let interval = session
            .interval
            .filter(|s| *s > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let (access_token, refresh_token) = self.poll_tokens(&client_id, &request_id, interval).await?;

        Ok(build_web_session(steam_id, access_token, refresh_token))
    }

    async fn refresh(&self, steam_id: SteamId, refresh_token: &SecretString) -> Result<WebSession> {
        let tokens = self
            .generate_access_token(steam_id, refresh_token.expose_secret())
            .await?;
        let access_token = tokens
            .access_token
            .context("Renewal rejected: no access token returned")?;
        // Steam only rotates the refresh token when it is close to expiring.
        let refresh_token = tokens
            .refresh_token
            .unwrap_or_else(|| refresh_token.expose_secret().clone());

        info!(steam_id = %steam_id, "Access token renewed");
        Ok(build_web_session(steam_id, access_token, refresh_token))
    }
}

/// RSA-PKCS#1 v1.5 encrypt the password with the account's published key.
fn encrypt_password(key: &RsaKeyResponse, password: &SecretString) -> Result<String> {
    let modulus = BigUint::parse_bytes(key.publickey_mod.as_bytes(), 16)
        .context("Invalid RSA modulus from Steam")?;
    let exponent = BigUint::parse_bytes(key.publickey_exp.as_bytes(), 16)
        .context("Invalid RSA exponent from Steam")?;
    let public_key = RsaPublicKey::new(modulus, exponent).context("Invalid RSA key from Steam")?;

    let mut rng = rand::thread_rng();
    let encrypted = public_key
        .encrypt(&mut rng, Pkcs1v15Encrypt, password.expose_secret().as_bytes())
        .context("Failed to encrypt password")?;
    Ok(STANDARD.encode(encrypted))
}

/// Cookies for steamcommunity.com from an access token.
fn build_web_session(steam_id: SteamId, access_token: String, refresh_token: String) -> WebSession {
    let session_id = uuid::Uuid::new_v4().simple().to_string()[..24].to_string();
    let login_secure = urlencoding::encode(&format!("{steam_id}||{access_token}")).into_owned();

    WebSession {
        steam_id,
        cookies: vec![
            format!("steamLoginSecure={login_secure}"),
            format!("sessionid={session_id}"),
        ],
        session_id,
        expires_at: token_expiry(&access_token),
        access_token: SecretString::new(access_token),
        refresh_token: SecretString::new(refresh_token),
    }
}

/// The `exp` claim of a Steam access token (a JWT).
fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: TokenClaims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp, 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
