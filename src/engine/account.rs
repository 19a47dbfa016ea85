//! One configured Steam account, its login bring-up and session renewal.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::steam::{self, AccountSession, ConfirmationService, TradeManager};
use crate::types::{AccountRole, Credentials, LogOnDetails, SteamId, TradeError, WebSession};

/// What is kept of the installed web session.
struct SessionTokens {
    steam_id: SteamId,
    refresh_token: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

/// A configured account with its session provider and trade and community
/// components.
pub struct Account {
    pub role: AccountRole,
    credentials: Credentials,
    sessions: Arc<dyn AccountSession>,
    pub trades: Arc<dyn TradeManager>,
    pub community: Arc<dyn ConfirmationService>,
    tokens: Mutex<Option<SessionTokens>>,
}

impl Account {
    pub fn new(
        role: AccountRole,
        credentials: Credentials,
        sessions: Arc<dyn AccountSession>,
        trades: Arc<dyn TradeManager>,
        community: Arc<dyn ConfirmationService>,
    ) -> Self {
        Self {
            role,
            credentials,
            sessions,
            trades,
            community,
            tokens: Mutex::new(None),
        }
    }

    pub fn username(&self) -> &str {
        &self.credentials.account_name
    }

    pub fn steam_id(&self) -> SteamId {
        self.credentials.steam_id
    }

    fn login_failure(&self, cause: anyhow::Error) -> TradeError {
        TradeError::LoginFailure {
            account: self.username().to_string(),
            cause,
        }
    }

    /// Log in with a fresh Steam Guard code and install the resulting web
    /// session into both the trade and the community component.
    pub async fn log_on(&self) -> Result<(), TradeError> {
        let code = steam::guard_code(&self.credentials.shared_secret).map_err(|e| self.login_failure(e))?;
        let details = LogOnDetails {
            account_name: self.credentials.account_name.clone(),
            password: SecretString::new(self.credentials.password.expose_secret().clone()),
            two_factor_code: code,
        };

        let session = self
            .sessions
            .log_on(&details)
            .await
            .map_err(|e| self.login_failure(e))?;
        info!(account = %self, steam_id = %session.steam_id, "Logged in");

        self.install(session)?;
        info!(account = %self, "Web session established");
        Ok(())
    }

    /// Replace the web session: refresh token first, full login if Steam
    /// refuses it. Fails with `LoginFailure` when both are rejected.
    pub async fn renew_session(&self) -> Result<(), TradeError> {
        let refresh = self.with_tokens(|tokens| {
            tokens.map(|t| (t.steam_id, SecretString::new(t.refresh_token.expose_secret().clone())))
        })?;

        if let Some((steam_id, refresh_token)) = refresh {
            match self.sessions.refresh(steam_id, &refresh_token).await {
                Ok(session) => {
                    self.install(session)?;
                    info!(account = %self, "Web session renewed");
                    return Ok(());
                }
                Err(err) => warn!(account = %self, error = %format!("{err:#}"), "Session refresh rejected, logging in again"),
            }
        }

        self.log_on().await
    }

    /// Whether the installed session runs out within `margin`. Accounts that
    /// never logged in, or whose expiry is unknown, report `false`.
    pub fn session_expires_within(&self, margin: Duration) -> bool {
        let expires_at = self
            .with_tokens(|tokens| tokens.and_then(|t| t.expires_at))
            .ok()
            .flatten();
        match (expires_at, chrono::Duration::from_std(margin)) {
            (Some(at), Ok(margin)) => at <= Utc::now() + margin,
            (Some(_), Err(_)) => true,
            (None, _) => false,
        }
    }

    fn install(&self, session: WebSession) -> Result<(), TradeError> {
        self.trades
            .set_cookies(&session)
            .map_err(|e| self.login_failure(e))?;
        self.community
            .set_cookies(&session)
            .map_err(|e| self.login_failure(e))?;

        let mut tokens = self
            .tokens
            .lock()
            .map_err(|_| self.login_failure(anyhow::anyhow!("session lock poisoned")))?;
        *tokens = Some(SessionTokens {
            steam_id: session.steam_id,
            refresh_token: session.refresh_token,
            expires_at: session.expires_at,
        });
        Ok(())
    }

    fn with_tokens<T>(&self, read: impl FnOnce(Option<&SessionTokens>) -> T) -> Result<T, TradeError> {
        let tokens = self
            .tokens
            .lock()
            .map_err(|_| self.login_failure(anyhow::anyhow!("session lock poisoned")))?;
        Ok(read(tokens.as_ref()))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.credentials.account_name, self.role)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
