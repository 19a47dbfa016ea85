//! Steam collaborators.
//!
//! Defines the traits the trade pipeline drives and provides the
//! implementations used by the binary:
//! - `SteamAuthenticator`: account login and session renewal
//! - `SteamTrades`: inventory, offers and mobile confirmations, backed by
//!   `steam-tradeoffer-manager`

pub mod auth;
pub mod offers;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::types::{AppContext, InventoryItem, LogOnDetails, SentOffer, SteamId, TradeOffer, WebSession};

pub const WEB_API_URL: &str = "https://api.steampowered.com";

const USER_AGENT: &str = "card-shuttle/0.1.0";

/// Logs an account in and keeps its web session alive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountSession: Send + Sync {
    async fn log_on(&self, details: &LogOnDetails) -> Result<WebSession>;

    /// Trade a refresh token for a fresh web session.
    async fn refresh(&self, steam_id: SteamId, refresh_token: &SecretString) -> Result<WebSession>;
}

/// Web-session-backed trading for one account.
///
/// Every remote call fails with `TradeError::SessionNotReady` until
/// `set_cookies` has been called, and with `TradeError::SessionExpired`
/// once Steam stops accepting the installed session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeManager: Send + Sync {
    /// Install the web session cookies.
    fn set_cookies(&self, session: &WebSession) -> Result<()>;

    /// Fetch a full inventory snapshot for the given app/context.
    async fn get_inventory(&self, context: AppContext) -> Result<Vec<InventoryItem>>;

    /// Offer `items` from this account to `partner`, asking nothing in return.
    async fn send_offer(
        &self,
        partner: SteamId,
        items: &[InventoryItem],
        message: &str,
    ) -> Result<SentOffer>;

    /// Active offers other accounts have sent to this one.
    async fn get_incoming_offers(&self) -> Result<Vec<TradeOffer>>;

    async fn accept_offer(&self, offer: &TradeOffer) -> Result<()>;
}

/// Mobile-authenticator confirmations for one account.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfirmationService: Send + Sync {
    /// Install the web session cookies.
    fn set_cookies(&self, session: &WebSession) -> Result<()>;

    /// Accept the pending confirmation created for `object_id` (a trade
    /// offer id). Returns `false` when no such confirmation is listed yet.
    async fn accept_confirmation_for_object(&self, object_id: &str) -> Result<bool>;
}

/// Steam Guard login code for the current time.
pub fn guard_code(shared_secret: &SecretString) -> Result<String> {
    another_steam_totp::generate_auth_code(shared_secret.expose_secret().clone(), None)
        .map_err(|e| anyhow!("Failed to generate Steam Guard code: {e}"))
}

/// Steam reports call results in the `x-eresult` header; 1 means OK.
pub(crate) fn check_eresult(resp: &reqwest::Response, action: &str) -> Result<()> {
    let eresult = resp
        .headers()
        .get("x-eresult")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("1");
    if eresult != "1" {
        anyhow::bail!("{action} rejected by Steam (eresult {eresult})");
    }
    Ok(())
}
