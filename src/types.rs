//! Shared types for the card shuttle.
//!
//! These types form the data model used across the Steam adapter and the
//! trade pipeline. Collaborator traits in [`crate::steam`] speak only in
//! these types, so the pipeline never sees wire formats.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Steam Community app id (trading cards, emoticons, backgrounds).
pub const STEAM_COMMUNITY_APP_ID: u32 = 753;

/// Context id holding community items inside app 753.
pub const COMMUNITY_CONTEXT_ID: u64 = 6;

/// Offset between a 32-bit account id and an individual SteamID64.
const STEAM_ID64_BASE: u64 = 76_561_197_960_265_728;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A 64-bit Steam identifier for an individual account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SteamId(pub u64);

impl SteamId {
    pub fn from_account_id(account_id: u32) -> Self {
        SteamId(STEAM_ID64_BASE + u64::from(account_id))
    }

    /// The 32-bit account id, as used in trade offer URLs.
    pub fn account_id(&self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// Whether this id falls in the individual-account range.
    pub fn is_individual(&self) -> bool {
        self.0 > STEAM_ID64_BASE
    }
}

impl fmt::Display for SteamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which of the two configured accounts a value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountRole {
    /// Checked first; wins ties under the default policy.
    Primary,
    Secondary,
}

impl AccountRole {
    pub fn other(&self) -> Self {
        match self {
            AccountRole::Primary => AccountRole::Secondary,
            AccountRole::Secondary => AccountRole::Primary,
        }
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRole::Primary => write!(f, "primary"),
            AccountRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Login material for one account. Loaded once at startup.
#[derive(Debug)]
pub struct Credentials {
    pub account_name: String,
    pub password: SecretString,
    /// Base64 Steam Guard shared secret (login codes).
    pub shared_secret: SecretString,
    /// Base64 Steam Guard identity secret (mobile confirmations).
    pub identity_secret: SecretString,
    pub steam_id: SteamId,
}

/// What an [`crate::steam::AccountSession`] needs to authenticate.
#[derive(Debug)]
pub struct LogOnDetails {
    pub account_name: String,
    pub password: SecretString,
    /// Freshly generated Steam Guard code.
    pub two_factor_code: String,
}

/// An authenticated web session.
///
/// The cookies must be installed into both the trade component and the
/// community component before any trading call is valid.
#[derive(Debug)]
pub struct WebSession {
    pub steam_id: SteamId,
    pub session_id: String,
    pub access_token: SecretString,
    /// Exchanged for a new access token when this one runs out.
    pub refresh_token: SecretString,
    /// When the access token stops being accepted, if known.
    pub expires_at: Option<DateTime<Utc>>,
    /// `name=value` cookie strings scoped to steamcommunity.com.
    pub cookies: Vec<String>,
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// Application/context pair an inventory is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppContext {
    pub app_id: u32,
    pub context_id: u64,
}

impl Default for AppContext {
    fn default() -> Self {
        Self {
            app_id: STEAM_COMMUNITY_APP_ID,
            context_id: COMMUNITY_CONTEXT_ID,
        }
    }
}

/// One item of an inventory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub asset_id: String,
    pub class_id: String,
    pub instance_id: String,
    pub app_id: u32,
    pub context_id: u64,
    pub amount: u32,
    pub name: String,
    /// Category label, e.g. "Portal 2 Trading Card".
    pub category: String,
    pub tradable: bool,
}

impl fmt::Display for InventoryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] #{}", self.name, self.category, self.asset_id)
    }
}

// ---------------------------------------------------------------------------
// Trade offers
// ---------------------------------------------------------------------------

/// Steam's trade offer states (`ETradeOfferState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOfferState {
    Invalid,
    Active,
    Accepted,
    Countered,
    Expired,
    Canceled,
    Declined,
    InvalidItems,
    CreatedNeedsConfirmation,
    CanceledBySecondFactor,
    InEscrow,
}

impl TradeOfferState {
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => TradeOfferState::Active,
            3 => TradeOfferState::Accepted,
            4 => TradeOfferState::Countered,
            5 => TradeOfferState::Expired,
            6 => TradeOfferState::Canceled,
            7 => TradeOfferState::Declined,
            8 => TradeOfferState::InvalidItems,
            9 => TradeOfferState::CreatedNeedsConfirmation,
            10 => TradeOfferState::CanceledBySecondFactor,
            11 => TradeOfferState::InEscrow,
            _ => TradeOfferState::Invalid,
        }
    }

    pub fn needs_confirmation(&self) -> bool {
        *self == TradeOfferState::CreatedNeedsConfirmation
    }
}

impl fmt::Display for TradeOfferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TradeOfferState::Invalid => "invalid",
            TradeOfferState::Active => "sent",
            TradeOfferState::Accepted => "accepted",
            TradeOfferState::Countered => "countered",
            TradeOfferState::Expired => "expired",
            TradeOfferState::Canceled => "canceled",
            TradeOfferState::Declined => "declined",
            TradeOfferState::InvalidItems => "invalid items",
            TradeOfferState::CreatedNeedsConfirmation => "pending",
            TradeOfferState::CanceledBySecondFactor => "canceled by second factor",
            TradeOfferState::InEscrow => "in escrow",
        };
        write!(f, "{label}")
    }
}

/// Result of submitting a new offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentOffer {
    pub id: String,
    pub state: TradeOfferState,
}

/// A trade offer as seen by one of its parties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeOffer {
    pub id: String,
    /// The other party of the offer.
    pub partner: SteamId,
    /// Items moving towards the viewing party.
    pub items: Vec<InventoryItem>,
    pub state: TradeOfferState,
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Summary of one successful inventory-check → accept cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub sender: AccountRole,
    pub receiver: AccountRole,
    pub offer_id: String,
    pub items_moved: usize,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cycle #{}: {} -> {} offer={} items={}",
            self.cycle_number, self.sender, self.receiver, self.offer_id, self.items_moved,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Everything that can end a cycle.
#[derive(Debug, thiserror::Error)]
pub enum TradeError {
    #[error("Login failed for {account}: {cause:#}")]
    LoginFailure { account: String, cause: anyhow::Error },

    #[error("Web session for {account} is not established")]
    SessionNotReady { account: String },

    #[error("Web session for {account} has expired")]
    SessionExpired { account: String },

    #[error("Error fetching inventory for {account}: {cause:#}")]
    InventoryFetch { account: String, cause: anyhow::Error },

    #[error("No trading cards found on {scope}")]
    NoCardsFound { scope: String },

    #[error("Error sending trade: {cause:#}")]
    OfferSend { cause: anyhow::Error },

    #[error("Error confirming trade {offer_id}: {cause:#}")]
    Confirmation { offer_id: String, cause: anyhow::Error },

    #[error("No matching trade offer {offer_id} found")]
    OfferNotFound { offer_id: String },

    #[error("Error accepting trade {offer_id}: {cause:#}")]
    OfferAccept { offer_id: String, cause: anyhow::Error },
}

impl TradeError {
    /// Keep a `TradeError` raised inside a collaborator, otherwise wrap the
    /// cause with the stage's own variant.
    pub fn from_collaborator(
        err: anyhow::Error,
        wrap: impl FnOnce(anyhow::Error) -> TradeError,
    ) -> TradeError {
        match err.downcast::<TradeError>() {
            Ok(trade_err) => trade_err,
            Err(other) => wrap(other),
        }
    }

    /// Fatal errors stop the pipeline instead of rescheduling a check.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TradeError::LoginFailure { .. })
    }

    /// The account whose web session has to be renewed before it can trade.
    pub fn stale_session(&self) -> Option<&str> {
        match self {
            TradeError::SessionNotReady { account } | TradeError::SessionExpired { account } => {
                Some(account)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
