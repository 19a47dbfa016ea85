//! Trade offers and mobile confirmations for one account.
//!
//! A thin adapter over `steam-tradeoffer-manager`: the manager owns the
//! wire protocol (inventory paging, offer forms, `IEconService` listing,
//! `mobileconf` signing with the identity secret). This module converts its
//! types into the crate's own and classifies its failures.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::error::Error as StdError;
use std::sync::RwLock;
use steam_tradeoffer_manager::request::{NewTradeOffer, NewTradeOfferItem};
use steam_tradeoffer_manager::response::Asset;
use steam_tradeoffer_manager::TradeOfferManager;
use steamid_ng::SteamID;
use tracing::{debug, info};

use super::{ConfirmationService, TradeManager};
use crate::types::{
    AppContext, InventoryItem, SentOffer, SteamId, TradeError, TradeOffer, TradeOfferState,
    WebSession,
};

/// Trade and confirmation component for one account.
pub struct SteamTrades {
    manager: TradeOfferManager,
    steam_id: SteamId,
    username: String,
    ready: RwLock<bool>,
}

impl SteamTrades {
    pub fn new(steam_id: SteamId, username: &str, identity_secret: &SecretString) -> Self {
        let manager = TradeOfferManager::builder()
            .identity_secret(identity_secret.expose_secret().clone())
            .build();
        Self {
            manager,
            steam_id,
            username: username.to_string(),
            ready: RwLock::new(false),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        let ready = *self
            .ready
            .read()
            .map_err(|_| anyhow!("Trade session lock poisoned"))?;
        if !ready {
            return Err(TradeError::SessionNotReady {
                account: self.username.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn install(&self, session: &WebSession) -> Result<()> {
        self.manager
            .set_cookies(&session.cookies);
        let mut ready = self
            .ready
            .write()
            .map_err(|_| anyhow!("Trade session lock poisoned"))?;
        *ready = true;
        Ok(())
    }

    /// Steam answers a dead session with 401/403; everything else is a
    /// plain remote failure.
    fn remote_error<E>(&self, err: E, action: &str) -> anyhow::Error
    where
        E: StdError + Send + Sync + 'static,
    {
        if is_auth_rejection(&err) {
            return TradeError::SessionExpired {
                account: self.username.clone(),
            }
            .into();
        }
        anyhow::Error::new(err).context(format!("{action} failed"))
    }
}

#[async_trait]
impl TradeManager for SteamTrades {
    fn set_cookies(&self, session: &WebSession) -> Result<()> {
        self.install(session)
    }

    async fn get_inventory(&self, context: AppContext) -> Result<Vec<InventoryItem>> {
        self.ensure_ready()?;

        let assets = self
            .manager
            .get_inventory_with_untradables(SteamID::from(self.steam_id.0), context.app_id, context.context_id)
            .await
            .map_err(|e| self.remote_error(e, "Inventory request"))?;

        let items: Vec<InventoryItem> = assets.iter().map(item_from_asset).collect();
        debug!(account = %self.username, count = items.len(), "Inventory fetched");
        Ok(items)
    }

    async fn send_offer(
        &self,
        partner: SteamId,
        items: &[InventoryItem],
        message: &str,
    ) -> Result<SentOffer> {
        self.ensure_ready()?;

        let items_to_give = items
            .iter()
            .map(offer_item)
            .collect::<Result<Vec<_>>>()?;
        let offer = NewTradeOffer::builder(SteamID::from(partner.0))
            .items_to_give(items_to_give)
            .message(message.to_string())
            .build();

        let sent = self
            .manager
            .send_offer(&offer)
            .await
            .map_err(|e| self.remote_error(e, "Send offer"))?;

        let state = if sent.needs_mobile_confirmation {
            TradeOfferState::CreatedNeedsConfirmation
        } else {
            TradeOfferState::Active
        };
        let id = sent.tradeofferid.to_string();
        info!(offer_id = %id, partner = %partner, items = items.len(), "Offer submitted");
        Ok(SentOffer { id, state })
    }

    async fn get_incoming_offers(&self) -> Result<Vec<TradeOffer>> {
        self.ensure_ready()?;

        let offers = self
            .manager
            .get_active_trade_offers()
            .await
            .map_err(|e| self.remote_error(e, "Trade offer listing"))?;

        Ok(offers
            .iter()
            .filter(|o| !o.is_our_offer)
            .map(|o| TradeOffer {
                id: o.tradeofferid.to_string(),
                partner: SteamId(u64::from(o.partner)),
                items: o.items_to_receive.iter().map(item_from_asset).collect(),
                state: TradeOfferState::from_code(o.trade_offer_state as i32),
            })
            .collect())
    }

    async fn accept_offer(&self, offer: &TradeOffer) -> Result<()> {
        self.ensure_ready()?;

        let accepted = self
            .manager
            .accept_offer_id(offer_id(&offer.id)?)
            .await
            .map_err(|e| self.remote_error(e, "Accept offer"))?;
        debug!(offer_id = %offer.id, trade_id = ?accepted.tradeid, "Offer accepted");
        Ok(())
    }
}

#[async_trait]
impl ConfirmationService for SteamTrades {
    fn set_cookies(&self, session: &WebSession) -> Result<()> {
        self.install(session)
    }

    async fn accept_confirmation_for_object(&self, object_id: &str) -> Result<bool> {
        self.ensure_ready()?;

        self.manager
            .confirm_offer_id(offer_id(object_id)?)
            .await
            .map_err(|e| self.remote_error(e, "Confirmation"))?;
        info!(account = %self.username, object_id, "Confirmation accepted");
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

fn item_from_asset(asset: &Asset) -> InventoryItem {
    InventoryItem {
        asset_id: asset.assetid.to_string(),
        class_id: asset.classinfo.classid.to_string(),
        instance_id: asset.classinfo.instanceid.unwrap_or(0).to_string(),
        app_id: asset.appid,
        context_id: asset.contextid,
        amount: asset.amount,
        name: asset.classinfo.name.clone(),
        category: asset.classinfo.r#type.clone(),
        tradable: asset.classinfo.tradable,
    }
}

fn offer_item(item: &InventoryItem) -> Result<NewTradeOfferItem> {
    Ok(NewTradeOfferItem {
        appid: item.app_id,
        contextid: item.context_id,
        assetid: item
            .asset_id
            .parse()
            .with_context(|| format!("Invalid asset id: {}", item.asset_id))?,
        amount: item.amount,
    })
}

fn offer_id(id: &str) -> Result<u64> {
    id.parse().with_context(|| format!("Invalid trade offer id: {id}"))
}

/// Whether any error in the chain is an HTTP 401/403 from Steam.
fn is_auth_rejection(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        let status = e.downcast_ref::<reqwest::Error>().and_then(|r| r.status());
        if matches!(status, Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)) {
            return true;
        }
        current = e.source();
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
