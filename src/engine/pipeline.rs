//! Cross-account trade pipeline.
//!
//! One cycle walks CheckInventory → PrepareOffer → SendOffer → ConfirmOffer
//! → AcceptOffer. The sender/receiver choice is a [`TradeRoles`] value that
//! lives for one cycle only. Every terminal outcome, success or failure, is
//! turned into a [`NextAction`] so a failed cycle never stalls the loop.
//!
//! Web sessions are renewed before a cycle when they are about to expire,
//! and after a cycle that failed on a stale session. A renewal Steam
//! refuses is a `LoginFailure`, which stops the loop.

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::account::Account;
use super::selector::{select_sender, split_cards, TieBreak};
use crate::types::{AccountRole, AppContext, CycleReport, InventoryItem, SentOffer, TradeError, TradeOffer};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timing and policy knobs for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub context: AppContext,
    pub tie_break: TieBreak,
    /// Wait between role selection and the authoritative re-fetch.
    pub prepare_delay: Duration,
    /// Wait between sending and the first confirmation attempt.
    pub confirm_delay: Duration,
    /// Wait between confirming and the first acceptance attempt.
    pub accept_delay: Duration,
    /// Wait before the next cycle, after any non-fatal outcome.
    pub cycle_delay: Duration,
    pub poll_interval: Duration,
    /// Upper bound for confirmation and acceptance polling.
    pub poll_timeout: Duration,
    /// Renew a web session when it expires within this window.
    pub session_margin: Duration,
    pub offer_message: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context: AppContext::default(),
            tie_break: TieBreak::Primary,
            prepare_delay: Duration::from_secs(2),
            confirm_delay: Duration::from_secs(10),
            accept_delay: Duration::from_secs(3),
            cycle_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(60),
            session_margin: Duration::from_secs(300),
            offer_message: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Sender and receiver for the current cycle. Always two distinct accounts.
#[derive(Clone, Copy)]
pub struct TradeRoles<'a> {
    pub sender: &'a Account,
    pub receiver: &'a Account,
}

/// How a cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Success(CycleReport),
    /// The cycle was abandoned; the next one may succeed.
    Recoverable(TradeError),
    /// Nothing will succeed without operator action.
    Fatal(TradeError),
}

/// What the driver does after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    RunAgain(Duration),
    Stop,
}

impl CycleOutcome {
    pub fn from_error(err: TradeError) -> Self {
        if err.is_fatal() {
            CycleOutcome::Fatal(err)
        } else {
            CycleOutcome::Recoverable(err)
        }
    }

    /// Single decision point for every terminal outcome.
    pub fn next_action(&self, cycle_delay: Duration) -> NextAction {
        match self {
            CycleOutcome::Success(_) | CycleOutcome::Recoverable(_) => NextAction::RunAgain(cycle_delay),
            CycleOutcome::Fatal(_) => NextAction::Stop,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Success(_))
    }

    fn log(&self) {
        match self {
            CycleOutcome::Success(report) => info!(%report, "Cycle complete"),
            CycleOutcome::Recoverable(err @ TradeError::NoCardsFound { .. }) => {
                warn!(error = %err, "Nothing to trade this cycle")
            }
            CycleOutcome::Recoverable(err) => warn!(error = %err, "Cycle abandoned"),
            CycleOutcome::Fatal(err) => error!(error = %err, "Cycle failed fatally"),
        }
    }
}

/// Totals over a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub transfers: u64,
    pub items_moved: u64,
    /// Cycles that found no cards on either side.
    pub idle: u64,
    pub failures: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Success(report) => {
                self.transfers += 1;
                self.items_moved += report.items_moved as u64;
            }
            CycleOutcome::Recoverable(TradeError::NoCardsFound { .. }) => self.idle += 1,
            CycleOutcome::Recoverable(_) | CycleOutcome::Fatal(_) => self.failures += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct TradePipeline {
    primary: Account,
    secondary: Account,
    config: PipelineConfig,
    cycle_count: u64,
}

impl TradePipeline {
    pub fn new(primary: Account, secondary: Account, config: PipelineConfig) -> Self {
        Self {
            primary,
            secondary,
            config,
            cycle_count: 0,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn account(&self, role: AccountRole) -> &Account {
        match role {
            AccountRole::Primary => &self.primary,
            AccountRole::Secondary => &self.secondary,
        }
    }

    /// Run cycles until `shutdown` resolves or a fatal outcome stops the loop.
    pub async fn run<F: Future>(&mut self, shutdown: F) -> RunSummary {
        tokio::pin!(shutdown);
        let mut summary = RunSummary::default();

        loop {
            let outcome = tokio::select! {
                outcome = self.run_cycle() => outcome,
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
            };

            outcome.log();
            summary.record(&outcome);

            match outcome.next_action(self.config.cycle_delay) {
                NextAction::RunAgain(delay) => {
                    debug!(delay_secs = delay.as_secs_f64(), "Next inventory check scheduled");
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = &mut shutdown => {
                            info!("Shutdown signal received.");
                            break;
                        }
                    }
                }
                NextAction::Stop => {
                    error!("Stopping pipeline after fatal outcome");
                    break;
                }
            }
        }

        summary
    }

    /// Run exactly one cycle.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycle_count += 1;
        let cycle = self.cycle_count;
        info!(cycle, "Starting cycle");

        if let Err(err) = self.renew_expiring_sessions().await {
            return CycleOutcome::from_error(err);
        }

        match self.transfer(cycle).await {
            Ok(report) => CycleOutcome::Success(report),
            Err(err) => {
                if let Some(username) = err.stale_session() {
                    if let Err(login_err) = self.renew_stale_session(username).await {
                        return CycleOutcome::from_error(login_err);
                    }
                }
                CycleOutcome::from_error(err)
            }
        }
    }

    // -- Sessions ----------------------------------------------------------

    async fn renew_expiring_sessions(&self) -> Result<(), TradeError> {
        for account in [&self.primary, &self.secondary] {
            if account.session_expires_within(self.config.session_margin) {
                info!(account = %account, "Web session about to expire, renewing");
                account.renew_session().await?;
            }
        }
        Ok(())
    }

    /// Renew the account named in a stale-session error; both when the name
    /// matches neither.
    async fn renew_stale_session(&self, username: &str) -> Result<(), TradeError> {
        let named: Vec<&Account> = [&self.primary, &self.secondary]
            .into_iter()
            .filter(|a| a.username() == username)
            .collect();
        let targets = if named.is_empty() {
            vec![&self.primary, &self.secondary]
        } else {
            named
        };

        for account in targets {
            warn!(account = %account, "Web session rejected, renewing");
            account.renew_session().await?;
        }
        Ok(())
    }

    async fn transfer(&self, cycle: u64) -> Result<CycleReport, TradeError> {
        let roles = self.check_inventory().await?;
        sleep(self.config.prepare_delay).await;

        let items = self.prepare_offer(roles).await?;
        let offer = self.send_offer(roles, &items).await?;

        sleep(self.config.confirm_delay).await;
        self.confirm_offer(roles, &offer).await?;

        sleep(self.config.accept_delay).await;
        self.accept_offer(roles, &offer.id).await?;

        Ok(CycleReport {
            cycle_number: cycle,
            sender: roles.sender.role,
            receiver: roles.receiver.role,
            offer_id: offer.id,
            items_moved: items.len(),
            timestamp: Utc::now(),
        })
    }

    // -- Stages ------------------------------------------------------------

    /// Fetch both inventories and decide who sends.
    async fn check_inventory(&self) -> Result<TradeRoles<'_>, TradeError> {
        let (primary_cards, secondary_cards) = futures::try_join!(
            self.fetch_cards(&self.primary),
            self.fetch_cards(&self.secondary),
        )?;

        info!(
            primary = primary_cards.len(),
            secondary = secondary_cards.len(),
            "Inventories checked"
        );

        let sender = select_sender(primary_cards.len(), secondary_cards.len(), self.config.tie_break)
            .ok_or_else(|| TradeError::NoCardsFound {
                scope: "either account".to_string(),
            })?;

        let roles = TradeRoles {
            sender: self.account(sender),
            receiver: self.account(sender.other()),
        };
        info!(sender = %roles.sender, receiver = %roles.receiver, "Roles assigned");
        Ok(roles)
    }

    /// Re-fetch the sender's inventory for the authoritative item list.
    async fn prepare_offer(&self, roles: TradeRoles<'_>) -> Result<Vec<InventoryItem>, TradeError> {
        let cards = self.fetch_cards(roles.sender).await?;
        if cards.is_empty() {
            return Err(TradeError::NoCardsFound {
                scope: roles.sender.to_string(),
            });
        }
        info!(count = cards.len(), "Found {} Steam cards. Sending trade...", cards.len());
        Ok(cards)
    }

    async fn send_offer(&self, roles: TradeRoles<'_>, items: &[InventoryItem]) -> Result<SentOffer, TradeError> {
        let sent = roles
            .sender
            .trades
            .send_offer(roles.receiver.steam_id(), items, &self.config.offer_message)
            .await
            .map_err(|e| TradeError::from_collaborator(e, |cause| TradeError::OfferSend { cause }))?;

        info!(offer_id = %sent.id, status = %sent.state, "Trade sent");
        Ok(sent)
    }

    async fn confirm_offer(&self, roles: TradeRoles<'_>, offer: &SentOffer) -> Result<(), TradeError> {
        if !offer.state.needs_confirmation() {
            info!(offer_id = %offer.id, status = %offer.state, "Trade needs no mobile confirmation");
            return Ok(());
        }

        let sender = roles.sender;
        let offer_id = offer.id.as_str();
        let confirmation_error = |cause: anyhow::Error| TradeError::Confirmation {
            offer_id: offer_id.to_string(),
            cause,
        };

        let confirmed = poll_until(self.config.poll_interval, self.config.poll_timeout, move || async move {
            let accepted = sender
                .community
                .accept_confirmation_for_object(offer_id)
                .await?;
            Ok::<_, anyhow::Error>(accepted.then_some(()))
        })
        .await
        .map_err(|e| TradeError::from_collaborator(e, confirmation_error))?;

        if confirmed.is_none() {
            return Err(confirmation_error(anyhow!(
                "no pending confirmation appeared within {:?}",
                self.config.poll_timeout
            )));
        }

        info!(offer_id, "Trade confirmed successfully");
        Ok(())
    }

    async fn accept_offer(&self, roles: TradeRoles<'_>, offer_id: &str) -> Result<(), TradeError> {
        let receiver = roles.receiver;
        let accept_error = |cause: anyhow::Error| TradeError::OfferAccept {
            offer_id: offer_id.to_string(),
            cause,
        };

        let incoming: Option<TradeOffer> =
            poll_until(self.config.poll_interval, self.config.poll_timeout, move || async move {
                let offers = receiver.trades.get_incoming_offers().await?;
                Ok::<_, anyhow::Error>(offers.into_iter().find(|o| o.id == offer_id))
            })
            .await
            .map_err(|e| TradeError::from_collaborator(e, accept_error))?;

        let offer = incoming.ok_or_else(|| TradeError::OfferNotFound {
            offer_id: offer_id.to_string(),
        })?;

        receiver
            .trades
            .accept_offer(&offer)
            .await
            .map_err(|e| TradeError::from_collaborator(e, accept_error))?;

        info!(offer_id, receiver = %receiver, "Trade accepted successfully");
        Ok(())
    }

    // -- Helpers -----------------------------------------------------------

    /// Offerable trade cards currently held by `account`.
    async fn fetch_cards(&self, account: &Account) -> Result<Vec<InventoryItem>, TradeError> {
        let items = account
            .trades
            .get_inventory(self.config.context)
            .await
            .map_err(|e| {
                TradeError::from_collaborator(e, |cause| TradeError::InventoryFetch {
                    account: account.to_string(),
                    cause,
                })
            })?;

        let split = split_cards(items);
        if split.untradable > 0 {
            debug!(account = %account, untradable = split.untradable, "Skipping untradable cards");
        }
        Ok(split.offerable)
    }
}

/// Call `attempt` until it yields a value or `timeout` has passed.
///
/// Always makes at least one attempt. Errors end the poll immediately.
async fn poll_until<T, F, Fut>(interval: Duration, timeout: Duration, mut attempt: F) -> anyhow::Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = attempt().await? {
            return Ok(Some(value));
        }
        if Instant::now() + interval > deadline {
            return Ok(None);
        }
        sleep(interval).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
