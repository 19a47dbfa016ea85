//! Card Shuttle: Steam trading card relay.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! logs both accounts in (staggered), and runs the trade pipeline until
//! Ctrl+C or a fatal outcome.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use card_shuttle::config::{self, AccountConfig};
use card_shuttle::engine::{Account, TradePipeline};
use card_shuttle::steam::auth::SteamAuthenticator;
use card_shuttle::steam::offers::SteamTrades;
use card_shuttle::steam::AccountSession;
use card_shuttle::types::AccountRole;

const BANNER: &str = r#"
   ___              _   ___ _         _   _   _
  / __|__ _ _ _ __| | / __| |_ _  _| |_| |_| |___
 | (__/ _` | '_/ _` | \__ \ ' \ || |  _|  _| / -_)
  \___\__,_|_| \__,_| |___/_||_\_,_|\__|\__|_\___|

  Steam trading card relay v0.1.0
"#;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("CARD_SHUTTLE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        primary = %cfg.accounts.primary.username,
        secondary = %cfg.accounts.secondary.username,
        app_id = cfg.inventory.app_id,
        context_id = cfg.inventory.context_id,
        cycle_delay_secs = cfg.pipeline.cycle_delay_secs,
        "Card Shuttle starting up"
    );

    // -- Initialise components -------------------------------------------

    let authenticator: Arc<dyn AccountSession> = Arc::new(SteamAuthenticator::new()?);
    let primary = build_account(AccountRole::Primary, &cfg.accounts.primary, &authenticator)?;
    let secondary = build_account(AccountRole::Secondary, &cfg.accounts.secondary, &authenticator)?;

    // -- Staggered login -------------------------------------------------

    secondary.log_on().await?;

    let stagger = cfg.pipeline.login_stagger();
    info!(secs = stagger.as_secs(), "Waiting before logging in the primary account");
    tokio::time::sleep(stagger).await;

    primary.log_on().await?;

    tokio::time::sleep(cfg.pipeline.warmup()).await;

    // -- Main loop -------------------------------------------------------

    let mut pipeline = TradePipeline::new(
        primary,
        secondary,
        cfg.pipeline.pipeline_config(&cfg.inventory),
    );

    info!("Entering main loop. Press Ctrl+C to stop.");
    let summary = pipeline.run(tokio::signal::ctrl_c()).await;

    if summary.transfers == 0 {
        warn!(cycles = summary.cycles, "No trades completed during this run");
    }
    info!(
        cycles = summary.cycles,
        transfers = summary.transfers,
        items = summary.items_moved,
        idle = summary.idle,
        failures = summary.failures,
        "Card Shuttle shut down cleanly."
    );

    Ok(())
}

/// Wire one account to the shared authenticator and its own trade manager.
fn build_account(
    role: AccountRole,
    account: &AccountConfig,
    authenticator: &Arc<dyn AccountSession>,
) -> Result<Account> {
    let credentials = account
        .credentials()
        .with_context(|| format!("Failed to load credentials for {role} account"))?;

    let trades = Arc::new(SteamTrades::new(
        credentials.steam_id,
        &credentials.account_name,
        &credentials.identity_secret,
    ));

    Ok(Account::new(
        role,
        credentials,
        Arc::clone(authenticator),
        trades.clone(),
        trades,
    ))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("card_shuttle=info"));

    let json_logging = std::env::var("CARD_SHUTTLE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
