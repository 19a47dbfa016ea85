//! End-to-end trade cycles against the in-memory Steam.

use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use card_shuttle::engine::selector::TieBreak;
use card_shuttle::engine::{CycleOutcome, NextAction, PipelineConfig, TradePipeline};
use card_shuttle::types::{AccountRole, TradeError, TradeOfferState};

use crate::mock_steam::{card, item, MockSteam, ALICE, BOB};

fn instant_config() -> PipelineConfig {
    PipelineConfig {
        prepare_delay: Duration::ZERO,
        confirm_delay: Duration::ZERO,
        accept_delay: Duration::ZERO,
        cycle_delay: Duration::from_millis(1),
        poll_interval: Duration::from_millis(1),
        poll_timeout: Duration::from_millis(20),
        ..PipelineConfig::default()
    }
}

async fn logged_in_pipeline(steam: &MockSteam, config: PipelineConfig) -> TradePipeline {
    let primary = steam.account(AccountRole::Primary, "alice", ALICE);
    let secondary = steam.account(AccountRole::Secondary, "bob", BOB);
    assert_ok!(secondary.log_on().await);
    assert_ok!(primary.log_on().await);
    TradePipeline::new(primary, secondary, config)
}

fn asset_ids(steam: &MockSteam, owner: card_shuttle::types::SteamId) -> Vec<String> {
    let mut ids: Vec<String> = steam.inventory(owner).into_iter().map(|i| i.asset_id).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_single_card_moves_to_empty_account() {
    let steam = MockSteam::new();
    steam.set_inventory(ALICE, vec![card("1")]);
    let mut pipeline = logged_in_pipeline(&steam, instant_config()).await;

    match pipeline.run_cycle().await {
        CycleOutcome::Success(report) => {
            assert_eq!(report.sender, AccountRole::Primary);
            assert_eq!(report.receiver, AccountRole::Secondary);
            assert_eq!(report.items_moved, 1);
        }
        other => panic!("expected success, got {other:?}"),
    }

    let offers = steam.offers();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].from, ALICE);
    assert_eq!(offers[0].to, BOB);
    assert_eq!(offers[0].state, TradeOfferState::Accepted);
    assert!(steam.inventory(ALICE).is_empty());
    assert_eq!(asset_ids(&steam, BOB), vec!["1"]);
}

#[tokio::test]
async fn test_cards_come_back_on_next_cycle() {
    let steam = MockSteam::new();
    steam.set_inventory(BOB, vec![card("1"), card("2"), card("3")]);
    let mut pipeline = logged_in_pipeline(&steam, instant_config()).await;

    let first = pipeline.run_cycle().await;
    assert!(first.is_success());
    assert_eq!(asset_ids(&steam, ALICE), vec!["1", "2", "3"]);

    match pipeline.run_cycle().await {
        CycleOutcome::Success(report) => {
            assert_eq!(report.sender, AccountRole::Primary);
            assert_eq!(report.cycle_number, 2);
            assert_eq!(report.items_moved, 3);
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(asset_ids(&steam, BOB), vec!["1", "2", "3"]);
    assert!(steam.inventory(ALICE).is_empty());
}

#[tokio::test]
async fn test_only_tradable_trade_cards_are_offered() {
    let steam = MockSteam::new();
    let mut locked = card("2");
    locked.tradable = false;
    steam.set_inventory(
        ALICE,
        vec![card("1"), locked, item("3", "Profile Background"), item("4", "trading card")],
    );
    let mut pipeline = logged_in_pipeline(&steam, instant_config()).await;

    let outcome = pipeline.run_cycle().await;
    assert!(outcome.is_success());

    let offers = steam.offers();
    let offered: Vec<&str> = offers[0].items.iter().map(|i| i.asset_id.as_str()).collect();
    assert_eq!(offered, vec!["1"]);
    assert_eq!(asset_ids(&steam, ALICE), vec!["2", "3", "4"]);
}

#[tokio::test]
async fn test_primary_sends_when_both_hold_cards() {
    let steam = MockSteam::new();
    steam.set_inventory(ALICE, vec![card("1")]);
    steam.set_inventory(BOB, vec![card("2"), card("3")]);
    let mut pipeline = logged_in_pipeline(&steam, instant_config()).await;

    let outcome = pipeline.run_cycle().await;
    assert!(outcome.is_success());
    assert_eq!(steam.offers()[0].from, ALICE);
    assert_eq!(asset_ids(&steam, BOB), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_most_cards_tie_break() {
    let steam = MockSteam::new();
    steam.set_inventory(ALICE, vec![card("1")]);
    steam.set_inventory(BOB, vec![card("2"), card("3")]);
    let config = PipelineConfig {
        tie_break: TieBreak::MostCards,
        ..instant_config()
    };
    let mut pipeline = logged_in_pipeline(&steam, config).await;

    match pipeline.run_cycle().await {
        CycleOutcome::Success(report) => assert_eq!(report.sender, AccountRole::Secondary),
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(asset_ids(&steam, ALICE), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_no_cards_anywhere() {
    let steam = MockSteam::new();
    steam.set_inventory(ALICE, vec![item("1", "Emoticon")]);
    let mut pipeline = logged_in_pipeline(&steam, instant_config()).await;

    let outcome = pipeline.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Recoverable(TradeError::NoCardsFound { .. })));
    assert_eq!(
        outcome.next_action(Duration::from_secs(10)),
        NextAction::RunAgain(Duration::from_secs(10))
    );
    assert!(steam.offers().is_empty());
}

#[tokio::test]
async fn test_inventory_failure_sends_nothing() {
    let steam = MockSteam::new();
    steam.set_inventory(BOB, vec![card("1")]);
    steam.fail_inventory(ALICE);
    let mut pipeline = logged_in_pipeline(&steam, instant_config()).await;

    match pipeline.run_cycle().await {
        CycleOutcome::Recoverable(TradeError::InventoryFetch { account, .. }) => {
            assert_eq!(account, "alice (primary)");
        }
        other => panic!("expected inventory failure, got {other:?}"),
    }
    assert!(steam.offers().is_empty());
    assert_eq!(asset_ids(&steam, BOB), vec!["1"]);
}

#[tokio::test]
async fn test_cycle_before_login_reports_session_not_ready() {
    let steam = MockSteam::new();
    steam.set_inventory(ALICE, vec![card("1")]);
    let mut pipeline = TradePipeline::new(
        steam.account(AccountRole::Primary, "alice", ALICE),
        steam.account(AccountRole::Secondary, "bob", BOB),
        instant_config(),
    );

    let outcome = pipeline.run_cycle().await;
    match &outcome {
        CycleOutcome::Recoverable(TradeError::SessionNotReady { .. }) => {}
        other => panic!("expected session not ready, got {other:?}"),
    }
    assert!(matches!(outcome.next_action(Duration::ZERO), NextAction::RunAgain(_)));
    assert_eq!(steam.inventory_fetches(), 0);
    // The account named in the error is logged in for the next cycle.
    assert_eq!(steam.logins(), 1);
}

#[tokio::test]
async fn test_unknown_account_cannot_log_in() {
    let steam = MockSteam::new();
    let stranger = steam.account(AccountRole::Primary, "mallory", ALICE);

    let err = assert_err!(stranger.log_on().await);
    assert!(matches!(err, TradeError::LoginFailure { .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_run_shuttles_cards_back_and_forth() {
    let steam = MockSteam::new();
    steam.set_inventory(ALICE, vec![card("1"), card("2")]);
    let mut pipeline = logged_in_pipeline(&steam, instant_config()).await;

    let watcher = steam.clone();
    let two_accepted = async move {
        loop {
            let accepted = watcher
                .offers()
                .iter()
                .filter(|o| o.state == TradeOfferState::Accepted)
                .count();
            if accepted >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };

    let summary = tokio::time::timeout(Duration::from_secs(5), pipeline.run(two_accepted))
        .await
        .expect("pipeline did not stop");

    assert!(summary.transfers >= 2);
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.items_moved, summary.transfers * 2);

    let offers = steam.offers();
    assert_eq!(offers[0].from, ALICE);
    assert_eq!(offers[1].from, BOB);
}

#[tokio::test]
async fn test_run_waits_for_cards_to_appear() {
    let steam = MockSteam::new();
    let mut pipeline = logged_in_pipeline(&steam, instant_config()).await;

    let watcher = steam.clone();
    let first_transfer = async move {
        let mut seeded = false;
        loop {
            // Both inventories were checked once and came back empty.
            if !seeded && watcher.inventory_fetches() >= 2 {
                watcher.set_inventory(ALICE, vec![card("1")]);
                seeded = true;
            }
            if watcher.accepted() >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };

    let summary = tokio::time::timeout(Duration::from_secs(5), pipeline.run(first_transfer))
        .await
        .expect("pipeline did not stop");

    assert!(summary.idle >= 1);
    assert!(summary.transfers >= 1);
    assert_eq!(summary.failures, 0);
    assert_eq!(asset_ids(&steam, BOB), vec!["1"]);
}

#[tokio::test]
async fn test_run_renews_session_that_expires_mid_run() {
    let steam = MockSteam::new();
    steam.set_inventory(ALICE, vec![card("1")]);
    let mut pipeline = logged_in_pipeline(&steam, instant_config()).await;
    assert_eq!(steam.logins(), 2);

    let watcher = steam.clone();
    let renewed_and_traded = async move {
        let mut expired = false;
        loop {
            if !expired && watcher.accepted() >= 1 {
                watcher.expire_session(BOB);
                expired = true;
            }
            if watcher.refreshes() >= 1 && watcher.accepted() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };

    let summary = tokio::time::timeout(Duration::from_secs(5), pipeline.run(renewed_and_traded))
        .await
        .expect("pipeline did not stop");

    assert_eq!(summary.failures, 1);
    assert!(summary.transfers >= 3);
    assert_eq!(steam.refreshes(), 1);
    assert_eq!(steam.logins(), 2);

    let offers = steam.offers();
    assert_eq!(offers[1].from, BOB);
}

#[tokio::test]
async fn test_run_stops_when_session_cannot_be_renewed() {
    let steam = MockSteam::new();
    steam.set_inventory(ALICE, vec![card("1")]);
    let mut pipeline = logged_in_pipeline(&steam, instant_config()).await;

    steam.expire_session(BOB);
    steam.reject_logins();

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.run(std::future::pending::<()>()),
    )
    .await
    .expect("pipeline kept running after a rejected renewal");

    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.transfers, 0);
    assert!(steam.offers().is_empty());
}
