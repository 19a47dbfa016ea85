//! Card filter and sender selection.

use serde::Deserialize;

use crate::types::{AccountRole, InventoryItem};

/// Substring a category label must contain for the item to be a trade card.
pub const TRADING_CARD_MARKER: &str = "Trading Card";

/// Whether the item is a trading card. Case-sensitive.
pub fn is_trade_card(item: &InventoryItem) -> bool {
    item.category.contains(TRADING_CARD_MARKER)
}

/// The trade cards among `items`, in input order.
pub fn trade_cards(items: Vec<InventoryItem>) -> Vec<InventoryItem> {
    items.into_iter().filter(is_trade_card).collect()
}

/// Trade cards split by whether they can be offered right now.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CardSplit {
    pub offerable: Vec<InventoryItem>,
    pub untradable: usize,
}

/// Keep the trade cards of an inventory, preserving order.
pub fn split_cards(items: Vec<InventoryItem>) -> CardSplit {
    let mut split = CardSplit::default();
    for item in trade_cards(items) {
        if item.tradable {
            split.offerable.push(item);
        } else {
            split.untradable += 1;
        }
    }
    split
}

/// Who sends when both accounts hold cards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The primary account (checked first) always sends.
    #[default]
    Primary,
    /// The account holding more cards sends; primary on equal counts.
    MostCards,
}

/// Pick the sending account from each side's card count.
///
/// Returns `None` when neither account has anything to send.
pub fn select_sender(primary_cards: usize, secondary_cards: usize, tie_break: TieBreak) -> Option<AccountRole> {
    match (primary_cards, secondary_cards) {
        (0, 0) => None,
        (_, 0) => Some(AccountRole::Primary),
        (0, _) => Some(AccountRole::Secondary),
        (p, s) => match tie_break {
            TieBreak::Primary => Some(AccountRole::Primary),
            TieBreak::MostCards if s > p => Some(AccountRole::Secondary),
            TieBreak::MostCards => Some(AccountRole::Primary),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
