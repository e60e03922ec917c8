//! Global-scan plumbing — slot identity and cache entry conversion.
//!
//! DESIGN
//! ======
//! The scanner collaborator reports cards by position (view + section +
//! index), not by editor card id — a card sitting in a view that was never
//! opened has no editor identity at all. We derive a stable slot id from the
//! positional metadata, so scanned modules get keys in the same
//! `<dashboard>:<slot>:<module>` space as registered ones without ever
//! colliding with an editor-assigned card id.

use crate::config::extract_modules;
use crate::host::{DashboardSnapshot, ScannedCard};
use crate::state::ScanEntry;

/// Slot identity for a scanned card: `slot:<view>:<section>:<index>`.
///
/// Prefers `view_path` over `view_id`; missing positions fall back to 0 so a
/// sparse snapshot still yields stable keys.
pub(crate) fn slot_id(card: &ScannedCard) -> String {
    let view = card
        .view_path
        .as_deref()
        .or(card.view_id.as_deref())
        .unwrap_or("view");
    let section = card.section_index.unwrap_or(0);
    let index = card.card_index_in_section.or(card.card_index).unwrap_or(0);
    format!("slot:{view}:{section}:{index}")
}

/// Convert a scan snapshot into cache entries keyed under `dashboard_id`.
pub(crate) fn scan_entries(dashboard_id: &str, snapshot: &DashboardSnapshot) -> Vec<ScanEntry> {
    let mut entries = Vec::new();
    for card in &snapshot.cards {
        let slot = slot_id(card);
        for module in extract_modules(dashboard_id, &slot, &card.config) {
            entries.push(ScanEntry { key: module.key, kind: module.kind });
        }
    }
    entries
}

#[cfg(test)]
#[path = "scanner_test.rs"]
mod tests;
