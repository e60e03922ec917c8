//! First-seen persistence — durable, append-only module ordering.
//!
//! DESIGN
//! ======
//! Quota slots go to the oldest modules, so the ordering must survive
//! restarts: a per-dashboard JSON map of `ModuleKey -> first-seen ms` lives
//! in the injected key-value store. Timestamps are append-only — once a key
//! is recorded it never changes, however often the surrounding config is
//! re-registered.
//!
//! ERROR HANDLING
//! ==============
//! Storage is best-effort by contract. A failed or corrupt read degrades to
//! an empty map (newly unseen modules sort earliest); a failed write is
//! logged and dropped. Both are reported through the returned `degraded`
//! flag, never as an error.

use std::collections::HashMap;

use tracing::warn;

use crate::host::{Clock, FirstSeenStore};
use crate::module_key::ModuleKey;

pub(crate) const STORAGE_KEY_PREFIX: &str = "ultra_limits:first_seen:";

fn storage_key(dashboard_id: &str) -> String {
    format!("{STORAGE_KEY_PREFIX}{dashboard_id}")
}

/// Load the first-seen map for a dashboard. Returns the map plus a degraded
/// flag set when the store failed or held corrupt JSON.
#[must_use]
pub fn load(store: &dyn FirstSeenStore, dashboard_id: &str) -> (HashMap<ModuleKey, i64>, bool) {
    let key = storage_key(dashboard_id);
    match store.load(&key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(map) => (map, false),
            Err(e) => {
                warn!(error = %e, storage_key = %key, "corrupt first-seen map; starting empty");
                (HashMap::new(), true)
            }
        },
        Ok(None) => (HashMap::new(), false),
        Err(e) => {
            warn!(error = %e, storage_key = %key, "first-seen load failed; starting empty");
            (HashMap::new(), true)
        }
    }
}

/// Stamp any unseen keys with the current time and persist if something was
/// added. Existing timestamps are never overwritten.
#[must_use]
pub fn record(
    store: &dyn FirstSeenStore,
    clock: &dyn Clock,
    dashboard_id: &str,
    keys: &[ModuleKey],
) -> (HashMap<ModuleKey, i64>, bool) {
    let (mut map, mut degraded) = load(store, dashboard_id);
    let now = clock.now_ms();

    let mut added = false;
    for key in keys {
        map.entry(key.clone()).or_insert_with(|| {
            added = true;
            now
        });
    }

    if added {
        match serde_json::to_string(&map) {
            Ok(raw) => {
                if let Err(e) = store.save(&storage_key(dashboard_id), &raw) {
                    warn!(error = %e, dashboard_id, "first-seen save failed; ordering not persisted");
                    degraded = true;
                }
            }
            Err(e) => {
                warn!(error = %e, dashboard_id, "first-seen map not serializable");
                degraded = true;
            }
        }
    }

    (map, degraded)
}

#[cfg(test)]
#[path = "first_seen_test.rs"]
mod tests;
