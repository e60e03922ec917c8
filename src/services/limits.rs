//! Limit service — third-party module quota reconciliation.
//!
//! DESIGN
//! ======
//! Cards register their module list on every config change; evaluation
//! partitions the dashboard's third-party modules into allowed and locked
//! sets under a fixed quota, with quota slots going to the earliest-seen
//! modules so adding one more card never silently breaks an older one.
//! A TTL-cached global scan catches third-party modules sitting in views
//! that never mount locally. The scan refresh is fire-and-forget: it swaps
//! the cache atomically and notifies listeners, but evaluation never waits
//! for it.
//!
//! ERROR HANDLING
//! ==============
//! Nothing in this service is fatal and nothing propagates: storage failures
//! degrade to empty first-seen ordering (surfaced via the verdict's
//! `degraded` flag), scan failures keep the previous cache, and a broken
//! path falls back to the default dashboard identity. A quota bug must
//! never take down the hosting dashboard.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::{extract_modules, is_third_party, CardConfig, ModuleRef};
use crate::events::{ChangeEvent, ChangeListener};
use crate::host::{Clock, DashboardScanner, FirstSeenStore, HostContext, SubscriptionProbe};
use crate::module_key::{module_signature, type_signature, ModuleKey};
use crate::nav;
use crate::services::{auth, first_seen, scanner};
use crate::state::{LimitState, RegistrationEntry, ScanCache};

const DEFAULT_QUOTA: usize = 5;
const DEFAULT_SCAN_TTL_MS: u64 = 3000;
const DEFAULT_LISTENER_CAPACITY: usize = 64;

// =============================================================================
// CONFIG
// =============================================================================

/// Tuning knobs for the limit service, loadable from environment variables.
#[derive(Debug, Clone, Copy)]
pub struct LimitConfig {
    /// Dashboard-wide cap on third-party modules for non-pro accounts.
    pub quota: usize,
    /// How long a global scan result stays fresh.
    pub scan_ttl: Duration,
    /// Bounded queue depth per change listener.
    pub listener_capacity: usize,
}

impl LimitConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            quota: env_parse("ULTRA_LIMITS_QUOTA", DEFAULT_QUOTA),
            scan_ttl: Duration::from_millis(env_parse("ULTRA_LIMITS_SCAN_TTL_MS", DEFAULT_SCAN_TTL_MS)),
            listener_capacity: env_parse("ULTRA_LIMITS_LISTENER_CAPACITY", DEFAULT_LISTENER_CAPACITY),
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            quota: DEFAULT_QUOTA,
            scan_ttl: Duration::from_millis(DEFAULT_SCAN_TTL_MS),
            listener_capacity: DEFAULT_LISTENER_CAPACITY,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// VERDICT
// =============================================================================

/// Result of one quota evaluation.
#[derive(Debug, Clone)]
pub struct LimitVerdict {
    /// Third-party modules inside the quota. Ordered by first-seen for
    /// non-pro verdicts, by key for pro (nothing is ever locked there).
    pub allowed: Vec<ModuleKey>,
    /// Third-party modules over the quota, ordered by first-seen.
    pub locked: Vec<ModuleKey>,
    pub total_third_party: usize,
    pub pro: bool,
    /// First-seen storage failed to load; ordering fell back to treating
    /// every module as unseen. Quota enforcement still ran.
    pub degraded: bool,
}

// =============================================================================
// SERVICE
// =============================================================================

/// The third-party limit reconciler. Explicitly constructed with injected
/// collaborators; `Clone` shares the same underlying state.
#[derive(Clone)]
pub struct LimitService {
    state: Arc<RwLock<LimitState>>,
    config: LimitConfig,
    probe: Arc<dyn SubscriptionProbe>,
    scanner: Arc<dyn DashboardScanner>,
    store: Arc<dyn FirstSeenStore>,
    clock: Arc<dyn Clock>,
}

impl LimitService {
    #[must_use]
    pub fn new(
        config: LimitConfig,
        probe: Arc<dyn SubscriptionProbe>,
        scanner: Arc<dyn DashboardScanner>,
        store: Arc<dyn FirstSeenStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(LimitState::new())),
            config,
            probe,
            scanner,
            store,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LimitConfig {
        &self.config
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Register (or re-register) a card's module list.
    ///
    /// Re-registering a structurally identical module set is a no-op and
    /// emits nothing, so redundant re-renders stay quiet. A different card
    /// id carrying the same module-set signature is treated as an editor
    /// remount of the same logical card: the stale registration is pruned
    /// before this one is committed.
    pub async fn register(&self, card_id: &str, dashboard_id: &str, config: &CardConfig) {
        let modules = extract_modules(dashboard_id, card_id, config);

        // Stamp first-seen before touching in-memory state, so ordering is
        // durable even when the commit below turns out to be a no-op.
        let keys: Vec<ModuleKey> = modules.iter().map(|m| m.key.clone()).collect();
        let _ = first_seen::record(self.store.as_ref(), self.clock.as_ref(), dashboard_id, &keys);

        let mut state = self.state.write().await;

        if let Some(existing) = state.registrations.get(card_id) {
            if same_module_set(&existing.modules, &modules) {
                return;
            }
        }

        let signature = module_signature(&modules);

        // EDGE: empty module sets all share one signature; never treat two
        // empty cards as remounts of each other, and keep them unindexed.
        if !modules.is_empty() {
            if let Some(stale) = state.signatures.get(&signature).cloned() {
                if stale != card_id {
                    state.registrations.remove(&stale);
                    debug!(stale = %stale, card_id, "pruned stale registration with matching signature");
                }
            }
        }

        // Drop this card's previous signature slot if the set changed.
        let old_signature = state.registrations.get(card_id).map(|previous| previous.signature.clone());
        if let Some(old_signature) = old_signature {
            if old_signature != signature
                && state.signatures.get(&old_signature).is_some_and(|owner| owner == card_id)
            {
                state.signatures.remove(&old_signature);
            }
        }

        if !modules.is_empty() {
            state.signatures.insert(signature.clone(), card_id.to_string());
        }
        state.registrations.insert(
            card_id.to_string(),
            RegistrationEntry { card_id: card_id.to_string(), modules, signature },
        );
        state.notify(&ChangeEvent::Registered { card_id: card_id.to_string() });
    }

    /// Remove a card's registration. Unknown card ids are a silent no-op.
    pub async fn unregister(&self, card_id: &str) {
        let mut state = self.state.write().await;
        let Some(entry) = state.registrations.remove(card_id) else {
            return;
        };
        // Only clear the signature slot if it still points at this card — a
        // newer registration may have reused the signature.
        if state.signatures.get(&entry.signature).is_some_and(|owner| owner == card_id) {
            state.signatures.remove(&entry.signature);
        }
        state.notify(&ChangeEvent::Unregistered { card_id: card_id.to_string() });
    }

    // =========================================================================
    // LISTENERS
    // =========================================================================

    /// Subscribe for change events. Dropping the returned receiver is
    /// equivalent to unsubscribing.
    pub async fn subscribe(&self) -> ChangeListener {
        let mut state = self.state.write().await;
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        // tokio panics on zero capacity
        let (tx, rx) = tokio::sync::mpsc::channel(self.config.listener_capacity.max(1));
        state.listeners.insert(id, tx);
        ChangeListener { id, rx }
    }

    pub async fn unsubscribe(&self, listener_id: u64) {
        let mut state = self.state.write().await;
        state.listeners.remove(&listener_id);
    }

    /// Force a notification without a state change — for callers that mutate
    /// quota-relevant state outside the register/unregister path.
    pub async fn touch(&self) {
        let mut state = self.state.write().await;
        state.notify(&ChangeEvent::Touched);
    }

    // =========================================================================
    // EVALUATION
    // =========================================================================

    /// Partition the current dashboard's third-party modules into allowed
    /// and locked sets. Synchronous with respect to the scan: it merges
    /// whatever the cache holds and, if that is stale, kicks off a refresh
    /// without waiting for it.
    pub async fn evaluate(&self, ctx: &HostContext) -> LimitVerdict {
        let dashboard_id = nav::dashboard_id_from_path(&ctx.path);
        let pro = auth::is_pro(self.probe.as_ref(), ctx);
        let ttl_ms = i64::try_from(self.config.scan_ttl.as_millis()).unwrap_or(i64::MAX);

        let (combined, needs_scan) = {
            let state = self.state.read().await;

            // PHASE: LOCAL GATHER
            // Third-party modules registered for this dashboard, deduplicated
            // by key, plus the kind:module_id signatures they represent.
            let mut combined: BTreeMap<ModuleKey, String> = BTreeMap::new();
            let mut local_signatures: HashSet<String> = HashSet::new();
            for entry in state.registrations.values() {
                for module in &entry.modules {
                    if !is_third_party(&module.kind) || !module.key.in_dashboard(&dashboard_id) {
                        continue;
                    }
                    local_signatures.insert(type_signature(&module.kind, module.key.module_id()));
                    combined.insert(module.key.clone(), module.kind.clone());
                }
            }

            // PHASE: GLOBAL MERGE
            // Whatever the cache holds, fresh or stale — but a module already
            // represented locally must not be counted twice.
            if let Some(cache) = &state.scan_cache {
                for entry in &cache.entries {
                    if !is_third_party(&entry.kind) || !entry.key.in_dashboard(&dashboard_id) {
                        continue;
                    }
                    if local_signatures.contains(&type_signature(&entry.kind, entry.key.module_id())) {
                        continue;
                    }
                    combined.entry(entry.key.clone()).or_insert_with(|| entry.kind.clone());
                }
            }

            let now = self.clock.now_ms();
            let fresh = state
                .scan_cache
                .as_ref()
                .is_some_and(|cache| now - cache.fetched_at_ms <= ttl_ms);
            (combined, !fresh)
        };

        if needs_scan {
            let service = self.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { service.refresh_scan(&ctx).await });
        }

        let total_third_party = combined.len();

        if pro {
            return LimitVerdict {
                allowed: combined.into_keys().collect(),
                locked: Vec::new(),
                total_third_party,
                pro: true,
                degraded: false,
            };
        }

        let (first_seen_map, degraded) = first_seen::load(self.store.as_ref(), &dashboard_id);
        let mut ordered: Vec<ModuleKey> = combined.into_keys().collect();
        // Unseen keys sort as 0 (earliest); key order breaks ties so the
        // verdict is deterministic.
        ordered.sort_by(|a, b| {
            let ts_a = first_seen_map.get(a).copied().unwrap_or(0);
            let ts_b = first_seen_map.get(b).copied().unwrap_or(0);
            ts_a.cmp(&ts_b).then_with(|| a.cmp(b))
        });

        let locked = if ordered.len() > self.config.quota {
            ordered.split_off(self.config.quota)
        } else {
            Vec::new()
        };

        LimitVerdict { allowed: ordered, locked, total_third_party, pro: false, degraded }
    }

    /// Would adding `additional` third-party modules overflow the quota?
    /// Pro accounts never exceed.
    pub async fn would_exceed_limit(&self, ctx: &HostContext, additional: usize) -> bool {
        let verdict = self.evaluate(ctx).await;
        if verdict.pro {
            return false;
        }
        verdict.total_third_party + additional > self.config.quota
    }

    // =========================================================================
    // GLOBAL SCAN
    // =========================================================================

    /// Run the full-dashboard scan now and swap the cache atomically.
    ///
    /// Normally spawned by [`evaluate`](Self::evaluate) when the cache is
    /// stale; public so hosts can force a refresh. A failed scan keeps the
    /// previous cache (or none) and emits nothing.
    pub async fn refresh_scan(&self, ctx: &HostContext) {
        let dashboard_id = nav::dashboard_id_from_path(&ctx.path);
        match self.scanner.scan(ctx).await {
            Ok(snapshot) => {
                let entries = scanner::scan_entries(&dashboard_id, &snapshot);
                debug!(count = entries.len(), %dashboard_id, "global scan complete");
                let mut state = self.state.write().await;
                state.scan_cache = Some(ScanCache { entries, fetched_at_ms: self.clock.now_ms() });
                state.notify(&ChangeEvent::ScanRefreshed);
            }
            Err(e) => {
                warn!(error = %e, %dashboard_id, "dashboard scan failed; keeping previous cache");
            }
        }
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// Currently registered card ids, sorted.
    pub async fn registered_cards(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut cards: Vec<String> = state.registrations.keys().cloned().collect();
        cards.sort_unstable();
        cards
    }

    /// A card's live registration, if any.
    pub async fn registration(&self, card_id: &str) -> Option<RegistrationEntry> {
        let state = self.state.read().await;
        state.registrations.get(card_id).cloned()
    }
}

/// Order-independent equality on `(key, kind)` pairs.
fn same_module_set(a: &[ModuleRef], b: &[ModuleRef]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut left: Vec<(&str, &str)> = a.iter().map(|m| (m.key.as_str(), m.kind.as_str())).collect();
    let mut right: Vec<(&str, &str)> = b.iter().map(|m| (m.key.as_str(), m.kind.as_str())).collect();
    left.sort_unstable();
    right.sort_unstable();
    left == right
}

#[cfg(test)]
#[path = "limits_test.rs"]
mod tests;
