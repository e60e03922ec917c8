//! Shared reconciler state.
//!
//! DESIGN
//! ======
//! `LimitState` is the single mutable core: the registration map, the
//! signature index used for remount dedup, the TTL-bounded global scan
//! cache, and the listener table. The service guards it with one `RwLock`,
//! so a cache swap or registration commit and its listener notification are
//! atomic with respect to any concurrent evaluation — readers see fully-old
//! or fully-new state, never a partial update.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ModuleRef;
use crate::events::ChangeEvent;
use crate::module_key::ModuleKey;

// =============================================================================
// REGISTRATION
// =============================================================================

/// One registered card instance. Replaced wholesale on re-registration.
#[derive(Debug, Clone)]
pub struct RegistrationEntry {
    pub card_id: String,
    pub modules: Vec<ModuleRef>,
    /// Order-independent fingerprint of `modules`; indexed for remount dedup.
    pub signature: String,
}

// =============================================================================
// SCAN CACHE
// =============================================================================

/// One module found by the global scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub key: ModuleKey,
    pub kind: String,
}

/// TTL-bounded result of the last full-dashboard scan.
#[derive(Debug, Clone)]
pub struct ScanCache {
    pub entries: Vec<ScanEntry>,
    pub fetched_at_ms: i64,
}

// =============================================================================
// STATE
// =============================================================================

pub struct LimitState {
    /// `card_id` -> live registration. At most one entry per card id.
    pub registrations: HashMap<String, RegistrationEntry>,
    /// Module-set signature -> owning `card_id`. At most one live
    /// registration per signature.
    pub signatures: HashMap<String, String>,
    /// Last global scan, if any has completed.
    pub scan_cache: Option<ScanCache>,
    /// Subscribers in subscription order.
    pub listeners: BTreeMap<u64, mpsc::Sender<ChangeEvent>>,
    pub next_listener_id: u64,
}

impl LimitState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
            signatures: HashMap::new(),
            scan_cache: None,
            listeners: BTreeMap::new(),
            next_listener_id: 0,
        }
    }

    /// Fan an event out to every listener, in subscription order.
    ///
    /// Best-effort: a full queue drops the event for that listener, a closed
    /// one is pruned. Never blocks.
    pub fn notify(&mut self, event: &ChangeEvent) {
        let mut closed = Vec::new();
        for (id, tx) in &self.listeners {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(listener = *id, event = ?event, "listener queue full; dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            self.listeners.remove(&id);
            debug!(listener = id, "pruned closed listener");
        }
    }
}

impl Default for LimitState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    use async_trait::async_trait;

    use crate::config::{CardConfig, ColumnConfig, LayoutConfig, ModuleConfig, RowConfig};
    use crate::host::{
        Clock, DashboardScanner, DashboardSnapshot, FirstSeenStore, HostContext, IntegrationUser,
        MemoryStore, ScanError, ScannedCard, StoreError, Subscription, SubscriptionProbe,
    };
    use crate::services::limits::{LimitConfig, LimitService};

    /// Clock that only moves when a test says so.
    pub struct ManualClock {
        ms: AtomicI64,
    }

    impl ManualClock {
        #[must_use]
        pub fn new(start_ms: i64) -> Self {
            Self { ms: AtomicI64::new(start_ms) }
        }

        pub fn advance(&self, delta_ms: i64) {
            self.ms.fetch_add(delta_ms, Ordering::SeqCst);
        }

        pub fn set(&self, ms: i64) {
            self.ms.store(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.ms.load(Ordering::SeqCst)
        }
    }

    /// Probe returning a configurable user; tests flip pro status mid-run.
    #[derive(Default)]
    pub struct FakeProbe {
        pub user: Mutex<Option<IntegrationUser>>,
    }

    impl FakeProbe {
        pub fn set_user(&self, user: Option<IntegrationUser>) {
            *self.user.lock().unwrap_or_else(PoisonError::into_inner) = user;
        }
    }

    impl SubscriptionProbe for FakeProbe {
        fn integration_user(&self, _ctx: &HostContext) -> Option<IntegrationUser> {
            self.user.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    /// Scanner returning a configurable snapshot (or error), counting calls.
    pub struct FakeScanner {
        pub result: Mutex<Result<DashboardSnapshot, String>>,
        pub calls: AtomicUsize,
    }

    impl FakeScanner {
        #[must_use]
        pub fn new() -> Self {
            Self {
                result: Mutex::new(Ok(DashboardSnapshot::default())),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn set_snapshot(&self, snapshot: DashboardSnapshot) {
            *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Ok(snapshot);
        }

        pub fn set_error(&self, message: &str) {
            *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Err(message.to_string());
        }

        #[must_use]
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DashboardScanner for FakeScanner {
        async fn scan(&self, _ctx: &HostContext) -> Result<DashboardSnapshot, ScanError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .map_err(ScanError::Unavailable)
        }
    }

    /// Store where every operation fails — the degraded path.
    pub struct FailingStore;

    impl FirstSeenStore for FailingStore {
        fn load(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("quota exceeded".into()))
        }

        fn save(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::WriteRejected("quota exceeded".into()))
        }
    }

    /// Everything a service test needs, wired to fakes.
    pub struct TestRig {
        pub service: LimitService,
        pub probe: Arc<FakeProbe>,
        pub scanner: Arc<FakeScanner>,
        pub store: Arc<MemoryStore>,
        pub clock: Arc<ManualClock>,
    }

    /// Capture logs in test output; safe to call from every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    impl TestRig {
        /// Free-tier rig: default config, empty snapshot, clock at 1s.
        #[must_use]
        pub fn new() -> Self {
            init_tracing();
            let probe = Arc::new(FakeProbe::default());
            let scanner = Arc::new(FakeScanner::new());
            let store = Arc::new(MemoryStore::new());
            let clock = Arc::new(ManualClock::new(1_000));
            let service = LimitService::new(
                LimitConfig::default(),
                Arc::clone(&probe) as Arc<dyn SubscriptionProbe>,
                Arc::clone(&scanner) as Arc<dyn DashboardScanner>,
                Arc::clone(&store) as Arc<dyn FirstSeenStore>,
                Arc::clone(&clock) as Arc<dyn Clock>,
            );
            Self { service, probe, scanner, store, clock }
        }

        /// Same rig with an active pro subscription.
        #[must_use]
        pub fn pro() -> Self {
            let rig = Self::new();
            rig.probe.set_user(Some(pro_user()));
            rig
        }
    }

    #[must_use]
    pub fn pro_user() -> IntegrationUser {
        user_with("pro", "active")
    }

    #[must_use]
    pub fn user_with(tier: &str, status: &str) -> IntegrationUser {
        IntegrationUser {
            subscription: Some(Subscription { tier: tier.into(), status: status.into() }),
        }
    }

    #[must_use]
    pub fn ctx(path: &str) -> HostContext {
        HostContext::new(path)
    }

    /// Build a card config with one row/column holding `(id, kind)` modules.
    #[must_use]
    pub fn card_config(modules: &[(&str, &str)]) -> CardConfig {
        CardConfig {
            layout: LayoutConfig {
                rows: vec![RowConfig {
                    columns: vec![ColumnConfig {
                        modules: modules
                            .iter()
                            .map(|(id, kind)| ModuleConfig {
                                id: (*id).to_string(),
                                kind: (*kind).to_string(),
                                extra: serde_json::Map::new(),
                            })
                            .collect(),
                    }],
                }],
            },
        }
    }

    /// A scanned card at a concrete slot position.
    #[must_use]
    pub fn scanned_card(view_path: &str, section: usize, index: usize, modules: &[(&str, &str)]) -> ScannedCard {
        ScannedCard {
            config: card_config(modules),
            view_path: Some(view_path.to_string()),
            view_id: None,
            section_index: Some(section),
            card_index_in_section: Some(index),
            card_index: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_new_is_empty() {
        let state = LimitState::new();
        assert!(state.registrations.is_empty());
        assert!(state.signatures.is_empty());
        assert!(state.scan_cache.is_none());
        assert!(state.listeners.is_empty());
    }

    #[tokio::test]
    async fn notify_delivers_in_subscription_order() {
        let mut state = LimitState::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        state.listeners.insert(0, tx_a);
        state.listeners.insert(1, tx_b);

        state.notify(&ChangeEvent::Touched);
        assert_eq!(rx_a.try_recv().unwrap(), ChangeEvent::Touched);
        assert_eq!(rx_b.try_recv().unwrap(), ChangeEvent::Touched);
    }

    #[tokio::test]
    async fn notify_drops_on_full_queue_without_blocking() {
        let mut state = LimitState::new();
        let (tx, mut rx) = mpsc::channel(1);
        state.listeners.insert(0, tx);

        state.notify(&ChangeEvent::Touched);
        state.notify(&ChangeEvent::ScanRefreshed); // dropped, queue full

        assert_eq!(rx.try_recv().unwrap(), ChangeEvent::Touched);
        assert!(rx.try_recv().is_err());
        // listener stays subscribed; only the event was dropped
        assert_eq!(state.listeners.len(), 1);
    }

    #[tokio::test]
    async fn notify_prunes_closed_listeners() {
        let mut state = LimitState::new();
        let (tx, rx) = mpsc::channel(4);
        state.listeners.insert(7, tx);
        drop(rx);

        state.notify(&ChangeEvent::Touched);
        assert!(state.listeners.is_empty());
    }
}
