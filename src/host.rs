//! Host context and injected collaborators.
//!
//! ARCHITECTURE
//! ============
//! The reconciler never reaches for host globals. Everything it needs from
//! the surrounding dashboard — subscription status, the full-dashboard scan,
//! durable first-seen storage, wall-clock time — comes in as a trait object
//! at construction, so tests run against fakes and embedding hosts decide
//! what "storage" or "auth" mean for them.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CardConfig;

// =============================================================================
// HOST CONTEXT
// =============================================================================

/// What the host hands every call: the active navigation path, from which
/// the current dashboard identity is parsed.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub path: String,
}

impl HostContext {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

// =============================================================================
// CLOCK
// =============================================================================

pub trait Clock: Send + Sync {
    /// Milliseconds since Unix epoch.
    fn now_ms(&self) -> i64;
}

/// Wall clock. Saturates to 0 on a pre-epoch system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
            return 0;
        };
        i64::try_from(dur.as_millis()).unwrap_or(0)
    }
}

// =============================================================================
// SUBSCRIPTION PROBE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub tier: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationUser {
    pub subscription: Option<Subscription>,
}

/// Authentication collaborator. Returns the authenticated integration user,
/// if any; the reconciler only ever inspects `subscription.tier` and
/// `subscription.status`.
pub trait SubscriptionProbe: Send + Sync {
    fn integration_user(&self, ctx: &HostContext) -> Option<IntegrationUser>;
}

// =============================================================================
// DASHBOARD SCANNER
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("dashboard scan failed: {0}")]
    Unavailable(String),
}

/// One card found by the full-dashboard scan: its config plus the positional
/// metadata used to build a slot identifier distinct from any editor card id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannedCard {
    #[serde(default)]
    pub config: CardConfig,
    #[serde(default)]
    pub view_path: Option<String>,
    #[serde(default)]
    pub view_id: Option<String>,
    #[serde(default)]
    pub section_index: Option<usize>,
    #[serde(default)]
    pub card_index_in_section: Option<usize>,
    #[serde(default)]
    pub card_index: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    #[serde(default)]
    pub cards: Vec<ScannedCard>,
}

/// Scanner collaborator: inventories every view of the dashboard, not just
/// the one currently open. Failures are the caller's to swallow.
#[async_trait]
pub trait DashboardScanner: Send + Sync {
    /// # Errors
    ///
    /// Returns `ScanError::Unavailable` when the dashboard inventory cannot
    /// be produced.
    async fn scan(&self, ctx: &HostContext) -> Result<DashboardSnapshot, ScanError>;
}

// =============================================================================
// FIRST-SEEN STORE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage write rejected: {0}")]
    WriteRejected(String),
}

/// Durable key-value string storage for first-seen maps. Best-effort by
/// contract: callers degrade on any error, they never propagate it.
pub trait FirstSeenStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` when the backing storage cannot be
    /// read.
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// # Errors
    ///
    /// Returns `StoreError::WriteRejected` when the value cannot be written
    /// (quota exceeded, read-only storage).
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-process store for tests and hosts without durable storage. First-seen
/// ordering then lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FirstSeenStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
