//! Ultra Limits — third-party module quota reconciliation for dashboard cards.
//!
//! ARCHITECTURE
//! ============
//! Cards register the modules in their config with a shared [`LimitService`];
//! the service deduplicates registrations across editor remounts, tracks a
//! durable first-seen ordering, merges in a TTL-cached global dashboard scan,
//! and partitions third-party modules into allowed and locked sets under a
//! fixed quota (lifted for pro subscriptions).
//!
//! DESIGN
//! ======
//! Everything host-specific — subscription status, the dashboard scan,
//! durable storage, the clock — is an injected trait object ([`host`]), so
//! the service runs the same against a browser-shaped host or a test rig.
//! Nothing in this crate is fatal: every failure degrades to "fewer modules
//! counted" or "not pro" rather than surfacing to the dashboard.

pub mod config;
pub mod events;
pub mod host;
pub mod module_key;
pub mod nav;
pub mod services;
pub mod state;

pub use config::{extract_modules, is_first_party, is_third_party, CardConfig, ModuleRef, THIRD_PARTY_KIND};
pub use events::{ChangeEvent, ChangeListener};
pub use host::{
    Clock, DashboardScanner, DashboardSnapshot, FirstSeenStore, HostContext, IntegrationUser,
    MemoryStore, ScanError, ScannedCard, StoreError, Subscription, SubscriptionProbe, SystemClock,
};
pub use module_key::ModuleKey;
pub use services::limits::{LimitConfig, LimitService, LimitVerdict};
