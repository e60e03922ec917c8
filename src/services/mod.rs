//! Domain services behind the limit reconciler.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the business logic — quota evaluation, first-seen
//! persistence, scan-cache refresh, subscription gating — so the embedding
//! card/editor layer stays focused on rendering and host plumbing.

pub mod auth;
pub mod first_seen;
pub mod limits;
pub mod scanner;
