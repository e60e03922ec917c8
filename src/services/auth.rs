//! Subscription gate — the one question we ask the auth collaborator.

use crate::host::{HostContext, SubscriptionProbe};

/// Tier that lifts the third-party quota.
pub const PRO_TIER: &str = "pro";

/// Status required alongside [`PRO_TIER`].
pub const ACTIVE_STATUS: &str = "active";

/// Paid iff an authenticated integration user exists with exactly
/// (tier `"pro"`, status `"active"`). Absent user, absent subscription, a
/// different tier, or an expired status are all non-pro — never an error.
#[must_use]
pub fn is_pro(probe: &dyn SubscriptionProbe, ctx: &HostContext) -> bool {
    probe
        .integration_user(ctx)
        .and_then(|user| user.subscription)
        .is_some_and(|sub| sub.tier == PRO_TIER && sub.status == ACTIVE_STATUS)
}
