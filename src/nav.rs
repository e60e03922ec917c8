//! Dashboard identity from the navigation path.
//!
//! DESIGN
//! ======
//! Dashboard URLs look like `/lovelace/<id>/<view>`. The identifier is the
//! first segment after the `/lovelace/` prefix, so every view of a dashboard
//! shares one identity. Anything that doesn't match falls back to a fixed
//! default rather than failing — an unparseable path must never break quota
//! evaluation.

/// Identity used when the path doesn't match the dashboard pattern.
pub const DEFAULT_DASHBOARD_ID: &str = "default";

const DASHBOARD_PREFIX: &str = "/lovelace/";

/// Extract the dashboard identifier from a navigation path.
///
/// Query strings and fragments are stripped before matching.
#[must_use]
pub fn dashboard_id_from_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or("");
    let Some(rest) = path.strip_prefix(DASHBOARD_PREFIX) else {
        return DEFAULT_DASHBOARD_ID.to_string();
    };
    match rest.split('/').next().filter(|seg| !seg.is_empty()) {
        Some(seg) => seg.to_string(),
        None => DEFAULT_DASHBOARD_ID.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_segment_after_prefix() {
        assert_eq!(dashboard_id_from_path("/lovelace/home"), "home");
        assert_eq!(dashboard_id_from_path("/lovelace/home/view2"), "home");
    }

    #[test]
    fn strips_query_and_fragment() {
        assert_eq!(dashboard_id_from_path("/lovelace/home?edit=1"), "home");
        assert_eq!(dashboard_id_from_path("/lovelace/home#section"), "home");
        assert_eq!(dashboard_id_from_path("/lovelace/?edit=1"), DEFAULT_DASHBOARD_ID);
    }

    #[test]
    fn unmatched_paths_use_fallback() {
        assert_eq!(dashboard_id_from_path("/profile"), DEFAULT_DASHBOARD_ID);
        assert_eq!(dashboard_id_from_path("/lovelace"), DEFAULT_DASHBOARD_ID);
        assert_eq!(dashboard_id_from_path("/lovelace/"), DEFAULT_DASHBOARD_ID);
        assert_eq!(dashboard_id_from_path(""), DEFAULT_DASHBOARD_ID);
    }
}
