//! Card configuration shape and module extraction.
//!
//! DESIGN
//! ======
//! The host hands us card configs as `layout.rows[].columns[].modules[]`.
//! Every layer is defaulted so a missing or malformed layer deserializes as
//! empty — extraction never fails, it just finds fewer modules. Unrecognized
//! module fields are retained in `extra` so a config survives a round trip
//! through us untouched.

use serde::{Deserialize, Serialize};

use crate::module_key::ModuleKey;

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// The reserved module kind for externally embedded cards. Only modules of
/// this kind count against the third-party quota.
pub const THIRD_PARTY_KIND: &str = "external_card";

/// Built-in module kinds. Never quota-counted.
pub const FIRST_PARTY_KINDS: &[&str] = &[
    "text",
    "separator",
    "image",
    "info",
    "bar",
    "icon",
    "button",
    "gauge",
    "camera",
    "graphs",
    "horizontal",
    "vertical",
    "slider",
    "markdown",
    "dropdown",
    "light",
    "spinbox",
    "pagebreak",
];

#[must_use]
pub fn is_third_party(kind: &str) -> bool {
    kind == THIRD_PARTY_KIND
}

#[must_use]
pub fn is_first_party(kind: &str) -> bool {
    FIRST_PARTY_KINDS.contains(&kind)
}

// =============================================================================
// CONFIG SHAPE
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardConfig {
    #[serde(default)]
    pub layout: LayoutConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default)]
    pub rows: Vec<RowConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowConfig {
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnConfig {
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Module settings we don't interpret (entity bindings, styling, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// One extracted module: its composite key plus its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    pub key: ModuleKey,
    pub kind: String,
}

/// Flatten a card config into keyed module references.
///
/// Modules without an id are skipped — they cannot be keyed, tracked, or
/// quota-counted.
#[must_use]
pub fn extract_modules(dashboard_id: &str, card_id: &str, config: &CardConfig) -> Vec<ModuleRef> {
    let mut out = Vec::new();
    for row in &config.layout.rows {
        for column in &row.columns {
            for module in &column.modules {
                if module.id.is_empty() {
                    continue;
                }
                out.push(ModuleRef {
                    key: ModuleKey::new(dashboard_id, card_id, &module.id),
                    kind: module.kind.clone(),
                });
            }
        }
    }
    out
}
