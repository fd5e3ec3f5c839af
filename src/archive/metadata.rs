//! Typed archive metadata
//!
//! Metadata lives in the root attribute namespace of the container. The
//! documented keys are parsed into named fields; anything else is kept in
//! an `extra` bag for forward compatibility instead of being injected
//! dynamically onto the dataset.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::container::Container;
use crate::norm::NORM_ATTR_PREFIX;
use crate::utils::ArchiveError;

/// Metadata declared by a simulation archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    /// Name of the PDE this archive was generated from
    #[serde(rename = "PDE")]
    pub pde: String,

    /// Field scheme string, one character per field (e.g. "aBBc":
    /// uppercase runs mark components of the same vector field)
    #[serde(rename = "Fields Scheme")]
    pub field_scheme: String,

    /// Field names, in channel order
    #[serde(rename = "Fields")]
    pub fields: Vec<String>,

    /// Optional per-field descriptions
    #[serde(rename = "Field Desc", default, skip_serializing_if = "Option::is_none")]
    pub field_desc: Option<Vec<String>>,

    /// Declared constant names; every simulation must define each of these
    #[serde(rename = "Constants")]
    pub constants: Vec<String>,

    /// Optional per-constant descriptions
    #[serde(rename = "Const Desc", default, skip_serializing_if = "Option::is_none")]
    pub const_desc: Option<Vec<String>>,

    /// Solver time-step size between consecutive frames
    #[serde(rename = "Dt")]
    pub dt: f64,

    /// Unknown metadata keys, preserved as-is
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ArchiveMetadata {
    /// Parse metadata from a container's root attributes.
    ///
    /// Normalization-cache entries share the root namespace; they are
    /// filtered out here so they never leak into `extra`.
    pub fn from_container(container: &Container) -> Result<Self, ArchiveError> {
        let root = container
            .attrs(super::container::ROOT_NS)
            .cloned()
            .unwrap_or_default();

        let filtered: serde_json::Map<String, Value> = root
            .into_iter()
            .filter(|(k, _)| !k.starts_with(NORM_ATTR_PREFIX))
            .collect();

        serde_json::from_value(Value::Object(filtered))
            .map_err(|e| ArchiveError::MetadataDecode(e.to_string()))
    }

    /// Human-readable archive summary used by the CLI `info` command
    pub fn render_info(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("PDE: {}\n", self.pde));
        out.push_str(&format!("Fields Scheme: {}\n", self.field_scheme));
        out.push_str(&format!("Dt: {}\n", self.dt));

        out.push_str("\nFields:\n");
        for (i, field) in self.fields.iter().enumerate() {
            match self.field_desc.as_ref().and_then(|d| d.get(i)) {
                Some(desc) => out.push_str(&format!("   {}:\t{}\n", field, desc)),
                None => out.push_str(&format!("   {}\n", field)),
            }
        }

        out.push_str("\nConstants:\n");
        for (i, constant) in self.constants.iter().enumerate() {
            match self.const_desc.as_ref().and_then(|d| d.get(i)) {
                Some(desc) => out.push_str(&format!("   {}:\t{}\n", constant, desc)),
                None => out.push_str(&format!("   {}\n", constant)),
            }
        }
        out
    }
}
