//! Per-node backend configuration records.
//!
//! Configs are advisory metadata: they live beside the computation arena in a
//! [`BackendConfigStore`] and writing them never counts as a structural change of
//! the program.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ir::spec::{NodeRef, Operation};

/// Persisted cost estimate for a fused computation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReificationCost {
    pub end_to_end_cycles: f64,
    #[serde(default)]
    pub exec_time_us: f64,
    #[serde(default)]
    pub compute_time_us: f64,
    #[serde(default)]
    pub memory_access_time_us: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FusionBackendConfig {
    /// Backend-specific label of the fused kernel, e.g. `"__triton_gemm"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reification_cost: Option<ReificationCost>,
}

impl FusionBackendConfig {
    pub fn has_reification_cost(&self) -> bool {
        self.reification_cost.is_some()
    }

    /// Returns the stored cost, or a zeroed record when none was written.
    pub fn reification_cost(&self) -> ReificationCost {
        self.reification_cost.unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GemmBackendConfig {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for GemmBackendConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 0.0,
        }
    }
}

/// Discriminant of [`BackendConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    Fusion,
    Gemm,
}

impl ConfigKind {
    /// Whether a node running `op` may carry a record of this kind.
    pub fn accepts(self, op: &Operation) -> bool {
        match self {
            ConfigKind::Fusion => matches!(op, Operation::Fusion(_)),
            ConfigKind::Gemm => matches!(op, Operation::DotGeneral(_)),
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigKind::Fusion => write!(f, "fusion"),
            ConfigKind::Gemm => write!(f, "gemm"),
        }
    }
}

/// Kind-tagged configuration record attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "snake_case")]
pub enum BackendConfig {
    Fusion(FusionBackendConfig),
    Gemm(GemmBackendConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> ConfigKind {
        match self {
            BackendConfig::Fusion(_) => ConfigKind::Fusion,
            BackendConfig::Gemm(_) => ConfigKind::Gemm,
        }
    }
}

/// Typed view over one [`BackendConfig`] variant.
pub trait BackendConfigRecord: Clone + Default + Into<BackendConfig> {
    const KIND: ConfigKind;

    fn from_config(config: &BackendConfig) -> Option<&Self>;
}

impl From<FusionBackendConfig> for BackendConfig {
    fn from(config: FusionBackendConfig) -> Self {
        BackendConfig::Fusion(config)
    }
}

impl From<GemmBackendConfig> for BackendConfig {
    fn from(config: GemmBackendConfig) -> Self {
        BackendConfig::Gemm(config)
    }
}

impl BackendConfigRecord for FusionBackendConfig {
    const KIND: ConfigKind = ConfigKind::Fusion;

    fn from_config(config: &BackendConfig) -> Option<&Self> {
        match config {
            BackendConfig::Fusion(inner) => Some(inner),
            _ => None,
        }
    }
}

impl BackendConfigRecord for GemmBackendConfig {
    const KIND: ConfigKind = ConfigKind::Gemm;

    fn from_config(config: &BackendConfig) -> Option<&Self> {
        match config {
            BackendConfig::Gemm(inner) => Some(inner),
            _ => None,
        }
    }
}

/// Serialized form of one store entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfigEntry {
    pub node: NodeRef,
    pub config: BackendConfig,
}

/// Node-keyed backend configs. Validation against node kinds happens in
/// [`Program::set_backend_config`](super::Program::set_backend_config).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<BackendConfigEntry>", into = "Vec<BackendConfigEntry>")]
pub struct BackendConfigStore {
    entries: BTreeMap<NodeRef, BackendConfig>,
}

impl BackendConfigStore {
    pub fn get(&self, node: NodeRef) -> Option<&BackendConfig> {
        self.entries.get(&node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeRef, &BackendConfig)> {
        self.entries.iter().map(|(node, config)| (*node, config))
    }

    pub(crate) fn insert(&mut self, node: NodeRef, config: BackendConfig) {
        self.entries.insert(node, config);
    }
}

impl From<Vec<BackendConfigEntry>> for BackendConfigStore {
    fn from(entries: Vec<BackendConfigEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.node, entry.config))
                .collect(),
        }
    }
}

impl From<BackendConfigStore> for Vec<BackendConfigEntry> {
    fn from(store: BackendConfigStore) -> Self {
        store
            .entries
            .into_iter()
            .map(|(node, config)| BackendConfigEntry { node, config })
            .collect()
    }
}
