//! Immutable description of a target accelerator's throughput.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ReifyError, Result};
use crate::ir::ValueType;

/// Bytes charged per element of a tuple value; tuples are tables of pointers.
pub const DEFAULT_POINTER_SIZE: u64 = 8;

/// Fraction of the shorter of compute and memory time hidden behind the longer one.
pub const DEFAULT_MEMORY_COMPUTE_PARALLELISM: f64 = 0.95;

/// Throughput class an operation is priced under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpCategory {
    Elementwise,
    Transcendental,
    Reduction,
    Contraction,
    DataMovement,
    Control,
}

impl OpCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            OpCategory::Elementwise => "elementwise",
            OpCategory::Transcendental => "transcendental",
            OpCategory::Reduction => "reduction",
            OpCategory::Contraction => "contraction",
            OpCategory::DataMovement => "data_movement",
            OpCategory::Control => "control",
        }
    }
}

impl fmt::Display for OpCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a value lives while a fused kernel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Device memory: fusion inputs and outputs.
    Dram,
    /// Registers and shared memory: values produced and consumed inside the fusion.
    OnChip,
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryTier::Dram => f.write_str("dram"),
            MemoryTier::OnChip => f.write_str("on_chip"),
        }
    }
}

pub type ShapeSizeFn = Arc<dyn Fn(&ValueType) -> u64 + Send + Sync>;

fn default_pointer_size() -> u64 {
    DEFAULT_POINTER_SIZE
}

fn default_parallelism() -> f64 {
    DEFAULT_MEMORY_COMPUTE_PARALLELISM
}

/// Rates in operations/second per [`OpCategory`] and bytes/second per [`MemoryTier`].
///
/// Profiles are built once and shared read-only (typically behind an `Arc`).
#[derive(Clone, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub name: String,
    pub clock_rate_ghz: f64,
    pub compute_rates: BTreeMap<OpCategory, f64>,
    pub memory_rates: BTreeMap<MemoryTier, f64>,
    #[serde(default = "default_pointer_size")]
    pub pointer_size: u64,
    #[serde(default = "default_parallelism")]
    pub memory_compute_parallelism: f64,
    #[serde(skip)]
    shape_size_fn: Option<ShapeSizeFn>,
}

impl fmt::Debug for HardwareProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareProfile")
            .field("name", &self.name)
            .field("clock_rate_ghz", &self.clock_rate_ghz)
            .field("compute_rates", &self.compute_rates)
            .field("memory_rates", &self.memory_rates)
            .field("pointer_size", &self.pointer_size)
            .field(
                "memory_compute_parallelism",
                &self.memory_compute_parallelism,
            )
            .field("custom_shape_size", &self.shape_size_fn.is_some())
            .finish()
    }
}

impl HardwareProfile {
    /// Profile with no rates; callers fill the tables through the `with_*` setters.
    pub fn new(name: impl Into<String>, clock_rate_ghz: f64) -> Self {
        Self {
            name: name.into(),
            clock_rate_ghz,
            compute_rates: BTreeMap::new(),
            memory_rates: BTreeMap::new(),
            pointer_size: DEFAULT_POINTER_SIZE,
            memory_compute_parallelism: DEFAULT_MEMORY_COMPUTE_PARALLELISM,
            shape_size_fn: None,
        }
    }

    /// NVIDIA RTX A6000: 84 SMs, 128 FP32 lanes and 16 SFUs per SM, 1.41 GHz, 768 GB/s.
    pub fn rtx_a6000() -> Self {
        const SMS: f64 = 84.0;
        const CLOCK_HZ: f64 = 1.41e9;
        Self::new("rtx-a6000", 1.41)
            .with_compute_rate(OpCategory::Elementwise, SMS * 128.0 * CLOCK_HZ)
            .with_compute_rate(OpCategory::Transcendental, SMS * 16.0 * CLOCK_HZ)
            .with_compute_rate(OpCategory::Reduction, SMS * 64.0 * CLOCK_HZ)
            .with_compute_rate(OpCategory::Contraction, SMS * 256.0 * CLOCK_HZ)
            .with_compute_rate(OpCategory::DataMovement, SMS * 32.0 * CLOCK_HZ)
            .with_compute_rate(OpCategory::Control, CLOCK_HZ)
            .with_memory_rate(MemoryTier::Dram, 768.0e9)
            .with_memory_rate(MemoryTier::OnChip, SMS * 128.0 * CLOCK_HZ)
    }

    pub fn with_compute_rate(mut self, category: OpCategory, ops_per_second: f64) -> Self {
        self.compute_rates.insert(category, ops_per_second);
        self
    }

    pub fn with_memory_rate(mut self, tier: MemoryTier, bytes_per_second: f64) -> Self {
        self.memory_rates.insert(tier, bytes_per_second);
        self
    }

    pub fn with_pointer_size(mut self, pointer_size: u64) -> Self {
        self.pointer_size = pointer_size;
        self
    }

    pub fn with_memory_compute_parallelism(mut self, parallelism: f64) -> Self {
        self.memory_compute_parallelism = parallelism;
        self
    }

    /// Replaces the default byte-size accounting of [`Self::shape_size_bytes`].
    pub fn with_shape_size_fn(mut self, shape_size: ShapeSizeFn) -> Self {
        self.shape_size_fn = Some(shape_size);
        self
    }

    pub fn compute_rate(&self, category: OpCategory) -> Option<f64> {
        self.compute_rates.get(&category).copied()
    }

    pub fn memory_rate(&self, tier: MemoryTier) -> Option<f64> {
        self.memory_rates.get(&tier).copied()
    }

    pub fn clock_hz(&self) -> f64 {
        self.clock_rate_ghz * 1.0e9
    }

    /// In-memory size of a value. Tensors are dense; tuples cost one pointer per element.
    ///
    /// Returns `None` when the element count overflows.
    pub fn shape_size_bytes(&self, ty: &ValueType) -> Option<u64> {
        if let Some(shape_size) = &self.shape_size_fn {
            return Some(shape_size(ty));
        }
        match ty {
            ValueType::Tensor(spec) => spec.byte_len(),
            ValueType::Tuple(elements) => self.pointer_size.checked_mul(elements.len() as u64),
        }
    }

    /// Rejects rates and factors the cost model cannot use.
    pub fn validate(&self) -> Result<()> {
        if !(self.clock_rate_ghz.is_finite() && self.clock_rate_ghz > 0.0) {
            return Err(ReifyError::invalid_input(format!(
                "profile '{}': clock rate {} GHz must be positive",
                self.name, self.clock_rate_ghz
            )));
        }
        for (category, rate) in &self.compute_rates {
            if !(rate.is_finite() && *rate > 0.0) {
                return Err(ReifyError::invalid_input(format!(
                    "profile '{}': {category} rate {rate} must be positive",
                    self.name
                )));
            }
        }
        for (tier, rate) in &self.memory_rates {
            if !(rate.is_finite() && *rate > 0.0) {
                return Err(ReifyError::invalid_input(format!(
                    "profile '{}': {tier} bandwidth {rate} must be positive",
                    self.name
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.memory_compute_parallelism) {
            return Err(ReifyError::invalid_input(format!(
                "profile '{}': memory/compute parallelism {} is outside [0, 1]",
                self.name, self.memory_compute_parallelism
            )));
        }
        Ok(())
    }

    pub fn from_json_str(src: &str) -> Result<Self> {
        let profile: HardwareProfile = serde_json::from_str(src)
            .map_err(|err| ReifyError::invalid_input(format!("hardware profile: {err}")))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| ReifyError::invalid_input(format!("hardware profile: {err}")))
    }
}
