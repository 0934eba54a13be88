//! Worker configuration
//!
//! Workers are built from a JSON document describing the device group, the
//! drive variant and the function units of each category.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ConfigError, FluxError};
use crate::types::FunctionCategory;
use crate::unit::Parameters;
use crate::worker::{BlockWindow, WorkerVariant};

/// Default number of timeline instants buffered before a forced flush
pub const DEFAULT_MAX_DELAY: usize = 30;

/// Default duplicate-disambiguation tick in seconds
pub const DEFAULT_DATA_DELTA_SECONDS: u32 = 1;

/// Request for one function unit, resolved through the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Registry type name
    #[serde(rename = "type")]
    pub kind: String,
    /// Function id; defaults to the unit's position in the worker plus one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Unit name; defaults to the type name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: Parameters,
}

impl UnitSpec {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            id: None,
            name: None,
            parameters: Parameters::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }
}

fn default_max_delay() -> usize {
    DEFAULT_MAX_DELAY
}

fn default_data_delta() -> u32 {
    DEFAULT_DATA_DELTA_SECONDS
}

fn default_synchronized() -> bool {
    true
}

/// Construction-time configuration of one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Primary device id
    pub tag: String,
    /// Every device driven by the worker, tag included
    pub devices: Vec<String>,
    pub worker_variant: WorkerVariant,
    #[serde(default)]
    pub decision: Vec<UnitSpec>,
    #[serde(default)]
    pub evaluation: Vec<UnitSpec>,
    #[serde(default)]
    pub other: Vec<UnitSpec>,
    #[serde(default = "default_max_delay")]
    pub max_delay: usize,
    #[serde(default = "default_data_delta")]
    pub data_delta_seconds: u32,
    #[serde(default)]
    pub block_time: BlockWindow,
    #[serde(default)]
    pub net_load_mode: bool,
    /// Multi-device variants align devices on a shared timeline; when false
    /// they visit devices round-robin instead
    #[serde(default = "default_synchronized")]
    pub synchronized: bool,
}

impl WorkerConfig {
    pub fn new(tag: &str, devices: &[&str], variant: WorkerVariant) -> Self {
        Self {
            tag: tag.to_string(),
            devices: devices.iter().map(|d| d.to_string()).collect(),
            worker_variant: variant,
            decision: Vec::new(),
            evaluation: Vec::new(),
            other: Vec::new(),
            max_delay: DEFAULT_MAX_DELAY,
            data_delta_seconds: DEFAULT_DATA_DELTA_SECONDS,
            block_time: BlockWindow::default(),
            net_load_mode: false,
            synchronized: true,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, FluxError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Unit requests of one category
    pub fn units(&self, category: FunctionCategory) -> &[UnitSpec] {
        match category {
            FunctionCategory::Decision => &self.decision,
            FunctionCategory::Evaluation => &self.evaluation,
            FunctionCategory::Other => &self.other,
        }
    }

    /// Check the scalar fields. Unit composition is checked at registration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_devices(&self.tag, &self.devices)?;
        if self.max_delay == 0 {
            return Err(ConfigError::InvalidMaxDelay);
        }
        if self.data_delta_seconds == 0 {
            return Err(ConfigError::InvalidDataDelta);
        }
        self.block_time.validate()
    }
}

pub(crate) fn validate_devices(tag: &str, devices: &[String]) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for device in devices {
        if !seen.insert(device.as_str()) {
            return Err(ConfigError::DuplicateDevice(device.clone()));
        }
    }
    if !seen.contains(tag) {
        return Err(ConfigError::TagNotInDevices(tag.to_string()));
    }
    Ok(())
}

/// Configuration of a summary worker and its sub-workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryConfig {
    pub tag: String,
    pub devices: Vec<String>,
    /// Sub-worker configurations keyed by sub-tag
    pub sub_workers: BTreeMap<String, WorkerConfig>,
    /// Units run over the union of the sub-worker results
    #[serde(default)]
    pub summary: Vec<UnitSpec>,
    #[serde(default)]
    pub block_time: BlockWindow,
}

impl SummaryConfig {
    pub fn from_json(json: &str) -> Result<Self, FluxError> {
        Ok(serde_json::from_str(json)?)
    }
}
