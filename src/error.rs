//! Error types for Healthflux

use thiserror::Error;

/// Errors raised while building a worker from its configuration.
///
/// These are fatal: a worker that fails any of these checks is never handed
/// to the process loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Unknown or missing function category: {0}")]
    MissingCategory(String),

    #[error("Worker `{0}` has no function units registered")]
    EmptyAlgorithmSet(String),

    #[error("Function unit `{0}` is already registered")]
    DuplicateUnit(String),

    #[error("Function unit `{unit}` is a {declared} unit but was registered as {target}")]
    CategoryMismatch {
        unit: String,
        declared: String,
        target: String,
    },

    #[error("Category {category} is not run by the {variant} variant")]
    CategoryNotRun { category: String, variant: String },

    #[error("Function unit `{0}` is not realtime and cannot run in a realtime worker")]
    RealtimeMismatch(String),

    #[error("Function unit `{0}` requires multi-device support")]
    MultiDeviceUnsupported(String),

    #[error("Variant {variant} cannot drive {count} device(s)")]
    DeviceCountMismatch { variant: String, count: usize },

    #[error("Health define `{name}` declared twice for device `{device}`")]
    OverlappingHealthDefine { device: String, name: String },

    #[error("Health tables for device `{0}` have mismatched lengths")]
    TableLengthMismatch(String),

    #[error("Sub-devices of `{0}` are not a subset of the worker devices")]
    SubDevicesNotSubset(String),

    #[error("Device `{device}` is claimed by sub-workers `{first}` and `{second}`")]
    OverlappingSubDevices {
        device: String,
        first: String,
        second: String,
    },

    #[error("Tag `{0}` is not a member of the worker devices")]
    TagNotInDevices(String),

    #[error("Device `{0}` is listed more than once")]
    DuplicateDevice(String),

    #[error("Unknown function type: {0}")]
    UnknownFunction(String),

    #[error("max_delay must be at least 1")]
    InvalidMaxDelay,

    #[error("data_delta_seconds must be at least 1")]
    InvalidDataDelta,

    #[error("Invalid block time value {0}, expected hhmm")]
    InvalidBlockTime(u16),
}

/// Errors reported by a single function unit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    #[error("invalid parameter `{key}`: {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("{0}")]
    Compute(String),
}

/// Errors that can occur while running a worker
#[derive(Debug, Error)]
pub enum FluxError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Parameter error in `{unit}`: {message}")]
    Parameter { unit: String, message: String },

    #[error("Runtime error in `{unit}`: {message}")]
    Runtime { unit: String, message: String },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No stream bound for device `{0}`")]
    UnknownDevice(String),

    #[error("Worker `{0}` is not bound to any streams")]
    NotReady(String),
}

impl FluxError {
    pub(crate) fn parameter(unit: &str, err: UnitError) -> Self {
        FluxError::Parameter {
            unit: unit.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn runtime(unit: &str, err: UnitError) -> Self {
        FluxError::Runtime {
            unit: unit.to_string(),
            message: err.to_string(),
        }
    }
}
