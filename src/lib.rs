//! Healthflux - worker execution engine for condition-monitoring analytics
//!
//! Healthflux drives a configurable set of diagnostic function units against
//! the feature streams of one or many devices and turns them into per-device
//! health results on every tick:
//! registration → binding → stream alignment → unit computation → flush.
//!
//! ## Modules
//!
//! - **Worker**: unit registration, validation and the drive strategies
//! - **Synchronizer**: multi-device timeline alignment with bounded lateness
//! - **Summary**: hierarchical workers over the results of sub-workers
//! - **Context**: the per-tick process loop with rollback on failure

pub mod config;
pub mod context;
pub mod error;
pub mod registry;
pub mod stream;
pub mod types;
pub mod unit;
pub mod units;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::{SummaryConfig, UnitSpec, WorkerConfig};
pub use context::Context;
pub use error::{ConfigError, FluxError, UnitError};
pub use registry::FunctionRegistry;
pub use stream::{DeviceStream, FeatureContainer, ResultStream, StreamSet};
pub use types::{
    FeatureSample, FunctionCategory, HealthInfo, PublishedResult, ResultEntry, Status, MIN_TIME,
};
pub use unit::{Frame, FunctionUnit, Parameters, UnitBinding, UnitIdentity};
pub use worker::{
    BlockWindow, BlockedWorker, SummaryWorker, Synchronizer, UnitRequest, Worker, WorkerProcess,
    WorkerState, WorkerVariant,
};

/// Healthflux version reported by the CLI and diagnostics
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");
