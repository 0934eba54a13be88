//! Reference function units
//!
//! Small, deliberately simple diagnostic units. They exercise every part of
//! the unit contract and back the CLI's builtin registry.

mod coherence;
mod drift;
mod stack_mean;
mod threshold;
mod worst_of;

pub use coherence::CoherenceUnit;
pub use drift::DriftUnit;
pub use stack_mean::StackMeanUnit;
pub use threshold::ThresholdUnit;
pub use worst_of::WorstOfUnit;

use crate::error::UnitError;
use crate::unit::{param_str, Parameters, UnitBinding, UnitIdentity};

/// Identity and wiring shared by the reference units
#[derive(Debug, Clone)]
pub(crate) struct UnitBase {
    pub identity: UnitIdentity,
    pub binding: UnitBinding,
    /// Name of the health dimension the unit scores
    pub health: String,
    pub column: String,
    /// Set once the binding parameters are applied; `column` and `health`
    /// feed the worker tables and stay fixed from then on.
    bound: bool,
}

/// `column` and `health` read from a parameter mapping
#[derive(Debug, Default)]
pub(crate) struct CommonParams {
    column: Option<String>,
    health: Option<String>,
}

impl UnitBase {
    pub fn new(identity: UnitIdentity, column: &str) -> Self {
        Self {
            health: identity.name.clone(),
            identity,
            binding: UnitBinding::default(),
            column: column.to_string(),
            bound: false,
        }
    }

    /// Take the worker wiring and hand back its parameters
    pub fn attach(&mut self, binding: UnitBinding) -> Parameters {
        let params = binding.parameters.clone();
        self.binding = binding;
        self.bound = false;
        params
    }

    /// Mark the binding parameters as applied
    pub fn seal(&mut self) {
        self.bound = true;
    }

    /// Only the primary device
    pub fn owns_tag(&self, device: &str) -> bool {
        self.binding.tag == device
    }

    /// Any device of the worker
    pub fn owns_any(&self, device: &str) -> bool {
        self.binding.devices.iter().any(|d| d == device)
    }

    /// Read the `column` and `health` keys shared by every reference unit
    pub fn check_common(&self, params: &Parameters) -> Result<CommonParams, UnitError> {
        let column = self.fixed(params, "column", &self.column)?;
        let health = self.fixed(params, "health", &self.health)?;
        Ok(CommonParams { column, health })
    }

    pub fn commit(&mut self, common: CommonParams) {
        if let Some(column) = common.column {
            self.column = column;
        }
        if let Some(health) = common.health {
            self.health = health;
        }
    }

    fn fixed(
        &self,
        params: &Parameters,
        key: &str,
        current: &str,
    ) -> Result<Option<String>, UnitError> {
        match param_str(params, key)? {
            Some(value) if self.bound && value != current => Err(UnitError::InvalidParameter {
                key: key.to_string(),
                reason: format!("`{current}` is fixed once bound, reset and rebind to change it"),
            }),
            value => Ok(value.map(str::to_string)),
        }
    }
}

/// Relative deviation mapped onto a 0-100 score
pub(crate) fn deviation_score(value: f64, reference: f64, tolerance: f64) -> f64 {
    if reference.abs() < f64::EPSILON || tolerance <= 0.0 {
        return 100.0;
    }
    let relative = ((value - reference) / reference).abs();
    (100.0 * (1.0 - relative / tolerance)).clamp(0.0, 100.0)
}
