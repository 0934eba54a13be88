//! Summary unit: worst sub-score
//!
//! Runs in the second pass of a summary worker. For each result entry a
//! sub-worker produced, copies the lowest score among the entry's other
//! dimensions into its own summary dimension.

use std::collections::BTreeSet;

use crate::error::UnitError;
use crate::types::FunctionCategory;
use crate::unit::{check_keys, Frame, FunctionUnit, Parameters, UnitBinding, UnitIdentity};
use crate::units::UnitBase;

const KEYS: &[&str] = &["health"];

#[derive(Debug, Clone)]
pub struct WorstOfUnit {
    base: UnitBase,
    visited: u64,
}

impl WorstOfUnit {
    pub const TYPE: &'static str = "worst_of";

    pub fn new(identity: UnitIdentity) -> Self {
        Self {
            base: UnitBase::new(identity, ""),
            visited: 0,
        }
    }

    pub fn boxed(identity: UnitIdentity) -> Box<dyn FunctionUnit> {
        Box::new(Self::new(identity))
    }

    pub fn visited(&self) -> u64 {
        self.visited
    }
}

impl FunctionUnit for WorstOfUnit {
    fn function_id(&self) -> u32 {
        self.base.identity.function_id
    }

    fn name(&self) -> &str {
        &self.base.identity.name
    }

    fn function_type(&self) -> FunctionCategory {
        FunctionCategory::Other
    }

    fn bind(&mut self, binding: UnitBinding) -> Result<(), UnitError> {
        let params = self.base.attach(binding);
        self.set_parameter(&params)?;
        self.base.seal();
        Ok(())
    }

    fn compute(&mut self, frame: &mut Frame<'_>) -> Result<(), UnitError> {
        let devices: Vec<String> = frame.devices().into_iter().map(str::to_string).collect();
        for device in devices {
            let Some(result) = frame.result_mut(&device) else {
                continue;
            };
            let Some(own) = result.health_index(&self.base.health) else {
                continue;
            };
            let Some(entry) = result.current() else {
                continue;
            };
            let worst = entry
                .scores
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != own)
                .map(|(_, s)| *s)
                .fold(f64::INFINITY, f64::min);
            if worst.is_finite() {
                result.set_score(own, worst);
            }
            self.visited += 1;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.visited = 0;
    }

    fn check_parameter(&self, params: &Parameters) -> Result<(), UnitError> {
        check_keys(params, KEYS)?;
        self.base.check_common(params).map(|_| ())
    }

    fn set_parameter(&mut self, params: &Parameters) -> Result<(), UnitError> {
        check_keys(params, KEYS)?;
        let common = self.base.check_common(params)?;
        self.base.commit(common);
        Ok(())
    }

    fn get_column(&self, _device: &str) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn get_health_define(&self, device: &str) -> Vec<String> {
        if self.base.owns_any(device) {
            vec![self.base.health.clone()]
        } else {
            Vec::new()
        }
    }

    fn get_default_score(&self, device: &str) -> Vec<f64> {
        if self.base.owns_any(device) {
            vec![100.0]
        } else {
            Vec::new()
        }
    }

    fn get_score_limit(&self, device: &str) -> Vec<bool> {
        if self.base.owns_any(device) {
            vec![false]
        } else {
            Vec::new()
        }
    }

    fn get_score_reverse(&self, device: &str) -> Vec<bool> {
        if self.base.owns_any(device) {
            vec![false]
        } else {
            Vec::new()
        }
    }
}
