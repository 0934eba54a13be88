//! Batch mean unit for stack workers
//!
//! Accumulates one column per device over a whole stack pass and writes the
//! raw mean once the pass ends.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::UnitError;
use crate::types::FunctionCategory;
use crate::unit::{check_keys, Frame, FunctionUnit, Parameters, UnitBinding, UnitIdentity};
use crate::units::UnitBase;

const KEYS: &[&str] = &["column", "health"];

#[derive(Debug, Clone)]
pub struct StackMeanUnit {
    base: UnitBase,
    sums: BTreeMap<String, (f64, usize)>,
}

impl StackMeanUnit {
    pub const TYPE: &'static str = "stack_mean";

    pub fn new(identity: UnitIdentity) -> Self {
        Self {
            base: UnitBase::new(identity, "temperature"),
            sums: BTreeMap::new(),
        }
    }

    pub fn boxed(identity: UnitIdentity) -> Box<dyn FunctionUnit> {
        Box::new(Self::new(identity))
    }
}

impl FunctionUnit for StackMeanUnit {
    fn function_id(&self) -> u32 {
        self.base.identity.function_id
    }

    fn name(&self) -> &str {
        &self.base.identity.name
    }

    fn function_type(&self) -> FunctionCategory {
        FunctionCategory::Other
    }

    fn is_realtime_function(&self) -> bool {
        false
    }

    fn bind(&mut self, binding: UnitBinding) -> Result<(), UnitError> {
        let params = self.base.attach(binding);
        self.set_parameter(&params)?;
        self.base.seal();
        Ok(())
    }

    fn compute(&mut self, frame: &mut Frame<'_>) -> Result<(), UnitError> {
        for device in frame.devices() {
            if let Some(value) = frame.value(device, &self.base.column) {
                let acc = self.sums.entry(device.to_string()).or_insert((0.0, 0));
                acc.0 += value;
                acc.1 += 1;
            }
        }
        Ok(())
    }

    fn finish(&mut self, frame: &mut Frame<'_>) -> Result<(), UnitError> {
        let sums = std::mem::take(&mut self.sums);
        for (device, (sum, count)) in sums {
            if count == 0 {
                continue;
            }
            if let Some(result) = frame.result_mut(&device) {
                if let Some(index) = result.health_index(&self.base.health) {
                    result.set_score(index, sum / count as f64);
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.sums.clear();
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

    fn get_column(&self, device: &str) -> BTreeSet<String> {
        if self.base.owns_any(device) {
            BTreeSet::from([self.base.column.clone()])
        } else {
            BTreeSet::new()
        }
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
            vec![0.0]
        } else {
            Vec::new()
        }
    }

    // raw engineering value, not a 0-100 score
    fn get_score_limit(&self, device: &str) -> Vec<bool> {
        if self.base.owns_any(device) {
            vec![true]
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
