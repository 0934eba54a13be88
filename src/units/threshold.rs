//! Fixed-limit decision unit
//!
//! Compares one feature column of the primary device against warning and
//! alarm limits. Defaults follow the ISO 10816 velocity zones (mm/s).

use std::collections::BTreeSet;

use crate::error::UnitError;
use crate::types::{FunctionCategory, Status};
use crate::unit::{check_keys, param_f64, Frame, FunctionUnit, Parameters, UnitBinding, UnitIdentity};
use crate::units::UnitBase;

const KEYS: &[&str] = &["column", "health", "warning", "alarm"];

#[derive(Debug, Clone)]
pub struct ThresholdUnit {
    base: UnitBase,
    warning: f64,
    alarm: f64,
}

impl ThresholdUnit {
    pub const TYPE: &'static str = "threshold";

    pub fn new(identity: UnitIdentity) -> Self {
        Self {
            base: UnitBase::new(identity, "velocity_rms"),
            warning: 4.5,
            alarm: 7.1,
        }
    }

    pub fn boxed(identity: UnitIdentity) -> Box<dyn FunctionUnit> {
        Box::new(Self::new(identity))
    }

    /// Warning and alarm limits after applying `params`
    fn limits(&self, params: &Parameters) -> Result<(f64, f64), UnitError> {
        check_keys(params, KEYS)?;
        let warning = param_f64(params, "warning")?.unwrap_or(self.warning);
        let alarm = param_f64(params, "alarm")?.unwrap_or(self.alarm);
        if !(warning > 0.0 && warning < alarm) {
            return Err(UnitError::InvalidParameter {
                key: "warning".to_string(),
                reason: format!("expected 0 < warning < alarm, got {warning} / {alarm}"),
            });
        }
        Ok((warning, alarm))
    }

    fn classify(&self, value: f64) -> (Status, f64) {
        let score = (100.0 * (self.alarm - value) / self.alarm).clamp(0.0, 100.0);
        let status = if value >= self.alarm {
            Status::Alarm
        } else if value >= self.warning {
            Status::Warning
        } else {
            Status::Normal
        };
        (status, score)
    }
}

impl FunctionUnit for ThresholdUnit {
    fn function_id(&self) -> u32 {
        self.base.identity.function_id
    }

    fn name(&self) -> &str {
        &self.base.identity.name
    }

    fn function_type(&self) -> FunctionCategory {
        FunctionCategory::Decision
    }

    fn bind(&mut self, binding: UnitBinding) -> Result<(), UnitError> {
        let params = self.base.attach(binding);
        self.set_parameter(&params)?;
        self.base.seal();
        Ok(())
    }

    fn compute(&mut self, frame: &mut Frame<'_>) -> Result<(), UnitError> {
        let tag = self.base.binding.tag.clone();
        let Some(value) = frame.value(&tag, &self.base.column) else {
            return Ok(());
        };
        let (status, score) = self.classify(value);
        if let Some(result) = frame.result_mut(&tag) {
            if let Some(index) = result.health_index(&self.base.health) {
                result.set_score(index, score);
            }
            if let Some(entry) = result.current_mut() {
                entry.raise_status(status);
                if status == Status::Alarm {
                    entry.push_event(format!("{} above alarm limit", self.base.column));
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {}

    fn check_parameter(&self, params: &Parameters) -> Result<(), UnitError> {
        self.limits(params)?;
        self.base.check_common(params).map(|_| ())
    }

    fn set_parameter(&mut self, params: &Parameters) -> Result<(), UnitError> {
        let (warning, alarm) = self.limits(params)?;
        let common = self.base.check_common(params)?;
        self.base.commit(common);
        self.warning = warning;
        self.alarm = alarm;
        Ok(())
    }

    fn get_column(&self, device: &str) -> BTreeSet<String> {
        if self.base.owns_tag(device) {
            BTreeSet::from([self.base.column.clone()])
        } else {
            BTreeSet::new()
        }
    }

    fn get_health_define(&self, device: &str) -> Vec<String> {
        if self.base.owns_tag(device) {
            vec![self.base.health.clone()]
        } else {
            Vec::new()
        }
    }

    fn get_default_score(&self, device: &str) -> Vec<f64> {
        if self.base.owns_tag(device) {
            vec![100.0]
        } else {
            Vec::new()
        }
    }

    fn get_score_limit(&self, device: &str) -> Vec<bool> {
        if self.base.owns_tag(device) {
            vec![false]
        } else {
            Vec::new()
        }
    }

    fn get_score_reverse(&self, device: &str) -> Vec<bool> {
        if self.base.owns_tag(device) {
            vec![true]
        } else {
            Vec::new()
        }
    }
}
