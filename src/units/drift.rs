//! Slow-drift evaluation unit
//!
//! Tracks an exponential moving average of one column on the primary device
//! and scores how far each new sample sits from it.

use std::collections::BTreeSet;

use crate::error::UnitError;
use crate::types::{FunctionCategory, Status};
use crate::unit::{check_keys, param_f64, Frame, FunctionUnit, Parameters, UnitBinding, UnitIdentity};
use crate::units::{deviation_score, UnitBase};

const KEYS: &[&str] = &["column", "health", "alpha", "tolerance"];

#[derive(Debug, Clone)]
pub struct DriftUnit {
    base: UnitBase,
    alpha: f64,
    tolerance: f64,
    average: Option<f64>,
}

impl DriftUnit {
    pub const TYPE: &'static str = "drift";

    pub fn new(identity: UnitIdentity) -> Self {
        Self {
            base: UnitBase::new(identity, "temperature"),
            alpha: 0.1,
            tolerance: 0.25,
            average: None,
        }
    }

    pub fn boxed(identity: UnitIdentity) -> Box<dyn FunctionUnit> {
        Box::new(Self::new(identity))
    }

    /// Score against the current average, then fold the value in
    fn observe(&mut self, value: f64) -> f64 {
        let score = match self.average {
            Some(avg) => deviation_score(value, avg, self.tolerance),
            None => 100.0,
        };
        self.average = Some(match self.average {
            Some(avg) => avg + self.alpha * (value - avg),
            None => value,
        });
        score
    }

    /// Smoothing factor and tolerance after applying `params`
    fn smoothing(&self, params: &Parameters) -> Result<(f64, f64), UnitError> {
        check_keys(params, KEYS)?;
        let alpha = param_f64(params, "alpha")?.unwrap_or(self.alpha);
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(UnitError::InvalidParameter {
                key: "alpha".to_string(),
                reason: format!("expected 0 < alpha <= 1, got {alpha}"),
            });
        }
        let tolerance = param_f64(params, "tolerance")?.unwrap_or(self.tolerance);
        if tolerance <= 0.0 {
            return Err(UnitError::InvalidParameter {
                key: "tolerance".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok((alpha, tolerance))
    }
}

impl FunctionUnit for DriftUnit {
    fn function_id(&self) -> u32 {
        self.base.identity.function_id
    }

    fn name(&self) -> &str {
        &self.base.identity.name
    }

    fn function_type(&self) -> FunctionCategory {
        FunctionCategory::Evaluation
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
        if !value.is_finite() {
            return Err(UnitError::Compute(format!(
                "non-finite {} value at {}",
                self.base.column,
                frame.time()
            )));
        }
        let score = self.observe(value);
        if let Some(result) = frame.result_mut(&tag) {
            if let Some(index) = result.health_index(&self.base.health) {
                result.set_score(index, score);
            }
            if score < 50.0 {
                if let Some(entry) = result.current_mut() {
                    entry.raise_status(Status::Attention);
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.average = None;
    }

    fn check_parameter(&self, params: &Parameters) -> Result<(), UnitError> {
        self.smoothing(params)?;
        self.base.check_common(params).map(|_| ())
    }

    fn set_parameter(&mut self, params: &Parameters) -> Result<(), UnitError> {
        let (alpha, tolerance) = self.smoothing(params)?;
        let common = self.base.check_common(params)?;
        self.base.commit(common);
        self.alpha = alpha;
        self.tolerance = tolerance;
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
            vec![false]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_tracks_average() {
        let mut u = DriftUnit::new(UnitIdentity {
            function_id: 2,
            name: "drift".to_string(),
        });
        assert_eq!(u.observe(40.0), 100.0);
        assert_eq!(u.observe(40.0), 100.0);
        assert!(u.observe(50.0) == 0.0);
        assert!((u.average.unwrap() - 41.0).abs() < 1e-9);
        u.reset();
        assert!(u.average.is_none());
    }
}
