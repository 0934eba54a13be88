//! Cross-device coherence unit
//!
//! Needs an aligned slice of several devices: every device present in the
//! frame is scored by how far its value sits from the group mean. Frames
//! released by a forced flush may hold a single device; those are marked and
//! left at default scores.

use std::collections::BTreeSet;

use crate::error::UnitError;
use crate::types::{FunctionCategory, Status};
use crate::unit::{check_keys, param_f64, Frame, FunctionUnit, Parameters, UnitBinding, UnitIdentity};
use crate::units::{deviation_score, UnitBase};

const KEYS: &[&str] = &["column", "health", "tolerance"];

#[derive(Debug, Clone)]
pub struct CoherenceUnit {
    base: UnitBase,
    tolerance: f64,
    partial_frames: u64,
}

impl CoherenceUnit {
    pub const TYPE: &'static str = "coherence";

    pub fn new(identity: UnitIdentity) -> Self {
        Self {
            base: UnitBase::new(identity, "velocity_rms"),
            tolerance: 0.5,
            partial_frames: 0,
        }
    }

    pub fn boxed(identity: UnitIdentity) -> Box<dyn FunctionUnit> {
        Box::new(Self::new(identity))
    }

    pub fn partial_frames(&self) -> u64 {
        self.partial_frames
    }

    fn parse_tolerance(&self, params: &Parameters) -> Result<f64, UnitError> {
        check_keys(params, KEYS)?;
        let tolerance = param_f64(params, "tolerance")?.unwrap_or(self.tolerance);
        if tolerance <= 0.0 {
            return Err(UnitError::InvalidParameter {
                key: "tolerance".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(tolerance)
    }
}

impl FunctionUnit for CoherenceUnit {
    fn function_id(&self) -> u32 {
        self.base.identity.function_id
    }

    fn name(&self) -> &str {
        &self.base.identity.name
    }

    fn function_type(&self) -> FunctionCategory {
        FunctionCategory::Other
    }

    fn requires_multi_device(&self) -> bool {
        true
    }

    fn bind(&mut self, binding: UnitBinding) -> Result<(), UnitError> {
        let params = self.base.attach(binding);
        self.set_parameter(&params)?;
        self.base.seal();
        Ok(())
    }

    fn compute(&mut self, frame: &mut Frame<'_>) -> Result<(), UnitError> {
        let readings: Vec<(String, f64)> = frame
            .devices()
            .into_iter()
            .filter_map(|d| frame.value(d, &self.base.column).map(|v| (d.to_string(), v)))
            .collect();

        if readings.len() < 2 {
            self.partial_frames += 1;
            for (device, _) in &readings {
                if let Some(entry) = frame.result_mut(device).and_then(|r| r.current_mut()) {
                    entry.push_event("coherence: partial frame");
                }
            }
            return Ok(());
        }

        let mean = readings.iter().map(|(_, v)| v).sum::<f64>() / readings.len() as f64;
        for (device, value) in &readings {
            let score = deviation_score(*value, mean, self.tolerance);
            if let Some(result) = frame.result_mut(device) {
                if let Some(index) = result.health_index(&self.base.health) {
                    result.set_score(index, score);
                }
                if score == 0.0 {
                    if let Some(entry) = result.current_mut() {
                        entry.raise_status(Status::Warning);
                    }
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.partial_frames = 0;
    }

    fn check_parameter(&self, params: &Parameters) -> Result<(), UnitError> {
        self.parse_tolerance(params)?;
        self.base.check_common(params).map(|_| ())
    }

    fn set_parameter(&mut self, params: &Parameters) -> Result<(), UnitError> {
        let tolerance = self.parse_tolerance(params)?;
        let common = self.base.check_common(params)?;
        self.base.commit(common);
        self.tolerance = tolerance;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamSet;
    use crate::types::{ts, FeatureSample, HealthInfo};

    fn bound() -> CoherenceUnit {
        let mut unit = CoherenceUnit::new(UnitIdentity {
            function_id: 1,
            name: "spread".to_string(),
        });
        unit.bind(UnitBinding {
            tag: "a".to_string(),
            devices: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        })
        .unwrap();
        unit
    }

    /// One recorded step at `ts(1)` per device
    fn streams(values: &[(&str, f64)]) -> StreamSet {
        let table = HealthInfo {
            health_define: vec!["spread".to_string()],
            default_score: vec![100.0],
            score_limit: vec![false],
            score_reverse: vec![false],
            ..Default::default()
        };
        let mut set = StreamSet::new(values.iter().map(|(d, _)| *d));
        for (device, value) in values {
            set.push(device, FeatureSample::new(ts(1)).with("velocity_rms", *value))
                .unwrap();
            let stream = set.get_mut(device).unwrap();
            stream.container.next();
            stream.result.configure(&table);
            stream.result.add_result(Status::Normal, ts(1));
        }
        set
    }

    #[test]
    fn test_scores_against_group_mean() {
        let mut unit = bound();
        let mut set = streams(&[("a", 3.0), ("b", 5.0)]);
        let devices = vec!["a".to_string(), "b".to_string()];
        let mut frame = Frame::from_streams(&mut set, &devices, ts(1), true);
        unit.compute(&mut frame).unwrap();

        for device in ["a", "b"] {
            let score = set.get(device).unwrap().result.score_at(0, 0).unwrap();
            assert!((score - 50.0).abs() < 1e-9);
        }
        assert_eq!(unit.partial_frames(), 0);
    }

    #[test]
    fn test_partial_frame_is_marked() {
        let mut unit = bound();
        let mut set = streams(&[("a", 3.0), ("b", 5.0)]);
        let devices = vec!["a".to_string()];
        let mut frame = Frame::from_streams(&mut set, &devices, ts(1), true);
        unit.compute(&mut frame).unwrap();

        assert_eq!(unit.partial_frames(), 1);
        let entry = set.get("a").unwrap().result.current().unwrap();
        assert_eq!(entry.scores, vec![100.0]);
        assert_eq!(entry.events, vec!["coherence: partial frame".to_string()]);
    }

    #[test]
    fn test_requires_multi_device() {
        assert!(bound().requires_multi_device());
    }
}
