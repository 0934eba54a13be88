//! Function unit contract
//!
//! A function unit is one diagnostic algorithm instance. The worker owns a
//! set of them, wires them to its devices and feeds them one [`Frame`] per
//! drive step. The numeric body of a unit is opaque to the worker; only the
//! contract below matters.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::error::UnitError;
use crate::stream::{DeviceStream, ResultStream, StreamSet};
use crate::types::{FeatureSample, FunctionCategory};

/// Parameter mapping handed to a unit
pub type Parameters = Map<String, Value>;

/// Identity assigned when a unit is constructed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitIdentity {
    pub function_id: u32,
    pub name: String,
}

/// Wiring a unit receives at registration time
#[derive(Debug, Clone, Default)]
pub struct UnitBinding {
    /// Primary device of the owning worker
    pub tag: String,
    /// Every device of the owning worker, tag included
    pub devices: Vec<String>,
    /// Position of the unit in the worker's flat unit list
    pub sequence_index: usize,
    /// Offset of the unit's first health define in the tag's table
    pub health_define_start: usize,
    /// Parameters are loaded from the network rather than local storage
    pub net_load_mode: bool,
    pub parameters: Parameters,
}

/// One diagnostic algorithm participating in a worker.
pub trait FunctionUnit {
    fn function_id(&self) -> u32;

    fn name(&self) -> &str;

    fn function_type(&self) -> FunctionCategory;

    /// Realtime units produce a result per drive step
    fn is_realtime_function(&self) -> bool {
        true
    }

    /// Units that need a jointly aligned slice across several devices
    fn requires_multi_device(&self) -> bool {
        false
    }

    /// Receive the worker wiring and initial parameters
    fn bind(&mut self, binding: UnitBinding) -> Result<(), UnitError>;

    fn initial(&mut self) -> Result<(), UnitError> {
        Ok(())
    }

    fn compute(&mut self, frame: &mut Frame<'_>) -> Result<(), UnitError>;

    /// Called once at the end of a stack pass, after a result entry has been
    /// appended for every device that produced data.
    fn finish(&mut self, _frame: &mut Frame<'_>) -> Result<(), UnitError> {
        Ok(())
    }

    fn reset(&mut self);

    /// Validate `params` without applying them; `set_parameter` must accept
    /// whatever this accepts.
    fn check_parameter(&self, params: &Parameters) -> Result<(), UnitError>;

    /// Apply `params`. Nothing changes when an error is returned.
    fn set_parameter(&mut self, params: &Parameters) -> Result<(), UnitError>;

    fn disconnect(&mut self, _nodes: &[String]) {}

    fn get_column(&self, device: &str) -> BTreeSet<String>;

    fn get_health_define(&self, device: &str) -> Vec<String>;

    fn get_default_score(&self, device: &str) -> Vec<f64>;

    fn get_score_limit(&self, device: &str) -> Vec<bool>;

    fn get_score_reverse(&self, device: &str) -> Vec<bool>;
}

/// Streams of one device inside a frame
pub struct FrameSlot<'a> {
    pub device: &'a str,
    pub stream: &'a mut DeviceStream,
}

/// The slice of devices a drive step hands to the function units.
///
/// Single-device steps hold one slot; synchronized steps hold every device
/// present at the aligned instant.
pub struct Frame<'a> {
    time: DateTime<Utc>,
    recording: bool,
    slots: Vec<FrameSlot<'a>>,
}

impl<'a> Frame<'a> {
    pub fn new(time: DateTime<Utc>, recording: bool, slots: Vec<FrameSlot<'a>>) -> Self {
        Self {
            time,
            recording,
            slots,
        }
    }

    /// Borrow the streams of `devices` out of a stream set
    pub fn from_streams(
        streams: &'a mut StreamSet,
        devices: &[String],
        time: DateTime<Utc>,
        recording: bool,
    ) -> Self {
        let slots = streams
            .iter_mut()
            .filter(|(device, _)| devices.iter().any(|d| d.as_str() == *device))
            .map(|(device, stream)| FrameSlot { device, stream })
            .collect();
        Self::new(time, recording, slots)
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Whether a result entry exists for this step
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn devices(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.device).collect()
    }

    pub fn contains(&self, device: &str) -> bool {
        self.slots.iter().any(|s| s.device == device)
    }

    pub fn sample(&self, device: &str) -> Option<&FeatureSample> {
        self.slot(device).and_then(|s| s.stream.container.current())
    }

    pub fn value(&self, device: &str, column: &str) -> Option<f64> {
        self.sample(device).and_then(|s| s.value(column))
    }

    pub fn result(&self, device: &str) -> Option<&ResultStream> {
        self.slot(device).map(|s| &s.stream.result)
    }

    /// Result stream to write into; `None` when the step records no entry
    pub fn result_mut(&mut self, device: &str) -> Option<&mut ResultStream> {
        if !self.recording {
            return None;
        }
        self.slots
            .iter_mut()
            .find(|s| s.device == device)
            .map(|s| &mut s.stream.result)
    }

    pub fn slots_mut(&mut self) -> std::slice::IterMut<'_, FrameSlot<'a>> {
        self.slots.iter_mut()
    }

    fn slot(&self, device: &str) -> Option<&FrameSlot<'a>> {
        self.slots.iter().find(|s| s.device == device)
    }
}

/// Read an optional numeric parameter
pub fn param_f64(params: &Parameters, key: &str) -> Result<Option<f64>, UnitError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| UnitError::InvalidParameter {
                key: key.to_string(),
                reason: format!("expected a number, got {v}"),
            }),
    }
}

/// Read an optional string parameter
pub fn param_str<'p>(params: &'p Parameters, key: &str) -> Result<Option<&'p str>, UnitError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(v) => Err(UnitError::InvalidParameter {
            key: key.to_string(),
            reason: format!("expected a string, got {v}"),
        }),
    }
}

/// Reject keys a unit does not understand
pub fn check_keys(params: &Parameters, known: &[&str]) -> Result<(), UnitError> {
    match params.keys().find(|k| !known.contains(&k.as_str())) {
        Some(key) => Err(UnitError::UnknownParameter(key.clone())),
        None => Ok(()),
    }
}
