//! Test helpers shared by the worker tests

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::error::UnitError;
use crate::types::{FunctionCategory, Status};
use crate::unit::{Frame, FunctionUnit, Parameters, UnitBinding};

/// Shared call log, entries look like `name:device@secs`
pub type CallLog = Rc<RefCell<Vec<String>>>;

/// Scriptable unit that records every call it receives
pub struct ScriptedUnit {
    pub id: u32,
    pub name: String,
    pub category: FunctionCategory,
    pub realtime: bool,
    pub multi_device: bool,
    pub health: Vec<String>,
    /// Devices the unit contributes health defines for; empty means the tag
    pub owned: Vec<String>,
    pub fail_at: Option<i64>,
    pub binding: Option<UnitBinding>,
    pub log: CallLog,
}

impl ScriptedUnit {
    pub fn new(id: u32, name: &str, category: FunctionCategory, log: &CallLog) -> Self {
        Self {
            id,
            name: name.to_string(),
            category,
            realtime: true,
            multi_device: false,
            health: vec![name.to_string()],
            owned: Vec::new(),
            fail_at: None,
            binding: None,
            log: Rc::clone(log),
        }
    }

    pub fn boxed(self) -> Box<dyn FunctionUnit> {
        Box::new(self)
    }

    fn owns(&self, device: &str) -> bool {
        if self.owned.is_empty() {
            self.binding.as_ref().map(|b| b.tag == device).unwrap_or(false)
        } else {
            self.owned.iter().any(|d| d == device)
        }
    }

    fn per_device<T: Clone>(&self, device: &str, value: T) -> Vec<T> {
        if self.owns(device) {
            vec![value; self.health.len()]
        } else {
            Vec::new()
        }
    }
}

pub fn secs(frame: &Frame<'_>) -> i64 {
    frame.time().timestamp() - crate::types::ts(0).timestamp()
}

impl FunctionUnit for ScriptedUnit {
    fn function_id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn function_type(&self) -> FunctionCategory {
        self.category
    }

    fn is_realtime_function(&self) -> bool {
        self.realtime
    }

    fn requires_multi_device(&self) -> bool {
        self.multi_device
    }

    fn bind(&mut self, binding: UnitBinding) -> Result<(), UnitError> {
        self.log.borrow_mut().push(format!(
            "{}:bind start={}",
            self.name, binding.health_define_start
        ));
        self.binding = Some(binding);
        Ok(())
    }

    fn initial(&mut self) -> Result<(), UnitError> {
        self.log.borrow_mut().push(format!("{}:initial", self.name));
        Ok(())
    }

    fn compute(&mut self, frame: &mut Frame<'_>) -> Result<(), UnitError> {
        let t = secs(frame);
        if self.fail_at == Some(t) {
            return Err(UnitError::Compute(format!("boom at {t}")));
        }
        let devices: Vec<String> = frame.devices().into_iter().map(str::to_string).collect();
        for device in devices {
            self.log
                .borrow_mut()
                .push(format!("{}:{}@{}", self.name, device, t));
            if let Some(result) = frame.result_mut(&device) {
                if let Some(index) = self.health.first().and_then(|h| result.health_index(h)) {
                    result.set_score(index, 50.0);
                }
                if let Some(entry) = result.current_mut() {
                    entry.raise_status(Status::Attention);
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self, frame: &mut Frame<'_>) -> Result<(), UnitError> {
        let devices = frame.devices().join(",");
        self.log
            .borrow_mut()
            .push(format!("{}:finish {}@{}", self.name, devices, secs(frame)));
        Ok(())
    }

    fn reset(&mut self) {
        self.log.borrow_mut().push(format!("{}:reset", self.name));
    }

    fn check_parameter(&self, params: &Parameters) -> Result<(), UnitError> {
        match params.keys().find(|k| k.as_str() != "gain") {
            Some(key) => Err(UnitError::UnknownParameter(key.clone())),
            None => Ok(()),
        }
    }

    fn set_parameter(&mut self, params: &Parameters) -> Result<(), UnitError> {
        self.check_parameter(params)?;
        self.log
            .borrow_mut()
            .push(format!("{}:params {}", self.name, params.len()));
        Ok(())
    }

    fn disconnect(&mut self, nodes: &[String]) {
        self.log
            .borrow_mut()
            .push(format!("{}:disconnect {}", self.name, nodes.join(",")));
    }

    fn get_column(&self, device: &str) -> BTreeSet<String> {
        if self.owns(device) {
            BTreeSet::from([format!("{}_col", self.name)])
        } else {
            BTreeSet::new()
        }
    }

    fn get_health_define(&self, device: &str) -> Vec<String> {
        if self.owns(device) {
            self.health.clone()
        } else {
            Vec::new()
        }
    }

    fn get_default_score(&self, device: &str) -> Vec<f64> {
        self.per_device(device, 100.0)
    }

    fn get_score_limit(&self, device: &str) -> Vec<bool> {
        self.per_device(device, false)
    }

    fn get_score_reverse(&self, device: &str) -> Vec<bool> {
        self.per_device(device, false)
    }
}
