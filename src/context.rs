//! Process loop context
//!
//! A [`Context`] owns one worker for its whole life: it wires the streams,
//! remembers the last parameter document and drives `compute()` and
//! `flush()` once per tick.

use serde_json::Value;

use crate::error::FluxError;
use crate::stream::StreamSet;
use crate::types::{FeatureSample, PublishedResult};
use crate::worker::WorkerProcess;

pub struct Context {
    worker: Box<dyn WorkerProcess>,
    parameters: Option<Value>,
    ticks: u64,
    failures: u64,
}

impl Context {
    pub fn new(worker: Box<dyn WorkerProcess>) -> Self {
        Self {
            worker,
            parameters: None,
            ticks: 0,
            failures: 0,
        }
    }

    /// Initialise the worker and hand it its streams
    pub fn bind(&mut self, streams: StreamSet) -> Result<(), FluxError> {
        self.worker.initial()?;
        self.worker.bind_crimp(streams)
    }

    pub fn worker(&self) -> &dyn WorkerProcess {
        self.worker.as_ref()
    }

    pub fn worker_mut(&mut self) -> &mut dyn WorkerProcess {
        self.worker.as_mut()
    }

    /// Parameter document restored after a failed tick
    pub fn parameters(&self) -> Option<&Value> {
        self.parameters.as_ref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn push_sample(&mut self, device: &str, sample: FeatureSample) -> Result<(), FluxError> {
        self.worker.push_sample(device, sample)
    }

    /// Forward a parameter document; it is only remembered once the worker
    /// accepted it.
    pub fn set_parameter(&mut self, params: Value) -> Result<(), FluxError> {
        self.worker.set_parameter(&params)?;
        self.parameters = Some(params);
        Ok(())
    }

    /// Run one compute/flush cycle.
    ///
    /// A failing compute rolls the worker back (`clear`, `reset`, then the
    /// last accepted parameters) before the error is returned, so the next
    /// tick starts from a clean state.
    pub fn tick(&mut self) -> Result<Vec<PublishedResult>, FluxError> {
        self.ticks += 1;
        match self.worker.compute() {
            Ok(()) => Ok(self.worker.flush()),
            Err(err) => {
                self.failures += 1;
                log::warn!(
                    "{}: tick {} failed, rolling back: {}",
                    self.worker.tag(),
                    self.ticks,
                    err
                );
                self.rollback();
                Err(err)
            }
        }
    }

    fn rollback(&mut self) {
        self.worker.clear();
        self.worker.reset();
        if let Some(params) = &self.parameters {
            if let Err(err) = self.worker.set_parameter(params) {
                log::warn!(
                    "{}: could not restore parameters: {}",
                    self.worker.tag(),
                    err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::testing::{CallLog, ScriptedUnit};
    use crate::types::{ts, FunctionCategory};
    use crate::unit::Parameters;
    use crate::worker::{UnitRequest, Worker, WorkerVariant};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn context(log: &CallLog, fail_at: Option<i64>) -> Context {
        let config = WorkerConfig::new("a", &["a"], WorkerVariant::NormalRealtime);
        let mut worker = Worker::blank(&config).unwrap();
        let mut unit = ScriptedUnit::new(1, "p", FunctionCategory::Decision, log);
        unit.fail_at = fail_at;
        worker
            .register(
                FunctionCategory::Decision,
                UnitRequest::Concrete(unit.boxed(), Parameters::new()),
            )
            .unwrap();
        let mut ctx = Context::new(Box::new(worker));
        ctx.bind(StreamSet::new(["a"])).unwrap();
        ctx
    }

    #[test]
    fn test_tick_publishes_results() {
        let log = CallLog::default();
        let mut ctx = context(&log, None);
        ctx.push_sample("a", FeatureSample::new(ts(1))).unwrap();
        ctx.push_sample("a", FeatureSample::new(ts(2))).unwrap();

        let results = ctx.tick().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].entry.time, ts(2));
        assert!(ctx.tick().unwrap().is_empty());
        assert_eq!(ctx.ticks(), 2);
    }

    #[test]
    fn test_failed_tick_rolls_back() {
        let log = CallLog::default();
        let mut ctx = context(&log, Some(2));
        ctx.set_parameter(json!({"1": {"gain": 0.5}})).unwrap();
        ctx.push_sample("a", FeatureSample::new(ts(1))).unwrap();
        ctx.push_sample("a", FeatureSample::new(ts(2))).unwrap();
        log.borrow_mut().clear();

        let err = ctx.tick().unwrap_err();
        assert!(matches!(err, FluxError::Runtime { ref unit, .. } if unit == "p"));
        assert_eq!(ctx.failures(), 1);
        assert_eq!(
            log.borrow().clone(),
            vec!["p:a@1", "p:reset", "p:params 1"]
        );

        // streams were cleared; the next tick starts fresh
        ctx.push_sample("a", FeatureSample::new(ts(3))).unwrap();
        let results = ctx.tick().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.time, ts(3));
    }

    #[test]
    fn test_rejected_parameters_not_remembered() {
        let log = CallLog::default();
        let mut ctx = context(&log, None);
        assert!(ctx.set_parameter(json!({"1": {"bogus": 1}})).is_err());
        assert!(ctx.parameters().is_none());
        ctx.set_parameter(json!({"1": {"gain": 1}})).unwrap();
        assert_eq!(ctx.parameters(), Some(&json!({"1": {"gain": 1}})));
    }
}
