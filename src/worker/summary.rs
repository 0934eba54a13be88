//! Hierarchical summary worker
//!
//! Runs several independent sub-workers to completion, then replays the
//! result entries they produced during the tick through a second set of
//! "summary" units.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use uuid::Uuid;

use crate::config::{validate_devices, SummaryConfig};
use crate::error::{ConfigError, FluxError};
use crate::registry::FunctionRegistry;
use crate::stream::StreamSet;
use crate::types::{FeatureSample, HealthInfo, PublishedResult};
use crate::unit::{Frame, FunctionUnit, Parameters, UnitBinding};
use crate::worker::{
    apply_parameters, stage_parameters, DeviceTables, FeedPull, ResultRoundRobinPull, Worker,
    WorkerProcess,
};

/// Parameter key addressing the summary units themselves
pub const SUMMARY_KEY: &str = "summary";

pub struct SummaryWorker {
    instance_id: Uuid,
    tag: String,
    devices: Vec<String>,
    sub_workers: BTreeMap<String, Worker>,
    units: Vec<Box<dyn FunctionUnit>>,
    tables: DeviceTables,
    /// Streams of parent devices no sub-worker claims
    unclaimed: StreamSet,
}

impl SummaryWorker {
    /// Build every sub-worker and summary unit from configuration
    pub fn new(config: &SummaryConfig, registry: &FunctionRegistry) -> Result<Self, FluxError> {
        config.block_time.validate()?;
        let mut sub_workers = BTreeMap::new();
        for (sub_tag, sub) in &config.sub_workers {
            sub_workers.insert(sub_tag.clone(), Worker::new(sub, registry)?);
        }
        let mut units = Vec::with_capacity(config.summary.len());
        for (i, spec) in config.summary.iter().enumerate() {
            units.push((registry.build(spec, i as u32 + 1)?, spec.parameters.clone()));
        }
        Self::assemble(&config.tag, &config.devices, sub_workers, units)
    }

    /// Wire already built sub-workers and summary units together.
    ///
    /// Sub-device sets must be subsets of `devices` and pairwise disjoint.
    /// Summary units are bound against every parent device.
    pub fn assemble(
        tag: &str,
        devices: &[String],
        sub_workers: BTreeMap<String, Worker>,
        units: Vec<(Box<dyn FunctionUnit>, Parameters)>,
    ) -> Result<Self, FluxError> {
        validate_devices(tag, devices)?;
        if sub_workers.is_empty() {
            return Err(ConfigError::EmptyAlgorithmSet(tag.to_string()).into());
        }

        let parent: BTreeSet<&str> = devices.iter().map(String::as_str).collect();
        let mut owner: BTreeMap<&str, &str> = BTreeMap::new();
        for (sub_tag, worker) in &sub_workers {
            if !worker.devices().iter().all(|d| parent.contains(d.as_str())) {
                return Err(ConfigError::SubDevicesNotSubset(sub_tag.clone()).into());
            }
            for device in worker.devices() {
                if let Some(first) = owner.insert(device.as_str(), sub_tag.as_str()) {
                    return Err(ConfigError::OverlappingSubDevices {
                        device: device.clone(),
                        first: first.to_string(),
                        second: sub_tag.clone(),
                    }
                    .into());
                }
            }
        }

        let mut tables = DeviceTables::build(devices, &[])?;
        for worker in sub_workers.values() {
            tables.absorb(worker.tables());
        }
        let offset = tables.get(tag).map(|t| t.health_define.len()).unwrap_or(0);

        let mut bound: Vec<Box<dyn FunctionUnit>> = Vec::with_capacity(units.len());
        for (mut unit, parameters) in units {
            if bound.iter().any(|u| u.name() == unit.name()) {
                return Err(ConfigError::DuplicateUnit(unit.name().to_string()).into());
            }
            let health_define_start = offset
                + bound
                    .iter()
                    .map(|u| u.get_health_define(tag).len())
                    .sum::<usize>();
            let binding = UnitBinding {
                tag: tag.to_string(),
                devices: devices.to_vec(),
                sequence_index: bound.len(),
                health_define_start,
                net_load_mode: false,
                parameters,
            };
            unit.bind(binding)
                .map_err(|e| FluxError::parameter(unit.name(), e))?;
            unit.initial()
                .map_err(|e| FluxError::runtime(unit.name(), e))?;
            bound.push(unit);
        }
        tables.extend(&bound)?;

        Ok(Self {
            instance_id: Uuid::new_v4(),
            tag: tag.to_string(),
            devices: devices.to_vec(),
            sub_workers,
            units: bound,
            tables,
            unclaimed: StreamSet::default(),
        })
    }

    pub fn sub_workers(&self) -> &BTreeMap<String, Worker> {
        &self.sub_workers
    }

    pub fn units(&self) -> &[Box<dyn FunctionUnit>] {
        &self.units
    }

    fn configure_results(&mut self) {
        let tables = &self.tables;
        for worker in self.sub_workers.values_mut() {
            if let Some(streams) = worker.streams_mut() {
                for (device, stream) in streams.iter_mut() {
                    if let Some(info) = tables.get(device) {
                        stream.result.configure(info);
                    }
                }
            }
        }
    }

    /// Run the summary units over every entry appended since `starts`
    fn summarize(
        units: &mut [Box<dyn FunctionUnit>],
        streams: &mut StreamSet,
        starts: &BTreeMap<String, usize>,
    ) -> Result<usize, FluxError> {
        let devices: Vec<String> = starts.keys().cloned().collect();
        for (device, start) in starts {
            if let Some(stream) = streams.get_mut(device) {
                stream.result.seek(*start);
            }
        }
        let mut pull = ResultRoundRobinPull::new(&devices);
        let mut steps = 0;
        while let Some(step) = pull.next(streams) {
            steps += 1;
            let mut frame = Frame::from_streams(streams, &step.devices, step.time, true);
            for unit in units.iter_mut() {
                unit.compute(&mut frame)
                    .map_err(|e| FluxError::runtime(unit.name(), e))?;
            }
        }
        Ok(steps)
    }
}

impl WorkerProcess for SummaryWorker {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn initial(&mut self) -> Result<(), FluxError> {
        for worker in self.sub_workers.values_mut() {
            worker.initial()?;
        }
        Ok(())
    }

    fn bind_crimp(&mut self, mut streams: StreamSet) -> Result<(), FluxError> {
        if let Some(missing) = self.devices.iter().find(|d| !streams.contains(d)) {
            return Err(FluxError::UnknownDevice(missing.clone()));
        }
        for worker in self.sub_workers.values_mut() {
            let part = streams.split_off(worker.devices());
            worker.bind_crimp(part)?;
        }
        self.unclaimed = streams;
        self.configure_results();
        Ok(())
    }

    fn push_sample(&mut self, device: &str, sample: FeatureSample) -> Result<(), FluxError> {
        match self
            .sub_workers
            .values_mut()
            .find(|w| w.devices().iter().any(|d| d == device))
        {
            Some(worker) => worker.push_sample(device, sample),
            None => self.unclaimed.push(device, sample),
        }
    }

    fn compute(&mut self) -> Result<(), FluxError> {
        let mut starts = BTreeMap::new();
        for worker in self.sub_workers.values_mut() {
            if let Some(streams) = worker.streams() {
                for (device, stream) in streams.iter() {
                    starts.insert(device.to_string(), stream.result.size());
                }
            }
            worker.compute()?;
        }

        // Borrow every sub-worker's streams for the summary pass, then hand
        // them back even when a summary unit fails.
        let mut merged = StreamSet::default();
        let mut lent = Vec::new();
        for (sub_tag, worker) in self.sub_workers.iter_mut() {
            if let Some(streams) = worker.take_streams() {
                merged.append(streams);
                lent.push(sub_tag.clone());
            }
        }

        let outcome = Self::summarize(&mut self.units, &mut merged, &starts);

        for sub_tag in &lent {
            if let Some(worker) = self.sub_workers.get_mut(sub_tag) {
                let part = merged.split_off(worker.devices());
                worker.restore_streams(part);
            }
        }

        let steps = outcome?;
        log::debug!("{}: summarized {} entr(ies)", self.tag, steps);
        Ok(())
    }

    fn flush(&mut self) -> Vec<PublishedResult> {
        self.sub_workers
            .values_mut()
            .flat_map(|w| w.flush())
            .collect()
    }

    fn reset(&mut self) {
        for worker in self.sub_workers.values_mut() {
            worker.reset();
        }
        for unit in &mut self.units {
            unit.reset();
        }
    }

    fn clear(&mut self) {
        for worker in self.sub_workers.values_mut() {
            worker.clear();
        }
        for (_, stream) in self.unclaimed.iter_mut() {
            stream.container.clear();
            stream.result.clear();
        }
    }

    /// Routes `{"summary": {...}, sub_tag: {...}}`. The whole document is
    /// checked before any sub-worker or summary unit changes.
    fn set_parameter(&mut self, params: &Value) -> Result<(), FluxError> {
        let Some(map) = params.as_object() else {
            return Err(FluxError::Parameter {
                unit: self.tag.clone(),
                message: "expected an object keyed by sub-tag".to_string(),
            });
        };
        let mut summary = Vec::new();
        for (key, value) in map {
            if key == SUMMARY_KEY {
                summary = stage_parameters(&self.tag, &self.units, value, "summary unit")?;
            } else {
                let worker = self.sub_workers.get(key).ok_or_else(|| FluxError::Parameter {
                    unit: self.tag.clone(),
                    message: format!("unknown sub-tag `{key}`"),
                })?;
                worker.check_parameter(value)?;
            }
        }
        for (key, value) in map.iter().filter(|(key, _)| key.as_str() != SUMMARY_KEY) {
            if let Some(worker) = self.sub_workers.get_mut(key) {
                worker.set_parameter(value)?;
            }
        }
        apply_parameters(&mut self.units, summary)
    }

    fn disconnect(&mut self, nodes: &[String]) {
        for worker in self.sub_workers.values_mut() {
            worker.disconnect(nodes);
        }
        for unit in &mut self.units {
            unit.disconnect(nodes);
        }
    }

    fn get_health_info(&self) -> BTreeMap<String, HealthInfo> {
        self.tables.to_map()
    }

    fn print_message(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "summary {} [{}]", self.tag, self.instance_id);
        for unit in &self.units {
            let _ = writeln!(out, "  summary unit {} (id {})", unit.name(), unit.function_id());
        }
        for (sub_tag, worker) in &self.sub_workers {
            let _ = writeln!(out, "  sub-worker {sub_tag}:");
            for line in worker.print_message().lines() {
                let _ = writeln!(out, "    {line}");
            }
        }
        out
    }
}
