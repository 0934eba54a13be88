//! Worker execution framework
//!
//! A [`Worker`] owns a set of function units, validates their composition
//! and drives them against the streams of one or many devices. The process
//! loop talks to every worker flavour through [`WorkerProcess`].
//!
//! Lifecycle: `registered → bound → running ⇄ reset`. `clear()` and
//! `reset()` return a worker to `bound`.

mod blocked;
mod feed;
mod summary;
mod sync;
mod tables;
mod variant;

pub use blocked::{BlockWindow, BlockedWorker, Clock, SystemClock};
pub use feed::{FeedPull, ResultRoundRobinPull, RoundRobinPull, SinglePull, Step};
pub use summary::{SummaryWorker, SUMMARY_KEY};
pub use sync::{SyncPull, SyncState, Synchronizer, Timeline};
pub use tables::DeviceTables;
pub use variant::WorkerVariant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use uuid::Uuid;

use crate::config::{UnitSpec, WorkerConfig};
use crate::error::{ConfigError, FluxError};
use crate::registry::FunctionRegistry;
use crate::stream::StreamSet;
use crate::types::{FeatureSample, FunctionCategory, HealthInfo, PublishedResult, Status};
use crate::unit::{Frame, FunctionUnit, Parameters, UnitBinding};

/// Surface the process loop drives every tick
pub trait WorkerProcess {
    /// Primary device id
    fn tag(&self) -> &str;

    fn initial(&mut self) -> Result<(), FluxError>;

    /// Wire the container and result streams of every device
    fn bind_crimp(&mut self, streams: StreamSet) -> Result<(), FluxError>;

    /// Append a sample to one device's container
    fn push_sample(&mut self, device: &str, sample: FeatureSample) -> Result<(), FluxError>;

    fn compute(&mut self) -> Result<(), FluxError>;

    /// Hand over the result entries produced since the previous flush
    fn flush(&mut self) -> Vec<PublishedResult>;

    fn reset(&mut self);

    fn clear(&mut self);

    fn set_parameter(&mut self, params: &Value) -> Result<(), FluxError>;

    fn disconnect(&mut self, nodes: &[String]);

    fn get_health_info(&self) -> BTreeMap<String, HealthInfo>;

    /// Diagnostics dump, not part of the algorithmic contract
    fn print_message(&self) -> String;

    fn get_column(&self) -> BTreeMap<String, BTreeSet<String>> {
        project(self.get_health_info(), |info| info.column)
    }

    fn get_health_define(&self) -> BTreeMap<String, Vec<String>> {
        project(self.get_health_info(), |info| info.health_define)
    }

    fn get_default_score(&self) -> BTreeMap<String, Vec<f64>> {
        project(self.get_health_info(), |info| info.default_score)
    }

    fn get_score_limit(&self) -> BTreeMap<String, Vec<bool>> {
        project(self.get_health_info(), |info| info.score_limit)
    }

    fn get_score_reverse(&self) -> BTreeMap<String, Vec<bool>> {
        project(self.get_health_info(), |info| info.score_reverse)
    }
}

fn project<T>(
    tables: BTreeMap<String, HealthInfo>,
    f: impl Fn(HealthInfo) -> T,
) -> BTreeMap<String, T> {
    tables.into_iter().map(|(k, v)| (k, f(v))).collect()
}

/// A function unit handed to [`Worker::register`]
pub enum UnitRequest<'a> {
    /// An already constructed unit and its initial parameters
    Concrete(Box<dyn FunctionUnit>, Parameters),
    /// A `{type, parameters}` request resolved through a registry
    Spec(&'a UnitSpec, &'a FunctionRegistry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Registered,
    Bound,
    Running,
}

/// Drives a set of function units over one or many device streams
pub struct Worker {
    instance_id: Uuid,
    tag: String,
    devices: Vec<String>,
    variant: WorkerVariant,
    net_load_mode: bool,
    units: Vec<Box<dyn FunctionUnit>>,
    /// Indices into `units`, per category
    decision: Vec<usize>,
    evaluation: Vec<usize>,
    other: Vec<usize>,
    tables: DeviceTables,
    synchronizer: Option<Synchronizer>,
    streams: Option<StreamSet>,
    state: WorkerState,
}

impl Worker {
    /// Build, register and bind a worker from its configuration
    pub fn new(config: &WorkerConfig, registry: &FunctionRegistry) -> Result<Self, FluxError> {
        let mut worker = Self::blank(config)?;
        for category in [
            FunctionCategory::Decision,
            FunctionCategory::Evaluation,
            FunctionCategory::Other,
        ] {
            for spec in config.units(category) {
                worker.register(category, UnitRequest::Spec(spec, registry))?;
            }
        }
        worker.bind_to_devices()?;
        Ok(worker)
    }

    /// A validated worker with no units registered yet
    pub fn blank(config: &WorkerConfig) -> Result<Self, FluxError> {
        config.validate()?;
        let variant = config.worker_variant;
        variant.check_device_count(config.devices.len())?;

        let synchronizer = (variant.is_multi_device() && config.synchronized).then(|| {
            Synchronizer::new(&config.devices, config.max_delay, config.data_delta_seconds)
        });

        Ok(Self {
            instance_id: Uuid::new_v4(),
            tag: config.tag.clone(),
            devices: config.devices.clone(),
            variant,
            net_load_mode: config.net_load_mode,
            units: Vec::new(),
            decision: Vec::new(),
            evaluation: Vec::new(),
            other: Vec::new(),
            tables: DeviceTables::default(),
            synchronizer,
            streams: None,
            state: WorkerState::Registered,
        })
    }

    /// Register one unit into a category.
    ///
    /// The unit is bound to the worker's devices, `initial()`-ed and appended
    /// to both its category list and the flat unit list.
    pub fn register(
        &mut self,
        category: FunctionCategory,
        request: UnitRequest<'_>,
    ) -> Result<(), FluxError> {
        let (mut unit, parameters) = match request {
            UnitRequest::Concrete(unit, parameters) => (unit, parameters),
            UnitRequest::Spec(spec, registry) => {
                let default_id = self.units.len() as u32 + 1;
                (registry.build(spec, default_id)?, spec.parameters.clone())
            }
        };

        self.check_admissible(category, unit.as_ref())?;

        let health_define_start = self
            .units
            .iter()
            .map(|u| u.get_health_define(&self.tag).len())
            .sum();
        let binding = UnitBinding {
            tag: self.tag.clone(),
            devices: self.devices.clone(),
            sequence_index: self.units.len(),
            health_define_start,
            net_load_mode: self.net_load_mode,
            parameters,
        };
        unit.bind(binding)
            .map_err(|e| FluxError::parameter(unit.name(), e))?;
        unit.initial()
            .map_err(|e| FluxError::runtime(unit.name(), e))?;

        log::debug!(
            "{}: registered {} unit `{}` (id {})",
            self.tag,
            category,
            unit.name(),
            unit.function_id()
        );
        let index = self.units.len();
        self.units.push(unit);
        self.category_list_mut(category).push(index);
        self.state = WorkerState::Registered;
        Ok(())
    }

    fn check_admissible(
        &self,
        category: FunctionCategory,
        unit: &dyn FunctionUnit,
    ) -> Result<(), ConfigError> {
        let name = unit.name().to_string();
        if unit.function_type() != category {
            return Err(ConfigError::CategoryMismatch {
                unit: name,
                declared: unit.function_type().to_string(),
                target: category.to_string(),
            });
        }
        if !self.variant.runs(category) {
            return Err(ConfigError::CategoryNotRun {
                category: category.to_string(),
                variant: self.variant.to_string(),
            });
        }
        if self.variant.is_realtime() && !unit.is_realtime_function() {
            return Err(ConfigError::RealtimeMismatch(name));
        }
        if self.units.iter().any(|u| u.name() == name) {
            return Err(ConfigError::DuplicateUnit(name));
        }
        if unit.requires_multi_device() && !self.variant.is_multi_device() {
            return Err(ConfigError::MultiDeviceUnsupported(name));
        }
        Ok(())
    }

    fn category_list_mut(&mut self, category: FunctionCategory) -> &mut Vec<usize> {
        match category {
            FunctionCategory::Decision => &mut self.decision,
            FunctionCategory::Evaluation => &mut self.evaluation,
            FunctionCategory::Other => &mut self.other,
        }
    }

    fn category_list(&self, category: FunctionCategory) -> &[usize] {
        match category {
            FunctionCategory::Decision => &self.decision,
            FunctionCategory::Evaluation => &self.evaluation,
            FunctionCategory::Other => &self.other,
        }
    }

    /// Build the per-device tables. Fails when no unit is registered, when
    /// two units declare the same health define for a device, or when a
    /// unit's tables disagree in length.
    pub fn bind_to_devices(&mut self) -> Result<(), FluxError> {
        if self.units.is_empty() {
            return Err(ConfigError::EmptyAlgorithmSet(self.tag.clone()).into());
        }
        self.tables = DeviceTables::build(&self.devices, &self.units)?;
        if let Some(streams) = self.streams.as_mut() {
            configure_results(streams, &self.tables);
        }
        self.state = WorkerState::Bound;
        Ok(())
    }

    /// Unit indices in execution order
    fn run_order(&self) -> Vec<usize> {
        self.variant
            .categories()
            .iter()
            .flat_map(|c| self.category_list(*c).iter().copied())
            .collect()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    pub fn variant(&self) -> WorkerVariant {
        self.variant
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn units(&self) -> &[Box<dyn FunctionUnit>] {
        &self.units
    }

    pub fn tables(&self) -> &DeviceTables {
        &self.tables
    }

    pub fn synchronizer(&self) -> Option<&Synchronizer> {
        self.synchronizer.as_ref()
    }

    pub fn streams(&self) -> Option<&StreamSet> {
        self.streams.as_ref()
    }

    pub fn streams_mut(&mut self) -> Option<&mut StreamSet> {
        self.streams.as_mut()
    }

    /// Check a parameter document without applying it
    pub fn check_parameter(&self, params: &Value) -> Result<(), FluxError> {
        stage_parameters(&self.tag, &self.units, params, "function unit").map(|_| ())
    }

    pub(crate) fn take_streams(&mut self) -> Option<StreamSet> {
        self.streams.take()
    }

    pub(crate) fn restore_streams(&mut self, streams: StreamSet) {
        self.streams = Some(streams);
    }

    /// Fresh drive strategy for one compute pass
    fn pull(&mut self) -> Result<Box<dyn FeedPull>, FluxError> {
        let record = self.variant.is_realtime();
        let streams = self
            .streams
            .as_mut()
            .ok_or_else(|| FluxError::NotReady(self.tag.clone()))?;
        let pull: Box<dyn FeedPull> = match self.synchronizer.as_mut() {
            Some(sync) => Box::new(sync.pull(streams, record)),
            None if self.variant.is_multi_device() => {
                Box::new(RoundRobinPull::new(&self.devices, record))
            }
            None => Box::new(SinglePull::new(&self.tag, record)),
        };
        Ok(pull)
    }

    /// Close a stack pass: one result per device that produced data, then
    /// let every unit write its accumulated values.
    fn finish_stack(
        units: &mut [Box<dyn FunctionUnit>],
        order: &[usize],
        streams: &mut StreamSet,
        last_seen: &BTreeMap<String, DateTime<Utc>>,
    ) -> Result<(), FluxError> {
        let Some(time) = last_seen.values().max().copied() else {
            return Ok(());
        };
        for (device, at) in last_seen {
            if let Some(stream) = streams.get_mut(device) {
                stream.result.add_result(Status::Normal, *at);
            }
        }
        let devices: Vec<String> = last_seen.keys().cloned().collect();
        let mut frame = Frame::from_streams(streams, &devices, time, true);
        for &i in order {
            units[i]
                .finish(&mut frame)
                .map_err(|e| FluxError::runtime(units[i].name(), e))?;
        }
        Ok(())
    }
}

fn configure_results(streams: &mut StreamSet, tables: &DeviceTables) {
    for (device, stream) in streams.iter_mut() {
        if let Some(info) = tables.get(device) {
            stream.result.configure(info);
        }
    }
}

/// Parse a flat `{function_id: {...}}` parameter document
fn parse_parameter_set(
    owner: &str,
    params: &Value,
) -> Result<Vec<(u32, Parameters)>, FluxError> {
    let Some(map) = params.as_object() else {
        return Err(FluxError::Parameter {
            unit: owner.to_string(),
            message: "expected an object keyed by function id".to_string(),
        });
    };
    map.iter()
        .map(|(key, value)| {
            let id = key.parse::<u32>().map_err(|_| FluxError::Parameter {
                unit: owner.to_string(),
                message: format!("`{key}` is not a function id"),
            })?;
            let unit_params = value.as_object().cloned().ok_or_else(|| FluxError::Parameter {
                unit: owner.to_string(),
                message: format!("parameters for function {id} must be an object"),
            })?;
            Ok((id, unit_params))
        })
        .collect()
}

/// Resolve and check a `{function_id: {...}}` document against `units`.
///
/// Returns the unit index and parameters for each entry; nothing is applied.
pub(crate) fn stage_parameters(
    owner: &str,
    units: &[Box<dyn FunctionUnit>],
    params: &Value,
    kind: &str,
) -> Result<Vec<(usize, Parameters)>, FluxError> {
    parse_parameter_set(owner, params)?
        .into_iter()
        .map(|(id, unit_params)| {
            let index = units
                .iter()
                .position(|u| u.function_id() == id)
                .ok_or_else(|| FluxError::Parameter {
                    unit: owner.to_string(),
                    message: format!("no {kind} with id {id}"),
                })?;
            let unit = &units[index];
            unit.check_parameter(&unit_params)
                .map_err(|e| FluxError::parameter(unit.name(), e))?;
            Ok((index, unit_params))
        })
        .collect()
}

pub(crate) fn apply_parameters(
    units: &mut [Box<dyn FunctionUnit>],
    staged: Vec<(usize, Parameters)>,
) -> Result<(), FluxError> {
    for (index, unit_params) in staged {
        let unit = &mut units[index];
        unit.set_parameter(&unit_params)
            .map_err(|e| FluxError::parameter(unit.name(), e))?;
    }
    Ok(())
}

impl WorkerProcess for Worker {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn initial(&mut self) -> Result<(), FluxError> {
        if self.state == WorkerState::Registered {
            self.bind_to_devices()?;
        }
        if let Some(sync) = self.synchronizer.as_mut() {
            sync.reset();
        }
        Ok(())
    }

    fn bind_crimp(&mut self, mut streams: StreamSet) -> Result<(), FluxError> {
        if let Some(missing) = self.devices.iter().find(|d| !streams.contains(d)) {
            return Err(FluxError::UnknownDevice(missing.clone()));
        }
        configure_results(&mut streams, &self.tables);
        self.streams = Some(streams);
        Ok(())
    }

    fn push_sample(&mut self, device: &str, sample: FeatureSample) -> Result<(), FluxError> {
        self.streams
            .as_mut()
            .ok_or_else(|| FluxError::NotReady(self.tag.clone()))?
            .push(device, sample)
    }

    fn compute(&mut self) -> Result<(), FluxError> {
        if self.state == WorkerState::Registered {
            return Err(FluxError::NotReady(self.tag.clone()));
        }
        let record = self.variant.is_realtime();
        let order = self.run_order();
        let mut pull = self.pull()?;

        let units = &mut self.units;
        let streams = self
            .streams
            .as_mut()
            .ok_or_else(|| FluxError::NotReady(self.tag.clone()))?;
        let mut steps = 0usize;
        let mut last_seen = BTreeMap::new();

        while let Some(step) = pull.next(streams) {
            steps += 1;
            if !record {
                for device in &step.devices {
                    last_seen.insert(device.clone(), step.time);
                }
            }
            let mut frame = Frame::from_streams(streams, &step.devices, step.time, record);
            for &i in &order {
                units[i]
                    .compute(&mut frame)
                    .map_err(|e| FluxError::runtime(units[i].name(), e))?;
            }
        }

        if !record {
            Self::finish_stack(units, &order, streams, &last_seen)?;
        }
        self.state = WorkerState::Running;
        log::debug!("{}: computed {} step(s)", self.tag, steps);
        if steps > 0 {
            log::debug!("{}", self.print_message());
        }
        Ok(())
    }

    fn flush(&mut self) -> Vec<PublishedResult> {
        let Some(streams) = self.streams.as_mut() else {
            return Vec::new();
        };
        let mut published = Vec::new();
        for (device, stream) in streams.iter_mut() {
            for entry in stream.result.take_unflushed() {
                published.push(PublishedResult {
                    worker: self.tag.clone(),
                    device: device.to_string(),
                    entry,
                });
            }
        }
        published
    }

    fn reset(&mut self) {
        log::info!("{}: reset", self.tag);
        for unit in &mut self.units {
            unit.reset();
        }
        if let Some(sync) = self.synchronizer.as_mut() {
            sync.reset();
        }
        if self.state == WorkerState::Running {
            self.state = WorkerState::Bound;
        }
    }

    fn clear(&mut self) {
        log::info!("{}: clearing streams", self.tag);
        if let Some(streams) = self.streams.as_mut() {
            for (_, stream) in streams.iter_mut() {
                stream.container.clear();
                stream.result.clear();
            }
        }
        if let Some(sync) = self.synchronizer.as_mut() {
            sync.reset();
        }
        if self.state == WorkerState::Running {
            self.state = WorkerState::Bound;
        }
    }

    /// Every unit in the document is checked before any is changed, so a
    /// rejected document leaves the worker untouched.
    fn set_parameter(&mut self, params: &Value) -> Result<(), FluxError> {
        let staged = stage_parameters(&self.tag, &self.units, params, "function unit")?;
        apply_parameters(&mut self.units, staged)
    }

    fn disconnect(&mut self, nodes: &[String]) {
        for unit in &mut self.units {
            unit.disconnect(nodes);
        }
    }

    fn get_health_info(&self) -> BTreeMap<String, HealthInfo> {
        self.tables.to_map()
    }

    fn print_message(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "worker {} [{}] variant={} state={:?}",
            self.tag, self.instance_id, self.variant, self.state
        );
        let _ = writeln!(out, "  devices: {}", self.devices.join(", "));
        for category in self.variant.categories() {
            for &i in self.category_list(*category) {
                let unit = &self.units[i];
                let _ = writeln!(
                    out,
                    "  {} #{} {} (id {})",
                    category,
                    i,
                    unit.name(),
                    unit.function_id()
                );
            }
        }
        if let Some(sync) = &self.synchronizer {
            for state in sync.states() {
                let _ = writeln!(
                    out,
                    "  sync {}: prev={} cursor={} seen_once={}",
                    state.device, state.prev_time, state.cursor, state.seen_once
                );
            }
        }
        if let Some(streams) = &self.streams {
            for (device, stream) in streams.iter() {
                let latest = stream
                    .result
                    .entries()
                    .last()
                    .map(|e| format!("{:?} {:?}", e.status, e.scores))
                    .unwrap_or_else(|| "-".to_string());
                let _ = writeln!(
                    out,
                    "  {}: {} sample(s), {} result(s), latest {}",
                    device,
                    stream.container.size(),
                    stream.result.size(),
                    latest
                );
            }
        }
        out
    }
}
