//! In-memory feature containers and result streams
//!
//! Every device owns one append-only feature sequence and one append-only
//! result sequence. Both expose a cursor that the worker drive strategies
//! advance with `next()`.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::FluxError;
use crate::types::{FeatureSample, HealthInfo, ResultEntry, Status};

/// Per-device feature sequence with a consumption cursor.
///
/// `cursor` counts consumed samples, so the current sample is the one just
/// before it.
#[derive(Debug, Clone, Default)]
pub struct FeatureContainer {
    device: String,
    samples: Vec<FeatureSample>,
    cursor: usize,
}

impl FeatureContainer {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            samples: Vec::new(),
            cursor: 0,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn push(&mut self, sample: FeatureSample) {
        self.samples.push(sample);
    }

    /// Advance the cursor; false once every sample has been consumed.
    pub fn next(&mut self) -> bool {
        if self.cursor < self.samples.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn current(&self) -> Option<&FeatureSample> {
        self.cursor.checked_sub(1).and_then(|i| self.samples.get(i))
    }

    pub fn time_at(&self, index: usize) -> Option<DateTime<Utc>> {
        self.samples.get(index).map(|s| s.time)
    }

    pub(crate) fn set_time_at(&mut self, index: usize, time: DateTime<Utc>) {
        if let Some(sample) = self.samples.get_mut(index) {
            sample.time = time;
        }
    }

    pub fn value_at(&self, index: usize, column: &str) -> Option<f64> {
        self.samples.get(index).and_then(|s| s.value(column))
    }

    /// Samples not yet consumed by the cursor
    pub fn unconsumed(&self) -> &[FeatureSample] {
        &self.samples[self.cursor.min(self.samples.len())..]
    }

    /// Up to `n` most recently consumed samples, oldest first
    pub fn window(&self, n: usize) -> &[FeatureSample] {
        let end = self.cursor.min(self.samples.len());
        &self.samples[end.saturating_sub(n)..end]
    }

    /// Drop one sample. The cursor keeps pointing at the same logical sample.
    pub fn pop(&mut self, index: usize) -> Option<FeatureSample> {
        if index >= self.samples.len() {
            return None;
        }
        if index < self.cursor {
            self.cursor -= 1;
        }
        Some(self.samples.remove(index))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.cursor = 0;
    }
}

/// Per-device result sequence.
///
/// Entries are only ever appended. `flushed` marks how far the process loop
/// has already collected.
#[derive(Debug, Clone, Default)]
pub struct ResultStream {
    device: String,
    table: HealthInfo,
    entries: Vec<ResultEntry>,
    cursor: usize,
    flushed: usize,
}

impl ResultStream {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Install the health table new entries are initialised from
    pub fn configure(&mut self, table: &HealthInfo) {
        self.table = table.clone();
    }

    pub fn health_define(&self) -> &[String] {
        &self.table.health_define
    }

    pub fn health_index(&self, name: &str) -> Option<usize> {
        self.table.health_define.iter().position(|h| h == name)
    }

    /// Append a new entry with default scores and move the cursor onto it
    pub fn add_result(&mut self, initial_status: Status, time: DateTime<Utc>) {
        self.entries.push(ResultEntry {
            time,
            status: initial_status,
            scores: self.table.default_score.clone(),
            events: Vec::new(),
        });
        self.cursor = self.entries.len();
    }

    pub fn next(&mut self) -> bool {
        if self.cursor < self.entries.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    /// Position the cursor so that the next `next()` yields entry `index`
    pub fn seek(&mut self, index: usize) {
        self.cursor = index.min(self.entries.len());
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn entries(&self) -> &[ResultEntry] {
        &self.entries
    }

    pub fn current(&self) -> Option<&ResultEntry> {
        self.cursor.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn current_mut(&mut self) -> Option<&mut ResultEntry> {
        self.cursor.checked_sub(1).and_then(|i| self.entries.get_mut(i))
    }

    pub fn time_at(&self, index: usize) -> Option<DateTime<Utc>> {
        self.entries.get(index).map(|e| e.time)
    }

    pub fn status_at(&self, index: usize) -> Option<Status> {
        self.entries.get(index).map(|e| e.status)
    }

    pub fn score_at(&self, index: usize, health: usize) -> Option<f64> {
        self.entries
            .get(index)
            .and_then(|e| e.scores.get(health))
            .copied()
    }

    /// Write a score into the current entry.
    ///
    /// Scores are clamped to `[0, 100]` unless the dimension allows
    /// unrestricted values. Returns false when there is no current entry or
    /// the index is out of range.
    pub fn set_score(&mut self, health: usize, value: f64) -> bool {
        let unrestricted = self.table.score_limit.get(health).copied().unwrap_or(false);
        let Some(slot) = self.current_mut().and_then(|e| e.scores.get_mut(health)) else {
            return false;
        };
        *slot = if unrestricted {
            value
        } else {
            value.clamp(0.0, 100.0)
        };
        true
    }

    /// Collect entries appended since the previous call
    pub fn take_unflushed(&mut self) -> Vec<ResultEntry> {
        let pending = self.entries[self.flushed..].to_vec();
        self.flushed = self.entries.len();
        pending
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
        self.flushed = 0;
    }
}

/// Container and result stream of one device
#[derive(Debug, Clone, Default)]
pub struct DeviceStream {
    pub container: FeatureContainer,
    pub result: ResultStream,
}

impl DeviceStream {
    pub fn new(device: &str) -> Self {
        Self {
            container: FeatureContainer::new(device),
            result: ResultStream::new(device),
        }
    }
}

/// Streams of every device a worker drives, keyed by device id
#[derive(Debug, Clone, Default)]
pub struct StreamSet {
    streams: BTreeMap<String, DeviceStream>,
}

impl StreamSet {
    pub fn new<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let streams = devices
            .into_iter()
            .map(|d| (d.as_ref().to_string(), DeviceStream::new(d.as_ref())))
            .collect();
        Self { streams }
    }

    pub fn insert(&mut self, device: &str, stream: DeviceStream) {
        self.streams.insert(device.to_string(), stream);
    }

    /// Append a sample to a device's container
    pub fn push(&mut self, device: &str, sample: FeatureSample) -> Result<(), FluxError> {
        self.get_mut(device)
            .map(|s| s.container.push(sample))
            .ok_or_else(|| FluxError::UnknownDevice(device.to_string()))
    }

    pub fn contains(&self, device: &str) -> bool {
        self.streams.contains_key(device)
    }

    pub fn get(&self, device: &str) -> Option<&DeviceStream> {
        self.streams.get(device)
    }

    pub fn get_mut(&mut self, device: &str) -> Option<&mut DeviceStream> {
        self.streams.get_mut(device)
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceStream)> {
        self.streams.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut DeviceStream)> {
        self.streams.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Remove the streams of `devices`, leaving the others in place
    pub fn split_off(&mut self, devices: &[String]) -> StreamSet {
        let mut taken = StreamSet::default();
        for device in devices {
            if let Some(stream) = self.streams.remove(device) {
                taken.streams.insert(device.clone(), stream);
            }
        }
        taken
    }

    /// Move every stream of `other` into this set
    pub fn append(&mut self, mut other: StreamSet) {
        self.streams.append(&mut other.streams);
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
