//! Drive strategies
//!
//! A pull object hands the worker one [`Step`] per call until its input is
//! exhausted. All state lives in the pull object itself, so a fresh pull can
//! be created at the start of every `compute()`.

use chrono::{DateTime, Utc};

use crate::stream::StreamSet;
use crate::types::Status;

/// One drive step: the devices whose cursors were advanced and the time they
/// were advanced to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub time: DateTime<Utc>,
    pub devices: Vec<String>,
}

/// Pull-based feeding discipline
pub trait FeedPull {
    fn next(&mut self, streams: &mut StreamSet) -> Option<Step>;
}

/// Advance one device's container cursor, optionally opening a result entry
/// stamped with the sample time. Returns the sample time.
pub(crate) fn advance_container(
    streams: &mut StreamSet,
    device: &str,
    record: bool,
) -> Option<DateTime<Utc>> {
    let stream = streams.get_mut(device)?;
    if !stream.container.next() {
        return None;
    }
    let time = stream.container.current()?.time;
    if record {
        stream.result.add_result(Status::Normal, time);
    }
    Some(time)
}

/// Pulls every pending sample of a single device
#[derive(Debug, Clone)]
pub struct SinglePull {
    device: String,
    record: bool,
}

impl SinglePull {
    pub fn new(device: &str, record: bool) -> Self {
        Self {
            device: device.to_string(),
            record,
        }
    }
}

impl FeedPull for SinglePull {
    fn next(&mut self, streams: &mut StreamSet) -> Option<Step> {
        let time = advance_container(streams, &self.device, self.record)?;
        Some(Step {
            time,
            devices: vec![self.device.clone()],
        })
    }
}

/// Visits live devices in a fixed cyclic order, dropping each one from the
/// rotation once its container is exhausted. No cross-device alignment.
#[derive(Debug, Clone)]
pub struct RoundRobinPull {
    live: Vec<String>,
    index: usize,
    record: bool,
}

impl RoundRobinPull {
    pub fn new(devices: &[String], record: bool) -> Self {
        Self {
            live: devices.to_vec(),
            index: 0,
            record,
        }
    }

    pub fn live(&self) -> &[String] {
        &self.live
    }
}

impl FeedPull for RoundRobinPull {
    fn next(&mut self, streams: &mut StreamSet) -> Option<Step> {
        while !self.live.is_empty() {
            let device = self.live[self.index].clone();
            match advance_container(streams, &device, self.record) {
                Some(time) => {
                    self.index = (self.index + 1) % self.live.len();
                    return Some(Step {
                        time,
                        devices: vec![device],
                    });
                }
                None => {
                    self.live.remove(self.index);
                    if self.index >= self.live.len() {
                        self.index = 0;
                    }
                }
            }
        }
        None
    }
}

/// Round-robin over result streams instead of containers; used by the
/// summary pass to revisit entries the sub-workers already produced.
#[derive(Debug, Clone)]
pub struct ResultRoundRobinPull {
    live: Vec<String>,
    index: usize,
}

impl ResultRoundRobinPull {
    pub fn new(devices: &[String]) -> Self {
        Self {
            live: devices.to_vec(),
            index: 0,
        }
    }
}

impl FeedPull for ResultRoundRobinPull {
    fn next(&mut self, streams: &mut StreamSet) -> Option<Step> {
        while !self.live.is_empty() {
            let device = self.live[self.index].clone();
            let time = streams.get_mut(&device).and_then(|s| {
                if s.result.next() {
                    s.result.current().map(|e| e.time)
                } else {
                    None
                }
            });
            match time {
                Some(time) => {
                    self.index = (self.index + 1) % self.live.len();
                    return Some(Step {
                        time,
                        devices: vec![device],
                    });
                }
                None => {
                    self.live.remove(self.index);
                    if self.index >= self.live.len() {
                        self.index = 0;
                    }
                }
            }
        }
        None
    }
}
