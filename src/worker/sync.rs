//! Multi-device time synchronization
//!
//! Devices of a group sample independently and may arrive late, duplicated or
//! not at all. Every pass runs three stages:
//!
//! 1. **Reconvert** - per device, quantize new timestamps to whole seconds,
//!    shift a first duplicate forward by one data-delta tick and drop anything
//!    that is still not strictly after the previous accepted time.
//! 2. **Align** - build the timeline (sorted union of unconsumed timestamps)
//!    and the presence matrix (which device has data at which instant).
//! 3. **Emit** - walk the timeline and release instants once a fully aligned
//!    instant is reached, or force out the whole pending window once it holds
//!    `max_delay` instants.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};

use crate::stream::StreamSet;
use crate::types::{quantize, MIN_TIME};
use crate::worker::feed::{advance_container, FeedPull, Step};

/// Synchronization cursor of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub device: String,
    /// Last accepted (possibly shifted) time
    pub prev_time: DateTime<Utc>,
    /// Index of the first sample not yet reconverted
    pub cursor: usize,
    /// The previous accepted time may still absorb one duplicate
    pub seen_once: bool,
}

impl SyncState {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            prev_time: MIN_TIME,
            cursor: 0,
            seen_once: true,
        }
    }
}

/// Union timeline of a device group plus its presence matrix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    devices: Vec<String>,
    instants: Vec<DateTime<Utc>>,
    presence: Vec<Vec<bool>>,
}

impl Timeline {
    pub fn instants(&self) -> &[DateTime<Utc>] {
        &self.instants
    }

    /// Presence row of instant `i`, one flag per device in group order
    pub fn presence(&self, i: usize) -> &[bool] {
        &self.presence[i]
    }

    pub fn present_count(&self, i: usize) -> usize {
        self.presence[i].iter().filter(|p| **p).count()
    }

    pub fn all_present(&self, i: usize) -> bool {
        self.presence[i].iter().all(|p| *p)
    }

    pub fn present_devices(&self, i: usize) -> Vec<String> {
        self.devices
            .iter()
            .zip(&self.presence[i])
            .filter(|(_, present)| **present)
            .map(|(device, _)| device.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instants.is_empty()
    }
}

/// Aligns the streams of a device group onto one ordered timeline
#[derive(Debug, Clone)]
pub struct Synchronizer {
    states: Vec<SyncState>,
    max_delay: usize,
    data_delta: Duration,
}

impl Synchronizer {
    pub fn new(devices: &[String], max_delay: usize, data_delta_seconds: u32) -> Self {
        Self {
            states: devices.iter().map(|d| SyncState::new(d)).collect(),
            max_delay: max_delay.max(1),
            data_delta: Duration::seconds(i64::from(data_delta_seconds)),
        }
    }

    pub fn states(&self) -> &[SyncState] {
        &self.states
    }

    pub fn max_delay(&self) -> usize {
        self.max_delay
    }

    /// Forget everything seen so far
    pub fn reset(&mut self) {
        for state in &mut self.states {
            *state = SyncState::new(&state.device);
        }
    }

    /// Quantize and deduplicate every sample not yet reconverted, in place.
    /// Returns how many samples were dropped.
    pub fn reconvert(&mut self, streams: &mut StreamSet) -> usize {
        let mut dropped = 0;
        for state in &mut self.states {
            let Some(stream) = streams.get_mut(&state.device) else {
                continue;
            };
            let container = &mut stream.container;
            let mut i = state.cursor.min(container.size());
            while let Some(raw) = container.time_at(i) {
                let time = quantize(raw);
                if time > state.prev_time {
                    container.set_time_at(i, time);
                    state.prev_time = time;
                    state.seen_once = true;
                    i += 1;
                } else if time == state.prev_time && state.seen_once {
                    let shifted = time + self.data_delta;
                    container.set_time_at(i, shifted);
                    state.prev_time = shifted;
                    state.seen_once = false;
                    i += 1;
                } else {
                    log::debug!(
                        "{}: dropping sample at {} (previous {})",
                        state.device,
                        raw,
                        state.prev_time
                    );
                    container.pop(i);
                    dropped += 1;
                }
            }
            state.cursor = i;
        }
        dropped
    }

    /// Build the timeline of all unconsumed samples
    pub fn align(&self, streams: &StreamSet) -> Timeline {
        let devices: Vec<String> = self.states.iter().map(|s| s.device.clone()).collect();
        let per_device: Vec<BTreeSet<DateTime<Utc>>> = devices
            .iter()
            .map(|d| {
                streams
                    .get(d)
                    .map(|s| s.container.unconsumed().iter().map(|x| x.time).collect())
                    .unwrap_or_default()
            })
            .collect();

        let instants: Vec<DateTime<Utc>> = per_device
            .iter()
            .flatten()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let presence = instants
            .iter()
            .map(|t| per_device.iter().map(|times| times.contains(t)).collect())
            .collect();

        Timeline {
            devices,
            instants,
            presence,
        }
    }

    /// Decide which instants to release.
    ///
    /// A fully aligned instant releases itself and every pending instant
    /// before it: cursors only move forward in time, so partial instants
    /// older than a complete one can never be completed later. A pending
    /// window of `max_delay` instants is released as a whole, after which
    /// every device's `prev_time` is moved up to the last released instant
    /// so late samples for it are dropped.
    pub fn plan(&mut self, timeline: &Timeline) -> VecDeque<Step> {
        let mut steps = VecDeque::new();
        let mut pending: Vec<usize> = Vec::new();

        for i in 0..timeline.len() {
            pending.push(i);
            if timeline.all_present(i) {
                steps.extend(pending.drain(..).map(|p| step_at(timeline, p)));
            } else if pending.len() >= self.max_delay {
                let boundary = timeline.instants()[i];
                log::debug!(
                    "forcing {} pending instant(s) up to {}",
                    pending.len(),
                    boundary
                );
                steps.extend(pending.drain(..).map(|p| step_at(timeline, p)));
                for state in &mut self.states {
                    if state.prev_time < boundary {
                        state.prev_time = boundary;
                        state.seen_once = false;
                    }
                }
            }
        }
        steps
    }

    /// Run a full pass and return the pull that releases its instants
    pub fn pull(&mut self, streams: &mut StreamSet, record: bool) -> SyncPull {
        let dropped = self.reconvert(streams);
        if dropped > 0 {
            log::debug!("reconvert dropped {} sample(s)", dropped);
        }
        let timeline = self.align(streams);
        SyncPull {
            queue: self.plan(&timeline),
            record,
        }
    }
}

fn step_at(timeline: &Timeline, i: usize) -> Step {
    Step {
        time: timeline.instants()[i],
        devices: timeline.present_devices(i),
    }
}

/// Releases the instants planned by one synchronization pass
#[derive(Debug, Clone)]
pub struct SyncPull {
    queue: VecDeque<Step>,
    record: bool,
}

impl SyncPull {
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl FeedPull for SyncPull {
    fn next(&mut self, streams: &mut StreamSet) -> Option<Step> {
        let step = self.queue.pop_front()?;
        for device in &step.devices {
            let advanced = advance_container(streams, device, self.record);
            if advanced != Some(step.time) {
                log::warn!(
                    "{}: cursor out of step at {} (got {:?})",
                    device,
                    step.time,
                    advanced
                );
            }
        }
        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ts, FeatureSample};
    use pretty_assertions::assert_eq;

    fn devices(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn push_all(streams: &mut StreamSet, device: &str, secs: &[i64]) {
        for s in secs {
            streams.push(device, FeatureSample::new(ts(*s))).unwrap();
        }
    }

    fn times(streams: &StreamSet, device: &str) -> Vec<DateTime<Utc>> {
        let c = &streams.get(device).unwrap().container;
        (0..c.size()).filter_map(|i| c.time_at(i)).collect()
    }

    fn drain(pull: &mut SyncPull, streams: &mut StreamSet) -> Vec<(i64, Vec<String>)> {
        let mut out = Vec::new();
        while let Some(step) = pull.next(streams) {
            out.push((step.time.timestamp() - ts(0).timestamp(), step.devices));
        }
        out
    }

    #[test]
    fn test_reconvert_strictly_increasing() {
        let group = devices(&["a"]);
        let mut streams = StreamSet::new(&group);
        push_all(&mut streams, "a", &[1, 3, 2, 4, 4, 9]);
        let mut sync = Synchronizer::new(&group, 30, 1);
        let dropped = sync.reconvert(&mut streams);

        assert_eq!(dropped, 1);
        assert_eq!(times(&streams, "a"), vec![ts(1), ts(3), ts(4), ts(5), ts(9)]);
        let t = times(&streams, "a");
        assert!(t.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_duplicate_shifted_once_then_dropped() {
        let group = devices(&["a"]);
        let mut streams = StreamSet::new(&group);
        push_all(&mut streams, "a", &[1, 1, 1]);
        let mut sync = Synchronizer::new(&group, 30, 1);
        sync.reconvert(&mut streams);
        assert_eq!(times(&streams, "a"), vec![ts(1), ts(2)]);
        assert!(!sync.states()[0].seen_once);
    }

    #[test]
    fn test_duplicate_uses_data_delta() {
        let group = devices(&["a"]);
        let mut streams = StreamSet::new(&group);
        push_all(&mut streams, "a", &[10, 10]);
        let mut sync = Synchronizer::new(&group, 30, 5);
        sync.reconvert(&mut streams);
        assert_eq!(times(&streams, "a"), vec![ts(10), ts(15)]);
    }

    #[test]
    fn test_subsecond_samples_quantized() {
        let group = devices(&["a"]);
        let mut streams = StreamSet::new(&group);
        streams
            .push("a", FeatureSample::new(ts(1) + Duration::milliseconds(200)))
            .unwrap();
        streams
            .push("a", FeatureSample::new(ts(1) + Duration::milliseconds(700)))
            .unwrap();
        let mut sync = Synchronizer::new(&group, 30, 1);
        sync.reconvert(&mut streams);
        assert_eq!(times(&streams, "a"), vec![ts(1), ts(2)]);
    }

    #[test]
    fn test_reconvert_resumes_from_cursor() {
        let group = devices(&["a"]);
        let mut streams = StreamSet::new(&group);
        push_all(&mut streams, "a", &[1, 2]);
        let mut sync = Synchronizer::new(&group, 30, 1);
        sync.reconvert(&mut streams);
        push_all(&mut streams, "a", &[2, 3]);
        sync.reconvert(&mut streams);
        assert_eq!(times(&streams, "a"), vec![ts(1), ts(2), ts(3), ts(4)]);
        assert_eq!(sync.states()[0].cursor, 4);
    }

    #[test]
    fn test_timeline_union_and_presence() {
        let group = devices(&["a", "b"]);
        let mut streams = StreamSet::new(&group);
        push_all(&mut streams, "a", &[1, 2, 4]);
        push_all(&mut streams, "b", &[2, 3]);
        let mut sync = Synchronizer::new(&group, 30, 1);
        sync.reconvert(&mut streams);
        let timeline = sync.align(&streams);

        assert_eq!(timeline.instants(), &[ts(1), ts(2), ts(3), ts(4)]);
        assert_eq!(timeline.presence(0), &[true, false]);
        assert_eq!(timeline.present_count(1), 2);
        assert!(timeline.all_present(1));
        assert_eq!(timeline.present_devices(2), vec!["b".to_string()]);
    }

    #[test]
    fn test_scenario_forced_window_flush() {
        let group = devices(&["A", "B"]);
        let mut streams = StreamSet::new(&group);
        push_all(&mut streams, "A", &[1, 2, 3, 3, 7]);
        push_all(&mut streams, "B", &[1, 2, 5]);
        let mut sync = Synchronizer::new(&group, 3, 1);

        let mut pull = sync.pull(&mut streams, true);
        let emitted = drain(&mut pull, &mut streams);
        assert_eq!(
            emitted,
            vec![
                (1, devices(&["A", "B"])),
                (2, devices(&["A", "B"])),
                (3, devices(&["A"])),
                (4, devices(&["A"])),
                (5, devices(&["B"])),
            ]
        );
        // 7 is still waiting
        assert_eq!(streams.get("A").unwrap().container.unconsumed().len(), 1);
        assert_eq!(streams.get("A").unwrap().result.size(), 4);
        assert_eq!(streams.get("B").unwrap().result.size(), 3);

        // a late sample for an already flushed instant is dropped
        push_all(&mut streams, "B", &[4, 8]);
        let mut pull = sync.pull(&mut streams, true);
        assert!(drain(&mut pull, &mut streams).is_empty());
        assert_eq!(times(&streams, "B"), vec![ts(1), ts(2), ts(5), ts(8)]);

        // an aligned instant releases the pending window before it
        push_all(&mut streams, "A", &[9]);
        push_all(&mut streams, "B", &[9]);
        let mut pull = sync.pull(&mut streams, true);
        assert_eq!(
            drain(&mut pull, &mut streams),
            vec![
                (7, devices(&["A"])),
                (8, devices(&["B"])),
                (9, devices(&["A", "B"])),
            ]
        );
    }

    #[test]
    fn test_forced_flush_advances_silent_devices() {
        let group = devices(&["a", "b"]);
        let mut streams = StreamSet::new(&group);
        push_all(&mut streams, "a", &[1, 2, 3]);
        let mut sync = Synchronizer::new(&group, 3, 1);
        let mut pull = sync.pull(&mut streams, false);
        assert_eq!(drain(&mut pull, &mut streams).len(), 3);

        let b = &sync.states()[1];
        assert_eq!(b.prev_time, ts(3));
        assert!(!b.seen_once);

        // equal to the boundary is stale too, never shifted forward
        push_all(&mut streams, "b", &[2, 3, 4]);
        sync.reconvert(&mut streams);
        assert_eq!(times(&streams, "b"), vec![ts(4)]);
    }

    #[test]
    fn test_partial_instants_wait_below_max_delay() {
        let group = devices(&["a", "b"]);
        let mut streams = StreamSet::new(&group);
        push_all(&mut streams, "a", &[1, 2]);
        let mut sync = Synchronizer::new(&group, 3, 1);
        let pull = sync.pull(&mut streams, false);
        assert_eq!(pull.remaining(), 0);
        assert_eq!(sync.states()[1].prev_time, MIN_TIME);
    }

    #[test]
    fn test_reset_reinitializes_states() {
        let group = devices(&["a", "b"]);
        let mut streams = StreamSet::new(&group);
        push_all(&mut streams, "a", &[1, 2, 3]);
        let mut sync = Synchronizer::new(&group, 1, 1);
        sync.pull(&mut streams, false);
        sync.reset();
        for state in sync.states() {
            assert_eq!(state.prev_time, MIN_TIME);
            assert_eq!(state.cursor, 0);
            assert!(state.seen_once);
        }
    }
}
