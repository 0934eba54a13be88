//! Daily blocked interval
//!
//! Wraps any worker and skips `compute()` while the local clock sits inside
//! a configured daily window. Times are `hhmm` values (`hour * 100 +
//! minute`); a window whose start is after its stop wraps past midnight.

use chrono::{Local, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{ConfigError, FluxError};
use crate::stream::StreamSet;
use crate::types::{FeatureSample, HealthInfo, PublishedResult};
use crate::worker::WorkerProcess;

/// `[start_hhmm, stop_hhmm, reset_on_enter]`; equal start and stop disable it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u16, u16, bool)", into = "(u16, u16, bool)")]
pub struct BlockWindow {
    pub start: u16,
    pub stop: u16,
    pub reset_on_enter: bool,
}

impl Default for BlockWindow {
    fn default() -> Self {
        Self::new(0, 0, true)
    }
}

impl From<(u16, u16, bool)> for BlockWindow {
    fn from((start, stop, reset_on_enter): (u16, u16, bool)) -> Self {
        Self::new(start, stop, reset_on_enter)
    }
}

impl From<BlockWindow> for (u16, u16, bool) {
    fn from(w: BlockWindow) -> Self {
        (w.start, w.stop, w.reset_on_enter)
    }
}

impl BlockWindow {
    pub fn new(start: u16, stop: u16, reset_on_enter: bool) -> Self {
        Self {
            start,
            stop,
            reset_on_enter,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for value in [self.start, self.stop] {
            if value / 100 >= 24 || value % 100 >= 60 {
                return Err(ConfigError::InvalidBlockTime(value));
            }
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.start != self.stop
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let now = (time.hour() * 100 + time.minute()) as u16;
        if !self.is_enabled() {
            false
        } else if self.start < self.stop {
            self.start <= now && now < self.stop
        } else {
            now >= self.start || now < self.stop
        }
    }
}

/// Source of the local wall-clock time
pub trait Clock {
    fn now(&self) -> NaiveTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveTime {
        Local::now().time()
    }
}

impl<F: Fn() -> NaiveTime> Clock for F {
    fn now(&self) -> NaiveTime {
        self()
    }
}

/// Decorator skipping computation inside a daily window
pub struct BlockedWorker<W> {
    inner: W,
    window: BlockWindow,
    clock: Box<dyn Clock>,
    blocked: bool,
    parameters: Option<Value>,
}

impl<W: WorkerProcess> BlockedWorker<W> {
    pub fn new(inner: W, window: BlockWindow) -> Self {
        Self::with_clock(inner, window, Box::new(SystemClock))
    }

    pub fn with_clock(inner: W, window: BlockWindow, clock: Box<dyn Clock>) -> Self {
        Self {
            inner,
            window,
            clock,
            blocked: false,
            parameters: None,
        }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }
}

impl<W: WorkerProcess> WorkerProcess for BlockedWorker<W> {
    fn tag(&self) -> &str {
        self.inner.tag()
    }

    fn initial(&mut self) -> Result<(), FluxError> {
        self.inner.initial()
    }

    fn bind_crimp(&mut self, streams: StreamSet) -> Result<(), FluxError> {
        self.inner.bind_crimp(streams)
    }

    fn push_sample(&mut self, device: &str, sample: FeatureSample) -> Result<(), FluxError> {
        self.inner.push_sample(device, sample)
    }

    fn compute(&mut self) -> Result<(), FluxError> {
        if self.window.contains(self.clock.now()) {
            if !self.blocked {
                self.blocked = true;
                log::info!("{}: entering blocked interval", self.inner.tag());
                if self.window.reset_on_enter {
                    self.inner.reset();
                    if let Some(params) = &self.parameters {
                        self.inner.set_parameter(params)?;
                    }
                }
            }
            return Ok(());
        }
        if self.blocked {
            log::info!("{}: leaving blocked interval", self.inner.tag());
            self.blocked = false;
        }
        self.inner.compute()
    }

    fn flush(&mut self) -> Vec<PublishedResult> {
        self.inner.flush()
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    fn clear(&mut self) {
        self.inner.clear()
    }

    fn set_parameter(&mut self, params: &Value) -> Result<(), FluxError> {
        self.inner.set_parameter(params)?;
        self.parameters = Some(params.clone());
        Ok(())
    }

    fn disconnect(&mut self, nodes: &[String]) {
        self.inner.disconnect(nodes)
    }

    fn get_health_info(&self) -> BTreeMap<String, HealthInfo> {
        self.inner.get_health_info()
    }

    fn print_message(&self) -> String {
        format!(
            "{}  blocked: {} (window {:04}-{:04})\n",
            self.inner.print_message(),
            self.blocked,
            self.window.start,
            self.window.stop
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_same_day_window() {
        let w = BlockWindow::new(800, 1730, true);
        assert!(!w.contains(at(7, 59)));
        assert!(w.contains(at(8, 0)));
        assert!(w.contains(at(17, 29)));
        assert!(!w.contains(at(17, 30)));
    }

    #[test]
    fn test_overnight_window() {
        let w = BlockWindow::new(2330, 130, false);
        assert!(w.contains(at(23, 45)));
        assert!(w.contains(at(0, 10)));
        assert!(!w.contains(at(1, 30)));
        assert!(!w.contains(at(12, 0)));
    }

    #[test]
    fn test_disabled_window() {
        let w = BlockWindow::default();
        assert!(!w.is_enabled());
        assert!(!w.contains(at(0, 0)));
    }

    #[test]
    fn test_validate() {
        assert!(BlockWindow::new(2359, 0, true).validate().is_ok());
        assert_eq!(
            BlockWindow::new(1260, 0, true).validate(),
            Err(ConfigError::InvalidBlockTime(1260))
        );
    }
}
