// GuardBand - Telemetry Adapter
//
// The sampling loop never talks to the network.  It hands `TelemetryUpdate`s
// to the telemetry task, whose `TelemetryWorker` batches them and, at most
// once per `TELEMETRY_INTERVAL_MS`, publishes pending values and polls the
// remote command flags.  Failures are logged and the values stay pending for
// the next cycle; nothing is retried synchronously.

use std::collections::HashMap;

use anyhow::{bail, Context};
use heapless::HistoryBuffer;
use serde_json::{Map, Value};

use crate::config::*;
use crate::events::RemoteCommand;
use crate::persist::DailyCounters;

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryValue {
    Int(i64),
    Bool(bool),
    /// `{timestampMs: scaledNetAccel}` pairs of one session.
    Batch(Vec<(u32, i32)>),
}

impl TelemetryValue {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Int(v) => Value::from(*v),
            Self::Bool(v) => Value::Bool(*v),
            Self::Batch(samples) => {
                let map: Map<String, Value> = samples
                    .iter()
                    .map(|(ts, accel)| (ts.to_string(), Value::from(*accel)))
                    .collect();
                Value::Object(map)
            }
        }
    }
}

/// Decode a remote flag body.  An absent key (`null`) is `None`.
pub fn parse_remote_bool(body: &[u8]) -> anyhow::Result<Option<bool>> {
    serde_json::from_slice(body).context("remote flag is not a JSON boolean")
}

/// Remote key-value store primitives.
///
/// Scalars replace whatever is at `path`.  A `Batch` is merged into the
/// object at `path`, so a session accumulates across uploads.
pub trait TelemetrySink {
    fn publish(&mut self, path: &str, value: &TelemetryValue) -> anyhow::Result<()>;
    fn read_bool(&mut self, path: &str) -> anyhow::Result<Option<bool>>;
}

/// Sampling loop -> telemetry task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryUpdate {
    Counters {
        steps: u32,
        step_counting: bool,
        daily: DailyCounters,
    },
    Sample {
        timestamp_ms: u32,
        net_milli_g: i32,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryStats {
    pub cycles: u32,
    pub published: u32,
    pub failures: u32,
}

pub struct TelemetryWorker<S: TelemetrySink> {
    sink: S,
    session_path: String,
    interval_ms: u32,
    last_cycle_ms: Option<u32>,

    pending_steps: Option<u32>,
    pending_mirror: Option<bool>,
    batch: HistoryBuffer<(u32, i32), SAMPLE_BATCH_CAPACITY>,

    remote_step_counting: Option<bool>,
    find_me_ack_pending: bool,
    stats: TelemetryStats,
}

impl<S: TelemetrySink> TelemetryWorker<S> {
    pub fn new(sink: S, session_id: &str) -> Self {
        Self {
            sink,
            session_path: format!("{}/{}", PATH_SESSIONS, session_id),
            interval_ms: TELEMETRY_INTERVAL_MS,
            last_cycle_ms: None,
            pending_steps: None,
            pending_mirror: None,
            batch: HistoryBuffer::new(),
            remote_step_counting: None,
            find_me_ack_pending: false,
            stats: TelemetryStats::default(),
        }
    }

    pub fn with_interval(mut self, interval_ms: u32) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn stats(&self) -> TelemetryStats {
        self.stats
    }

    /// Queue an update.  Newer counters replace older unsent ones; the sample
    /// batch drops its oldest entries once full.
    pub fn handle(&mut self, update: TelemetryUpdate) {
        match update {
            TelemetryUpdate::Counters { steps, step_counting, .. } => {
                self.pending_steps = Some(steps);
                self.pending_mirror = Some(step_counting);
            }
            TelemetryUpdate::Sample { timestamp_ms, net_milli_g } => {
                self.batch.write((timestamp_ms, net_milli_g));
            }
        }
    }

    /// Run one publish/poll cycle if the rate limit allows.  Returns the
    /// remote commands observed in this cycle.
    pub fn service(&mut self, now: u32) -> Vec<RemoteCommand> {
        if let Some(last) = self.last_cycle_ms {
            if now.wrapping_sub(last) < self.interval_ms {
                return Vec::new();
            }
        }
        self.last_cycle_ms = Some(now);
        self.stats.cycles += 1;

        self.flush();
        self.poll_commands()
    }

    fn publish(&mut self, path: &str, value: &TelemetryValue) -> bool {
        match self.sink.publish(path, value) {
            Ok(()) => {
                self.stats.published += 1;
                true
            }
            Err(e) => {
                self.stats.failures += 1;
                log::warn!("Telemetry publish to {} failed: {:#}", path, e);
                false
            }
        }
    }

    fn flush(&mut self) {
        if let Some(steps) = self.pending_steps {
            if self.publish(PATH_STEP_COUNT, &TelemetryValue::Int(steps as i64)) {
                self.pending_steps = None;
            }
        }
        if let Some(enabled) = self.pending_mirror {
            if self.publish(PATH_STEP_COUNTING_MIRROR, &TelemetryValue::Bool(enabled)) {
                self.pending_mirror = None;
            }
        }
        if self.batch.len() > 0 {
            let samples: Vec<(u32, i32)> = self.batch.oldest_ordered().copied().collect();
            let path = self.session_path.clone();
            if self.publish(&path, &TelemetryValue::Batch(samples)) {
                self.batch.clear();
            }
        }
    }

    fn poll_commands(&mut self) -> Vec<RemoteCommand> {
        let mut commands = Vec::new();

        if self.find_me_ack_pending {
            // Already buzzed for this request; only the write-back is owed.
            self.acknowledge_find_me();
        } else {
            match self.sink.read_bool(PATH_FIND_ME) {
                Ok(Some(true)) => {
                    commands.push(RemoteCommand::FindMe);
                    self.acknowledge_find_me();
                }
                Ok(_) => {}
                Err(e) => {
                    self.stats.failures += 1;
                    log::warn!("Find-me flag read failed: {:#}", e);
                }
            }
        }

        // An absent key is not a command; counting keeps its local state.
        match self.sink.read_bool(PATH_STEP_COUNTING_CONTROL) {
            Ok(None) => {}
            Ok(Some(enabled)) => {
                if self.remote_step_counting != Some(enabled) {
                    self.remote_step_counting = Some(enabled);
                    commands.push(RemoteCommand::SetStepCounting(enabled));
                }
            }
            Err(e) => {
                self.stats.failures += 1;
                log::warn!("Step counting flag read failed: {:#}", e);
            }
        }

        commands
    }

    fn acknowledge_find_me(&mut self) {
        self.find_me_ack_pending = !self.publish(PATH_FIND_ME, &TelemetryValue::Bool(false));
        if self.find_me_ack_pending {
            log::warn!("Find-me acknowledgement deferred to next cycle");
        }
    }
}

/// In-memory key-value store standing in for the remote sink.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub values: HashMap<String, Value>,
    /// Every successful publish, in order.
    pub writes: Vec<(String, Value)>,
    /// Paths whose publishes fail while listed.
    pub failing_paths: Vec<String>,
    pub offline: bool,
}

impl MemoryStore {
    pub fn set_bool(&mut self, path: &str, value: bool) {
        self.values.insert(path.to_string(), Value::Bool(value));
    }

    pub fn writes_to(&self, path: &str) -> Vec<&Value> {
        self.writes.iter().filter(|(p, _)| p == path).map(|(_, v)| v).collect()
    }
}

impl TelemetrySink for MemoryStore {
    fn publish(&mut self, path: &str, value: &TelemetryValue) -> anyhow::Result<()> {
        if self.offline || self.failing_paths.iter().any(|p| p == path) {
            bail!("store unreachable");
        }
        let json = value.to_json();
        let merged = match (value, self.values.get_mut(path), &json) {
            (TelemetryValue::Batch(_), Some(Value::Object(existing)), Value::Object(children)) => {
                existing.extend(children.clone());
                true
            }
            _ => false,
        };
        if !merged {
            self.values.insert(path.to_string(), json.clone());
        }
        self.writes.push((path.to_string(), json));
        Ok(())
    }

    fn read_bool(&mut self, path: &str) -> anyhow::Result<Option<bool>> {
        if self.offline {
            bail!("store unreachable");
        }
        Ok(self.values.get(path).and_then(Value::as_bool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(steps: u32) -> TelemetryUpdate {
        TelemetryUpdate::Counters {
            steps,
            step_counting: true,
            daily: DailyCounters::default(),
        }
    }

    #[test]
    fn test_find_me_buzzes_once_and_writes_back_once() {
        let mut store = MemoryStore::default();
        store.set_bool(PATH_FIND_ME, true);
        let mut worker = TelemetryWorker::new(store, "s1");

        let first = worker.service(0);
        assert_eq!(first.iter().filter(|c| **c == RemoteCommand::FindMe).count(), 1);
        let later = worker.service(TELEMETRY_INTERVAL_MS);
        assert!(!later.contains(&RemoteCommand::FindMe));

        let acks = worker.sink().writes_to(PATH_FIND_ME);
        assert_eq!(acks, vec![&Value::Bool(false)]);
    }

    #[test]
    fn test_failed_ack_retried_without_rebuzz() {
        let mut store = MemoryStore::default();
        store.set_bool(PATH_FIND_ME, true);
        store.failing_paths.push(PATH_FIND_ME.to_string());
        let mut worker = TelemetryWorker::new(store, "s1");

        assert!(worker.service(0).contains(&RemoteCommand::FindMe));
        assert!(worker.sink().writes_to(PATH_FIND_ME).is_empty());

        worker.sink_mut().failing_paths.clear();
        let second = worker.service(TELEMETRY_INTERVAL_MS);
        assert!(!second.contains(&RemoteCommand::FindMe));
        assert_eq!(worker.sink().writes_to(PATH_FIND_ME).len(), 1);
        assert!(!worker.service(2 * TELEMETRY_INTERVAL_MS).contains(&RemoteCommand::FindMe));
    }

    #[test]
    fn test_rate_limited() {
        let mut worker = TelemetryWorker::new(MemoryStore::default(), "s1");
        worker.handle(counters(10));
        worker.service(1000);
        worker.handle(counters(20));
        worker.service(1000 + TELEMETRY_INTERVAL_MS - 1);
        assert_eq!(worker.sink().writes_to(PATH_STEP_COUNT), vec![&Value::from(10)]);
        worker.service(1000 + TELEMETRY_INTERVAL_MS);
        assert_eq!(worker.sink().writes_to(PATH_STEP_COUNT).len(), 2);
        assert_eq!(worker.stats().cycles, 2);
    }

    #[test]
    fn test_step_counting_command_only_on_change() {
        let mut store = MemoryStore::default();
        store.set_bool(PATH_STEP_COUNTING_CONTROL, true);
        let mut worker = TelemetryWorker::new(store, "s1").with_interval(10);
        assert_eq!(worker.service(0), vec![RemoteCommand::SetStepCounting(true)]);
        assert!(worker.service(10).is_empty());
        worker.sink_mut().set_bool(PATH_STEP_COUNTING_CONTROL, false);
        assert_eq!(worker.service(20), vec![RemoteCommand::SetStepCounting(false)]);
    }

    #[test]
    fn test_offline_keeps_values_pending() {
        let mut store = MemoryStore::default();
        store.offline = true;
        let mut worker = TelemetryWorker::new(store, "s1").with_interval(10);
        worker.handle(counters(42));
        worker.handle(TelemetryUpdate::Sample { timestamp_ms: 100, net_milli_g: -12 });
        assert!(worker.service(0).is_empty());
        assert!(worker.stats().failures > 0);

        worker.sink_mut().offline = false;
        worker.service(10);
        let sink = worker.sink();
        assert_eq!(sink.writes_to(PATH_STEP_COUNT), vec![&Value::from(42)]);
        assert_eq!(sink.writes_to(PATH_STEP_COUNTING_MIRROR), vec![&Value::Bool(true)]);
        let batch = sink.writes_to("sessions/s1");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["100"], Value::from(-12));
    }

    #[test]
    fn test_batch_bounded_and_cleared() {
        let mut worker = TelemetryWorker::new(MemoryStore::default(), "run").with_interval(10);
        for i in 0..(SAMPLE_BATCH_CAPACITY as u32 + 10) {
            worker.handle(TelemetryUpdate::Sample { timestamp_ms: i, net_milli_g: 1 });
        }
        worker.service(0);
        worker.service(10);
        let batches = worker.sink().writes_to("sessions/run");
        assert_eq!(batches.len(), 1, "empty batch must not be published");
        let obj = batches[0].as_object().unwrap();
        assert_eq!(obj.len(), SAMPLE_BATCH_CAPACITY);
        assert!(!obj.contains_key("0"));
    }

    #[test]
    fn test_parse_remote_bool() {
        assert_eq!(parse_remote_bool(b"true").unwrap(), Some(true));
        assert_eq!(parse_remote_bool(b"false").unwrap(), Some(false));
        assert_eq!(parse_remote_bool(b"null").unwrap(), None);
        assert!(parse_remote_bool(b"\"yes\"").is_err());
    }

    #[test]
    fn test_absent_step_counting_key_is_not_a_command() {
        let mut worker = TelemetryWorker::new(MemoryStore::default(), "s1").with_interval(10);
        assert!(worker.service(0).is_empty());
        assert!(worker.service(10).is_empty());
        // The first explicit value is applied, even if it matches the default.
        worker.sink_mut().set_bool(PATH_STEP_COUNTING_CONTROL, true);
        assert_eq!(worker.service(20), vec![RemoteCommand::SetStepCounting(true)]);
    }

    #[test]
    fn test_session_accumulates_batches() {
        let mut worker = TelemetryWorker::new(MemoryStore::default(), "s1").with_interval(10);
        worker.handle(TelemetryUpdate::Sample { timestamp_ms: 100, net_milli_g: 5 });
        worker.service(0);
        worker.handle(TelemetryUpdate::Sample { timestamp_ms: 200, net_milli_g: -5 });
        worker.service(10);

        let session = worker.sink().values["sessions/s1"].as_object().unwrap();
        assert_eq!(session.len(), 2);
        assert_eq!(session["100"], Value::from(5));
        assert_eq!(session["200"], Value::from(-5));
        assert_eq!(worker.sink().writes_to("sessions/s1").len(), 2);
    }

    #[test]
    fn test_value_json() {
        assert_eq!(TelemetryValue::Int(7).to_json(), Value::from(7));
        let batch = TelemetryValue::Batch(vec![(20, 5), (40, -3)]).to_json();
        assert_eq!(batch.to_string(), r#"{"20":5,"40":-3}"#);
    }
}
