// GuardBand - Telemetry Task
//
// Owns the HTTP client.  Drains counter and sample updates from the sensor
// task, runs the telemetry worker's rate-limited publish/poll cycle, sends
// observed remote commands back, and saves the daily record once a minute.

use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use embedded_svc::http::client::Client;
use embedded_svc::http::Method;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::client::{Configuration as HttpConfiguration, EspHttpConnection};

use guardband::config::*;
use guardband::events::RemoteCommand;
use guardband::persist::{self, DailyCounters};
use guardband::telemetry::{parse_remote_bool, TelemetrySink, TelemetryUpdate, TelemetryValue, TelemetryWorker};

use crate::drivers::storage::NvsRecordStore;

/// REST key-value store: `GET`/`PUT <base>/<path>.json`, with `PATCH` for
/// sample batches so each upload adds children to the session node.
pub struct HttpSink {
    client: Client<EspHttpConnection>,
    base_url: String,
    auth_token: String,
}

impl HttpSink {
    pub fn new(base_url: &str, auth_token: &str) -> anyhow::Result<Self> {
        let connection = EspHttpConnection::new(&HttpConfiguration {
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        })?;
        Ok(Self {
            client: Client::wrap(connection),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        if self.auth_token.is_empty() {
            format!("{}/{}.json", self.base_url, path)
        } else {
            format!("{}/{}.json?auth={}", self.base_url, path, self.auth_token)
        }
    }
}

impl TelemetrySink for HttpSink {
    fn publish(&mut self, path: &str, value: &TelemetryValue) -> anyhow::Result<()> {
        let url = self.url(path);
        let body = value.to_json().to_string();
        let content_length = body.len().to_string();
        let headers = [
            ("content-type", "application/json"),
            ("content-length", content_length.as_str()),
        ];

        let (method, verb) = match value {
            TelemetryValue::Batch(_) => (Method::Patch, "PATCH"),
            _ => (Method::Put, "PUT"),
        };
        let mut request = self.client.request(method, &url, &headers)?;
        request.write_all(body.as_bytes())?;
        request.flush()?;
        let response = request.submit()?;
        let status = response.status();
        if !(200..300).contains(&status) {
            bail!("{} {} returned HTTP {}", verb, path, status);
        }
        Ok(())
    }

    fn read_bool(&mut self, path: &str) -> anyhow::Result<Option<bool>> {
        let url = self.url(path);
        let request = self.client.get(&url)?;
        let mut response = request.submit()?;
        let status = response.status();
        if !(200..300).contains(&status) {
            bail!("GET {} returned HTTP {}", path, status);
        }

        let mut body = [0u8; 64];
        let mut len = 0;
        while len < body.len() {
            let n = response.read(&mut body[len..])?;
            if n == 0 {
                break;
            }
            len += n;
        }
        parse_remote_bool(&body[..len]).with_context(|| format!("GET {}", path))
    }
}

pub fn telemetry_task(
    sink: Option<HttpSink>,
    session_id: String,
    storage: Arc<Mutex<NvsRecordStore>>,
    updates: Receiver<TelemetryUpdate>,
    command_tx: Sender<RemoteCommand>,
) {
    log::info!("Telemetry task started (session {})", session_id);

    let mut worker = sink.map(|sink| TelemetryWorker::new(sink, &session_id));
    if worker.is_none() {
        log::warn!("No remote store configured, telemetry disabled");
    }

    let mut latest: Option<DailyCounters> = None;
    let mut saved: Option<DailyCounters> = None;
    let mut last_save_ms = crate::now_ms();
    let poll = Duration::from_millis(TELEMETRY_POLL_MS);

    loop {
        loop {
            match updates.try_recv() {
                Ok(update) => {
                    if let TelemetryUpdate::Counters { daily, .. } = update {
                        latest = Some(daily);
                    }
                    if let Some(worker) = worker.as_mut() {
                        worker.handle(update);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::warn!("Sensor task gone, telemetry task exiting");
                    return;
                }
            }
        }

        let now = crate::now_ms();
        if let Some(worker) = worker.as_mut() {
            for command in worker.service(now) {
                if command_tx.send(command).is_err() {
                    log::warn!("Command channel closed");
                }
            }
        }

        if now.wrapping_sub(last_save_ms) >= PERSIST_INTERVAL_MS {
            last_save_ms = now;
            if let Some(daily) = latest.filter(|d| saved != Some(*d)) {
                if save_record(&storage, &daily) {
                    saved = Some(daily);
                }
            }
        }

        thread::sleep(poll);
    }
}

fn save_record(storage: &Arc<Mutex<NvsRecordStore>>, daily: &DailyCounters) -> bool {
    let Ok(mut store) = storage.lock() else {
        log::error!("Storage mutex poisoned");
        return false;
    };
    match persist::save(&mut *store, daily) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Saving daily record failed: {:#}", e);
            false
        }
    }
}
