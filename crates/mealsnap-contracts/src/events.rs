use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Envelope keys stamped on every event. A payload entry with one of these
/// names is kept under `"shadowed"` and never replaces the envelope.
pub const ENVELOPE_KEYS: [&str; 4] = ["seq", "ts", "session_id", "type"];

#[derive(Serialize)]
struct EventLine<'a> {
    seq: u64,
    ts: String,
    session_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    payload: EventPayload,
}

/// Append-only JSON-lines log for one intake session.
///
/// `seq` numbers events in file order. The file is opened on the first event
/// and held for the life of the session; clones share it.
#[derive(Debug, Clone)]
pub struct EventWriter {
    session: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    state: Mutex<LogState>,
}

#[derive(Debug, Default)]
struct LogState {
    file: Option<File>,
    next_seq: u64,
}

impl SessionLog {
    fn open(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed opening {}", self.path.display()))
    }
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            session: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                state: Mutex::new(LogState::default()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.session.path
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let payload = shadow_envelope_keys(payload);
        let mut state = self
            .session
            .state
            .lock()
            .map_err(|_| anyhow!("event log for session {} is poisoned", self.session_id()))?;

        let event = serde_json::to_value(EventLine {
            seq: state.next_seq,
            ts: now_utc_iso(),
            session_id: &self.session.session_id,
            event_type,
            payload,
        })?;
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let file = match state.file.take() {
            Some(file) => file,
            None => self.session.open()?,
        };
        let file = state.file.insert(file);
        file.write_all(&line)
            .with_context(|| format!("failed appending to {}", self.session.path.display()))?;
        state.next_seq += 1;
        Ok(event)
    }

    /// Like `emit`, for `json!` object literals. Non-object values are wrapped as `{"value": ..}`.
    pub fn emit_value(&self, event_type: &str, payload: Value) -> anyhow::Result<Value> {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self.emit(event_type, payload)
    }
}

fn shadow_envelope_keys(mut payload: EventPayload) -> EventPayload {
    let mut shadowed = Map::new();
    for key in ENVELOPE_KEYS {
        if let Some(value) = payload.remove(key) {
            shadowed.insert(key.to_string(), value);
        }
    }
    if !shadowed.is_empty() {
        payload.insert("shadowed".to_string(), Value::Object(shadowed));
    }
    payload
}

/// Reads back every well-formed line of an event log; malformed lines are skipped.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    Ok(raw
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .collect())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
