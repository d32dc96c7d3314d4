use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{bail, Context};
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::meals::MealType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealRecord {
    pub id: String,
    pub user_id: String,
    pub meal_type: MealType,
    pub date: NaiveDate,
    pub created_at: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl MealRecord {
    /// `date` is the calendar date of `created_at` in its own offset.
    pub fn new(
        user_id: impl Into<String>,
        meal_type: MealType,
        created_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            meal_type,
            date: created_at.date_naive(),
            created_at,
            content_hash: None,
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    fn matches(&self, user_id: &str, meal_type: MealType, date: NaiveDate) -> bool {
        self.user_id == user_id && self.meal_type == meal_type && self.date == date
    }
}

/// Lookup side of the meal persistence layer.
pub trait MealRecordStore {
    fn find_for_day(
        &self,
        user_id: &str,
        meal_type: MealType,
        date: NaiveDate,
    ) -> anyhow::Result<Option<MealRecord>>;
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<MealRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: MealRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MealRecordStore for MemoryRecordStore {
    fn find_for_day(
        &self,
        user_id: &str,
        meal_type: MealType,
        date: NaiveDate,
    ) -> anyhow::Result<Option<MealRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|record| record.matches(user_id, meal_type, date))
            .cloned())
    }
}

/// Meal records kept in a single JSON document: `{"records": [...]}`.
///
/// The file is re-read on every lookup so concurrent writers are observed. A
/// missing file is an empty store; an unreadable or corrupt one is an error.
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    path: PathBuf,
}

impl JsonRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<Vec<MealRecord>> {
        let Some(payload) = read_json(&self.path)? else {
            return Ok(Vec::new());
        };
        let Some(rows) = payload.get("records").and_then(Value::as_array) else {
            bail!("{} has no \"records\" array", self.path.display());
        };
        rows.iter()
            .map(|row| {
                serde_json::from_value::<MealRecord>(row.clone())
                    .with_context(|| format!("malformed record in {}", self.path.display()))
            })
            .collect()
    }

    pub fn append(&self, record: MealRecord) -> anyhow::Result<()> {
        let mut records = self.load()?;
        records.push(record);
        write_json(&self.path, &json!({ "records": records }))
    }
}

impl MealRecordStore for JsonRecordStore {
    fn find_for_day(
        &self,
        user_id: &str,
        meal_type: MealType,
        date: NaiveDate,
    ) -> anyhow::Result<Option<MealRecord>> {
        Ok(self
            .load()?
            .into_iter()
            .find(|record| record.matches(user_id, meal_type, date)))
    }
}

fn read_json(path: &Path) -> anyhow::Result<Option<Value>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()));
        }
    };
    let parsed = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing {}", path.display()))?;
    Ok(Some(parsed))
}

fn write_json(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}
