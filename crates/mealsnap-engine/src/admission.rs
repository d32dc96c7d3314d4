use chrono::{DateTime, FixedOffset, NaiveDate, Timelike};
use mealsnap_contracts::config::AdmissionConfig;
use mealsnap_contracts::meals::MealType;
use mealsnap_contracts::records::{MealRecord, MealRecordStore};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionCheck {
    TimeRestricted,
    Duplicate,
}

impl AdmissionCheck {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TimeRestricted => "time-restricted",
            Self::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub user_id: String,
    pub meal_type: MealType,
    pub at: DateTime<FixedOffset>,
}

impl AdmissionRequest {
    pub fn new(user_id: impl Into<String>, meal_type: MealType, at: DateTime<FixedOffset>) -> Self {
        Self {
            user_id: user_id.into(),
            meal_type,
            at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeWindowCheck {
    pub passed: bool,
    pub local_hour: u32,
    pub allowed_meal_types: Vec<MealType>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateCheck {
    pub passed: bool,
    pub message: Option<String>,
    pub conflicting_record: Option<MealRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub failed_check: Option<AdmissionCheck>,
    pub message: Option<String>,
    pub local_date: NaiveDate,
    pub allowed_meal_types: Vec<MealType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_record: Option<MealRecord>,
}

/// Categories whose window contains the local hour of `at`. Snack is always allowed.
pub fn allowed_meal_types(config: &AdmissionConfig, at: DateTime<FixedOffset>) -> Vec<MealType> {
    let hour = local_time(config, at).hour();
    MealType::ALL
        .into_iter()
        .filter(|meal_type| match config.slots.window(*meal_type) {
            Some(window) => window.contains(hour),
            None => true,
        })
        .collect()
}

pub fn check_time_window(
    config: &AdmissionConfig,
    meal_type: MealType,
    at: DateTime<FixedOffset>,
) -> TimeWindowCheck {
    let local_hour = local_time(config, at).hour();
    let allowed = allowed_meal_types(config, at);
    if allowed.contains(&meal_type) {
        return TimeWindowCheck {
            passed: true,
            local_hour,
            allowed_meal_types: allowed,
            message: None,
        };
    }
    let window = config
        .slots
        .window(meal_type)
        .map(|window| window.to_string())
        .unwrap_or_default();
    let message = format!(
        "{} uploads are accepted {window}; at {local_hour:02}:00 the allowed meal types are {}",
        meal_type.label_ko(),
        describe(&allowed)
    );
    TimeWindowCheck {
        passed: false,
        local_hour,
        allowed_meal_types: allowed,
        message: Some(message),
    }
}

/// One store lookup for non-snack meals. A store failure counts as a duplicate.
pub fn check_duplicate(
    store: &dyn MealRecordStore,
    user_id: &str,
    meal_type: MealType,
    date: NaiveDate,
) -> DuplicateCheck {
    if meal_type.is_unrestricted() {
        return DuplicateCheck {
            passed: true,
            message: None,
            conflicting_record: None,
        };
    }
    match store.find_for_day(user_id, meal_type, date) {
        Ok(None) => DuplicateCheck {
            passed: true,
            message: None,
            conflicting_record: None,
        },
        Ok(Some(record)) => DuplicateCheck {
            passed: false,
            message: Some(format!(
                "{} for {date} is already recorded (record {} at {})",
                meal_type.label_ko(),
                record.id,
                record.created_at.to_rfc3339()
            )),
            conflicting_record: Some(record),
        },
        Err(err) => DuplicateCheck {
            passed: false,
            message: Some(format!(
                "could not confirm that {} for {date} is not already recorded: {err:#}",
                meal_type.label_ko()
            )),
            conflicting_record: None,
        },
    }
}

/// Time window first, then the once-per-day rule. Outside the window the store is never queried.
pub fn admit(
    config: &AdmissionConfig,
    store: &dyn MealRecordStore,
    request: &AdmissionRequest,
) -> AdmissionDecision {
    let local_date = local_time(config, request.at).date_naive();
    let window = check_time_window(config, request.meal_type, request.at);
    if !window.passed {
        return AdmissionDecision {
            allowed: false,
            failed_check: Some(AdmissionCheck::TimeRestricted),
            message: window.message,
            local_date,
            allowed_meal_types: window.allowed_meal_types,
            conflicting_record: None,
        };
    }

    let duplicate = check_duplicate(store, &request.user_id, request.meal_type, local_date);
    AdmissionDecision {
        allowed: duplicate.passed,
        failed_check: (!duplicate.passed).then_some(AdmissionCheck::Duplicate),
        message: duplicate.message,
        local_date,
        allowed_meal_types: window.allowed_meal_types,
        conflicting_record: duplicate.conflicting_record,
    }
}

fn local_time(config: &AdmissionConfig, at: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    at.with_timezone(&config.offset())
}

fn describe(meal_types: &[MealType]) -> String {
    meal_types
        .iter()
        .map(|meal_type| format!("{} ({})", meal_type.label_ko(), meal_type.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use anyhow::anyhow;
    use chrono::{DateTime, FixedOffset, NaiveDate};
    use mealsnap_contracts::config::{AdmissionConfig, HourRange};
    use mealsnap_contracts::meals::MealType;
    use mealsnap_contracts::records::{MealRecord, MealRecordStore, MemoryRecordStore};

    use super::*;

    fn at(raw: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(raw).unwrap()
    }

    /// Counts lookups and optionally fails them.
    struct CountingStore {
        calls: Cell<usize>,
        fail: bool,
    }

    impl CountingStore {
        fn new(fail: bool) -> Self {
            Self {
                calls: Cell::new(0),
                fail,
            }
        }
    }

    impl MealRecordStore for CountingStore {
        fn find_for_day(
            &self,
            _user_id: &str,
            _meal_type: MealType,
            _date: NaiveDate,
        ) -> anyhow::Result<Option<MealRecord>> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(anyhow!("connection reset"));
            }
            Ok(None)
        }
    }

    #[test]
    fn breakfast_at_two_pm_is_time_restricted() {
        let config = AdmissionConfig::default();
        let store = CountingStore::new(false);
        let decision = admit(
            &config,
            &store,
            &AdmissionRequest::new("u1", MealType::Breakfast, at("2026-03-02T14:00:00+09:00")),
        );
        assert!(!decision.allowed);
        assert_eq!(decision.failed_check, Some(AdmissionCheck::TimeRestricted));
        assert_eq!(
            decision.allowed_meal_types,
            vec![MealType::Lunch, MealType::Snack]
        );
        let message = decision.message.unwrap();
        assert!(message.contains("05:00-11:00"));
        assert!(message.contains("lunch"));
        assert_eq!(store.calls.get(), 0);
    }

    #[test]
    fn window_boundaries_are_half_open() {
        let config = AdmissionConfig::default();
        let lunch_start = check_time_window(&config, MealType::Lunch, at("2026-03-02T11:00:00+09:00"));
        assert!(lunch_start.passed);
        let breakfast_end =
            check_time_window(&config, MealType::Breakfast, at("2026-03-02T11:00:00+09:00"));
        assert!(!breakfast_end.passed);
        assert!(!breakfast_end.allowed_meal_types.contains(&MealType::Breakfast));

        let late = allowed_meal_types(&config, at("2026-03-02T23:30:00+09:00"));
        assert_eq!(late, vec![MealType::Snack]);
    }

    #[test]
    fn hour_is_taken_in_configured_offset() {
        let config = AdmissionConfig::default();
        // 03:00 UTC is 12:00 in +09:00.
        let check = check_time_window(&config, MealType::Lunch, at("2026-03-02T03:00:00Z"));
        assert!(check.passed);
        assert_eq!(check.local_hour, 12);

        // 16:30 UTC on the 1st is already the 2nd locally.
        let decision = admit(
            &config,
            &MemoryRecordStore::new(),
            &AdmissionRequest::new("u1", MealType::Snack, at("2026-03-01T16:30:00Z")),
        );
        assert_eq!(decision.local_date, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
    }

    #[test]
    fn wrapping_window_spans_midnight() {
        let mut config = AdmissionConfig::default();
        config.slots.dinner = HourRange::new(20, 2);
        assert!(check_time_window(&config, MealType::Dinner, at("2026-03-02T01:00:00+09:00")).passed);
        assert!(check_time_window(&config, MealType::Dinner, at("2026-03-02T21:00:00+09:00")).passed);
        assert!(!check_time_window(&config, MealType::Dinner, at("2026-03-02T02:00:00+09:00")).passed);
    }

    #[test]
    fn second_lunch_same_day_is_duplicate() {
        let config = AdmissionConfig::default();
        let store = MemoryRecordStore::new();
        let first_at = at("2026-03-02T12:10:00+09:00");
        let request = AdmissionRequest::new("u1", MealType::Lunch, first_at);
        assert!(admit(&config, &store, &request).allowed);

        let record = MealRecord::new("u1", MealType::Lunch, first_at);
        let record_id = record.id.clone();
        store.insert(record);

        let second = admit(
            &config,
            &store,
            &AdmissionRequest::new("u1", MealType::Lunch, at("2026-03-02T13:00:00+09:00")),
        );
        assert!(!second.allowed);
        assert_eq!(second.failed_check, Some(AdmissionCheck::Duplicate));
        assert!(second.message.unwrap().contains(&record_id));
        assert_eq!(second.conflicting_record.map(|record| record.id), Some(record_id));

        let other_user = admit(
            &config,
            &store,
            &AdmissionRequest::new("u2", MealType::Lunch, at("2026-03-02T13:00:00+09:00")),
        );
        assert!(other_user.allowed);
    }

    #[test]
    fn snacks_skip_the_store() {
        let config = AdmissionConfig::default();
        let store = CountingStore::new(true);
        for raw in ["2026-03-02T15:00:00+09:00", "2026-03-02T15:30:00+09:00"] {
            let decision = admit(&config, &store, &AdmissionRequest::new("u1", MealType::Snack, at(raw)));
            assert!(decision.allowed);
            assert_eq!(decision.failed_check, None);
        }
        assert_eq!(store.calls.get(), 0);
    }

    #[test]
    fn store_failure_fails_closed() {
        let config = AdmissionConfig::default();
        let store = CountingStore::new(true);
        let decision = admit(
            &config,
            &store,
            &AdmissionRequest::new("u1", MealType::Dinner, at("2026-03-02T19:00:00+09:00")),
        );
        assert!(!decision.allowed);
        assert_eq!(decision.failed_check, Some(AdmissionCheck::Duplicate));
        assert!(decision.message.unwrap().contains("connection reset"));
        assert_eq!(store.calls.get(), 1);
    }

    #[test]
    fn decision_serializes_reason_code() {
        let decision = admit(
            &AdmissionConfig::default(),
            &MemoryRecordStore::new(),
            &AdmissionRequest::new("u1", MealType::Dinner, at("2026-03-02T08:00:00+09:00")),
        );
        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(value["failed_check"], serde_json::json!("time-restricted"));
        assert_eq!(value["allowed"], serde_json::json!(false));
        assert_eq!(value["local_date"], serde_json::json!("2026-03-02"));
    }
}
