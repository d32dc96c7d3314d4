pub mod admission;
pub mod analysis;
pub mod derive;
pub mod error;

use std::sync::Arc;

use mealsnap_contracts::cache::{ContentCache, MemoryCache};
use mealsnap_contracts::config::{ConfigError, PipelineConfig};
use mealsnap_contracts::events::{EventPayload, EventWriter};
use mealsnap_contracts::images::RawImage;
use mealsnap_contracts::records::MealRecordStore;
use serde_json::{json, Map, Value};

pub use admission::{AdmissionCheck, AdmissionDecision, AdmissionRequest};
pub use analysis::{RawAnalysisResponse, ValidationContext, ValidationOutcome};
pub use derive::DerivationReport;
pub use error::EngineError;

/// One configured intake pipeline: derivation, correction and admission.
///
/// Cheap to share behind a reference; the only mutable state is the cache,
/// which synchronizes itself. Event log failures are reported on stderr and
/// never change a pipeline result.
pub struct IntakeEngine {
    config: PipelineConfig,
    cache: Arc<dyn ContentCache>,
    events: Option<EventWriter>,
}

impl IntakeEngine {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = Arc::new(MemoryCache::from_config(&config.cache));
        Ok(Self {
            config,
            cache,
            events: None,
        })
    }

    pub fn with_cache(mut self, cache: Arc<dyn ContentCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn ContentCache> {
        &self.cache
    }

    pub fn events(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    pub fn derive(&self, image: &RawImage) -> Result<DerivationReport, EngineError> {
        self.emit(
            "intake_started",
            json!({
                "size": image.len(),
                "declared_mime": image.declared_mime(),
            }),
        );
        match derive::derive_all(image, &self.config, self.cache.as_ref()) {
            Ok(report) => {
                let event_type = if report.cache_hit {
                    "derivation_cache_hit"
                } else {
                    "derivation_completed"
                };
                self.emit(event_type, report.to_json());
                Ok(report)
            }
            Err(err) => {
                self.emit(
                    "derivation_failed",
                    json!({
                        "code": err.code(),
                        "error": err.to_string(),
                    }),
                );
                Err(err)
            }
        }
    }

    pub fn validate_analysis(
        &self,
        raw: &RawAnalysisResponse,
        context: ValidationContext,
    ) -> ValidationOutcome {
        let outcome = analysis::validate(raw, &self.config.analysis, context);
        let warnings = issue_codes(&outcome.warnings);
        match &outcome.corrected {
            Some(result) => self.emit(
                "analysis_validated",
                json!({
                    "foods": result.foods().len(),
                    "total_calories": result.total_calories(),
                    "meal_type": result.meal_type(),
                    "analysis_confidence": result.analysis_confidence(),
                    "retry_count": context.retry_count,
                    "warnings": warnings,
                }),
            ),
            None => self.emit(
                "analysis_rejected",
                json!({
                    "kind": outcome.rejection,
                    "errors": issue_codes(&outcome.errors),
                    "warnings": warnings,
                    "retry_count": context.retry_count,
                }),
            ),
        }
        outcome
    }

    pub fn admit(&self, store: &dyn MealRecordStore, request: &AdmissionRequest) -> AdmissionDecision {
        let decision = admission::admit(&self.config.admission, store, request);
        self.emit(
            "admission_decided",
            json!({
                "user_id": request.user_id,
                "meal_type": request.meal_type,
                "at": request.at.to_rfc3339(),
                "allowed": decision.allowed,
                "failed_check": decision.failed_check,
            }),
        );
        decision
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(event_type, map_object(payload)) {
            eprintln!("mealsnap: failed to record {event_type} event: {err:#}");
        }
    }
}

fn issue_codes(issues: &[analysis::ValidationIssue]) -> Vec<&'static str> {
    issues.iter().map(|issue| issue.code.as_str()).collect()
}

fn map_object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
