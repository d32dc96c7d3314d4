use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::images::{DerivativeKind, ImageFormat};
use crate::meals::MealType;

pub const CONFIG_ENV_VAR: &str = "MEALSNAP_CONFIG";
/// PNG and WebP derivatives are written losslessly and must carry this quality.
pub const LOSSLESS_QUALITY: u8 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    /// Scale down to fit within the box, keeping aspect ratio.
    Inside,
    /// Scale to cover the box, then center-crop.
    Cover,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivativeSpec {
    pub width: u32,
    pub height: u32,
    pub fit: Fit,
    pub format: ImageFormat,
    pub quality: u8,
    #[serde(default)]
    pub enhance: bool,
    #[serde(default)]
    pub base64: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativeConfig {
    pub analysis: DerivativeSpec,
    pub thumbnail: DerivativeSpec,
    pub archive: DerivativeSpec,
}

impl DerivativeConfig {
    pub fn spec(&self, kind: DerivativeKind) -> &DerivativeSpec {
        match kind {
            DerivativeKind::Analysis => &self.analysis,
            DerivativeKind::Thumbnail => &self.thumbnail,
            DerivativeKind::Archive => &self.archive,
        }
    }
}

impl Default for DerivativeConfig {
    fn default() -> Self {
        Self {
            analysis: DerivativeSpec {
                width: 1024,
                height: 1024,
                fit: Fit::Inside,
                format: ImageFormat::Jpeg,
                quality: 90,
                enhance: true,
                base64: true,
            },
            thumbnail: DerivativeSpec {
                width: 300,
                height: 300,
                fit: Fit::Cover,
                format: ImageFormat::Jpeg,
                quality: 80,
                enhance: false,
                base64: false,
            },
            archive: DerivativeSpec {
                width: 1920,
                height: 1920,
                fit: Fit::Inside,
                format: ImageFormat::Jpeg,
                quality: 85,
                enhance: false,
                base64: false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub max_upload_bytes: usize,
    pub allowed_formats: Vec<ImageFormat>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            allowed_formats: vec![ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Webp],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl_secs: 3600,
        }
    }
}

/// Half-open `[start, end)` range of local hours. `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

impl HourRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

impl fmt::Display for HourRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00-{:02}:00", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSlots {
    pub breakfast: HourRange,
    pub lunch: HourRange,
    pub dinner: HourRange,
}

impl TimeSlots {
    pub fn window(&self, meal_type: MealType) -> Option<HourRange> {
        match meal_type {
            MealType::Breakfast => Some(self.breakfast),
            MealType::Lunch => Some(self.lunch),
            MealType::Dinner => Some(self.dinner),
            MealType::Snack => None,
        }
    }
}

impl Default for TimeSlots {
    fn default() -> Self {
        Self {
            breakfast: HourRange::new(5, 11),
            lunch: HourRange::new(11, 16),
            dinner: HourRange::new(16, 22),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub utc_offset_minutes: i32,
    pub slots: TimeSlots,
}

impl AdmissionConfig {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix())
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 9 * 60,
            slots: TimeSlots::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub min_confidence: f64,
    pub max_calories_per_food: u32,
    pub fallback_calories: u32,
    pub max_foods: usize,
    pub max_name_chars: usize,
    pub max_amount_chars: usize,
    pub default_amount: String,
    pub total_tolerance: f64,
    pub conservatism: f64,
    pub correction_version: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            max_calories_per_food: 3000,
            fallback_calories: 500,
            max_foods: 10,
            max_name_chars: 50,
            max_amount_chars: 100,
            default_amount: "1인분".to_string(),
            total_tolerance: 10.0,
            conservatism: 0.9,
            correction_version: "meal-correction/2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub intake: IntakeConfig,
    pub derivatives: DerivativeConfig,
    pub cache: CacheConfig,
    pub admission: AdmissionConfig,
    pub analysis: AnalysisConfig,
}

impl PipelineConfig {
    /// Defaults, overlaid with `path` (or `$MEALSNAP_CONFIG`) when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let override_path = path.map(Path::to_path_buf).or_else(config_env_path);
        let Some(override_path) = override_path else {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        };
        let raw = std::fs::read_to_string(&override_path).map_err(|source| ConfigError::Read {
            path: override_path.clone(),
            source,
        })?;
        Self::from_json_str(&raw).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: override_path,
                source,
            },
            other => other,
        })
    }

    /// Partial documents are merged key by key over the defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let parse_err = |source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        };
        let overrides: Value = serde_json::from_str(raw).map_err(parse_err)?;
        let mut merged = serde_json::to_value(Self::default()).map_err(parse_err)?;
        merge_json(&mut merged, overrides);
        let config: Self = serde_json::from_value(merged).map_err(parse_err)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.intake.max_upload_bytes == 0 {
            return invalid("intake.max_upload_bytes must be positive".to_string());
        }
        if self.intake.allowed_formats.is_empty() {
            return invalid("intake.allowed_formats must not be empty".to_string());
        }
        for kind in DerivativeKind::ALL {
            let spec = self.derivatives.spec(kind);
            let name = kind.as_str();
            if spec.width == 0 || spec.height == 0 {
                return invalid(format!("derivatives.{name} dimensions must be positive"));
            }
            if !(1..=100).contains(&spec.quality) {
                return invalid(format!("derivatives.{name}.quality must be within 1..=100"));
            }
            if !matches!(
                spec.format,
                ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Webp
            ) {
                return invalid(format!(
                    "derivatives.{name}.format '{}' cannot be encoded",
                    spec.format
                ));
            }
            if spec.format != ImageFormat::Jpeg && spec.quality != LOSSLESS_QUALITY {
                return invalid(format!(
                    "derivatives.{name}.format '{}' is encoded losslessly; quality must be {LOSSLESS_QUALITY}",
                    spec.format
                ));
            }
        }
        if !self.derivatives.analysis.base64 {
            return invalid("derivatives.analysis must be base64-encoded".to_string());
        }
        for meal_type in MealType::ALL {
            let Some(window) = self.admission.slots.window(meal_type) else {
                continue;
            };
            if window.start > 23 || window.end > 24 || window.start == window.end {
                return invalid(format!(
                    "admission.slots.{meal_type} range {window} is not a valid hour range"
                ));
            }
        }
        if self.admission.utc_offset_minutes.abs() >= 24 * 60 {
            return invalid("admission.utc_offset_minutes must be within +-24h".to_string());
        }
        let analysis = &self.analysis;
        if !(0.0..=1.0).contains(&analysis.min_confidence) {
            return invalid("analysis.min_confidence must be within 0..=1".to_string());
        }
        if !(0.0..=1.0).contains(&analysis.conservatism) || analysis.conservatism == 0.0 {
            return invalid("analysis.conservatism must be within (0, 1]".to_string());
        }
        if analysis.fallback_calories > analysis.max_calories_per_food {
            return invalid(
                "analysis.fallback_calories must not exceed max_calories_per_food".to_string(),
            );
        }
        if analysis.max_foods == 0 || analysis.max_name_chars == 0 {
            return invalid("analysis.max_foods and max_name_chars must be positive".to_string());
        }
        if analysis.default_amount.trim().is_empty() {
            return invalid("analysis.default_amount must not be empty".to_string());
        }
        if !analysis.total_tolerance.is_finite() || analysis.total_tolerance < 0.0 {
            return invalid("analysis.total_tolerance must be a non-negative number".to_string());
        }
        Ok(())
    }
}

fn config_env_path() -> Option<PathBuf> {
    env::var(CONFIG_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn merge_json(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            merge_maps(base_map, override_map);
        }
        (slot, value) => *slot = value,
    }
}

fn merge_maps(base: &mut Map<String, Value>, overrides: Map<String, Value>) {
    for (key, value) in overrides {
        match base.get_mut(&key) {
            Some(existing) => merge_json(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}
