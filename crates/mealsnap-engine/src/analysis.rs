use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

use mealsnap_contracts::config::AnalysisConfig;
use mealsnap_contracts::meals::{AnalysisMetadata, AnalysisResult, FoodItem, ImageQuality, MealType};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::EngineError;

const DEFAULT_CONFIDENCE: f64 = 0.5;
const SINGLE_FOOD_PENALTY: f64 = -0.05;
const TYPICAL_COUNT_BONUS: f64 = 0.05;
const CROWDED_PENALTY: f64 = -0.1;
const TYPICAL_COUNT_MAX: usize = 5;

const BREAKFAST_KEYWORDS: &[&str] = &[
    "토스트", "시리얼", "오트밀", "베이글", "팬케이크", "와플", "요거트", "그래놀라", "스크램블",
    "toast", "cereal", "oatmeal", "bagel", "pancake", "waffle", "granola",
];
const SNACK_KEYWORDS: &[&str] = &[
    "과자", "쿠키", "케이크", "아이스크림", "초콜릿", "커피", "라떼", "음료", "주스", "마카롱",
    "도넛", "젤리", "스낵", "cookie", "cake", "coffee", "latte", "chips", "donut",
];
const SNACK_MAX_CALORIES: u32 = 300;
const LUNCH_MAX_CALORIES: u32 = 700;

/// Raw JSON from the analysis service. Only [`validate`] looks inside.
#[derive(Debug, Clone)]
pub struct RawAnalysisResponse {
    payload: Result<Value, String>,
}

impl RawAnalysisResponse {
    pub fn from_value(value: Value) -> Self {
        Self {
            payload: Ok(value),
        }
    }

    /// Accepts bare JSON or JSON wrapped in a markdown code fence.
    pub fn parse(text: &str) -> Self {
        let body = strip_code_fence(text);
        Self {
            payload: serde_json::from_str(body).map_err(|err| err.to_string()),
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    rest.trim()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationContext {
    pub retry_count: u32,
    /// Set when the response came from a synthetic or fallback path.
    pub is_fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    MalformedResponse,
    MissingFoods,
    NoUsableFoods,
    FoodNotObject,
    NameWithoutHangul,
    DuplicateFood,
    CaloriesCoerced,
    CaloriesClamped,
    ConfidenceCoerced,
    LowConfidence,
    TooManyFoods,
    TotalMismatch,
    MealTypeOverridden,
}

impl IssueCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedResponse => "malformed_response",
            Self::MissingFoods => "missing_foods",
            Self::NoUsableFoods => "no_usable_foods",
            Self::FoodNotObject => "food_not_object",
            Self::NameWithoutHangul => "name_without_hangul",
            Self::DuplicateFood => "duplicate_food",
            Self::CaloriesCoerced => "calories_coerced",
            Self::CaloriesClamped => "calories_clamped",
            Self::ConfidenceCoerced => "confidence_coerced",
            Self::LowConfidence => "low_confidence",
            Self::TooManyFoods => "too_many_foods",
            Self::TotalMismatch => "total_mismatch",
            Self::MealTypeOverridden => "meal_type_overridden",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: IssueCode,
    pub message: String,
    /// Index into the response's `foods` array, when the issue is about one item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub food_index: Option<usize>,
}

impl ValidationIssue {
    fn error(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            food_index: None,
        }
    }

    fn warning(code: IssueCode, message: impl Into<String>, food_index: Option<usize>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            food_index,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.food_index {
            Some(index) => write!(f, "[{}] foods[{index}]: {}", self.code.as_str(), self.message),
            None => write!(f, "[{}] {}", self.code.as_str(), self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Not an object, unparsable, or no `foods` array.
    Structural,
    /// Structurally fine but nothing survived sanitation.
    EmptyAfterSanitation,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Structural => "structural",
            Self::EmptyAfterSanitation => "empty after sanitation",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectionKind>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub corrected: Option<AnalysisResult>,
}

impl ValidationOutcome {
    pub fn into_result(self) -> Result<AnalysisResult, EngineError> {
        match (self.corrected, self.rejection) {
            (Some(result), None) => Ok(result),
            (_, kind) => Err(EngineError::ValidationFailed {
                kind: kind.unwrap_or(RejectionKind::Structural),
                errors: self.errors,
                warnings: self.warnings,
            }),
        }
    }

    fn rejected(kind: RejectionKind, error: ValidationIssue, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            is_valid: false,
            rejection: Some(kind),
            errors: vec![error],
            warnings,
            corrected: None,
        }
    }
}

struct Survivor {
    item: FoodItem,
    /// Calories as the model stated them, before the ceiling clamp.
    reported_calories: f64,
}

/// Sanitizes and recomputes `raw` into a trustworthy [`AnalysisResult`].
///
/// Names are filtered, numbers coerced and clamped, the total recomputed and
/// the meal type checked against the closed set. Every change to a value the
/// model reported is kept as a warning. Never panics and never returns an error; rejections come back as an
/// outcome with `is_valid == false` and the warnings gathered so far.
pub fn validate(
    raw: &RawAnalysisResponse,
    config: &AnalysisConfig,
    context: ValidationContext,
) -> ValidationOutcome {
    let started = Instant::now();
    let mut warnings = Vec::new();

    let payload = match &raw.payload {
        Ok(payload) => payload,
        Err(reason) => {
            return ValidationOutcome::rejected(
                RejectionKind::Structural,
                ValidationIssue::error(
                    IssueCode::MalformedResponse,
                    format!("response is not valid JSON: {reason}"),
                ),
                warnings,
            );
        }
    };
    let Some(root) = payload.as_object() else {
        return ValidationOutcome::rejected(
            RejectionKind::Structural,
            ValidationIssue::error(IssueCode::MalformedResponse, "response is not a JSON object"),
            warnings,
        );
    };
    let Some(entries) = root
        .get("foods")
        .and_then(Value::as_array)
        .filter(|rows| !rows.is_empty())
    else {
        return ValidationOutcome::rejected(
            RejectionKind::Structural,
            ValidationIssue::error(IssueCode::MissingFoods, "response has no foods"),
            warnings,
        );
    };

    let mut survivors: Vec<Survivor> = Vec::new();
    let mut seen_names: HashSet<String> = HashSet::new();
    for (index, entry) in entries.iter().enumerate() {
        let Some(food) = entry.as_object() else {
            warnings.push(ValidationIssue::warning(
                IssueCode::FoodNotObject,
                "food entry is not an object; dropped",
                Some(index),
            ));
            continue;
        };
        if let Some(survivor) = correct_food(index, food, config, &mut seen_names, &mut warnings) {
            survivors.push(survivor);
        }
    }

    if survivors.len() > config.max_foods {
        warnings.push(ValidationIssue::warning(
            IssueCode::TooManyFoods,
            format!(
                "{} foods survived; keeping the first {}",
                survivors.len(),
                config.max_foods
            ),
            None,
        ));
        survivors.truncate(config.max_foods);
    }

    if survivors.is_empty() {
        return ValidationOutcome::rejected(
            RejectionKind::EmptyAfterSanitation,
            ValidationIssue::error(
                IssueCode::NoUsableFoods,
                "no foods remain after sanitation",
            ),
            warnings,
        );
    }

    let reported_total = root.get("total_calories").and_then(parse_number);
    audit_reported_total(reported_total, &survivors, config, &mut warnings);

    let foods = survivors
        .into_iter()
        .map(|survivor| survivor.item)
        .collect::<Vec<_>>();
    let total = foods
        .iter()
        .fold(0u32, |sum, food| sum.saturating_add(food.calories));
    let meal_type = resolve_meal_type(root.get("meal_type"), total, &foods, &mut warnings);
    let mean_confidence = mean_confidence(&foods);
    let analysis_confidence = overall_confidence(mean_confidence, foods.len(), config);
    let dropped_foods = entries.len() - foods.len();

    let metadata = AnalysisMetadata {
        processing_ms: started.elapsed().as_millis() as u64,
        correction_version: config.correction_version.clone(),
        image_quality: ImageQuality::from_confidence(mean_confidence),
        retry_count: context.retry_count,
        is_fallback: context.is_fallback,
        reported_confidence: root.get("confidence").and_then(parse_number),
        reported_total_calories: reported_total,
        dropped_foods,
    };

    ValidationOutcome {
        is_valid: true,
        rejection: None,
        errors: Vec::new(),
        warnings,
        corrected: Some(AnalysisResult::new(
            foods,
            meal_type,
            analysis_confidence,
            metadata,
        )),
    }
}

fn correct_food(
    index: usize,
    food: &Map<String, Value>,
    config: &AnalysisConfig,
    seen_names: &mut HashSet<String>,
    warnings: &mut Vec<ValidationIssue>,
) -> Option<Survivor> {
    let raw_name = food.get("name").and_then(Value::as_str).unwrap_or("");
    let name = sanitize_name(raw_name, config.max_name_chars);
    if !name.chars().any(is_hangul) {
        warnings.push(ValidationIssue::warning(
            IssueCode::NameWithoutHangul,
            format!("name '{}' has no Hangul; dropped", truncate_text(raw_name, 40)),
            Some(index),
        ));
        return None;
    }
    // Only kept items claim a name.
    let dedup_key = name.to_lowercase();
    if seen_names.contains(&dedup_key) {
        warnings.push(ValidationIssue::warning(
            IssueCode::DuplicateFood,
            format!("duplicate food '{name}'; dropped"),
            Some(index),
        ));
        return None;
    }

    let (calories, reported_calories) = correct_calories(index, food.get("calories"), config, warnings);
    let amount = normalize_amount(food.get("amount"), config);
    let confidence = correct_confidence(index, food.get("confidence"), warnings);
    if confidence < config.min_confidence {
        warnings.push(ValidationIssue::warning(
            IssueCode::LowConfidence,
            format!(
                "'{name}' confidence {confidence:.2} is below {:.2}; dropped",
                config.min_confidence
            ),
            Some(index),
        ));
        return None;
    }
    seen_names.insert(dedup_key);

    Some(Survivor {
        item: FoodItem {
            name,
            calories,
            amount,
            confidence,
        },
        reported_calories,
    })
}

/// Keeps Hangul, Latin letters, digits, whitespace and `-_()`; collapses runs of whitespace.
fn sanitize_name(raw: &str, max_chars: usize) -> String {
    let filtered = raw
        .trim()
        .chars()
        .filter(|ch| is_allowed_name_char(*ch))
        .collect::<String>();
    let collapsed = filtered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

fn is_allowed_name_char(ch: char) -> bool {
    is_hangul(ch)
        || ch.is_ascii_alphanumeric()
        || ch.is_whitespace()
        || matches!(ch, '-' | '_' | '(' | ')')
}

fn is_hangul(ch: char) -> bool {
    matches!(ch,
        '\u{AC00}'..='\u{D7A3}'
        | '\u{1100}'..='\u{11FF}'
        | '\u{3130}'..='\u{318F}'
        | '\u{A960}'..='\u{A97F}'
        | '\u{D7B0}'..='\u{D7FF}')
}

/// Returns `(corrected, as_reported)`; the second feeds the arithmetic audit.
fn correct_calories(
    index: usize,
    value: Option<&Value>,
    config: &AnalysisConfig,
    warnings: &mut Vec<ValidationIssue>,
) -> (u32, f64) {
    let parsed = value.and_then(parse_number);
    let reported = match parsed {
        Some(number) if number >= 0.0 => number,
        Some(number) => {
            warnings.push(ValidationIssue::warning(
                IssueCode::CaloriesCoerced,
                format!("negative calories {number} set to 0"),
                Some(index),
            ));
            0.0
        }
        None => {
            warnings.push(ValidationIssue::warning(
                IssueCode::CaloriesCoerced,
                "calories missing or not numeric; set to 0",
                Some(index),
            ));
            0.0
        }
    };
    let rounded = reported.round();
    if rounded > f64::from(config.max_calories_per_food) {
        warnings.push(ValidationIssue::warning(
            IssueCode::CaloriesClamped,
            format!(
                "calories {} exceed {}; replaced with {}",
                trim_float(reported),
                config.max_calories_per_food,
                config.fallback_calories
            ),
            Some(index),
        ));
        return (config.fallback_calories, reported);
    }
    (rounded as u32, reported)
}

fn normalize_amount(value: Option<&Value>, config: &AnalysisConfig) -> String {
    let text = match value {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    };
    if text.is_empty() || text.chars().count() > config.max_amount_chars {
        return config.default_amount.clone();
    }
    text
}

fn correct_confidence(
    index: usize,
    value: Option<&Value>,
    warnings: &mut Vec<ValidationIssue>,
) -> f64 {
    let Some(value) = value.filter(|value| !value.is_null()) else {
        return DEFAULT_CONFIDENCE;
    };
    let Some(number) = parse_number(value) else {
        warnings.push(ValidationIssue::warning(
            IssueCode::ConfidenceCoerced,
            format!("confidence {value} is not numeric; using {DEFAULT_CONFIDENCE}"),
            Some(index),
        ));
        return DEFAULT_CONFIDENCE;
    };
    let clamped = number.clamp(0.0, 1.0);
    if clamped != number {
        warnings.push(ValidationIssue::warning(
            IssueCode::ConfidenceCoerced,
            format!("confidence {} clamped to {clamped}", trim_float(number)),
            Some(index),
        ));
    }
    clamped
}

fn audit_reported_total(
    reported_total: Option<f64>,
    survivors: &[Survivor],
    config: &AnalysisConfig,
    warnings: &mut Vec<ValidationIssue>,
) {
    let Some(reported_total) = reported_total else {
        return;
    };
    let stated_sum = survivors
        .iter()
        .map(|survivor| survivor.reported_calories)
        .sum::<f64>();
    if (reported_total - stated_sum).abs() > config.total_tolerance {
        warnings.push(ValidationIssue::warning(
            IssueCode::TotalMismatch,
            format!(
                "reported total {} does not match item sum {}; total recomputed",
                trim_float(reported_total),
                trim_float(stated_sum)
            ),
            None,
        ));
    }
}

fn resolve_meal_type(
    reported: Option<&Value>,
    total_calories: u32,
    foods: &[FoodItem],
    warnings: &mut Vec<ValidationIssue>,
) -> MealType {
    let reported = reported
        .filter(|value| !value.is_null())
        .filter(|value| value.as_str().map(|text| !text.trim().is_empty()).unwrap_or(true));
    let Some(reported) = reported else {
        return infer_meal_type(total_calories, foods);
    };
    if let Some(meal_type) = reported.as_str().and_then(MealType::parse) {
        return meal_type;
    }
    let inferred = infer_meal_type(total_calories, foods);
    warnings.push(ValidationIssue::warning(
        IssueCode::MealTypeOverridden,
        format!("meal_type {reported} is not recognised; inferred {inferred}"),
        None,
    ));
    inferred
}

/// Keyword matches take precedence over the calorie heuristic.
pub fn infer_meal_type(total_calories: u32, foods: &[FoodItem]) -> MealType {
    let names = foods
        .iter()
        .map(|food| food.name.to_lowercase())
        .collect::<Vec<_>>();
    let mentions = |keywords: &[&str]| {
        names
            .iter()
            .any(|name| keywords.iter().any(|keyword| name.contains(keyword)))
    };
    if mentions(BREAKFAST_KEYWORDS) {
        return MealType::Breakfast;
    }
    if mentions(SNACK_KEYWORDS) {
        return MealType::Snack;
    }
    if total_calories < SNACK_MAX_CALORIES {
        MealType::Snack
    } else if total_calories <= LUNCH_MAX_CALORIES {
        MealType::Lunch
    } else {
        MealType::Dinner
    }
}

fn mean_confidence(foods: &[FoodItem]) -> f64 {
    if foods.is_empty() {
        return 0.0;
    }
    foods.iter().map(|food| food.confidence).sum::<f64>() / foods.len() as f64
}

fn overall_confidence(mean: f64, count: usize, config: &AnalysisConfig) -> f64 {
    let adjustment = match count {
        0 | 1 => SINGLE_FOOD_PENALTY,
        2..=TYPICAL_COUNT_MAX => TYPICAL_COUNT_BONUS,
        _ => CROWDED_PENALTY,
    };
    ((mean + adjustment) * config.conservatism).clamp(0.0, 1.0)
}

fn parse_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(raw) => raw.as_f64(),
        Value::String(raw) => raw
            .trim()
            .trim_end_matches("kcal")
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .ok(),
        _ => None,
    };
    parsed.filter(|number| number.is_finite())
}

fn trim_float(value: f64) -> String {
    let text = format!("{value:.2}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
