use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub const ALL: [MealType; 4] = [Self::Breakfast, Self::Lunch, Self::Dinner, Self::Snack];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Snack => "snack",
        }
    }

    pub fn label_ko(self) -> &'static str {
        match self {
            Self::Breakfast => "아침",
            Self::Lunch => "점심",
            Self::Dinner => "저녁",
            Self::Snack => "간식",
        }
    }

    /// Snacks have no time window and no once-per-day limit.
    pub fn is_unrestricted(self) -> bool {
        matches!(self, Self::Snack)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|meal| normalized == meal.as_str() || normalized == meal.label_ko())
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw).ok_or_else(|| {
            format!("unknown meal type '{raw}' (expected breakfast, lunch, dinner or snack)")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub name: String,
    pub calories: u32,
    pub amount: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    Good,
    Fair,
    Poor,
}

impl ImageQuality {
    pub fn from_confidence(mean_confidence: f64) -> Self {
        if mean_confidence >= 0.8 {
            Self::Good
        } else if mean_confidence >= 0.5 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisMetadata {
    pub processing_ms: u64,
    pub correction_version: String,
    pub image_quality: ImageQuality,
    pub retry_count: u32,
    pub is_fallback: bool,
    pub reported_confidence: Option<f64>,
    pub reported_total_calories: Option<f64>,
    pub dropped_foods: usize,
}

/// A corrected analysis. The total is always derived from `foods`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    foods: Vec<FoodItem>,
    total_calories: u32,
    meal_type: MealType,
    analysis_confidence: f64,
    metadata: AnalysisMetadata,
}

impl AnalysisResult {
    pub fn new(
        foods: Vec<FoodItem>,
        meal_type: MealType,
        analysis_confidence: f64,
        metadata: AnalysisMetadata,
    ) -> Self {
        let total_calories = foods
            .iter()
            .fold(0u32, |sum, food| sum.saturating_add(food.calories));
        Self {
            foods,
            total_calories,
            meal_type,
            analysis_confidence: analysis_confidence.clamp(0.0, 1.0),
            metadata,
        }
    }

    pub fn foods(&self) -> &[FoodItem] {
        &self.foods
    }

    pub fn total_calories(&self) -> u32 {
        self.total_calories
    }

    pub fn meal_type(&self) -> MealType {
        self.meal_type
    }

    pub fn analysis_confidence(&self) -> f64 {
        self.analysis_confidence
    }

    pub fn metadata(&self) -> &AnalysisMetadata {
        &self.metadata
    }
}
