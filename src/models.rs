use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{backend::TokenUsage, error::FieldIssue, media::PhotoDataUri};

/// Body measurement that gates recommendation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileField {
    Age,
    Height,
    Weight,
}

impl ProfileField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Height => "height",
            Self::Weight => "weight",
        }
    }
}

/// The user's profile as kept by the store.
///
/// Height is in centimetres and weight in kilograms.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    pub age: Option<f64>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    #[serde(default)]
    pub dietary_preferences: String,
}

impl UserProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_age(mut self, age: f64) -> Self {
        self.age = Some(age);
        self
    }

    pub fn with_height(mut self, height_cm: f64) -> Self {
        self.height = Some(height_cm);
        self
    }

    pub fn with_weight(mut self, weight_kg: f64) -> Self {
        self.weight = Some(weight_kg);
        self
    }

    pub fn with_dietary_preferences(mut self, preferences: impl Into<String>) -> Self {
        self.dietary_preferences = preferences.into();
        self
    }

    /// Measurements that are absent, non-finite or not strictly positive.
    pub fn missing_measurements(&self) -> Vec<ProfileField> {
        [
            (ProfileField::Age, self.age),
            (ProfileField::Height, self.height),
            (ProfileField::Weight, self.weight),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_some_and(|v| v.is_finite() && v > 0.0))
        .map(|(field, _)| field)
        .collect()
    }

    /// A profile is complete when age, height and weight are all positive.
    pub fn is_complete(&self) -> bool {
        self.missing_measurements().is_empty()
    }

    /// Check the profile against the bounds enforced by the profile form.
    ///
    /// Measurements may be left empty; when present they must fall inside the
    /// form's ranges. The name is required.
    pub fn validate_form(&self) -> std::result::Result<(), Vec<FieldIssue>> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push(FieldIssue::new(
                "/name",
                "Name is required to personalize your experience.",
            ));
        }

        let bounds = [
            (
                "/age",
                self.age,
                (1.0, "Age must be a positive number."),
                (120.0, "Age seems a bit high!"),
            ),
            (
                "/height",
                self.height,
                (50.0, "Height must be at least 50cm."),
                (300.0, "Height seems a bit high!"),
            ),
            (
                "/weight",
                self.weight,
                (1.0, "Weight must be a positive number."),
                (500.0, "Weight seems a bit high!"),
            ),
        ];
        for (path, value, (min, too_low), (max, too_high)) in bounds {
            match value {
                Some(v) if !v.is_finite() || v < min => issues.push(FieldIssue::new(path, too_low)),
                Some(v) if v > max => issues.push(FieldIssue::new(path, too_high)),
                _ => {}
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

/// One line of a meal: what was eaten and how much.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoodItem {
    pub name: String,
    pub quantity: String,
}

impl FoodItem {
    pub fn new(name: impl Into<String>, quantity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity: quantity.into(),
        }
    }

    /// An identified item whose quantity the user has not entered yet.
    pub fn draft(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }

    pub fn is_draft(&self) -> bool {
        self.quantity.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealSource {
    Image,
    Manual,
}

/// A meal as persisted by the store. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedMeal {
    pub id: String,
    pub date: DateTime<Utc>,
    pub source: MealSource,
    pub food_items: Vec<FoodItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_hint: Option<String>,
}

impl LoggedMeal {
    pub fn food_names(&self) -> Vec<String> {
        self.food_items.iter().map(|f| f.name.clone()).collect()
    }

    pub fn quantities(&self) -> Vec<String> {
        self.food_items.iter().map(|f| f.quantity.clone()).collect()
    }
}

/// A meal about to be logged; the store assigns id and date.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMeal {
    pub source: MealSource,
    pub food_items: Vec<FoodItem>,
    pub image_url: Option<String>,
    pub image_hint: Option<String>,
}

impl NewMeal {
    /// A manually entered meal. Every item needs a name and a quantity.
    pub fn manual(food_items: Vec<FoodItem>) -> std::result::Result<Self, Vec<FieldIssue>> {
        validate_meal_items(&food_items)?;
        Ok(Self {
            source: MealSource::Manual,
            food_items,
            image_url: None,
            image_hint: Some("various food items".to_string()),
        })
    }

    /// A meal confirmed from identification drafts, keeping the photo as its image.
    pub fn from_photo(
        food_items: Vec<FoodItem>,
        photo: &PhotoDataUri,
    ) -> std::result::Result<Self, Vec<FieldIssue>> {
        validate_meal_items(&food_items)?;
        let hint = food_items
            .iter()
            .take(2)
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(Self {
            source: MealSource::Image,
            food_items,
            image_url: Some(photo.as_str().to_string()),
            image_hint: Some(if hint.trim().is_empty() {
                "food meal".to_string()
            } else {
                hint
            }),
        })
    }
}

fn validate_meal_items(items: &[FoodItem]) -> std::result::Result<(), Vec<FieldIssue>> {
    if items.is_empty() {
        return Err(vec![FieldIssue::new(
            "/foodItems",
            "Please add at least one food item.",
        )]);
    }

    let mut issues = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        if item.name.trim().is_empty() {
            issues.push(FieldIssue::new(
                format!("/foodItems/{idx}/name"),
                "Food name is required.",
            ));
        }
        if item.quantity.trim().is_empty() {
            issues.push(FieldIssue::new(
                format!("/foodItems/{idx}/quantity"),
                "Quantity is required.",
            ));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// A dish the model suggests preparing from the selected ingredients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedDish {
    /// The name of the recommended dish that can be prepared from available ingredients.
    #[schemars(length(min = 1))]
    pub dish_name: String,
    /// Estimated calorie count for one serving of the dish, as a number.
    #[schemars(range(min = 0))]
    pub calories: f64,
    /// Personalized advice on whether this dish is healthy for the user and why, considering their profile.
    #[schemars(length(min = 1))]
    pub health_recommendation: String,
}

/// Feedback and dish suggestions returned by the recommendation flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResult {
    /// Personalized dish recommendations. These dishes should be preparable from the logged food items.
    pub recommendations: Vec<RecommendedDish>,
    /// Personalized general feedback on the user's diet based on their profile and logged meals.
    pub feedback: String,
}

impl RecommendationResult {
    pub fn has_suggestions(&self) -> bool {
        !self.recommendations.is_empty()
    }
}

/// Structured generation result with additional metadata.
#[derive(Debug, Clone)]
pub struct GenerationOutcome<T> {
    pub value: T,
    pub usage: Option<TokenUsage>,
    pub model_version: Option<String>,
    pub response_id: Option<String>,
    /// SHA-256 of the rendered prompt that produced this value.
    pub prompt_fingerprint: String,
}

impl<T> GenerationOutcome<T> {
    pub fn new(
        value: T,
        usage: Option<TokenUsage>,
        model_version: Option<String>,
        response_id: Option<String>,
        prompt_fingerprint: String,
    ) -> Self {
        Self {
            value,
            usage,
            model_version,
            response_id,
            prompt_fingerprint,
        }
    }
}
