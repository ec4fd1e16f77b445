use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    error::{FieldIssue, PipelineError, Result},
    models::{LoggedMeal, RecommendationResult, UserProfile},
    prompt::{recommendation_prompt, CompiledPrompt},
    schema::StructuredValidator,
};

use super::Flow;

pub const FLOW_NAME: &str = "personalizedRecommendations";

/// Sent in place of an empty dietary preference.
pub const UNSPECIFIED_PREFERENCES: &str = "Not specified";

/// Profile as sent to the model: every measurement present and positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    /// The age of the user.
    #[schemars(extend("exclusiveMinimum" = 0))]
    pub age: f64,
    /// The height of the user in cm.
    #[schemars(extend("exclusiveMinimum" = 0))]
    pub height: f64,
    /// The weight of the user in kg.
    #[schemars(extend("exclusiveMinimum" = 0))]
    pub weight: f64,
    /// The dietary preferences of the user.
    pub dietary_preferences: String,
}

impl ProfileSnapshot {
    /// Snapshot a stored profile, or report which measurements are missing.
    pub fn from_profile(profile: &UserProfile) -> Result<Self> {
        match (profile.age, profile.height, profile.weight) {
            (Some(age), Some(height), Some(weight)) if profile.is_complete() => Ok(Self {
                age,
                height,
                weight,
                dietary_preferences: if profile.dietary_preferences.trim().is_empty() {
                    UNSPECIFIED_PREFERENCES.to_string()
                } else {
                    profile.dietary_preferences.clone()
                },
            }),
            _ => Err(PipelineError::ProfileIncomplete {
                missing: profile.missing_measurements(),
            }),
        }
    }
}

/// The food names and quantities of one logged meal, as parallel lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngredientSet {
    /// The food items in the meal.
    pub food_items: Vec<String>,
    /// The quantity of each food item in the meal.
    pub quantity: Vec<String>,
}

impl From<&LoggedMeal> for IngredientSet {
    fn from(meal: &LoggedMeal) -> Self {
        Self {
            food_items: meal.food_names(),
            quantity: meal.quantities(),
        }
    }
}

/// Request of the recommendation flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedRecommendationsInput {
    /// The user profile information.
    pub user_profile: ProfileSnapshot,
    /// The logged meals of the user, used as available ingredients.
    pub logged_meals: Vec<IngredientSet>,
}

impl PersonalizedRecommendationsInput {
    /// Build a request from a stored profile and the selected meals, in selection order.
    ///
    /// Fails with `ProfileIncomplete` before anything else is checked.
    pub fn new(profile: &UserProfile, meals: &[LoggedMeal]) -> Result<Self> {
        Ok(Self {
            user_profile: ProfileSnapshot::from_profile(profile)?,
            logged_meals: meals.iter().map(IngredientSet::from).collect(),
        })
    }
}

impl StructuredValidator for PersonalizedRecommendationsInput {
    fn validate_fields(&self) -> Vec<FieldIssue> {
        self.logged_meals
            .iter()
            .enumerate()
            .filter(|(_, meal)| meal.food_items.len() != meal.quantity.len())
            .map(|(idx, meal)| {
                FieldIssue::new(
                    format!("/loggedMeals/{idx}/quantity"),
                    format!(
                        "{} quantities for {} food items",
                        meal.quantity.len(),
                        meal.food_items.len()
                    ),
                )
            })
            .collect()
    }
}

impl StructuredValidator for RecommendationResult {
    fn validate_fields(&self) -> Vec<FieldIssue> {
        let mut issues = Vec::new();
        for (idx, dish) in self.recommendations.iter().enumerate() {
            if dish.dish_name.trim().is_empty() {
                issues.push(FieldIssue::new(
                    format!("/recommendations/{idx}/dishName"),
                    "dish name is blank",
                ));
            }
            if dish.health_recommendation.trim().is_empty() {
                issues.push(FieldIssue::new(
                    format!("/recommendations/{idx}/healthRecommendation"),
                    "health recommendation is blank",
                ));
            }
        }
        issues
    }
}

/// Profile and ingredient sets in, feedback and dish suggestions out.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersonalizedRecommendationsFlow;

impl Flow for PersonalizedRecommendationsFlow {
    const NAME: &'static str = FLOW_NAME;
    type Input = PersonalizedRecommendationsInput;
    type Output = RecommendationResult;

    fn compile_prompt(input: &Self::Input) -> Result<CompiledPrompt> {
        Ok(recommendation_prompt(input))
    }
}
