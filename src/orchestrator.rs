//! High-level operations the meal-logging UI calls.

use std::collections::HashSet;

use tracing::{info, instrument, warn};

use crate::{
    client::FlowClient,
    error::{PipelineError, Result},
    flows::{
        IdentifyFoodItemsFlow, IdentifyFoodItemsInput, PersonalizedRecommendationsFlow,
        PersonalizedRecommendationsInput,
    },
    models::{FoodItem, LoggedMeal, RecommendationResult, UserProfile},
    selection::MealSelection,
    store::MealStore,
};

/// Identification and recommendation entry points over a [`FlowClient`].
///
/// Holds no mutable state; clones share the client.
#[derive(Clone)]
pub struct NutritionAdvisor {
    client: FlowClient,
}

impl NutritionAdvisor {
    pub fn new(client: FlowClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &FlowClient {
        &self.client
    }

    /// Identify the food in a photo and return draft items awaiting quantities.
    ///
    /// Names keep the model's spelling and order; only exact repeats are dropped.
    /// A photo with no recognizable food yields an empty list.
    #[instrument(skip_all)]
    pub async fn identify_food_items(&self, photo_data_uri: &str) -> Result<Vec<FoodItem>> {
        let input = IdentifyFoodItemsInput::new(photo_data_uri);
        let identified = self.client.run::<IdentifyFoodItemsFlow>(&input).await?;

        let mut seen = HashSet::new();
        let drafts: Vec<FoodItem> = identified
            .food_items
            .iter()
            .filter(|name| seen.insert(*name))
            .map(|name| FoodItem::draft(name.clone()))
            .collect();

        if drafts.len() < identified.food_items.len() {
            info!(
                returned = identified.food_items.len(),
                distinct = drafts.len(),
                "Dropped duplicate food names"
            );
        }
        Ok(drafts)
    }

    /// Ask for feedback and dish suggestions based on the profile and the chosen meals.
    ///
    /// Fails with `ProfileIncomplete` without contacting the backend when age,
    /// height or weight is missing or not positive. The flow's result is
    /// returned unmodified.
    #[instrument(skip_all, fields(meals = selected_meals.len()))]
    pub async fn get_recommendations(
        &self,
        profile: &UserProfile,
        selected_meals: &[LoggedMeal],
    ) -> Result<RecommendationResult> {
        let input = match PersonalizedRecommendationsInput::new(profile, selected_meals) {
            Ok(input) => input,
            Err(err) => {
                warn!(error = %err, "Recommendation request not sent");
                return Err(err);
            }
        };
        let result = self
            .client
            .run::<PersonalizedRecommendationsFlow>(&input)
            .await?;
        info!(
            dishes = result.recommendations.len(),
            "Received recommendations"
        );
        Ok(result)
    }

    /// Read the profile and meals from `store`, resolve `selection` and recommend.
    ///
    /// The store is only read and the selection is left untouched.
    pub async fn recommend_from_store(
        &self,
        store: &dyn MealStore,
        selection: &MealSelection,
    ) -> Result<RecommendationResult> {
        let profile = store.read_profile().await?.ok_or_else(|| {
            PipelineError::ProfileIncomplete {
                missing: UserProfile::default().missing_measurements(),
            }
        })?;
        let meals = store.list_meals().await?;
        let selected = selection.resolve(&meals);
        self.get_recommendations(&profile, &selected).await
    }
}
