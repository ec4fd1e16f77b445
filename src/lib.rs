//! Structured model flows for the NutriSnap meal log.
//!
//! Two flows sit behind schema validation on both boundaries: food
//! identification from a meal photo, and personalized dish recommendations from
//! a profile plus selected meals. Requests that fail their schema are never
//! sent; replies that fail theirs are rejected whole.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use nutrisnap_flows::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let client = FlowClientBuilder::from_env()?.build()?;
//!     let advisor = NutritionAdvisor::new(client);
//!
//!     let profile = UserProfile::new("Ada")
//!         .with_age(30.0)
//!         .with_height(170.0)
//!         .with_weight(65.0)
//!         .with_dietary_preferences("vegetarian");
//!     let result = advisor.get_recommendations(&profile, &[]).await?;
//!
//!     println!("{}", result.feedback);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod client;
pub mod error;
pub mod flows;
pub mod media;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod schema;
pub mod selection;
pub mod store;

pub use backend::{
    BackendReply, BackendRequest, GeminiBackend, MockBackend, MockHandler, MockRequest,
    ModelBackend, TokenUsage,
};
pub use client::{ClientConfig, FlowClient, FlowClientBuilder};
pub use error::{ErrorKind, FieldIssue, PipelineError, Result, ResultExt};
pub use flows::{
    Flow, IdentifiedFoodItems, IdentifyFoodItemsFlow, IdentifyFoodItemsInput, IngredientSet,
    PersonalizedRecommendationsFlow, PersonalizedRecommendationsInput, ProfileSnapshot,
};
pub use media::PhotoDataUri;
pub use models::{
    FoodItem, GenerationOutcome, LoggedMeal, MealSource, NewMeal, ProfileField,
    RecommendationResult, RecommendedDish, UserProfile,
};
pub use orchestrator::NutritionAdvisor;
pub use prompt::{CompiledPrompt, PromptBuilder, PromptPart};
pub use schema::{model_schema, schema_hash, StructuredValidator};
pub use selection::MealSelection;
pub use store::{JsonFileStore, MealStore, MemoryStore};

/// Prelude module for convenient imports.
///
/// ```rust
/// use nutrisnap_flows::prelude::*;
/// ```
pub mod prelude {
    pub use crate::backend::{MockBackend, MockHandler, MockRequest, ModelBackend};
    pub use crate::client::{ClientConfig, FlowClient, FlowClientBuilder};
    pub use crate::error::{ErrorKind, FieldIssue, PipelineError, Result};
    pub use crate::flows::{Flow, IdentifyFoodItemsFlow, PersonalizedRecommendationsFlow};
    pub use crate::media::PhotoDataUri;
    pub use crate::models::{
        FoodItem, GenerationOutcome, LoggedMeal, NewMeal, RecommendationResult, RecommendedDish,
        UserProfile,
    };
    pub use crate::orchestrator::NutritionAdvisor;
    pub use crate::selection::MealSelection;
    pub use crate::store::{JsonFileStore, MealStore, MemoryStore};
}
