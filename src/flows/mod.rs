//! Named flows: each pairs a request schema, a prompt template and a reply schema.

pub mod identify;
pub mod recommend;

use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Serialize};

use crate::{error::Result, prompt::CompiledPrompt, schema::StructuredValidator};

pub use identify::{IdentifiedFoodItems, IdentifyFoodItemsFlow, IdentifyFoodItemsInput};
pub use recommend::{
    IngredientSet, PersonalizedRecommendationsFlow, PersonalizedRecommendationsInput,
    ProfileSnapshot,
};

/// A structured generation contract.
///
/// The input is validated against its schema before the prompt is compiled, and
/// the reply is coerced into `Output` or rejected.
pub trait Flow: Send + Sync + 'static {
    /// Stable name used in errors and logs.
    const NAME: &'static str;

    type Input: Serialize + JsonSchema + StructuredValidator + Send + Sync;
    type Output: DeserializeOwned + JsonSchema + StructuredValidator + Send;

    fn compile_prompt(input: &Self::Input) -> Result<CompiledPrompt>;
}
