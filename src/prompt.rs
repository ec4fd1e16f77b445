//! Deterministic prompt rendering for the two flows.
//!
//! The same request always renders to byte-identical text; [`CompiledPrompt::fingerprint`]
//! makes that observable.

use sha2::{Digest, Sha256};

use crate::{
    error::{PipelineError, Result},
    flows::{identify, identify::IdentifyFoodItemsInput, recommend::PersonalizedRecommendationsInput},
    media::PhotoDataUri,
    schema::hex_digest,
};

pub const NO_FABRICATION_DIRECTIVE: &str = "DO NOT MAKE UP INFORMATION. Do not invent anything that cannot be derived from the user profile or the ingredients listed above.";

pub const INCOMPLETE_PROFILE_DIRECTIVE: &str = "If the user profile is incomplete (missing age, height, or weight) or contains nonsensical data (for example negative or wildly implausible values), use 'feedback' to ask the user to provide or correct that data, and make the 'recommendations' list empty.";

pub const NO_INGREDIENTS_DIRECTIVE: &str = "If the user profile is complete but no meals/ingredients are provided, give general recommendations based on the profile data in the 'feedback' field, state in 'feedback' that no specific dish suggestions can be made without knowing available ingredients, and keep the 'recommendations' list empty.";

pub const SPARSE_INGREDIENTS_DIRECTIVE: &str = "If meals are provided but are insufficient to create 2-3 distinct dish suggestions, suggest as many as you reasonably can and note this limitation in 'feedback'.";

pub const NO_MEALS_LINE: &str = "No meals were selected, so no ingredients are available.";

/// One piece of user content sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPart {
    Text(String),
    /// Base64 media embedded in the request body.
    InlineMedia { mime_type: String, data: String },
}

/// Rendered instruction: optional system text plus ordered user parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPrompt {
    system_instruction: Option<String>,
    parts: Vec<PromptPart>,
}

impl CompiledPrompt {
    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    pub fn parts(&self) -> &[PromptPart] {
        &self.parts
    }

    /// The text parts joined by blank lines, media omitted.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                PromptPart::Text(text) => Some(text.as_str()),
                PromptPart::InlineMedia { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn media_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, PromptPart::InlineMedia { .. }))
            .count()
    }

    /// SHA-256 over the system instruction and every part, media included.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        if let Some(system) = &self.system_instruction {
            hasher.update(b"system\0");
            hasher.update(system.as_bytes());
        }
        for part in &self.parts {
            match part {
                PromptPart::Text(text) => {
                    hasher.update(b"\0text\0");
                    hasher.update(text.as_bytes());
                }
                PromptPart::InlineMedia { mime_type, data } => {
                    hasher.update(b"\0media\0");
                    hasher.update(mime_type.as_bytes());
                    hasher.update(b"\0");
                    hasher.update(data.as_bytes());
                }
            }
        }
        hex_digest(hasher)
    }
}

/// Builder that assembles a system instruction and user parts.
#[derive(Clone, Default)]
pub struct PromptBuilder {
    system_instruction: Option<String>,
    parts: Vec<PromptPart>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn add_text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(PromptPart::Text(text.into()));
        self
    }

    pub fn add_media(self, photo: &PhotoDataUri) -> Self {
        self.add_inline_media(photo.mime_type(), photo.payload())
    }

    pub fn add_inline_media(mut self, mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        self.parts.push(PromptPart::InlineMedia {
            mime_type: mime_type.into(),
            data: data.into(),
        });
        self
    }

    pub fn build(self) -> CompiledPrompt {
        CompiledPrompt {
            system_instruction: self.system_instruction,
            parts: self.parts,
        }
    }
}

/// Prompt for listing the food items visible in a photo.
pub fn identification_prompt(input: &IdentifyFoodItemsInput) -> Result<CompiledPrompt> {
    let photo = PhotoDataUri::parse(input.photo_data_uri.as_str()).map_err(|issue| {
        PipelineError::InvalidRequestShape {
            flow: identify::FLOW_NAME,
            issues: vec![issue],
        }
    })?;

    Ok(PromptBuilder::new()
        .with_system("You are a food recognition expert.")
        .add_text(
            "Given the image of the meal, identify the food items that are present in the meal.\n\
             \n\
             Return a simple list of the food items, comma separated, as the entries of 'foodItems' \
             in the order you see them. Do not include any extra words or explanation.\n\
             \n\
             Image:",
        )
        .add_media(&photo)
        .build())
}

/// Prompt for feedback and dish suggestions from a profile and ingredient sets.
pub fn recommendation_prompt(input: &PersonalizedRecommendationsInput) -> CompiledPrompt {
    let profile = &input.user_profile;
    let mut lines = vec![
        "Based on the user's profile and selected meals (which list available ingredients), \
         provide personalized recommendations and feedback."
            .to_string(),
        String::new(),
        "User Profile:".to_string(),
        format!("- Age: {}", profile.age),
        format!("- Height: {} cm", profile.height),
        format!("- Weight: {} kg", profile.weight),
        format!("- Dietary Preferences: {}", profile.dietary_preferences),
        String::new(),
        "Selected Meals (treat these as a list of available ingredients for new dish suggestions):"
            .to_string(),
    ];

    if input.logged_meals.is_empty() {
        lines.push(NO_MEALS_LINE.to_string());
    }
    for (idx, meal) in input.logged_meals.iter().enumerate() {
        lines.push(format!("Meal {idx} (ingredients available from this log):"));
        lines.push(format!("  Foods: {}", join_or_none(&meal.food_items)));
        lines.push(format!("  Quantities: {}", join_or_none(&meal.quantity)));
    }
    if !input.logged_meals.is_empty() {
        lines.push(
            "(Focus on the food items as ingredients; the logged quantities matter less for \
             suggesting new dishes.)"
                .to_string(),
        );
    }

    lines.extend([
        String::new(),
        "Provide recommendations and feedback to help the user make informed decisions about their diet. \
         Ensure that the recommendations align with the user's dietary preferences."
            .to_string(),
        String::new(),
        "Your output must include:".to_string(),
        "1. 'feedback': General dietary feedback based on the user's profile and overall eating \
         patterns from the selected meals."
            .to_string(),
        "2. 'recommendations': A list of 2-3 specific food dishes. For each dish suggestion:".to_string(),
        "   * The dish should be primarily preparable using the ingredients from the 'Selected Meals' \
         section. You can assume common pantry staples like spices and oil are available."
            .to_string(),
        "   * 'dishName': The name of the suggested dish.".to_string(),
        "   * 'calories': The estimated calorie count for one serving of the dish, as a number (e.g. 350)."
            .to_string(),
        "   * 'healthRecommendation': Personalized advice on whether this dish is healthy for the user \
         to eat, considering their profile (age, height, weight, dietary preferences), and why."
            .to_string(),
        String::new(),
        NO_FABRICATION_DIRECTIVE.to_string(),
        INCOMPLETE_PROFILE_DIRECTIVE.to_string(),
        NO_INGREDIENTS_DIRECTIVE.to_string(),
        SPARSE_INGREDIENTS_DIRECTIVE.to_string(),
    ]);

    PromptBuilder::new()
        .with_system("You are a nutritionist providing personalized nutrition recommendations.")
        .add_text(lines.join("\n"))
        .build()
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "(none)".to_string()
    } else {
        values.join(", ")
    }
}
