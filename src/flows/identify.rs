use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    error::{FieldIssue, Result},
    media::{check_data_uri, PhotoDataUri, PHOTO_FIELD},
    prompt::{identification_prompt, CompiledPrompt},
    schema::StructuredValidator,
};

use super::Flow;

pub const FLOW_NAME: &str = "identifyFoodItems";

/// Request of the identification flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyFoodItemsInput {
    /// A photo of a meal, as a data URI that must include a MIME type and use Base64 encoding.
    /// Expected format: 'data:<mimetype>;base64,<encoded_data>'.
    #[schemars(regex(
        pattern = r"^data:[A-Za-z0-9.+-]+/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/]+={0,2}$"
    ))]
    pub photo_data_uri: String,
}

impl IdentifyFoodItemsInput {
    pub fn new(photo_data_uri: impl Into<String>) -> Self {
        Self {
            photo_data_uri: photo_data_uri.into(),
        }
    }
}

impl From<&PhotoDataUri> for IdentifyFoodItemsInput {
    fn from(photo: &PhotoDataUri) -> Self {
        Self::new(photo.as_str())
    }
}

impl StructuredValidator for IdentifyFoodItemsInput {
    fn validate_fields(&self) -> Vec<FieldIssue> {
        match check_data_uri(&self.photo_data_uri) {
            Ok(_) => Vec::new(),
            Err(reason) => vec![FieldIssue::new(PHOTO_FIELD, reason)],
        }
    }
}

/// Reply of the identification flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiedFoodItems {
    /// A list of identified food items in the image.
    pub food_items: Vec<String>,
}

impl StructuredValidator for IdentifiedFoodItems {
    fn validate_fields(&self) -> Vec<FieldIssue> {
        self.food_items
            .iter()
            .enumerate()
            .filter(|(_, name)| name.trim().is_empty())
            .map(|(idx, _)| FieldIssue::new(format!("/foodItems/{idx}"), "food item name is blank"))
            .collect()
    }
}

/// Photo in, list of food names out.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentifyFoodItemsFlow;

impl Flow for IdentifyFoodItemsFlow {
    const NAME: &'static str = FLOW_NAME;
    type Input = IdentifyFoodItemsInput;
    type Output = IdentifiedFoodItems;

    fn compile_prompt(input: &Self::Input) -> Result<CompiledPrompt> {
        identification_prompt(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::PipelineError,
        schema::{check_request, coerce_response, model_schema},
    };

    #[test]
    fn request_schema_rejects_non_data_uris() {
        let err = check_request(FLOW_NAME, &IdentifyFoodItemsInput::new("https://x/meal.png"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequestShape { flow: FLOW_NAME, .. }));
        assert_eq!(err.field_issues()[0].path, PHOTO_FIELD);
    }

    #[test]
    fn long_payload_stays_out_of_the_issue_reason() {
        let uri = format!("data:image/png;base64,{}*", "A".repeat(4000));
        let err = check_request(FLOW_NAME, &IdentifyFoodItemsInput::new(uri)).unwrap_err();

        let issue = &err.field_issues()[0];
        assert_eq!(issue.path, PHOTO_FIELD);
        assert!(issue.reason.contains("does not match"), "{}", issue.reason);
        assert!(!issue.reason.contains("AAAAAAAA"));
        assert!(!err.to_string().contains("AAAAAAAA"));
    }

    #[test]
    fn request_schema_accepts_valid_photo() {
        let value = check_request(
            FLOW_NAME,
            &IdentifyFoodItemsInput::new("data:image/jpeg;base64,/9j/4AAQ"),
        )
        .unwrap();
        assert_eq!(value["photoDataUri"], "data:image/jpeg;base64,/9j/4AAQ");
    }

    #[test]
    fn reply_schema_is_a_string_array() {
        let schema = model_schema::<IdentifiedFoodItems>();
        assert_eq!(schema["properties"]["foodItems"]["type"], "array");
        assert_eq!(schema["properties"]["foodItems"]["items"]["type"], "string");
        assert_eq!(schema["required"][0], "foodItems");
    }

    #[test]
    fn blank_names_fail_coercion() {
        let err = coerce_response::<IdentifiedFoodItems>(FLOW_NAME, r#"{"foodItems": ["rice", " "]}"#)
            .unwrap_err();
        assert_eq!(err.field_issues()[0].path, "/foodItems/1");

        let empty: IdentifiedFoodItems =
            coerce_response(FLOW_NAME, r#"{"foodItems": []}"#).unwrap();
        assert!(empty.food_items.is_empty());
    }

    #[test]
    fn comma_string_is_not_coerced_into_a_list() {
        let err = coerce_response::<IdentifiedFoodItems>(FLOW_NAME, r#"{"foodItems": "rice, beans"}"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidResponseShape { .. }));
    }
}
