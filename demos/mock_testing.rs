//! Example: Offline-friendly mocking.
//!
//! Runs both flows against a mock backend so no network calls are made.
//!
//! Run with: `cargo run --example mock_testing`

use nutrisnap_flows::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nutrisnap_flows=debug".into()),
        )
        .init();

    // No API key needed because the mock handler short-circuits the request.
    let client = FlowClientBuilder::default()
        .with_mock(|req: MockRequest| match req.flow {
            "identifyFoodItems" => Ok(r#"{"foodItems": ["rice", "black beans", "Rice"]}"#.to_string()),
            "personalizedRecommendations" => Ok(r#"{
                    "recommendations": [
                        {"dishName": "Rice and Bean Bowl", "calories": 450,
                         "healthRecommendation": "Complete vegetarian protein."}
                    ],
                    "feedback": "Only one dish fits the selected ingredients."
                }"#
            .to_string()),
            other => Err(PipelineError::Config(format!("Unexpected mock flow: {other}"))),
        })
        .build()?;
    let advisor = NutritionAdvisor::new(client);
    let store = MemoryStore::with_profile(
        UserProfile::new("Ada")
            .with_age(30.0)
            .with_height(170.0)
            .with_weight(65.0)
            .with_dietary_preferences("vegetarian"),
    );

    let photo = PhotoDataUri::from_bytes(b"pretend this is a jpeg", "image/jpeg")
        .map_err(|issue| PipelineError::Config(issue.to_string()))?;
    let mut drafts = advisor.identify_food_items(photo.as_str()).await?;
    println!("Identified {} distinct items", drafts.len());
    for draft in &mut drafts {
        draft.quantity = "1 cup".to_string();
    }

    let meal = NewMeal::from_photo(drafts, &photo).map_err(|issues| {
        PipelineError::Config(format!("meal form rejected: {} issue(s)", issues.len()))
    })?;
    let logged = store.append_meal(meal).await?;

    let mut selection = MealSelection::new();
    selection.toggle(&logged.id);
    let result = advisor.recommend_from_store(&store, &selection).await?;

    println!("Feedback: {}", result.feedback);
    for dish in &result.recommendations {
        println!("- {} ({} kcal): {}", dish.dish_name, dish.calories, dish.health_recommendation);
    }
    Ok(())
}
