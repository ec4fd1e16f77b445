//! Example: Personalized dish suggestions from a persisted meal log.
//!
//! The first run seeds a profile and two meals under `./nutrisnap-data`.
//!
//! Run with: `GEMINI_API_KEY=... cargo run --example recommendations`

use nutrisnap_flows::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = JsonFileStore::open("nutrisnap-data").await?;
    if store.read_profile().await?.is_none() {
        let profile = UserProfile::new("Ada")
            .with_age(30.0)
            .with_height(170.0)
            .with_weight(65.0)
            .with_dietary_preferences("vegetarian");
        if let Err(issues) = profile.validate_form() {
            for issue in issues {
                eprintln!("{issue}");
            }
            return Ok(());
        }
        store.write_profile(&profile).await?;

        for items in [
            vec![FoodItem::new("rice", "1 cup"), FoodItem::new("black beans", "0.5 cup")],
            vec![FoodItem::new("spinach", "2 cups"), FoodItem::new("feta", "30 g")],
        ] {
            let meal = NewMeal::manual(items).expect("seed meals are complete");
            store.append_meal(meal).await?;
        }
    }

    let meals = store.list_meals().await?;
    let selection: MealSelection = meals.iter().map(|m| m.id.clone()).collect();
    println!("Using {} logged meal(s) as ingredients", selection.len());

    let advisor = NutritionAdvisor::new(FlowClientBuilder::from_env()?.build()?);
    match advisor.recommend_from_store(&store, &selection).await {
        Ok(result) => {
            println!("Feedback: {}", result.feedback);
            if !result.has_suggestions() {
                println!("No dish suggestions for this selection.");
            }
            for dish in result.recommendations {
                println!(
                    "- {} (~{} kcal)\n  {}",
                    dish.dish_name, dish.calories, dish.health_recommendation
                );
            }
        }
        Err(err) if err.is_retryable() => {
            eprintln!("Backend unavailable, try again later: {err}");
            if let Some(secs) = err.retry_delay() {
                eprintln!("Suggested wait: {secs}s");
            }
        }
        Err(err) => return Err(err),
    }
    Ok(())
}
