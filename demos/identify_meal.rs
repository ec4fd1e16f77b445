//! Example: Identify the food in a meal photo.
//!
//! Run with: `GEMINI_API_KEY=... cargo run --example identify_meal -- path/to/meal.jpg`

use nutrisnap_flows::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let path = std::env::args()
        .nth(1)
        .expect("usage: identify_meal <path-to-photo>");
    let photo = PhotoDataUri::from_path(&path).await?;
    println!("Loaded {path} as {}", photo.mime_type());

    let advisor = NutritionAdvisor::new(FlowClientBuilder::from_env()?.build()?);
    let drafts = advisor.identify_food_items(photo.as_str()).await?;

    if drafts.is_empty() {
        println!("No food recognized in the photo.");
    }
    for item in &drafts {
        println!("- {} (quantity: ?)", item.name);
    }
    Ok(())
}
