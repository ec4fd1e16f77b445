use nutrisnap_flows::prelude::*;
use nutrisnap_flows::store::{MEALS_FILE, PROFILE_FILE};
use nutrisnap_flows::MealSource;

fn meal(name: &str) -> NewMeal {
    NewMeal::manual(vec![FoodItem::new(name, "1 serving")]).unwrap()
}

#[tokio::test]
async fn test_file_store_lists_most_recent_first_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path()).await.unwrap();

    let breakfast = store.append_meal(meal("oatmeal")).await.unwrap();
    let lunch = store.append_meal(meal("salad")).await.unwrap();
    let dinner = store.append_meal(meal("curry")).await.unwrap();
    assert!(dinner.date >= lunch.date && lunch.date >= breakfast.date);

    let reopened = JsonFileStore::open(dir.path()).await.unwrap();
    let ids: Vec<_> = reopened
        .list_meals()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec![dinner.id, lunch.id, breakfast.id]);
}

#[tokio::test]
async fn test_profile_persists_as_camel_case_json() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path()).await.unwrap();
    assert!(store.read_profile().await.unwrap().is_none());

    let profile = UserProfile::new("Ada")
        .with_age(30.0)
        .with_height(170.0)
        .with_dietary_preferences("vegan");
    store.write_profile(&profile).await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join(PROFILE_FILE)).unwrap()).unwrap();
    assert_eq!(raw["dietaryPreferences"], "vegan");
    assert!(raw["weight"].is_null());

    let reopened = JsonFileStore::open(dir.path()).await.unwrap();
    assert_eq!(reopened.read_profile().await.unwrap(), Some(profile));
}

#[tokio::test]
async fn test_delete_and_prune_selection() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path()).await.unwrap();
    let kept = store.append_meal(meal("rice")).await.unwrap();
    let removed = store.append_meal(meal("beans")).await.unwrap();

    let mut selection: MealSelection = [kept.id.clone(), removed.id.clone()].into_iter().collect();
    assert!(store.delete_meal(&removed.id).await.unwrap());
    assert!(!store.delete_meal(&removed.id).await.unwrap());

    let meals = store.list_meals().await.unwrap();
    assert_eq!(selection.resolve(&meals), vec![kept.clone()]);
    assert_eq!(selection.len(), 2);

    selection.retain_existing(&meals);
    assert_eq!(selection.len(), 1);
    assert!(selection.contains(&kept.id));
}

#[tokio::test]
async fn test_stored_meal_format() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path()).await.unwrap();
    let logged = store.append_meal(meal("rice")).await.unwrap();
    assert_eq!(logged.source, MealSource::Manual);
    assert!(uuid_like(&logged.id));

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join(MEALS_FILE)).unwrap()).unwrap();
    assert_eq!(raw[0]["source"], "manual");
    assert_eq!(raw[0]["foodItems"][0]["name"], "rice");
    assert_eq!(raw[0]["imageHint"], "various food items");
    assert!(raw[0].get("imageUrl").is_none());
}

fn uuid_like(id: &str) -> bool {
    id.len() == 36 && id.chars().filter(|c| *c == '-').count() == 4
}

#[tokio::test]
async fn test_concurrent_appends_are_all_kept() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path()).await.unwrap();

    let appends = (0..8).map(|i| {
        let store = store.clone();
        async move { store.append_meal(meal(&format!("snack {i}"))).await }
    });
    let results = futures::future::join_all(appends).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(store.list_meals().await.unwrap().len(), 8);
}
