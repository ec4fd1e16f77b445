//! Persistence for the profile and the meal log.
//!
//! Meals are immutable once appended; they can only be deleted. Listing is
//! most-recent-first.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    error::{Result, ResultExt},
    models::{LoggedMeal, NewMeal, UserProfile},
};

pub const PROFILE_FILE: &str = "profile.json";
pub const MEALS_FILE: &str = "meals.json";

#[async_trait]
pub trait MealStore: Send + Sync {
    async fn read_profile(&self) -> Result<Option<UserProfile>>;

    async fn write_profile(&self, profile: &UserProfile) -> Result<()>;

    /// All meals, newest first.
    async fn list_meals(&self) -> Result<Vec<LoggedMeal>>;

    /// Persist a meal, assigning its id and timestamp.
    async fn append_meal(&self, meal: NewMeal) -> Result<LoggedMeal>;

    /// Remove a meal. Returns whether it existed.
    async fn delete_meal(&self, id: &str) -> Result<bool>;
}

fn stamp(meal: NewMeal) -> LoggedMeal {
    LoggedMeal {
        id: Uuid::new_v4().to_string(),
        date: Utc::now(),
        source: meal.source,
        food_items: meal.food_items,
        image_url: meal.image_url,
        image_hint: meal.image_hint,
    }
}

#[derive(Default)]
struct MemoryState {
    profile: Option<UserProfile>,
    /// Newest first.
    meals: Vec<LoggedMeal>,
}

/// In-process store, mostly for tests and demos.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(profile: UserProfile) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                profile: Some(profile),
                meals: Vec::new(),
            })),
        }
    }
}

#[async_trait]
impl MealStore for MemoryStore {
    async fn read_profile(&self) -> Result<Option<UserProfile>> {
        Ok(self.state.lock().await.profile.clone())
    }

    async fn write_profile(&self, profile: &UserProfile) -> Result<()> {
        self.state.lock().await.profile = Some(profile.clone());
        Ok(())
    }

    async fn list_meals(&self) -> Result<Vec<LoggedMeal>> {
        Ok(self.state.lock().await.meals.clone())
    }

    async fn append_meal(&self, meal: NewMeal) -> Result<LoggedMeal> {
        let logged = stamp(meal);
        self.state.lock().await.meals.insert(0, logged.clone());
        Ok(logged)
    }

    async fn delete_meal(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.meals.len();
        state.meals.retain(|m| m.id != id);
        Ok(state.meals.len() != before)
    }
}

/// Store backed by two JSON documents in a directory.
///
/// Writes go to a temporary file that is then renamed over the target.
#[derive(Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(format!("Failed to create store directory {}", dir.display()))?;
        info!(dir = %dir.display(), "Opened meal store");
        Ok(Self {
            dir,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_json<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>> {
        let path = self.dir.join(file);
        match fs::read(&path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(format!("Failed to parse {}", path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(format!("Failed to read {}", path.display())),
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!(".{file}.tmp"));
        let bytes = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, &bytes)
            .await
            .with_context(format!("Failed to write {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                warn!(path = %tmp.display(), error = %cleanup, "Could not remove temp file");
            }
            return Err(e).with_context(format!("Failed to replace {}", path.display()));
        }
        debug!(path = %path.display(), bytes = bytes.len(), "Wrote store file");
        Ok(())
    }

    async fn load_meals(&self) -> Result<Vec<LoggedMeal>> {
        Ok(self.read_json(MEALS_FILE).await?.unwrap_or_default())
    }
}

#[async_trait]
impl MealStore for JsonFileStore {
    async fn read_profile(&self) -> Result<Option<UserProfile>> {
        self.read_json(PROFILE_FILE).await
    }

    #[instrument(skip_all)]
    async fn write_profile(&self, profile: &UserProfile) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_json(PROFILE_FILE, profile).await
    }

    async fn list_meals(&self) -> Result<Vec<LoggedMeal>> {
        self.load_meals().await
    }

    #[instrument(skip_all, fields(source = ?meal.source))]
    async fn append_meal(&self, meal: NewMeal) -> Result<LoggedMeal> {
        let _guard = self.write_lock.lock().await;
        let mut meals = self.load_meals().await?;
        let logged = stamp(meal);
        meals.insert(0, logged.clone());
        self.write_json(MEALS_FILE, &meals).await?;
        info!(meal_id = %logged.id, total = meals.len(), "Logged meal");
        Ok(logged)
    }

    #[instrument(skip_all, fields(meal_id = id))]
    async fn delete_meal(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut meals = self.load_meals().await?;
        let before = meals.len();
        meals.retain(|m| m.id != id);
        if meals.len() == before {
            return Ok(false);
        }
        self.write_json(MEALS_FILE, &meals).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FoodItem;

    fn rice() -> NewMeal {
        NewMeal::manual(vec![FoodItem::new("rice", "1 cup")]).unwrap()
    }

    #[tokio::test]
    async fn memory_store_lists_newest_first() {
        let store = MemoryStore::new();
        let first = store.append_meal(rice()).await.unwrap();
        let second = store.append_meal(rice()).await.unwrap();
        assert_ne!(first.id, second.id);

        let ids: Vec<_> = store
            .list_meals()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);

        assert!(store.delete_meal(&first.id).await.unwrap());
        assert!(!store.delete_meal(&first.id).await.unwrap());
        assert_eq!(store.list_meals().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn memory_store_profile_round_trip() {
        let store = MemoryStore::new();
        assert!(store.read_profile().await.unwrap().is_none());
        let profile = UserProfile::new("Ada").with_age(30.0);
        store.write_profile(&profile).await.unwrap();
        assert_eq!(store.read_profile().await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let logged = store.append_meal(rice()).await.unwrap();

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list_meals().await.unwrap(), vec![logged]);
        assert!(!dir.path().join(".meals.json.tmp").exists());
    }

    #[tokio::test]
    async fn failed_replace_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let blocker = dir.path().join(PROFILE_FILE);
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"x").unwrap();

        let err = store
            .write_profile(&UserProfile::new("Ada"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Store);
        assert!(!dir.path().join(".profile.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MEALS_FILE), b"{not json").unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let err = store.list_meals().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Store);
        assert!(err.to_string().contains(MEALS_FILE));
    }
}
