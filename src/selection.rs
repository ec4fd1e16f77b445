use std::collections::HashSet;

use crate::models::LoggedMeal;

/// Which logged meals the user has ticked for a recommendation request.
///
/// Holds ids only; [`resolve`](Self::resolve) maps them back to meals in
/// the order the log lists them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MealSelection {
    ids: HashSet<String>,
}

impl MealSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership of a meal id. Returns whether it is now selected.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    pub fn select(&mut self, id: impl Into<String>) {
        self.ids.insert(id.into());
    }

    pub fn deselect(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Selected meals in log order. Ids with no matching meal are skipped.
    pub fn resolve(&self, meals: &[LoggedMeal]) -> Vec<LoggedMeal> {
        meals
            .iter()
            .filter(|m| self.ids.contains(&m.id))
            .cloned()
            .collect()
    }

    /// Forget ids that no longer exist, e.g. after a meal is deleted.
    pub fn retain_existing(&mut self, meals: &[LoggedMeal]) {
        let live: HashSet<&str> = meals.iter().map(|m| m.id.as_str()).collect();
        self.ids.retain(|id| live.contains(id.as_str()));
    }
}

impl<S: Into<String>> FromIterator<S> for MealSelection {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}
