// Exercise catalog: maps exercise ids to template directories on disk
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::types::Language;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exercise {
    pub id: i64,
    pub title: String,
    pub language: Language,
    /// Template directory relative to the exercises root
    pub path: String,
}

#[async_trait]
pub trait ExerciseRepository: Send + Sync {
    async fn find(&self, exercise_id: i64) -> EngineResult<Option<Exercise>>;
}

#[derive(Debug, Deserialize)]
struct ExercisesJson {
    exercises: Vec<Exercise>,
}

/// File-backed catalog loaded once at start-up.
#[derive(Debug, Clone, Default)]
pub struct ExerciseCatalog {
    exercises: HashMap<i64, Exercise>,
}

impl ExerciseCatalog {
    pub fn new(exercises: Vec<Exercise>) -> EngineResult<Self> {
        let mut map = HashMap::new();
        for exercise in exercises {
            if exercise.path.trim().is_empty() || Path::new(&exercise.path).is_absolute() {
                return Err(EngineError::Config(format!(
                    "Exercise {} must have a relative path",
                    exercise.id
                )));
            }
            let id = exercise.id;
            if map.insert(id, exercise).is_some() {
                return Err(EngineError::Config(format!("Duplicate exercise id: {}", id)));
            }
        }
        Ok(Self { exercises: map })
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Err(EngineError::Config(format!(
                "Exercise catalog not found: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        let parsed: ExercisesJson = serde_json::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse exercise catalog: {}", e)))?;
        Self::new(parsed.exercises)
    }

    /// Exercises sorted by id
    pub fn all(&self) -> Vec<&Exercise> {
        let mut all: Vec<&Exercise> = self.exercises.values().collect();
        all.sort_by_key(|e| e.id);
        all
    }
}

#[async_trait]
impl ExerciseRepository for ExerciseCatalog {
    async fn find(&self, exercise_id: i64) -> EngineResult<Option<Exercise>> {
        Ok(self.exercises.get(&exercise_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(id: i64, path: &str) -> Exercise {
        Exercise {
            id,
            title: format!("Exercise {}", id),
            language: Language::Go,
            path: path.to_string(),
        }
    }

    #[tokio::test]
    async fn test_find() {
        let catalog = ExerciseCatalog::new(vec![exercise(1, "go/hello-world")]).unwrap();
        assert_eq!(
            catalog.find(1).await.unwrap().map(|e| e.path),
            Some("go/hello-world".to_string())
        );
        assert!(catalog.find(2).await.unwrap().is_none());
    }

    #[test]
    fn test_rejects_absolute_and_duplicate_paths() {
        assert!(ExerciseCatalog::new(vec![exercise(1, "/etc")]).is_err());
        assert!(ExerciseCatalog::new(vec![exercise(1, "a"), exercise(1, "b")]).is_err());
    }

    #[test]
    fn test_repository_catalog_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/exercises.json");
        let catalog = ExerciseCatalog::load(&path).unwrap();
        assert!(!catalog.all().is_empty());
    }
}
