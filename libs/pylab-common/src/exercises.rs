// Exercise catalog: an immutable snapshot of exercises/<NN_category>/*.yaml
use crate::types::{EntryPoint, Submission, TestCase};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub title: String,
    pub description: String,
    pub template: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub hints: Vec<String>,
    pub tests: Vec<TestCase>,
    /// Category directory name, filled in by the loader
    #[serde(default)]
    pub category: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data_files: Vec<String>,
    /// Function the tests call; last top-level function when absent
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// `data_files:` with no value means no files
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Exercise {
    pub fn entry_point(&self) -> EntryPoint {
        EntryPoint::from_declared(self.entry_point.as_deref())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Package learner code together with what this exercise declares
    pub fn submission(&self, code: impl Into<String>) -> Submission {
        Submission::new(code)
            .with_data_files(self.data_files.clone())
            .with_entry_point(self.entry_point())
    }

    /// Copy safe to send to learners: hidden tests keep only their description
    pub fn public_view(&self) -> Exercise {
        Exercise {
            tests: self.tests.iter().map(TestCase::public_view).collect(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub exercises: Vec<Exercise>,
}

impl Category {
    pub fn public_view(&self) -> Category {
        Category {
            name: self.name.clone(),
            exercises: self.exercises.iter().map(Exercise::public_view).collect(),
        }
    }
}

/// `01_bases` -> `bases`; names without an underscore are kept as is
pub fn display_name(dir_name: &str) -> &str {
    match dir_name.split_once('_') {
        Some((_, rest)) => rest,
        None => dir_name,
    }
}

/// Read-only view of every exercise, built once and swapped as a whole on reload
#[derive(Debug, Clone, Default)]
pub struct ExerciseCatalog {
    root: PathBuf,
    categories: Vec<Category>,
    index: HashMap<String, (usize, usize)>,
}

impl ExerciseCatalog {
    /// Walk `root` in sorted order. Broken files are skipped with a warning,
    /// a missing root yields an empty catalog.
    pub fn load(root: &Path) -> Self {
        let mut catalog = ExerciseCatalog {
            root: root.to_path_buf(),
            ..Default::default()
        };

        let category_dirs = match sorted_entries(root) {
            Ok(entries) => entries.into_iter().filter(|p| p.is_dir()).collect::<Vec<_>>(),
            Err(e) => {
                warn!(path = %root.display(), error = %e, "Exercises directory unreadable, catalog is empty");
                return catalog;
            }
        };

        for category_dir in category_dirs {
            let dir_name = match category_dir.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            let exercises = load_category(&category_dir, &dir_name);
            if exercises.is_empty() {
                debug!(category = %dir_name, "Skipping empty category");
                continue;
            }

            catalog.push_category(display_name(&dir_name).to_string(), exercises);
        }

        info!(
            path = %root.display(),
            categories = catalog.categories.len(),
            exercises = catalog.len(),
            "Exercise catalog loaded"
        );
        catalog
    }

    fn push_category(&mut self, name: String, exercises: Vec<Exercise>) {
        let category_idx = self.categories.len();
        let mut kept = Vec::with_capacity(exercises.len());

        for exercise in exercises {
            if self.index.contains_key(&exercise.id) {
                warn!(id = %exercise.id, category = %exercise.category, "Duplicate exercise id ignored");
                continue;
            }
            self.index.insert(exercise.id.clone(), (category_idx, kept.len()));
            kept.push(exercise);
        }

        self.categories.push(Category { name, exercises: kept });
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn get(&self, id: &str) -> Option<&Exercise> {
        let (category_idx, exercise_idx) = *self.index.get(id)?;
        self.categories
            .get(category_idx)
            .and_then(|c| c.exercises.get(exercise_idx))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

fn load_category(dir: &Path, dir_name: &str) -> Vec<Exercise> {
    let files = match sorted_entries(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Category directory unreadable");
            return Vec::new();
        }
    };

    files
        .into_iter()
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "yaml"))
        .filter_map(|path| match load_exercise(&path, dir_name) {
            Ok(exercise) => Some(exercise),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load exercise");
                None
            }
        })
        .collect()
}

fn load_exercise(path: &Path, category: &str) -> anyhow::Result<Exercise> {
    let content = fs::read_to_string(path)?;
    let mut exercise: Exercise = serde_yaml::from_str(&content)?;
    exercise.category = category.to_string();
    Ok(exercise)
}
