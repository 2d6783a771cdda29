// Problem catalog
// Loads problem test data and starter code from problems.json

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use verdict_common::{language, Language, TestCase};

/// Ordered test data and starter code for one problem
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProblemTestData {
    pub test_cases: Vec<TestCase>,
    pub starter_code: HashMap<Language, String>,
}

impl ProblemTestData {
    pub fn stdin(&self) -> Vec<String> {
        self.test_cases.iter().map(|tc| tc.stdin.clone()).collect()
    }

    pub fn expected_outputs(&self) -> Vec<String> {
        self.test_cases.iter().map(|tc| tc.expected_output.clone()).collect()
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("problem not found: {0}")]
    NotFound(String),

    #[error("failed to read problems file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse problems file: {0}")]
    Parse(String),
}

#[async_trait]
pub trait ProblemCatalog: Send + Sync {
    async fn test_data(&self, problem_ref: &str) -> Result<ProblemTestData, CatalogError>;
}

#[derive(Debug, Deserialize)]
struct ProblemsFile {
    problems: Vec<ProblemEntry>,
}

#[derive(Debug, Deserialize)]
struct ProblemEntry {
    id: String,
    test_cases: Vec<TestCase>,
    #[serde(default)]
    starter_code: HashMap<String, String>,
}

/// Read-only catalog backed by a JSON file loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct FileProblemCatalog {
    problems: HashMap<String, ProblemTestData>,
}

impl FileProblemCatalog {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let content = fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_json(&content)?;
        info!(
            path = %path.as_ref().display(),
            problems = catalog.problems.len(),
            "Problem catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        let file: ProblemsFile =
            serde_json::from_str(content).map_err(|e| CatalogError::Parse(e.to_string()))?;

        let mut problems = HashMap::new();
        for entry in file.problems {
            let mut starter_code = HashMap::new();
            for (name, code) in entry.starter_code {
                let language = language::resolve(&name).map_err(|e| {
                    CatalogError::Parse(format!("problem '{}': {}", entry.id, e))
                })?;
                starter_code.insert(language, code);
            }

            if problems.contains_key(&entry.id) {
                return Err(CatalogError::Parse(format!("duplicate problem id '{}'", entry.id)));
            }
            problems.insert(
                entry.id,
                ProblemTestData {
                    test_cases: entry.test_cases,
                    starter_code,
                },
            );
        }

        Ok(Self { problems })
    }

    pub fn problem_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.problems.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl ProblemCatalog for FileProblemCatalog {
    async fn test_data(&self, problem_ref: &str) -> Result<ProblemTestData, CatalogError> {
        self.problems
            .get(problem_ref)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(problem_ref.to_string()))
    }
}
