use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Strongly-typed language enum
/// Each variant maps to exactly one judge execution target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Go,
    Java,
    JavaScript,
    Python,
    Rust,
    TypeScript,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("unknown language: {0}")]
pub struct UnknownLanguage(pub String);

impl Language {
    /// Returns all language variants
    /// This is the single source of truth for available languages
    pub fn all_variants() -> &'static [Language] {
        &[
            Language::C,
            Language::Cpp,
            Language::Go,
            Language::Java,
            Language::JavaScript,
            Language::Python,
            Language::Rust,
            Language::TypeScript,
        ]
    }

    /// Judge0 language id for this execution target
    pub fn judge_id(self) -> u32 {
        match self {
            Language::C => 50,
            Language::Cpp => 54,
            Language::Go => 60,
            Language::Java => 62,
            Language::JavaScript => 63,
            Language::Python => 71,
            Language::Rust => 73,
            Language::TypeScript => 74,
        }
    }

    /// Human-readable name as shown in the editor language picker
    pub fn display_name(self) -> &'static str {
        match self {
            Language::C => "C",
            Language::Cpp => "C++",
            Language::Go => "Go",
            Language::Java => "Java",
            Language::JavaScript => "JavaScript",
            Language::Python => "Python",
            Language::Rust => "Rust",
            Language::TypeScript => "TypeScript",
        }
    }
}

/// Resolve a human-readable language name (case-insensitive)
pub fn resolve(name: &str) -> Result<Language, UnknownLanguage> {
    let language = match name.trim().to_lowercase().as_str() {
        "c" => Language::C,
        "cpp" | "c++" => Language::Cpp,
        "go" | "golang" => Language::Go,
        "java" => Language::Java,
        "javascript" | "js" => Language::JavaScript,
        "python" | "py" | "python3" => Language::Python,
        "rust" | "rs" => Language::Rust,
        "typescript" | "ts" => Language::TypeScript,
        _ => return Err(UnknownLanguage(name.to_string())),
    };
    Ok(language)
}

impl std::str::FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        resolve(s)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Go => "go",
            Language::Java => "java",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
        };
        f.write_str(name)
    }
}
