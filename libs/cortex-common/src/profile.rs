// Language profiles: how each supported language is staged and run
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::types::Language;

/// Where the submitted source replaces a template file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceLayout {
    /// Main file lives under a fixed directory relative to the project root
    /// (`src/main/java`, `src`).
    Conventional { source_dir: String },
    /// Main file is anywhere in the project root.
    Flat,
}

/// Tooling files shared between exercises of a track and stored above the
/// exercise directory rather than inside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedConfig {
    /// How many directories above the exercise path the files live
    pub levels_up: usize,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LanguageProfile {
    pub name: Language,
    pub image: String,
    /// Shell command run inside the container from the project root
    pub execute_command: String,
    pub file_extension: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub timeout_ms: u64,
    /// Build descriptor marking the project root; `None` means the workspace root
    #[serde(default)]
    pub build_descriptor: Option<String>,
    pub source_layout: SourceLayout,
    #[serde(default)]
    pub shared_config: Option<SharedConfig>,
}

impl LanguageProfile {
    pub fn memory_limit_bytes(&self) -> i64 {
        i64::from(self.memory_limit_mb) * 1024 * 1024
    }

    pub fn nano_cpus(&self) -> i64 {
        (f64::from(self.cpu_limit) * 1_000_000_000.0) as i64
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.image.trim().is_empty() {
            return Err(EngineError::Config(format!("{}: image must be set", self.name)));
        }
        if self.execute_command.trim().is_empty() {
            return Err(EngineError::Config(format!(
                "{}: execute_command must be set",
                self.name
            )));
        }
        if self.memory_limit_mb == 0 || self.timeout_ms == 0 || self.cpu_limit <= 0.0 {
            return Err(EngineError::Config(format!(
                "{}: memory, cpu and timeout limits must be positive",
                self.name
            )));
        }
        if !self.file_extension.starts_with('.') {
            return Err(EngineError::Config(format!(
                "{}: file_extension must start with '.'",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageProfile>,
}

/// Registry of language profiles loaded from `languages.json`.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: HashMap<Language, LanguageProfile>,
}

impl ProfileRegistry {
    pub fn new(profiles: Vec<LanguageProfile>) -> EngineResult<Self> {
        let mut map = HashMap::new();
        for profile in profiles {
            profile.validate()?;
            let name = profile.name;
            if map.insert(name, profile).is_some() {
                return Err(EngineError::Config(format!(
                    "Duplicate profile for language: {}",
                    name
                )));
            }
        }
        Ok(Self { profiles: map })
    }

    /// Load profiles from a JSON file
    pub fn load(config_path: &Path) -> EngineResult<Self> {
        if !config_path.exists() {
            return Err(EngineError::Config(format!(
                "Language config file not found: {}",
                config_path.display()
            )));
        }

        let content = fs::read_to_string(config_path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> EngineResult<Self> {
        let parsed: LanguagesJson = serde_json::from_str(content)
            .map_err(|e| EngineError::Config(format!("Failed to parse languages.json: {}", e)))?;
        Self::new(parsed.languages)
    }

    /// Default profile set, matching `config/languages.json`.
    pub fn builtin() -> Self {
        let ts_shared = [
            "package.json",
            "pnpm-lock.yaml",
            "tsconfig.json",
            "vitest.config.ts",
            "biome.json",
        ];

        let profiles = vec![
            LanguageProfile {
                name: Language::Python,
                image: "python:3.12-slim".to_string(),
                execute_command: "python $(find /code -name '*.py' ! -name '*_test.py' ! -name 'test_*.py' | head -n 1) && python -m unittest discover -v -s /code -p '*test*.py'".to_string(),
                file_extension: ".py".to_string(),
                memory_limit_mb: 128,
                cpu_limit: 1.0,
                timeout_ms: 30_000,
                build_descriptor: None,
                source_layout: SourceLayout::Flat,
                shared_config: None,
            },
            LanguageProfile {
                name: Language::Java,
                image: "maven:3.9.9-eclipse-temurin-21".to_string(),
                execute_command: "cd /code && mvn test -B -Dsurefire.useFile=false -DtrimStackTrace=true".to_string(),
                file_extension: ".java".to_string(),
                memory_limit_mb: 512,
                cpu_limit: 1.0,
                timeout_ms: 60_000,
                build_descriptor: Some("pom.xml".to_string()),
                source_layout: SourceLayout::Conventional {
                    source_dir: "src/main/java".to_string(),
                },
                shared_config: None,
            },
            LanguageProfile {
                name: Language::TypeScript,
                image: "cortex-typescript-exercises:latest".to_string(),
                execute_command: "cd /code && pnpm install --prefer-offline && pnpm vitest run --reporter=verbose".to_string(),
                file_extension: ".ts".to_string(),
                memory_limit_mb: 1024,
                cpu_limit: 1.0,
                timeout_ms: 180_000,
                build_descriptor: Some("package.json".to_string()),
                source_layout: SourceLayout::Flat,
                shared_config: Some(SharedConfig {
                    levels_up: 2,
                    files: ts_shared.iter().map(|f| f.to_string()).collect(),
                }),
            },
            LanguageProfile {
                name: Language::Rust,
                image: "rust:1.80-slim".to_string(),
                execute_command: "cd /code && cargo test".to_string(),
                file_extension: ".rs".to_string(),
                memory_limit_mb: 256,
                cpu_limit: 1.0,
                timeout_ms: 30_000,
                build_descriptor: Some("Cargo.toml".to_string()),
                source_layout: SourceLayout::Conventional {
                    source_dir: "src".to_string(),
                },
                shared_config: None,
            },
            LanguageProfile {
                name: Language::Go,
                image: "golang:1.23-bookworm".to_string(),
                execute_command: "cd /code && go mod tidy && go test -v ./...".to_string(),
                file_extension: ".go".to_string(),
                memory_limit_mb: 512,
                cpu_limit: 2.0,
                timeout_ms: 30_000,
                build_descriptor: Some("go.mod".to_string()),
                source_layout: SourceLayout::Flat,
                shared_config: None,
            },
        ];

        let profiles = profiles.into_iter().map(|p| (p.name, p)).collect();
        Self { profiles }
    }

    /// Profile for a language, or `UnsupportedLanguage` if none is registered
    pub fn get(&self, language: Language) -> EngineResult<&LanguageProfile> {
        self.profiles
            .get(&language)
            .ok_or_else(|| EngineError::UnsupportedLanguage(language.to_string()))
    }

    pub fn supports(&self, language: Language) -> bool {
        self.profiles.contains_key(&language)
    }

    /// Registered languages in a stable order
    pub fn languages(&self) -> Vec<Language> {
        let mut langs: Vec<Language> = self.profiles.keys().copied().collect();
        langs.sort_by_key(|l| l.to_string());
        langs
    }
}
