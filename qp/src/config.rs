//! quizpipe configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main quizpipe configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database and progress file locations
    pub storage: StorageConfig,

    /// External stage commands
    pub stages: StagesConfig,

    /// Job behaviour
    pub jobs: JobsConfig,

    /// Dialog defaults
    pub dialog: DialogConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        for (name, stage) in [("extraction", &self.stages.extraction), ("generation", &self.stages.generation)] {
            if stage.program.trim().is_empty() {
                return Err(eyre::eyre!("stages.{}.program must not be empty", name));
            }
        }
        if self.storage.db_path.trim().is_empty() {
            return Err(eyre::eyre!("storage.db-path must not be empty"));
        }
        if self.storage.progress_dir.trim().is_empty() {
            return Err(eyre::eyre!("storage.progress-dir must not be empty"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .quizpipe.yml
        let local_config = PathBuf::from(".quizpipe.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/quizpipe/quizpipe.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("quizpipe").join("quizpipe.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Resolve a leading `~/` against the home directory
fn expand(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database shared with the stage processes
    #[serde(rename = "db-path")]
    pub db_path: String,

    /// Directory holding one progress file per job
    #[serde(rename = "progress-dir")]
    pub progress_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/quizpipe on Linux)
        let base = dirs::data_dir()
            .map(|d| d.join("quizpipe"))
            .unwrap_or_else(|| PathBuf::from(".quizpipe"));

        Self {
            db_path: base.join("quizpipe.db").to_string_lossy().into_owned(),
            progress_dir: base.join("progress").to_string_lossy().into_owned(),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        expand(&self.db_path)
    }

    pub fn progress_dir(&self) -> PathBuf {
        expand(&self.progress_dir)
    }
}

/// Both pipeline stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    /// OCR + speech recognition
    pub extraction: StageConfig,

    /// Question generation
    pub generation: StageConfig,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            extraction: StageConfig::python("processor/worker.py"),
            generation: StageConfig::python("processor/makeQA.py"),
        }
    }
}

/// Command line of one external stage
///
/// The orchestrator appends the job parameters (`--db`, `--user-id`, ...) to
/// `args`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub program: String,

    pub args: Vec<String>,

    /// Extra environment, e.g. `WHISPER_REPO`, `OLLAMA_URL`, `QG_MODEL`
    pub env: BTreeMap<String, String>,
}

impl StageConfig {
    fn python(script: &str) -> Self {
        Self {
            program: "python3".to_string(),
            args: vec![script.to_string()],
            env: BTreeMap::new(),
        }
    }
}

/// What starting a job does when the conversation's previous job is still running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnActiveJob {
    /// Start the new job and leave the old one running
    #[default]
    Supersede,
    /// Refuse to start a new job
    Reject,
    /// Kill the old job's stage process, then start the new job
    Cancel,
}

/// Job configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    #[serde(rename = "on-active-job")]
    pub on_active_job: OnActiveJob,

    /// Per-stage timeout in milliseconds (0 = none)
    #[serde(rename = "stage-timeout-ms")]
    pub stage_timeout_ms: u64,
}

impl JobsConfig {
    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_ms > 0).then(|| Duration::from_millis(self.stage_timeout_ms))
    }
}

/// Dialog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogConfig {
    /// Course label used when neither the conversation nor the document has one
    #[serde(rename = "default-course")]
    pub default_course: String,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            default_course: "default".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.stages.extraction.program, "python3");
        assert_eq!(config.stages.extraction.args, vec!["processor/worker.py"]);
        assert_eq!(config.stages.generation.args, vec!["processor/makeQA.py"]);
        assert_eq!(config.jobs.on_active_job, OnActiveJob::Supersede);
        assert_eq!(config.jobs.stage_timeout(), None);
        assert!(config.storage.db_path.ends_with("quizpipe.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
storage:
  db-path: /srv/quiz/app.db
  progress-dir: /srv/quiz/progress

stages:
  extraction:
    program: /opt/venv/bin/python
    args: [processor/worker.py]
    env:
      WHISPER_REPO: kotoba-tech/kotoba-whisper-v2.0
  generation:
    program: /opt/venv/bin/python
    args: [processor/makeQA.py]
    env:
      OLLAMA_URL: http://localhost:11434
      QG_MODEL: qwen2.5

jobs:
  on-active-job: cancel
  stage-timeout-ms: 3600000

dialog:
  default-course: physics
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.storage.db_path(), PathBuf::from("/srv/quiz/app.db"));
        assert_eq!(config.stages.extraction.env["WHISPER_REPO"], "kotoba-tech/kotoba-whisper-v2.0");
        assert_eq!(config.stages.generation.env.len(), 2);
        assert_eq!(config.jobs.on_active_job, OnActiveJob::Cancel);
        assert_eq!(config.jobs.stage_timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(config.dialog.default_course, "physics");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
jobs:
  on-active-job: reject
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.jobs.on_active_job, OnActiveJob::Reject);

        // Defaults for unspecified
        assert_eq!(config.stages.generation.program, "python3");
        assert_eq!(config.dialog.default_course, "default");
    }

    #[test]
    fn test_validate_rejects_empty_program() {
        let mut config = Config::default();
        config.stages.generation.program = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("qp.yml");
        fs::write(&path, "dialog:\n  default-course: biology\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.dialog.default_course, "biology");

        let missing = temp.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand("~/data/qp.db"), home.join("data/qp.db"));
        }
        assert_eq!(expand("/abs/qp.db"), PathBuf::from("/abs/qp.db"));
    }
}
