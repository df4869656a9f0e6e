use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::builders::patterns::PatternRule;
use crate::builders::sets::{
    ChainedSetProvider, ConfigSetProvider, DirectorySetProvider, SetProvider,
};
use crate::builders::validator::{ConfigValidator, StandardValidator};
use crate::core::context::{TemplateContext, Value};
use crate::core::error::FilesetResult;
use crate::core::mapper::normalize_path;
use crate::core::retry::RetryPolicy;

/// Name of the project configuration file, looked up from the current
/// directory upwards.
pub const CONFIG_FILE_NAME: &str = ".fileset.toml";

/// Typed invocation settings. Every field is also a template key.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Source root of the default pipeline, relative to the project root.
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlc: Option<String>,
    /// Root of the artifact repository `upload` publishes into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_repository_destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torrent_tracker: Option<String>,
    /// Directory holding one file per set definition.
    #[serde(default = "default_set_directory")]
    pub set_directory: String,
}

fn default_root_dir() -> String {
    ".".to_string()
}

fn default_set_directory() -> String {
    ".fileset/sets".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            project: None,
            platform: None,
            configuration: None,
            target: None,
            revision: None,
            dlc: None,
            artifact_repository_destination: None,
            torrent_tracker: None,
            set_directory: default_set_directory(),
        }
    }
}

impl Settings {
    /// Template keys backed by a settings field.
    pub const KEYS: &'static [&'static str] = &[
        "root_dir",
        "project",
        "platform",
        "configuration",
        "target",
        "revision",
        "dlc",
        "artifact_repository_destination",
        "torrent_tracker",
        "set_directory",
    ];

    fn bindings(&self) -> [(&'static str, Option<&str>); 10] {
        [
            ("root_dir", Some(self.root_dir.as_str())),
            ("project", self.project.as_deref()),
            ("platform", self.platform.as_deref()),
            ("configuration", self.configuration.as_deref()),
            ("target", self.target.as_deref()),
            ("revision", self.revision.as_deref()),
            ("dlc", self.dlc.as_deref()),
            (
                "artifact_repository_destination",
                self.artifact_repository_destination.as_deref(),
            ),
            ("torrent_tracker", self.torrent_tracker.as_deref()),
            ("set_directory", Some(self.set_directory.as_str())),
        ]
    }
}

/// Retry settings of the archive publisher.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PublishSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_secs() -> u64 {
    10
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl PublishSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.backoff_secs))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub settings: Settings,
    /// User-declared template keys.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub publish: PublishSettings,
    /// Fileset name to output path template, relative to
    /// `artifact_repository_destination`.
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    #[serde(default)]
    pub sets: BTreeMap<String, Vec<PatternRule>>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            settings: Settings::default(),
            variables: BTreeMap::new(),
            publish: PublishSettings::default(),
            artifacts: BTreeMap::new(),
            sets: BTreeMap::new(),
        }
    }
}

impl ProjectConfig {
    /// Builds the template context of one invocation.
    ///
    /// Settings fields and declared variables are the only known keys;
    /// `overrides` naming anything else are rejected. `root_dir` is made
    /// relative to `project_root`.
    pub fn context(
        &self,
        project_root: &Path,
        overrides: &[(String, String)],
    ) -> FilesetResult<TemplateContext> {
        let mut context = TemplateContext::new();
        for (key, value) in self.settings.bindings() {
            context = match value {
                Some(value) => context.bind(key, value),
                None => context.declare(key),
            };
        }
        for (key, value) in &self.variables {
            context = context.bind(key.clone(), value.clone());
        }
        let context = context.apply_overrides(overrides)?;

        // root_dir may itself have been overridden
        let root_dir = match context.get("root_dir") {
            Some(value) => project_root.join(value.to_string()),
            None => project_root.to_path_buf(),
        };
        let root_dir = normalize_path(&root_dir.to_string_lossy());
        // a literal path, not a time format
        let root_dir = root_dir.to_string_lossy().replace('%', "%%");
        Ok(context.bind("root_dir", root_dir))
    }

    /// Sets from the configuration first, then from the set directory.
    pub fn set_provider(&self, project_root: &Path) -> ChainedSetProvider {
        ChainedSetProvider::new()
            .with(ConfigSetProvider::new(self.sets.clone()))
            .with(DirectorySetProvider::new(
                project_root.join(&self.settings.set_directory),
            ))
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
    project_root: PathBuf,
}

impl ConfigManager {
    /// Finds the project by walking up from the current directory.
    pub fn new() -> Result<Self> {
        let project_root = find_project_root()?;
        Ok(Self::new_at(project_root))
    }

    pub fn new_at(project_root: PathBuf) -> Self {
        let config_path = project_root.join(CONFIG_FILE_NAME);
        Self {
            config_path,
            project_root,
        }
    }

    pub fn initialize(&self) -> Result<()> {
        if self.config_path.exists() {
            return Ok(());
        }

        let default_config = ProjectConfig::default();
        self.save_config(&default_config)?;
        Ok(())
    }

    pub fn validate_config(&self) -> Result<()> {
        let config = self.load_config()?;

        // sets from the set directory are validated alongside the inline ones
        let directory =
            DirectorySetProvider::new(self.project_root.join(&config.settings.set_directory));
        let mut issues = Vec::new();
        let mut directory_sets = BTreeMap::new();
        for name in directory.set_names() {
            match directory.load_set(&name) {
                Ok(rules) => {
                    directory_sets.insert(name, rules);
                }
                Err(e) => issues.push(e.to_string()),
            }
        }

        let validator = StandardValidator::new().with_sets(directory_sets);
        issues.extend(validator.validate_config(&config)?);

        if issues.is_empty() {
            println!("✓ Configuration is valid.");
            Ok(())
        } else {
            println!("⚠️  Found issues in configuration:");
            for issue in issues {
                println!("  - {issue}");
            }
            anyhow::bail!("Configuration validation failed.");
        }
    }

    pub fn list_sets(&self) -> Result<()> {
        let config = self.load_config()?;
        let provider = config.set_provider(&self.project_root);
        let names = provider.set_names();

        if names.is_empty() {
            println!("No file sets defined.");
            return Ok(());
        }

        for name in names {
            println!("\n📁 Set: {name}");
            match provider.load_set(&name) {
                Ok(rules) => {
                    for rule in rules {
                        println!("  🔍 {rule}");
                    }
                }
                Err(e) => println!("  ⚠️  {e}"),
            }
        }
        Ok(())
    }

    pub fn export_config(&self, file_path: &str, format: &str) -> Result<()> {
        let config = self.load_config()?;

        let content = match format {
            "json" => {
                serde_json::to_string_pretty(&config).context("Failed to serialize to JSON")?
            }
            "yaml" => serde_yaml::to_string(&config).context("Failed to serialize to YAML")?,
            _ => toml::to_string_pretty(&config).context("Failed to serialize to TOML")?,
        };

        fs::write(file_path, content).context("Failed to write export file")?;

        Ok(())
    }

    pub fn get_project_root(&self) -> &Path {
        &self.project_root
    }
}

pub trait ConfigProvider {
    fn load_config(&self) -> Result<ProjectConfig>;
    fn save_config(&self, config: &ProjectConfig) -> Result<()>;
    fn get_config_path(&self) -> Result<PathBuf>;
}

impl ConfigProvider for ConfigManager {
    fn load_config(&self) -> Result<ProjectConfig> {
        if !self.config_path.exists() {
            return Ok(ProjectConfig::default());
        }

        let content =
            fs::read_to_string(&self.config_path).context("Failed to read config file")?;

        toml::from_str(&content).with_context(|| {
            format!("Failed to parse config file {}", self.config_path.display())
        })
    }

    fn save_config(&self, config: &ProjectConfig) -> Result<()> {
        let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(&self.config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn get_config_path(&self) -> Result<PathBuf> {
        Ok(self.config_path.clone())
    }
}

fn find_project_root() -> Result<PathBuf> {
    let current_dir = std::env::current_dir()?;
    let mut dir = current_dir.as_path();

    loop {
        if dir.join(CONFIG_FILE_NAME).exists() {
            return Ok(dir.to_path_buf());
        }

        match dir.parent() {
            Some(parent) => dir = parent,
            None => anyhow::bail!(
                "Not in a fileset project (no {CONFIG_FILE_NAME} found); run 'fileset-publisher init'"
            ),
        }
    }
}
