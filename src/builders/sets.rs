use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::builders::patterns::PatternRule;
use crate::core::error::{FilesetError, FilesetResult};

/// A trait that defines where named set definitions come from.
///
/// The pipeline only consumes rules; it never decides how they are declared.
/// Implementations may read them from the project configuration, from files
/// in a directory, or from anything else that can produce a list of rules
/// for a name.
pub trait SetProvider {
    /// Returns the ordered rules of the set called `name`.
    ///
    /// # Returns
    /// `FilesetError::UnknownSet` if this provider does not know `name`, or
    /// `FilesetError::InvalidSet` if it knows it but cannot read it.
    fn load_set(&self, name: &str) -> FilesetResult<Vec<PatternRule>>;

    /// The names this provider can resolve, sorted.
    fn set_names(&self) -> Vec<String>;
}

/// Sets declared inline in the project configuration (`[sets]` table).
#[derive(Debug, Clone, Default)]
pub struct ConfigSetProvider {
    sets: BTreeMap<String, Vec<PatternRule>>,
}

impl ConfigSetProvider {
    pub fn new(sets: BTreeMap<String, Vec<PatternRule>>) -> Self {
        Self { sets }
    }
}

impl SetProvider for ConfigSetProvider {
    fn load_set(&self, name: &str) -> FilesetResult<Vec<PatternRule>> {
        self.sets
            .get(name)
            .cloned()
            .ok_or_else(|| FilesetError::UnknownSet {
                name: name.to_string(),
            })
    }

    fn set_names(&self) -> Vec<String> {
        self.sets.keys().cloned().collect()
    }
}

/// The on-disk shape of a set file.
#[derive(Debug, Serialize, Deserialize)]
pub struct SetFile {
    pub rules: Vec<PatternRule>,
}

/// Sets stored one per file in a directory, as `<name>.toml`, `<name>.json`,
/// `<name>.yaml` or `<name>.yml`. The first extension found in that order wins.
#[derive(Debug, Clone)]
pub struct DirectorySetProvider {
    directory: PathBuf,
}

const SET_EXTENSIONS: &[&str] = &["toml", "json", "yaml", "yml"];

impl DirectorySetProvider {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn find(&self, name: &str) -> Option<(PathBuf, &'static str)> {
        SET_EXTENSIONS.iter().find_map(|ext| {
            let path = self.directory.join(format!("{name}.{ext}"));
            path.is_file().then_some((path, *ext))
        })
    }

    /// Parses the content of a set file according to its extension.
    fn parse(&self, name: &str, content: &str, ext: &str) -> FilesetResult<Vec<PatternRule>> {
        let invalid = |reason: String| FilesetError::InvalidSet {
            name: name.to_string(),
            reason,
        };
        let parsed: SetFile = match ext {
            "json" => serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?,
            "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| invalid(e.to_string()))?,
            _ => toml::from_str(content).map_err(|e| invalid(e.to_string()))?,
        };
        Ok(parsed.rules)
    }
}

impl SetProvider for DirectorySetProvider {
    fn load_set(&self, name: &str) -> FilesetResult<Vec<PatternRule>> {
        // set names are plain identifiers, never paths
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(FilesetError::InvalidSet {
                name: name.to_string(),
                reason: "set names cannot contain path separators".to_string(),
            });
        }

        let (path, ext) = self.find(name).ok_or_else(|| FilesetError::UnknownSet {
            name: name.to_string(),
        })?;
        let content = fs::read_to_string(&path).map_err(|e| FilesetError::io(&path, e))?;
        self.parse(name, &content, ext)
    }

    fn set_names(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.directory) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| SET_EXTENSIONS.contains(&e))
            })
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Asks each provider in turn; the first one that knows the name answers.
pub struct ChainedSetProvider {
    providers: Vec<Box<dyn SetProvider>>,
}

impl ChainedSetProvider {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn with(mut self, provider: impl SetProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }
}

impl Default for ChainedSetProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SetProvider for ChainedSetProvider {
    fn load_set(&self, name: &str) -> FilesetResult<Vec<PatternRule>> {
        for provider in &self.providers {
            match provider.load_set(name) {
                Err(FilesetError::UnknownSet { .. }) => continue,
                other => return other,
            }
        }
        Err(FilesetError::UnknownSet {
            name: name.to_string(),
        })
    }

    fn set_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .iter()
            .flat_map(|p| p.set_names())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
