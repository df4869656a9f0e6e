use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::core::error::{FilesetError, FilesetResult};

/// One rule of a named set definition.
///
/// A rule selects files below the pipeline's source root with `include`
/// patterns, drops the ones matched by `exclude`, and optionally maps them to
/// a destination computed from the `rename` template instead of their
/// relative path.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PatternRule {
    /// Glob patterns relative to the source root. `**` spans directories.
    pub include: Vec<String>,
    /// Glob patterns removed from the result. Always wins over `include`.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// When false, matching is restricted to the directory a pattern names.
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Destination template relative to the destination root. Besides the
    /// context keys it can use `{path}`, `{name}`, `{stem}`, `{ext}` and `{dir}`
    /// of the matched file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
}

fn default_recursive() -> bool {
    true
}

impl PatternRule {
    pub fn new<I, S>(include: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
            recursive: true,
            rename: None,
        }
    }

    pub fn exclude<I, S>(mut self, exclude: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = exclude.into_iter().map(Into::into).collect();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn rename(mut self, template: impl Into<String>) -> Self {
        self.rename = Some(template.into());
        self
    }

    /// Checks that every pattern compiles. Templates are not resolved here, so
    /// placeholders are compiled as literal text.
    pub fn validate(&self) -> FilesetResult<()> {
        GlobMatcher::new(&self.include, &self.exclude, self.recursive).map(|_| ())
    }
}

impl fmt::Display for PatternRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.include.join(", "))?;
        if !self.exclude.is_empty() {
            write!(f, " except [{}]", self.exclude.join(", "))?;
        }
        if !self.recursive {
            write!(f, " (non-recursive)")?;
        }
        if let Some(rename) = &self.rename {
            write!(f, " -> {rename}")?;
        }
        Ok(())
    }
}

/// Expands patterns against a directory tree.
pub trait PatternMatcher {
    /// Whether a `/`-separated path relative to the root is selected.
    fn matches(&self, relative: &str) -> bool;

    /// Every selected regular file below `root`, as relative paths sorted
    /// lexicographically. A missing root yields nothing.
    fn expand(&self, root: &Path) -> FilesetResult<Vec<PathBuf>>;
}

/// `PatternMatcher` backed by `globset`, enumerating the tree with `walkdir`.
#[derive(Debug)]
pub struct GlobMatcher {
    include: GlobSet,
    // wildcard-free includes, which also select whatever lies below them
    literal_dirs: Vec<String>,
    exclude: GlobSet,
    max_depth: Option<usize>,
}

impl GlobMatcher {
    pub fn new(include: &[String], exclude: &[String], recursive: bool) -> FilesetResult<Self> {
        let include: Vec<String> = include
            .iter()
            .map(|p| normalize_pattern(p, recursive))
            .filter(|p| !p.is_empty())
            .collect();
        let exclude: Vec<String> = exclude
            .iter()
            .map(|p| normalize_pattern(p, true))
            .filter(|p| !p.is_empty())
            .collect();

        let literal_dirs: Vec<String> = include
            .iter()
            .filter(|p| !has_wildcard(p))
            .cloned()
            .collect();

        let max_depth = if recursive {
            None
        } else {
            include
                .iter()
                .map(|p| {
                    let depth = p.split('/').count();
                    if has_wildcard(p) { depth } else { depth + 1 }
                })
                .max()
        };

        Ok(Self {
            include: build_set(&include)?,
            literal_dirs,
            exclude: build_set(&exclude)?,
            max_depth,
        })
    }

    fn is_included(&self, relative: &str) -> bool {
        self.include.is_match(relative)
            || self.literal_dirs.iter().any(|dir| {
                relative.len() > dir.len()
                    && relative.starts_with(dir.as_str())
                    && relative.as_bytes()[dir.len()] == b'/'
            })
    }

    fn is_excluded(&self, relative: &str) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        // the path itself, then every ancestor directory
        let mut candidate = relative;
        loop {
            if self.exclude.is_match(candidate) {
                return true;
            }
            match candidate.rfind('/') {
                Some(idx) => candidate = &candidate[..idx],
                None => return false,
            }
        }
    }
}

impl PatternMatcher for GlobMatcher {
    fn matches(&self, relative: &str) -> bool {
        self.is_included(relative) && !self.is_excluded(relative)
    }

    fn expand(&self, root: &Path) -> FilesetResult<Vec<PathBuf>> {
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut walker = WalkDir::new(root).min_depth(1);
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut found = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|err| {
                let path = err.path().unwrap_or(root).to_path_buf();
                FilesetError::io(path, io::Error::from(err))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let relative = to_slash(relative);
            if self.matches(&relative) {
                found.push(relative);
            }
        }

        found.sort();
        Ok(found.into_iter().map(PathBuf::from).collect())
    }
}

/// Expands `include` minus `exclude` below `root`.
pub fn expand(
    root: &Path,
    include: &[String],
    exclude: &[String],
    recursive: bool,
) -> FilesetResult<Vec<PathBuf>> {
    GlobMatcher::new(include, exclude, recursive)?.expand(root)
}

/// Joins the components of a relative path with `/`.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn normalize_pattern(pattern: &str, recursive: bool) -> String {
    let pattern = pattern.replace('\\', "/");
    let segments = pattern
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(|s| if !recursive && s == "**" { "*" } else { s });
    segments.collect::<Vec<_>>().join("/")
}

fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

fn build_set(patterns: &[String]) -> FilesetResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile(pattern)?);
    }
    builder.build().map_err(|source| FilesetError::Pattern {
        pattern: patterns.join(", "),
        source,
    })
}

fn compile(pattern: &str) -> FilesetResult<Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|source| FilesetError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}
