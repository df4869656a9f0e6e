//! The file mapping pipeline.
//!
//! A [`FileMapper`] is an ordered chain of selection stages. Each stage
//! remembers the source and destination roots that were in effect when it was
//! added, so `mapper.with_source("a").with_glob(["*.x"]).with_source("b")`
//! still selects from `a`. Nothing touches the filesystem until
//! [`FileMapper::evaluate`] runs, and evaluating twice simply walks the tree
//! twice.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::builders::patterns::{GlobMatcher, PatternMatcher, PatternRule, to_slash};
use crate::builders::sets::SetProvider;
use crate::core::context::TemplateContext;
use crate::core::error::{FilesetError, FilesetResult};

/// A resolved `(source, destination)` couple produced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingPair {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl MappingPair {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Stage {
    source_root: String,
    destination_root: String,
    rule: PatternRule,
}

#[derive(Debug, Clone)]
pub struct FileMapper {
    source_root: String,
    destination_root: String,
    stages: Vec<Stage>,
}

impl FileMapper {
    /// Starts a pipeline with default root templates and no stages.
    pub fn new(source_root: impl Into<String>, destination_root: impl Into<String>) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            stages: Vec::new(),
        }
    }

    /// Sources default to `{root_dir}` when the context binds it, destinations to `.`.
    pub fn from_context(context: &TemplateContext) -> Self {
        let source = if context.get("root_dir").is_some() {
            "{root_dir}"
        } else {
            "."
        };
        Self::new(source, ".")
    }

    /// Root for the sources of every stage added after this call.
    pub fn with_source(mut self, dir: impl Into<String>) -> Self {
        self.source_root = dir.into();
        self
    }

    /// Root for the destinations of every stage added after this call.
    pub fn with_destination(mut self, dir: impl Into<String>) -> Self {
        self.destination_root = dir.into();
        self
    }

    /// Appends a recursive stage selecting `patterns`.
    pub fn with_glob<I, S>(self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_rule(PatternRule::new(patterns))
    }

    pub fn with_rule(mut self, rule: PatternRule) -> Self {
        self.stages.push(Stage {
            source_root: self.source_root.clone(),
            destination_root: self.destination_root.clone(),
            rule,
        });
        self
    }

    /// Appends one stage per rule of the set `name`.
    pub fn load_named_set(self, name: &str, provider: &dyn SetProvider) -> FilesetResult<Self> {
        let rules = provider.load_set(name)?;
        debug!(set = name, rules = rules.len(), "loaded file set");
        Ok(rules.into_iter().fold(self, |mapper, rule| mapper.with_rule(rule)))
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Runs every stage in order and returns the deduplicated pairs.
    ///
    /// When two pairs share a destination, or a later stage maps a source that
    /// an earlier stage already mapped, the later pair replaces the earlier one
    /// and takes its own position in the output.
    pub fn evaluate(&self, context: &TemplateContext) -> FilesetResult<Vec<MappingPair>> {
        let mut pairs = Vec::new();
        for stage in &self.stages {
            let before = pairs.len();
            evaluate_stage(stage, context, &mut pairs)?;
            debug!(rule = %stage.rule, found = pairs.len() - before, "evaluated stage");
        }
        Ok(dedup_last_wins(pairs))
    }
}

fn evaluate_stage(
    stage: &Stage,
    context: &TemplateContext,
    out: &mut Vec<MappingPair>,
) -> FilesetResult<()> {
    let source_root = normalize_path(&context.resolve(&stage.source_root)?);
    let destination_root = normalize_path(&context.resolve(&stage.destination_root)?);

    let include = resolve_all(context, &stage.rule.include)?;
    let exclude = resolve_all(context, &stage.rule.exclude)?;
    let matcher = GlobMatcher::new(&include, &exclude, stage.rule.recursive)?;

    for relative in matcher.expand(&source_root)? {
        let source = source_root.join(&relative);
        let target = match &stage.rule.rename {
            Some(template) => {
                let file_context = bind_file(context, &relative, &source_root, &destination_root);
                let renamed = normalize_path(&file_context.resolve(template)?);
                ensure_contained(&renamed, &destination_root)?;
                renamed
            }
            None => relative,
        };
        out.push(MappingPair {
            source: normalize_path(&source.to_string_lossy()),
            destination: normalize_path(&destination_root.join(target).to_string_lossy()),
        });
    }
    Ok(())
}

fn resolve_all(context: &TemplateContext, templates: &[String]) -> FilesetResult<Vec<String>> {
    templates.iter().map(|t| context.resolve(t)).collect()
}

/// Binds the per-file keys a rename template may use.
fn bind_file(
    context: &TemplateContext,
    relative: &Path,
    source_root: &Path,
    destination_root: &Path,
) -> TemplateContext {
    let os = |s: Option<&std::ffi::OsStr>| {
        s.map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
    };
    let dir = relative.parent().map(to_slash).unwrap_or_default();

    // file names go through the time-format pass too
    let literal = |s: String| s.replace('%', "%%");

    context
        .with_binding("path", literal(to_slash(relative)))
        .bind("name", literal(os(relative.file_name())))
        .bind("stem", literal(os(relative.file_stem())))
        .bind("ext", literal(os(relative.extension())))
        .bind("dir", literal(dir))
        .bind("source_root", literal(to_slash(source_root)))
        .bind("destination_root", literal(to_slash(destination_root)))
}

fn dedup_last_wins(pairs: Vec<MappingPair>) -> Vec<MappingPair> {
    let mut slots: Vec<Option<MappingPair>> = Vec::with_capacity(pairs.len());
    let mut by_source: HashMap<PathBuf, usize> = HashMap::new();
    let mut by_destination: HashMap<PathBuf, usize> = HashMap::new();

    for pair in pairs {
        if let Some(old) = by_source.remove(&pair.source).and_then(|i| slots[i].take()) {
            by_destination.remove(&old.destination);
        }
        if let Some(old) = by_destination
            .remove(&pair.destination)
            .and_then(|i| slots[i].take())
        {
            by_source.remove(&old.source);
        }
        let index = slots.len();
        by_source.insert(pair.source.clone(), index);
        by_destination.insert(pair.destination.clone(), index);
        slots.push(Some(pair));
    }

    slots.into_iter().flatten().collect()
}

/// Fails unless `relative` stays below `root`: no root, prefix or `..` component.
pub fn ensure_contained(relative: &Path, root: &Path) -> FilesetResult<()> {
    let contained = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if contained {
        Ok(())
    } else {
        Err(FilesetError::EscapingDestination {
            path: relative.to_path_buf(),
            root: root.to_path_buf(),
        })
    }
}

/// Lexically normalizes a path string: drops `.` components and folds `..`
/// where possible. Backslashes are treated as separators on every platform.
pub fn normalize_path(path: &str) -> PathBuf {
    let path = if cfg!(windows) {
        path.to_string()
    } else {
        path.replace('\\', "/")
    };

    let mut out = PathBuf::new();
    for component in Path::new(&path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `/..` is `/`
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }

    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}
