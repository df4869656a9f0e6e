use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::builders::patterns;
use crate::builders::reporter::{ConsoleReporter, StatusReporter};
use crate::builders::sets::ChainedSetProvider;
use crate::core::archive::ArchivePublisher;
use crate::core::atomic;
use crate::core::checkout::checkout;
use crate::core::config::{ConfigManager, ConfigProvider, ProjectConfig};
use crate::core::context::TemplateContext;
use crate::core::error::{FilesetError, FilesetResult};
use crate::core::git::Git2Client;
use crate::core::mapper::{FileMapper, MappingPair, normalize_path};
use crate::core::torrent::TorrentPublisher;

/// What `fileset <set> <action>` does with the evaluated pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FilesetAction {
    /// Print every `source => destination` pair
    List,
    /// Copy every source to its destination
    Copy,
    /// Same as `copy`
    Robocopy,
    /// Remove every source
    Delete,
    /// Commit every source in one transaction
    Checkout,
    /// Write a torrent descriptor for the pairs
    Torrent,
}

/// Optional arguments of a fileset action.
#[derive(Debug, Clone, Default)]
pub struct ActionOptions {
    pub src: Option<String>,
    pub to: Option<String>,
    /// Torrent path template, defaults to the set name.
    pub output: Option<String>,
    /// Tracker URL, defaults to `torrent_tracker`.
    pub tracker: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOptions {
    pub archive: bool,
    pub compress: bool,
    pub torrent: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopySummary {
    pub copied: usize,
    /// Destinations already up to date.
    pub skipped: usize,
}

/// Runs fileset actions and uploads for one invocation.
///
/// The engine owns the loaded configuration, the template context built from
/// it (plus `--arg` overrides) and the set provider. Every action evaluates a
/// fresh pipeline.
pub struct FilesetEngine {
    config: ProjectConfig,
    project_root: PathBuf,
    context: TemplateContext,
    sets: ChainedSetProvider,
    archive: ArchivePublisher,
    torrent: TorrentPublisher,
    reporter: Box<dyn StatusReporter>,
}

impl FilesetEngine {
    pub fn new(config_manager: &ConfigManager, overrides: &[(String, String)]) -> Result<Self> {
        let config = config_manager.load_config()?;
        Self::from_config(
            config,
            config_manager.get_project_root().to_path_buf(),
            overrides,
        )
    }

    pub fn from_config(
        config: ProjectConfig,
        project_root: PathBuf,
        overrides: &[(String, String)],
    ) -> Result<Self> {
        let context = config
            .context(&project_root, overrides)
            .context("Failed to build the template context")?;
        let sets = config.set_provider(&project_root);
        let archive = ArchivePublisher::new().with_policy(config.publish.retry_policy());

        Ok(Self {
            config,
            project_root,
            context,
            sets,
            archive,
            torrent: TorrentPublisher::new(),
            reporter: Box::new(ConsoleReporter::new()),
        })
    }

    pub fn with_reporter(mut self, reporter: Box<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_archive_publisher(mut self, archive: ArchivePublisher) -> Self {
        self.archive = archive;
        self
    }

    pub fn context(&self) -> &TemplateContext {
        &self.context
    }

    /// Pipeline over `set`, with optional root overrides applied before the set
    /// is loaded.
    pub fn mapper(
        &self,
        set: &str,
        src: Option<&str>,
        to: Option<&str>,
    ) -> FilesetResult<FileMapper> {
        let mut mapper = FileMapper::from_context(&self.context);
        if let Some(src) = src {
            mapper = mapper.with_source(src);
        }
        if let Some(to) = to {
            mapper = mapper.with_destination(to);
        }
        mapper.load_named_set(set, &self.sets)
    }

    pub fn pairs(
        &self,
        set: &str,
        src: Option<&str>,
        to: Option<&str>,
    ) -> FilesetResult<Vec<MappingPair>> {
        self.mapper(set, src, to)?.evaluate(&self.context)
    }

    /// Evaluates `set` and runs `action` on the result.
    pub fn run(&self, set: &str, action: FilesetAction, options: &ActionOptions) -> Result<()> {
        let pairs = self
            .pairs(set, options.src.as_deref(), options.to.as_deref())
            .with_context(|| format!("Failed to evaluate file set '{set}'"))?;
        debug!(set, pairs = pairs.len(), ?action, "running fileset action");

        match action {
            FilesetAction::List => self.reporter.report_pairs(set, &pairs)?,
            FilesetAction::Copy | FilesetAction::Robocopy => {
                let summary = self.copy(&pairs)?;
                println!(
                    "✓ Copied {} files ({} already up to date)",
                    summary.copied, summary.skipped
                );
            }
            FilesetAction::Delete => {
                let removed = self.delete(&pairs)?;
                println!("✓ Removed {removed} files");
            }
            FilesetAction::Checkout => {
                let added = self.checkout(&pairs, "Checkout")?;
                println!("✓ Checked out {added} files");
            }
            FilesetAction::Torrent => {
                let output = options.output.as_deref().unwrap_or(set);
                let output = normalize_path(&self.context.resolve(output)?);
                let path = self.publish_torrent(&output, &pairs, options.tracker.as_deref())?;
                println!("✓ Created {}", path.display());
            }
        }
        Ok(())
    }

    /// Copies every pair whose source is a regular file, in parallel.
    ///
    /// A destination with the same length and a modification time not older
    /// than its source is left alone. All copies are attempted; when some fail
    /// the first failure is returned with the failure count.
    pub fn copy(&self, pairs: &[MappingPair]) -> Result<CopySummary> {
        let results: Vec<FilesetResult<bool>> = pairs
            .par_iter()
            .filter(|pair| pair.source.is_file())
            .map(copy_pair)
            .collect();

        let attempted = results.len();
        let mut summary = CopySummary::default();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(true) => summary.copied += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    warn!(error = %e, "copy failed");
                    failures.push(e);
                }
            }
        }

        let failed = failures.len();
        match failures.into_iter().next() {
            Some(first) => Err(anyhow::Error::new(first)
                .context(format!("{failed} of {attempted} copies failed"))),
            None => Ok(summary),
        }
    }

    /// Removes every source that is a regular file.
    pub fn delete(&self, pairs: &[MappingPair]) -> Result<usize> {
        let mut removed = 0;
        for pair in pairs.iter().filter(|pair| pair.source.is_file()) {
            info!("Removing file {}", pair.source.display());
            fs::remove_file(&pair.source).map_err(|e| FilesetError::io(&pair.source, e))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Commits every source in one git transaction at the project root.
    pub fn checkout(&self, pairs: &[MappingPair], description: &str) -> Result<usize> {
        let client = Git2Client::new(&self.project_root)?;
        let sources = pairs.iter().map(|pair| {
            std::path::absolute(&pair.source).map_err(|e| FilesetError::io(&pair.source, e))
        });
        Ok(checkout(&client, description, sources)?)
    }

    /// Publishes `fileset` to `artifact_repository_destination/artifacts[fileset]`.
    ///
    /// Returns the path of the published archive or directory.
    pub fn upload(&self, fileset: &str, options: UploadOptions) -> Result<PathBuf> {
        let template = self
            .config
            .artifacts
            .get(fileset)
            .with_context(|| format!("No artifact path declared for fileset '{fileset}'"))?;
        let output = self
            .context
            .resolve(&format!("{{artifact_repository_destination}}/{template}"))?;
        let output = normalize_path(&output);

        let pairs = self.pairs(fileset, None, Some("."))?;

        if options.archive {
            let archive = self.archive.publish(&output, &pairs, options.compress)?;
            info!("Uploaded {fileset} as {}", archive.display());
            if options.torrent {
                let name = archive.file_name().map(PathBuf::from).unwrap_or_default();
                let torrent_pairs = [MappingPair::new(&archive, name)];
                self.publish_torrent(&output, &torrent_pairs, None)?;
            }
            return Ok(archive);
        }

        if pairs.is_empty() {
            return Err(FilesetError::NoFilesMatched { target: output }.into());
        }

        let staging = atomic::temp_sibling(&output);
        atomic::discard(&staging)?;
        let staged: Vec<MappingPair> = pairs
            .into_iter()
            .map(|pair| MappingPair::new(pair.source, staging.join(pair.destination)))
            .collect();

        if let Err(e) = self.copy(&staged) {
            if let Err(cleanup) = atomic::discard(&staging) {
                warn!(error = %cleanup, "could not remove {}", staging.display());
            }
            return Err(e.context("Copy failed"));
        }
        atomic::replace_dir(&staging, &output)?;
        info!("Uploaded {fileset} to {}", output.display());

        if options.torrent {
            let files = patterns::expand(&output, &["**".to_string()], &[], true)?;
            let torrent_pairs: Vec<MappingPair> = files
                .into_iter()
                .map(|relative| MappingPair::new(output.join(&relative), relative))
                .collect();
            self.publish_torrent(&output, &torrent_pairs, None)?;
        }
        Ok(output)
    }

    fn publish_torrent(
        &self,
        target: &Path,
        pairs: &[MappingPair],
        tracker: Option<&str>,
    ) -> Result<PathBuf> {
        let tracker = match tracker {
            Some(tracker) => tracker.to_string(),
            None => self
                .context
                .resolve("{torrent_tracker}")
                .context("No tracker given and torrent_tracker is not set")?,
        };
        Ok(self.torrent.publish(target, pairs, &tracker)?)
    }
}

/// Copies one pair; `Ok(false)` when the destination was already up to date.
fn copy_pair(pair: &MappingPair) -> FilesetResult<bool> {
    if is_up_to_date(&pair.source, &pair.destination) {
        debug!("{} is up to date", pair.destination.display());
        return Ok(false);
    }
    atomic::ensure_parent(&pair.destination)?;
    fs::copy(&pair.source, &pair.destination)
        .map_err(|e| FilesetError::io(&pair.destination, e))?;
    debug!("copied {} to {}", pair.source.display(), pair.destination.display());
    Ok(true)
}

fn is_up_to_date(source: &Path, destination: &Path) -> bool {
    let (Ok(src), Ok(dst)) = (fs::metadata(source), fs::metadata(destination)) else {
        return false;
    };
    if !dst.is_file() || src.len() != dst.len() {
        return false;
    }
    match (src.modified(), dst.modified()) {
        (Ok(src_time), Ok(dst_time)) => dst_time >= src_time,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::patterns::PatternRule;
    use tempfile::tempdir;

    fn engine_for(root: &Path, rules: Vec<PatternRule>) -> FilesetEngine {
        let mut config = ProjectConfig::default();
        config.sets.insert("content".to_string(), rules);
        FilesetEngine::from_config(config, root.to_path_buf(), &[]).unwrap()
    }

    #[test]
    fn test_copy_skips_up_to_date_destinations() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.txt"), "alpha").unwrap();
        fs::write(dir.path().join("src/b.txt"), "beta").unwrap();

        let engine = engine_for(dir.path(), vec![PatternRule::new(["src/*.txt"])]);
        let out = dir.path().join("out");
        let pairs = engine
            .pairs("content", None, Some(out.to_str().unwrap()))
            .unwrap();

        let first = engine.copy(&pairs).unwrap();
        assert_eq!(first, CopySummary { copied: 2, skipped: 0 });
        assert_eq!(fs::read_to_string(out.join("src/a.txt")).unwrap(), "alpha");

        let second = engine.copy(&pairs).unwrap();
        assert_eq!(second, CopySummary { copied: 0, skipped: 2 });

        fs::write(out.join("src/b.txt"), "stale content").unwrap();
        let third = engine.copy(&pairs).unwrap();
        assert_eq!(third.copied, 1);
        assert_eq!(fs::read_to_string(out.join("src/b.txt")).unwrap(), "beta");
    }

    #[test]
    fn test_copy_of_nothing_is_fine() {
        let dir = tempdir().unwrap();
        let engine = engine_for(dir.path(), vec![PatternRule::new(["*.none"])]);
        assert_eq!(engine.copy(&[]).unwrap(), CopySummary::default());
    }

    #[test]
    fn test_delete_removes_sources() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.log"), "a").unwrap();
        fs::write(dir.path().join("b.log"), "b").unwrap();
        fs::write(dir.path().join("keep.txt"), "k").unwrap();

        let engine = engine_for(dir.path(), vec![PatternRule::new(["*.log"])]);
        let pairs = engine.pairs("content", None, None).unwrap();

        assert_eq!(engine.delete(&pairs).unwrap(), 2);
        assert!(!dir.path().join("a.log").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn test_unknown_set_is_reported() {
        let dir = tempdir().unwrap();
        let engine = engine_for(dir.path(), vec![]);
        let err = engine.pairs("missing", None, None).unwrap_err();
        assert!(matches!(err, FilesetError::UnknownSet { name } if name == "missing"));
    }

    #[test]
    fn test_upload_needs_an_artifact_entry() {
        let dir = tempdir().unwrap();
        let engine = engine_for(dir.path(), vec![PatternRule::new(["*"])]);
        let err = engine.upload("content", UploadOptions::default()).unwrap_err();
        assert!(err.to_string().contains("No artifact path declared"));
    }

    #[test]
    fn test_upload_rejects_rename_outside_output() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("proj");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("a.txt"), "a").unwrap();

        let mut config = ProjectConfig::default();
        config.sets.insert(
            "content".to_string(),
            vec![PatternRule::new(["a.txt"]).rename("../../escaped/{name}")],
        );
        config.artifacts.insert("content".to_string(), "content".to_string());
        config.settings.artifact_repository_destination =
            Some(dir.path().join("artifacts").to_string_lossy().into_owned());
        let engine = FilesetEngine::from_config(config, project, &[]).unwrap();

        for archive in [false, true] {
            let options = UploadOptions {
                archive,
                ..Default::default()
            };
            let err = engine.upload("content", options).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<FilesetError>(),
                Some(FilesetError::EscapingDestination { .. })
            ));
        }
        assert!(!dir.path().join("escaped").exists());
        assert!(!dir.path().join("artifacts").exists());
    }

    #[test]
    fn test_torrent_without_tracker_fails_before_writing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), "data").unwrap();
        let engine = engine_for(dir.path(), vec![PatternRule::new(["*.bin"])]);
        let pairs = engine.pairs("content", None, None).unwrap();

        let target = dir.path().join("out");
        assert!(engine.publish_torrent(&target, &pairs, None).is_err());
        assert!(!dir.path().join("out.torrent").exists());
    }
}
