//! Zip archive publishing.
//!
//! The archive is written to `<target>.tmp`, re-read to verify every entry,
//! then renamed over `<target>`. Transient failures restart the whole
//! write/verify/rename sequence under the configured [`RetryPolicy`].

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::core::atomic;
use crate::core::error::{FilesetError, FilesetResult};
use crate::core::mapper::{MappingPair, ensure_contained, normalize_path};
use crate::core::retry::{RetryPolicy, Sleeper, ThreadSleeper};

/// Verifies a freshly written archive before it is published.
pub trait IntegrityCheck {
    fn verify(&self, archive: &Path) -> FilesetResult<()>;
}

/// Reads every entry back so the zip reader checks its CRC.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipIntegrityCheck;

impl IntegrityCheck for ZipIntegrityCheck {
    fn verify(&self, archive: &Path) -> FilesetResult<()> {
        let corrupted = |reason: String| FilesetError::Integrity {
            path: archive.to_path_buf(),
            reason,
        };

        let file = File::open(archive).map_err(|e| FilesetError::io(archive, e))?;
        let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| corrupted(e.to_string()))?;
        for index in 0..zip.len() {
            let mut entry = zip.by_index(index).map_err(|e| corrupted(e.to_string()))?;
            let name = entry.name().to_string();
            io::copy(&mut entry, &mut io::sink()).map_err(|e| corrupted(format!("{name}: {e}")))?;
        }
        Ok(())
    }
}

pub struct ArchivePublisher {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    check: Arc<dyn IntegrityCheck>,
}

impl Default for ArchivePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchivePublisher {
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
            check: Arc::new(ZipIntegrityCheck),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_integrity_check(mut self, check: Arc<dyn IntegrityCheck>) -> Self {
        self.check = check;
        self
    }

    /// Publishes `pairs` as a zip archive at `target` and returns the final path.
    ///
    /// Only pairs whose source is a regular file become entries, named after
    /// their destination. Sources are re-checked on every attempt, so a file
    /// removed between two attempts is left out instead of failing them all.
    /// `compress` selects deflate over stored entries.
    pub fn publish(
        &self,
        target: &Path,
        pairs: &[MappingPair],
        compress: bool,
    ) -> FilesetResult<PathBuf> {
        let target = atomic::ensure_extension(&normalize_path(&target.to_string_lossy()), "zip");
        let entries = pairs
            .iter()
            .map(|pair| entry_name(&pair.destination).map(|name| (name, pair)))
            .collect::<FilesetResult<Vec<(String, &MappingPair)>>>()?;

        let temp = atomic::temp_sibling(&target);
        info!("Creating zip archive {}", target.display());

        let published = self.policy.run(self.sleeper.as_ref(), "archive", |_attempt| {
            let files: Vec<&(String, &MappingPair)> =
                entries.iter().filter(|(_, p)| p.source.is_file()).collect();
            if files.is_empty() {
                return Err(FilesetError::NoFilesMatched {
                    target: target.clone(),
                });
            }
            atomic::ensure_parent(&target)?;
            write_archive(&temp, &files, compress)?;
            self.check.verify(&temp)?;
            atomic::commit_file(&temp, &target)?;
            Ok(files.len())
        });
        match published {
            Ok(count) => {
                info!(entries = count, "Published {}", target.display());
                Ok(target)
            }
            Err(err) => {
                if let Err(cleanup) = atomic::discard(&temp) {
                    warn!(error = %cleanup, "could not remove {}", temp.display());
                }
                Err(err)
            }
        }
    }
}

fn write_archive(
    temp: &Path,
    files: &[&(String, &MappingPair)],
    compress: bool,
) -> FilesetResult<()> {
    let zip_err = |e: ZipError| match e {
        ZipError::Io(source) => FilesetError::io(temp, source),
        other => FilesetError::io(temp, io::Error::other(other)),
    };

    let method = if compress {
        CompressionMethod::Deflated
    } else {
        CompressionMethod::Stored
    };

    let file = File::create(temp).map_err(|e| FilesetError::io(temp, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for (name, pair) in files {
        let size = pair
            .source
            .metadata()
            .map_err(|e| FilesetError::io(&pair.source, e))?
            .len();
        // fixed timestamp keeps archives of an unchanged tree byte-identical
        let options = SimpleFileOptions::default()
            .compression_method(method)
            .last_modified_time(zip::DateTime::default())
            .large_file(size >= u64::from(u32::MAX));

        debug!("Adding {} as {}", pair.source.display(), name);
        zip.start_file(name.as_str(), options).map_err(zip_err)?;
        let mut source = File::open(&pair.source).map_err(|e| FilesetError::io(&pair.source, e))?;
        io::copy(&mut source, &mut zip).map_err(|e| FilesetError::io(temp, e))?;
    }

    let mut writer = zip.finish().map_err(zip_err)?;
    writer.flush().map_err(|e| FilesetError::io(temp, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| FilesetError::io(temp, e.into_error()))?;
    file.sync_all().map_err(|e| FilesetError::io(temp, e))
}

/// Archive entry name for a destination, `/`-separated.
///
/// Destinations that are absolute or climb out with `..` have no place in
/// the archive and are rejected.
fn entry_name(destination: &Path) -> FilesetResult<String> {
    ensure_contained(destination, Path::new("."))?;
    Ok(destination
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/"))
}
