use anyhow::Result;
use std::fs;

use crate::core::mapper::MappingPair;

/// Per-pair facts gathered for a listing.
///
/// Collected once per pair so a reporter never has to touch the filesystem
/// itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairStatus {
    /// Whether the source is a regular file at listing time.
    pub exists: bool,
    /// Size of the source in bytes, 0 when it does not exist.
    pub size: u64,
}

impl PairStatus {
    pub fn inspect(pair: &MappingPair) -> Self {
        match fs::metadata(&pair.source) {
            Ok(meta) if meta.is_file() => Self {
                exists: true,
                size: meta.len(),
            },
            _ => Self {
                exists: false,
                size: 0,
            },
        }
    }
}

pub trait StatusReporter {
    fn report_pairs(&self, set_name: &str, pairs: &[MappingPair]) -> Result<()>;
}

/// Prints `source => destination` lines and a summary to stdout.
///
/// This is the reporter used by the `fileset <set> list` command.
pub struct ConsoleReporter {
    verbose: bool,
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self { verbose: false }
    }

    /// Also prints the size of every listed source.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Formats one listing line.
    ///
    /// # Arguments
    /// * `pair`: The pair to print.
    /// * `status`: What was found on disk for its source.
    ///
    /// # Returns
    /// A line such as `🟢 Binaries/a.dll => bin/a.dll`.
    fn format_pair(&self, pair: &MappingPair, status: &PairStatus) -> String {
        // 🔴: source vanished since evaluation
        let status_icon = if status.exists { "🟢" } else { "🔴" };

        let mut line = format!(
            "{} {} => {}",
            status_icon,
            pair.source.display(),
            pair.destination.display()
        );
        if self.verbose && status.exists {
            line.push_str(&format!(" ({})", format_size(status.size)));
        }
        line
    }
}

impl StatusReporter for ConsoleReporter {
    fn report_pairs(&self, set_name: &str, pairs: &[MappingPair]) -> Result<()> {
        println!("📦 File set '{set_name}'");
        println!("=====================================");

        if pairs.is_empty() {
            println!("No files matched.");
            return Ok(());
        }

        let mut total_size = 0;
        let mut missing = 0;

        for pair in pairs {
            let status = PairStatus::inspect(pair);
            total_size += status.size;
            if !status.exists {
                missing += 1;
            }
            println!("{}", self.format_pair(pair, &status));
        }

        println!("\n📈 Summary:");
        println!("  Total files: {}", pairs.len());
        println!("  Total size: {}", format_size(total_size));
        println!("  Missing sources: {missing}");

        Ok(())
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
