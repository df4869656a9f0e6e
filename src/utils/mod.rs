use anyhow::Result;

use crate::builders::reporter::ConsoleReporter;
use crate::core::config::ConfigManager;
use crate::core::engine::{ActionOptions, FilesetAction, FilesetEngine, UploadOptions};

const DEFAULT_LOG_FILTER: &str = "fileset_publisher=info";
const VERBOSE_LOG_FILTER: &str = "fileset_publisher=debug";

/// Installs the stderr log subscriber. `RUST_LOG` wins unless `verbose` is set.
pub fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into())
    };

    // a second initialization (tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Parses one `--arg KEY=VALUE` pair. The value may itself contain `=`.
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

pub fn initialize_project() -> Result<()> {
    let config_manager = ConfigManager::new_at(std::env::current_dir()?);
    config_manager.initialize()?;
    println!("✓ Initialized fileset configuration in this directory");
    println!("Declare sets under [sets] or in the set directory, then run 'fileset-publisher validate'");
    Ok(())
}

pub fn validate_config() -> Result<()> {
    let config_manager = get_config_manager()?;
    config_manager.validate_config()
}

pub fn list_sets() -> Result<()> {
    let config_manager = get_config_manager()?;
    config_manager.list_sets()
}

pub fn export_config(file_path: &str, format: &str) -> Result<()> {
    let config_manager = get_config_manager()?;
    config_manager.export_config(file_path, format)?;
    println!("✓ Exported configuration to {file_path}");
    Ok(())
}

pub fn run_fileset(
    set: &str,
    action: FilesetAction,
    options: &ActionOptions,
    overrides: &[(String, String)],
    verbose: bool,
) -> Result<()> {
    let config_manager = get_config_manager()?;
    let engine = FilesetEngine::new(&config_manager, overrides)?
        .with_reporter(Box::new(ConsoleReporter::new().verbose(verbose)));
    engine.run(set, action, options)
}

pub fn upload_fileset(
    fileset: &str,
    options: UploadOptions,
    overrides: &[(String, String)],
) -> Result<()> {
    let config_manager = get_config_manager()?;
    let engine = FilesetEngine::new(&config_manager, overrides)?;
    let published = engine.upload(fileset, options)?;
    println!("✓ Uploaded '{fileset}' to {}", published.display());
    Ok(())
}

// Helper function to create ConfigManager instance
fn get_config_manager() -> Result<ConfigManager> {
    ConfigManager::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("platform=win64").unwrap(),
            ("platform".to_string(), "win64".to_string())
        );
        assert_eq!(
            parse_key_value("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_key_value("revision=").unwrap(),
            ("revision".to_string(), String::new())
        );
        assert!(parse_key_value("platform").is_err());
        assert!(parse_key_value("=win64").is_err());
    }
}
