//! Build and release agents keep asking the same question: which files,
//! from where, to where. A file set answers it once, as a list of glob
//! rules with `{placeholders}` filled from the project configuration,
//! and every consumer (copy, delete, checkout, zip, torrent, upload)
//! works from the same evaluated list of pairs.

use anyhow::Result;
use clap::{Parser, Subcommand};
use fileset_publisher::core::engine::{ActionOptions, FilesetAction, UploadOptions};
use fileset_publisher::utils;

#[derive(Parser)]
#[command(name = "fileset-publisher")]
#[command(about = "Select files with glob rules and publish them as archives, torrents or copies")]
#[command(version)]
struct Cli {
    /// Log every file handled
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a .fileset.toml in the current directory
    Init,
    /// Check the configuration and every set definition
    Validate,
    /// List every known file set and its rules
    Sets,
    /// Export the configuration to another format
    Export {
        /// Output file
        #[arg(short, long)]
        output: String,
        /// Output format (json, yaml, toml)
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
    /// Run an action on the files of a set
    Fileset {
        /// Set name to load (e.g. binaries, symbols)
        set: String,
        /// Action to execute on the listed files
        #[arg(value_enum)]
        action: FilesetAction,
        /// Source directory
        #[arg(long)]
        src: Option<String>,
        /// Destination directory, if relevant
        #[arg(long)]
        to: Option<String>,
        /// Add a key/value pair for use in string interpolation
        #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = utils::parse_key_value)]
        args: Vec<(String, String)>,
        /// Torrent output path
        #[arg(long)]
        output: Option<String>,
        /// Torrent tracker URL
        #[arg(long)]
        tracker: Option<String>,
    },
    /// Upload a fileset to the artifact repository
    Upload {
        /// Fileset to upload
        fileset: String,
        /// Upload the files as a zip archive
        #[arg(long)]
        archive: bool,
        /// If uploading as an archive, compress it
        #[arg(long)]
        compress: bool,
        /// Create a torrent for the uploaded fileset
        #[arg(long)]
        torrent: bool,
        /// Add a key/value pair for use in string interpolation
        #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = utils::parse_key_value)]
        args: Vec<(String, String)>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::init_logging(cli.verbose);

    match cli.command {
        Commands::Init => utils::initialize_project(),
        Commands::Validate => utils::validate_config(),
        Commands::Sets => utils::list_sets(),
        Commands::Export { output, format } => utils::export_config(&output, &format),
        Commands::Fileset {
            set,
            action,
            src,
            to,
            args,
            output,
            tracker,
        } => {
            let options = ActionOptions {
                src,
                to,
                output,
                tracker,
            };
            utils::run_fileset(&set, action, &options, &args, cli.verbose)
        }
        Commands::Upload {
            fileset,
            archive,
            compress,
            torrent,
            args,
        } => {
            let options = UploadOptions {
                archive,
                compress,
                torrent,
            };
            utils::upload_fileset(&fileset, options, &args)
        }
    }
}
