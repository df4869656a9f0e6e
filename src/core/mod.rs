// This file is the module declaration file for the `core` module.
// It declares the pipeline, the publishers that consume it and the
// configuration/engine layer that wires them to the command line.

// `archive` module:
// Writes a zip archive of a pair sequence through a `.tmp` sibling, verifies
// it and renames it into place, retrying transient failures.
pub mod archive;

// `atomic` module:
// Temp-then-rename helpers shared by the publishers and the directory upload.
pub mod atomic;

// `checkout` module:
// The scoped transaction that adds a batch of paths to source control and
// either commits all of them or rolls every one back.
pub mod checkout;

// `config` module:
// The `.fileset.toml` data structures, the `ConfigProvider` trait and the
// `ConfigManager` that finds, loads, saves, validates and exports them.
pub mod config;

// `context` module:
// Scalar values and the immutable `TemplateContext` that resolves
// `{placeholder}` templates.
pub mod context;

// `engine` module:
// `FilesetEngine`, which runs `fileset` actions and `upload`.
pub mod engine;

pub mod error;

// `git` module:
// The `SourceControl` trait and its git2-backed implementation.
pub mod git;

// `mapper` module:
// The `FileMapper` pipeline producing `(source, destination)` pairs.
pub mod mapper;

pub mod retry;

// `torrent` module:
// Bencoded torrent descriptors with SHA-1 piece hashes.
pub mod torrent;
