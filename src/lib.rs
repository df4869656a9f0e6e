//! Selects files with template-driven glob pipelines and publishes them as
//! zip archives, torrent descriptors, directory copies or source-control
//! transactions.

pub mod builders;
pub mod core;
pub mod utils;
