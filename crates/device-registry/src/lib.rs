//! device-registry: dictionary of device commands and payload types
//!
//! The [`Directory`] mirrors the active command and payload-type definitions held by the
//! persistence layer. Readers take an immutable [`Dictionary`] snapshot; bulk refreshes and
//! point updates swap in a new snapshot instead of mutating the one being read.

mod types;
pub use types::*;

mod error;
pub use error::{DirectoryError, Result};

mod directory;
pub use directory::{Dictionary, Directory, RefreshSummary};

mod loader;
pub use loader::{
    load_dictionary_file, parse_dictionary, DictionaryFile, DictionarySource, FileDictionarySource,
};

mod metrics;
pub use metrics::{GatewayMetrics, MetricsHub};
