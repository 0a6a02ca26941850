//! label-crawl crate

pub mod backoff;
pub mod config;
pub mod decode;
pub mod extract;
pub mod persist;
pub mod watcher;
pub mod window;

pub use backoff::Backoff;
pub use config::{ConfigError, ResolverKind, WatchConfig};
pub use extract::{AbiExtractor, ExtractError, Extractor};
pub use persist::{LabelWriter, PersistError};
pub use watcher::{resume_cursor, CrawlError, CycleOutcome, Watcher};
pub use window::{ConfirmationWindow, Window};
