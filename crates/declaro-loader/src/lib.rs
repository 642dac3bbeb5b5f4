//! Deduplicated asynchronous loading of declaro module documents.
//!
//! # Modules
//!
//! - [`loader`]: [`ModuleLoader`], one fetch per canonical key at a time
//! - [`lazy`]: [`LazyLoader`], an observable idle/loading/loaded/error wrapper
//! - [`cache`]: [`ModuleCache`], the explicit document cache
//! - [`fetch`]: the [`Fetcher`] capability with HTTP and filesystem backends
//! - [`document`]: module document parsing and hashing
//! - [`key`]: canonical key resolution
//! - [`config`]: [`LoaderConfig`]
//! - [`error`]: [`LoadError`]

pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod fetch;
pub mod key;
pub mod lazy;
pub mod loader;

// Re-export commonly used types
pub use cache::ModuleCache;
pub use config::LoaderConfig;
pub use document::{content_hash, parse_document};
pub use error::LoadError;
pub use fetch::{FetchResponse, Fetcher, FsFetcher, HttpFetcher, TransportError};
pub use key::canonicalize;
pub use lazy::{LazyLoader, LoadState};
pub use loader::ModuleLoader;
