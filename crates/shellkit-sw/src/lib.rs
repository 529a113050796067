//! # ShellKit Offline Cache Controller
//!
//! Keeps a small site usable offline by intercepting its requests.
//!
//! ## Features
//!
//! - **Classification**: cross-origin, dynamic API, static asset
//! - **Seeding**: all-or-nothing precache of the app shell
//! - **Stale-while-revalidate**: cached static assets served at once, refreshed in the background
//! - **Network-first**: API calls always go to the network, with a JSON offline fallback
//! - **Generations**: one live cache generation; older ones are swept on activation
//!
//! ## Architecture
//!
//! ```text
//! OfflineController
//!     ├── RequestClassifier (origin + API prefix)
//!     ├── Fetcher (shellkit-net)
//!     ├── BackgroundTasks ──▶ ControllerEvent channel
//!     └── CacheStore
//!             ├── MemoryCacheStore
//!             └── FileCacheStore
//!                     └── Cache (generation)
//!                             └── request key → CacheEntry
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──initialize()──▶ Activating ──▶ Ready
//!                                      └──────▶ Failed
//! ```

pub mod background;
pub mod classify;
pub mod config;
pub mod controller;
pub mod entry;
pub mod error;
pub mod event;
pub mod file_store;
pub mod store;

pub use background::BackgroundTasks;
pub use classify::{RequestClass, RequestClassifier};
pub use config::{
    ConfigError, ControllerConfig, GenerationId, DEFAULT_API_PREFIX, DEFAULT_GENERATION,
    DEFAULT_ORIGIN, DEFAULT_SEED_URLS,
};
pub use controller::{offline_fallback, FetchDecision, OfflineController, SweepReport};
pub use entry::{Cache, CacheEntry};
pub use error::{CacheError, ControllerError};
pub use event::{ControllerEvent, ControllerState};
pub use file_store::FileCacheStore;
pub use store::{CacheStore, MemoryCacheStore};
