//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the bundle runtime.
//!
//! Config is consumed by [`RuntimeBuilder`](crate::RuntimeBuilder), which hands the
//! relevant values to the event manager (worker thread name) and the service
//! registry (table capacities).
//!
//! ## Sentinel values
//! - `data_root = None` → bundles have no private data area; `data_file` returns `None`.

use std::path::{Path, PathBuf};

/// Default name of the event delivery thread.
pub const DEFAULT_EVENT_THREAD_NAME: &str = "Framework Event Dispatcher";

/// Global configuration for the bundle runtime.
///
/// ## Field semantics
/// - `event_thread_name`: name given to the dedicated asynchronous delivery thread
/// - `initial_capacity`: starting capacity of the registry's top-level tables
/// - `initial_sub_capacity`: starting capacity of the nested per-key sets
/// - `data_root`: base directory for per-bundle data files
#[derive(Clone, Debug)]
pub struct Config {
    /// Name of the background worker thread used for asynchronous delivery.
    pub event_thread_name: String,

    /// Initial capacity of the registry's main tables.
    pub initial_capacity: usize,

    /// Initial capacity of nested per-interface and per-context sets.
    pub initial_sub_capacity: usize,

    /// Root directory under which each bundle gets `<root>/<bundle id>/`.
    pub data_root: Option<PathBuf>,
}

impl Config {
    /// Returns the data root if one was configured.
    #[inline]
    pub fn data_root(&self) -> Option<&Path> {
        self.data_root.as_deref()
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `event_thread_name = "Framework Event Dispatcher"`
    /// - `initial_capacity = 50`
    /// - `initial_sub_capacity = 10`
    /// - `data_root = None`
    fn default() -> Self {
        Self {
            event_thread_name: DEFAULT_EVENT_THREAD_NAME.to_string(),
            initial_capacity: 50,
            initial_sub_capacity: 10,
            data_root: None,
        }
    }
}
