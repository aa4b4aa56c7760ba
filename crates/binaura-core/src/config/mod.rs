//! Configuration for the engine and the persisted device selection
//!
//! - Generic YAML config loading/saving
//! - Standard config and preset paths
//! - `EngineConfig`: block size, sample rate, buffer pre-sizing, debounce
//! - `PersistedSelection`: the UID-keyed selection restored at launch
//!
//! # Usage
//!
//! ```ignore
//! use binaura_core::config::{load_config, save_config, default_config_path, PersistedSelection};
//!
//! let path = default_config_path("settings.yaml");
//! let selection: PersistedSelection = load_config(&path);
//! save_config(&selection, &path)?;
//! ```

mod engine;
mod io;
mod paths;
mod selection;

pub use engine::{
    EngineConfig, DEFAULT_BLOCK_SIZE, DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_BLOCK_SIZE,
    DEFAULT_MAX_CHANNELS, DEFAULT_SAMPLE_RATE,
};
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path, default_preset_dir};
pub use selection::PersistedSelection;
