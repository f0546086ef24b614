//! Configuration Management Module
//!
//! Process-wide bridge settings and their on-disk storage.

pub mod settings;
pub mod storage;

pub use settings::{BridgeSettings, SETTINGS_VERSION};
pub use storage::{config_dir, log_dir, settings_file, SettingsStorage, StorageError};
