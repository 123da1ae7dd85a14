//! Service adapters: IO and runtime specific implementations.

pub mod data_dir;
pub mod settings;
pub mod store;

pub use data_dir::{ensure_log_dir, get_default_project_path, get_log_dir};
pub use settings::{ensure_settings_file, get_settings_path, load_settings, load_settings_from};
pub use store::{JsonFileStore, MemoryStore};
