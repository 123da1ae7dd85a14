//! Service ports: traits + data contracts.

pub mod settings;
pub mod store;

pub use settings::{CompilerSettings, RunnerSettings, Settings, ShellSettings};
pub use store::{ProjectStore, StoreError, StoreFuture};
