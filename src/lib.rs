pub mod config;
pub mod directory;
pub mod error;
pub mod fs;
pub mod http;
pub mod path;
pub mod persistence;
pub mod run;
pub mod schema;

pub use config::RasConfig;
pub use directory::model::{RunResult, SearchCriteria, SortDirection, SortField, TestClass};
pub use directory::service::DirectoryService;
pub use error::RasError;
pub use fs::service::ArtifactFileSystem;
pub use path::model::ArtifactPath;
pub use run::model::{RunState, TestStructure};
pub use run::service::{NamedRun, ProcessTerminator, RunIdentity, RunStore, Terminator};

/// Installs the fmt subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}
