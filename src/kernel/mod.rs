//! Headless workspace core: tree, sessions, compile/run pipeline and shell.

pub mod compiler;
pub mod language;
pub mod sandbox;
pub mod script;
pub mod search;
pub mod services;
pub mod session;
pub mod shell;
pub mod workspace;

pub use compiler::{CompileFailure, CompilePipeline, CompileResult, CompilerOptions};
pub use language::LanguageId;
pub use sandbox::{
    LogEvent, LogLevel, RunFailure, RunOutcome, RunReport, RunState, RunStatus, RunnerConfig,
    SandboxRunner,
};
pub use search::{search_workspace, FileMatches, LineMatch, SearchError, SearchOptions};
pub use session::{SessionError, SessionManager, Tab, TabId};
pub use shell::{CommandInterpreter, ShellConfig, ShellEffect, ShellOutcome, TranscriptEntry};
pub use workspace::{Workspace, WorkspaceError};
