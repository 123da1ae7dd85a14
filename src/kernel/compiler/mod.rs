//! Compile pipeline: Lyx script source in, compiled script text out.
//!
//! The compiler itself is loaded lazily by [`CompilePipeline::initialize`];
//! concurrent callers share the same in-flight load. Compilation always uses
//! the same fixed [`ScriptOptions`], so equal sources give equal output.

mod ast;
mod codegen;
mod lexer;
mod parser;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::OnceCell;

use crate::kernel::script::{Script, ScriptOptions};

pub const DEFAULT_MAX_SOURCE_BYTES: usize = 256 * 1024;

/// Stack for the compiler thread. Nesting limits keep recursion well inside it.
const COMPILER_STACK_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerOptions {
    pub max_source_bytes: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }
}

/// A located syntax or semantic error in guest source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            message: message.into(),
            line,
            col,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileFailure {
    NotInitialized,
    TooLarge { size: usize, limit: usize },
    CompilerError(String),
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileFailure::NotInitialized => f.write_str("compiler is not initialized"),
            CompileFailure::TooLarge { size, limit } => {
                write!(f, "source is too large ({size} bytes, limit {limit})")
            }
            CompileFailure::CompilerError(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for CompileFailure {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileResult {
    Success { output: String },
    Failure { reason: CompileFailure },
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CompileResult::Success { .. })
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            CompileResult::Success { output } => Some(output),
            CompileResult::Failure { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<String, CompileFailure> {
        match self {
            CompileResult::Success { output } => Ok(output),
            CompileResult::Failure { reason } => Err(reason),
        }
    }
}

/// The loaded compiler: fixed options plus the front and back ends.
#[derive(Debug)]
struct LoadedCompiler {
    options: ScriptOptions,
}

impl LoadedCompiler {
    fn compile(&self, source: &str) -> Result<Script, CompileError> {
        let tokens = lexer::tokenize(source)?;
        let program = parser::parse(tokens)?;
        codegen::generate(&program, &self.options)
    }
}

#[derive(Debug)]
pub struct CompilePipeline {
    options: CompilerOptions,
    compiler: OnceCell<LoadedCompiler>,
    loads: AtomicUsize,
}

impl Default for CompilePipeline {
    fn default() -> Self {
        Self::new(CompilerOptions::default())
    }
}

impl CompilePipeline {
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            options,
            compiler: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn options(&self) -> CompilerOptions {
        self.options
    }

    pub async fn initialize(&self) {
        self.compiler
            .get_or_init(|| async {
                self.loads.fetch_add(1, Ordering::SeqCst);
                // let concurrent callers observe the load in flight
                tokio::task::yield_now().await;
                let options = ScriptOptions::default();
                tracing::info!(
                    target = %options.target,
                    module = %options.module,
                    strict = options.strict,
                    "compiler loaded"
                );
                LoadedCompiler { options }
            })
            .await;
    }

    pub fn is_initialized(&self) -> bool {
        self.compiler.initialized()
    }

    /// How many times the compiler has actually been loaded.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn compile(&self, source: &str) -> CompileResult {
        let Some(compiler) = self.compiler.get() else {
            return CompileResult::Failure {
                reason: CompileFailure::NotInitialized,
            };
        };

        let size = source.len();
        let limit = self.options.max_source_bytes;
        if size > limit {
            tracing::debug!(size, limit, "compile rejected: source too large");
            return CompileResult::Failure {
                reason: CompileFailure::TooLarge { size, limit },
            };
        }

        // the syntax tree is built, lowered and dropped on a thread whose
        // stack does not depend on the caller's
        let compiled = std::thread::scope(|scope| {
            std::thread::Builder::new()
                .name("lyxcode-compiler".to_string())
                .stack_size(COMPILER_STACK_BYTES)
                .spawn_scoped(scope, || compiler.compile(source))
                .map(|handle| handle.join())
        });
        let compiled = match compiled {
            Ok(joined) => joined,
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn compiler thread");
                return CompileResult::Failure {
                    reason: CompileFailure::CompilerError(format!(
                        "compiler unavailable: {e}"
                    )),
                };
            }
        };
        match compiled {
            Ok(Ok(script)) => {
                let output = script.to_string();
                tracing::debug!(
                    functions = script.functions.len(),
                    bytes = output.len(),
                    "compile succeeded"
                );
                CompileResult::Success { output }
            }
            Ok(Err(error)) => {
                tracing::debug!(error = %error, "compile failed");
                CompileResult::Failure {
                    reason: CompileFailure::CompilerError(error.to_string()),
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(message = %message, "compiler panicked");
                CompileResult::Failure {
                    reason: CompileFailure::CompilerError(format!(
                        "internal compiler error: {message}"
                    )),
                }
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "../../../tests/unit/kernel/compiler/pipeline.rs"]
mod tests;
