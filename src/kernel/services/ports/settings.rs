use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::kernel::compiler::CompilerOptions;
use crate::kernel::sandbox::RunnerConfig;
use crate::kernel::shell::ShellConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub compiler: CompilerSettings,
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub shell: ShellSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerSettings {
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    #[serde(default = "default_max_string_bytes")]
    pub max_string_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellSettings {
    #[serde(default = "default_transcript_capacity")]
    pub transcript_capacity: usize,
}

fn default_max_source_bytes() -> usize {
    256 * 1024
}

fn default_deadline_ms() -> u64 {
    3_000
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_max_call_depth() -> usize {
    256
}

fn default_max_string_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_transcript_capacity() -> usize {
    500
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            max_source_bytes: default_max_source_bytes(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            max_output_bytes: default_max_output_bytes(),
            max_call_depth: default_max_call_depth(),
            max_string_bytes: default_max_string_bytes(),
        }
    }
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            transcript_capacity: default_transcript_capacity(),
        }
    }
}

impl Settings {
    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            max_source_bytes: self.compiler.max_source_bytes,
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            deadline: Duration::from_millis(self.runner.deadline_ms),
            max_output_bytes: self.runner.max_output_bytes,
            max_call_depth: self.runner.max_call_depth,
            max_string_bytes: self.runner.max_string_bytes,
        }
    }

    pub fn shell_config(&self) -> ShellConfig {
        ShellConfig {
            transcript_capacity: self.shell.transcript_capacity,
        }
    }
}

#[cfg(test)]
#[path = "../../../../tests/unit/kernel/services/ports/settings.rs"]
mod tests;
