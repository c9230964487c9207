use crate::agent::AgentError;
use crate::config::ConfigError;
use crate::llm::LlmError;
use crate::shell::ShellError;
use std::fmt;

pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_PROVIDER: i32 = 3;
pub const EXIT_BLOCKED: i32 = 4;
/// Conventional shell code for "command could not be started".
pub const EXIT_SPAWN_FAILED: i32 = 127;

/// Top-level error for one invocation.
#[derive(Debug)]
pub enum LinaixError {
    Config(ConfigError),
    Provider(LlmError),
    InvalidTask(String),
    Blocked { command: String, reason: String },
    Execution { command: String, code: i32, message: String },
    Storage(String),
    Terminal(String),
}

impl fmt::Display for LinaixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinaixError::Config(e) => write!(f, "Configuration error: {}", e),
            LinaixError::Provider(e) => write!(f, "Provider error: {}", e),
            LinaixError::InvalidTask(msg) => write!(f, "Invalid task: {}", msg),
            LinaixError::Blocked { command, reason } => {
                write!(f, "Command blocked: '{}' ({})", command, reason)
            }
            LinaixError::Execution { message, .. } => write!(f, "Execution failed: {}", message),
            LinaixError::Storage(msg) => write!(f, "History error: {}", msg),
            LinaixError::Terminal(msg) => write!(f, "Terminal error: {}", msg),
        }
    }
}

impl std::error::Error for LinaixError {}

impl LinaixError {
    pub fn exit_code(&self) -> i32 {
        match self {
            LinaixError::Config(_)
            | LinaixError::InvalidTask(_)
            | LinaixError::Storage(_)
            | LinaixError::Terminal(_) => EXIT_CONFIG,
            LinaixError::Provider(_) => EXIT_PROVIDER,
            LinaixError::Blocked { .. } => EXIT_BLOCKED,
            LinaixError::Execution { code, .. } => *code,
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            LinaixError::Config(e) => e.hint(),
            LinaixError::Provider(LlmError::AuthError(_)) => Some(
                "check the key with `linaix config` or store a new one with `linaix setup --api-key <KEY>`"
                    .to_string(),
            ),
            LinaixError::Provider(LlmError::ModelNotFound(_)) => {
                Some("pick another model with --model".to_string())
            }
            LinaixError::Provider(LlmError::Timeout(_)) => {
                Some("raise the limit with --timeout <SECS>".to_string())
            }
            LinaixError::Provider(LlmError::ConnectionError(_)) => {
                Some("check your network connection".to_string())
            }
            LinaixError::Blocked { .. } => {
                Some("the command was not executed; rephrase the task".to_string())
            }
            _ => None,
        }
    }
}

impl From<ConfigError> for LinaixError {
    fn from(e: ConfigError) -> Self {
        LinaixError::Config(e)
    }
}

impl From<LlmError> for LinaixError {
    fn from(e: LlmError) -> Self {
        LinaixError::Provider(e)
    }
}

impl From<AgentError> for LinaixError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::InvalidTask(msg) => LinaixError::InvalidTask(msg),
            AgentError::Llm(e) => LinaixError::Provider(e),
            AgentError::NoCommand => LinaixError::Provider(LlmError::EmptyResponse),
        }
    }
}

impl From<rusqlite::Error> for LinaixError {
    fn from(e: rusqlite::Error) -> Self {
        LinaixError::Storage(e.to_string())
    }
}

impl LinaixError {
    pub fn from_shell(command: &str, e: ShellError) -> Self {
        LinaixError::Execution {
            command: command.to_string(),
            code: EXIT_SPAWN_FAILED,
            message: e.to_string(),
        }
    }
}
