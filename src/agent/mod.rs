pub mod prompt;

use crate::llm::{LlmError, LlmProvider};
use crate::shell::ShellTarget;
use prompt::{Generated, PromptContext};
use std::fmt;

pub const MAX_TASK_CHARS: usize = 1000;

#[derive(Debug)]
pub enum AgentError {
    InvalidTask(String),
    Llm(LlmError),
    NoCommand,
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::InvalidTask(msg) => write!(f, "Invalid task: {}", msg),
            AgentError::Llm(e) => write!(f, "{}", e),
            AgentError::NoCommand => write!(f, "The provider did not return a command"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        AgentError::Llm(e)
    }
}

pub fn validate_task(task: &str) -> Result<&str, AgentError> {
    let task = task.trim();
    if task.is_empty() {
        return Err(AgentError::InvalidTask("task is empty".to_string()));
    }
    if task.chars().count() > MAX_TASK_CHARS {
        return Err(AgentError::InvalidTask(format!(
            "task is too long (max {} characters)",
            MAX_TASK_CHARS
        )));
    }
    Ok(task)
}

/// Turns tasks into commands through a single provider.
pub struct CommandAgent {
    pub llm: Box<dyn LlmProvider>,
    pub shell: ShellTarget,
    pub explain: bool,
}

impl CommandAgent {
    pub fn new(llm: Box<dyn LlmProvider>, shell: ShellTarget, explain: bool) -> Self {
        Self {
            llm,
            shell: shell.resolve(),
            explain,
        }
    }

    /// The current directory is read on every call; interactive mode can `cd`.
    fn context(&self) -> PromptContext {
        PromptContext {
            shell: self.shell,
            os: std::env::consts::OS.to_string(),
            cwd: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| ".".to_string()),
            explain: self.explain,
        }
    }

    pub fn generate(&self, task: &str) -> Result<Generated, AgentError> {
        let task = validate_task(task)?;
        let prompt = prompt::command_prompt(task, &self.context());
        self.ask(&prompt)
    }

    /// Ask for a replacement after `failed_command` exited with `error`.
    pub fn suggest_fix(
        &self,
        task: &str,
        failed_command: &str,
        error: &str,
    ) -> Result<Generated, AgentError> {
        let task = validate_task(task)?;
        let error = if error.trim().is_empty() {
            "the command exited with a non-zero status and no error output"
        } else {
            error
        };
        let prompt = prompt::fix_prompt(task, failed_command, error, &self.context());
        self.ask(&prompt)
    }

    pub fn explain_error(&self, command: &str, error: &str) -> Result<String, AgentError> {
        let prompt = prompt::error_explanation_prompt(command, error, self.shell);
        Ok(self.llm.generate(&prompt)?.trim().to_string())
    }

    fn ask(&self, prompt: &str) -> Result<Generated, AgentError> {
        tracing::debug!(provider = self.llm.name(), "requesting command");
        let raw = self.llm.generate(prompt)?;
        let generated = prompt::parse_response(&raw);
        if generated.command.is_empty() {
            return Err(AgentError::NoCommand);
        }
        tracing::debug!(command = %generated.command, "provider returned command");
        Ok(generated)
    }
}
