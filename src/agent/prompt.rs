use crate::shell::ShellTarget;

const EXPLANATION_MARKER: &str = "[EXPLANATION:";

/// What the model is told about where the command will run.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub shell: ShellTarget,
    pub os: String,
    pub cwd: String,
    pub explain: bool,
}

/// A command extracted from a provider reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub command: String,
    pub explanation: Option<String>,
}

pub fn command_prompt(task: &str, ctx: &PromptContext) -> String {
    let mut prompt = format!(
        "Generate exactly one correct {shell} command for {os} to accomplish this task: {task}
Current directory: {cwd}

Rules:
- Output only the command on a single line, with no markdown and no commentary.
- Use a single command. Do not use pipes (|), command chaining (;, &&, ||), \
redirection (>, >>, <), backticks, $(...) subshells or background jobs (&).
- Prefer the least destructive way to do the task.",
        shell = ctx.shell.resolve(),
        os = ctx.os,
        task = task.trim(),
        cwd = ctx.cwd,
    );
    if ctx.explain {
        prompt.push_str(
            "\n- After the command, on a new line, add a brief explanation in the format: [EXPLANATION: ...]",
        );
    }
    prompt
}

pub fn fix_prompt(task: &str, failed_command: &str, error: &str, ctx: &PromptContext) -> String {
    let mut prompt = command_prompt(task, ctx);
    prompt.push_str(&format!(
        "\n\nThe previous command `{}` failed with this error:\n{}\nSuggest a corrected command that follows the same rules.",
        failed_command,
        error.trim()
    ));
    prompt
}

pub fn error_explanation_prompt(command: &str, error: &str, shell: ShellTarget) -> String {
    format!(
        "Briefly explain, in two or three sentences, why this {} command failed and what to do about it.\nCommand: {}\nError: {}",
        shell.resolve(),
        command,
        error.trim()
    )
}

/// Strip code fences, inline backticks and the explanation marker from a
/// provider reply. Everything after the first `[EXPLANATION:` belongs to the
/// explanation, up to its last `]`. Remaining non-empty lines are kept so
/// that a multi-line answer is still visible to the validator.
pub fn parse_response(text: &str) -> Generated {
    let (without_marker, explanation) = match text.split_once(EXPLANATION_MARKER) {
        Some((command, rest)) => {
            let body = rest.rfind(']').map_or(rest, |end| &rest[..end]);
            let explanation = Some(body.trim().to_string()).filter(|e| !e.is_empty());
            (command, explanation)
        }
        None => (text, None),
    };

    let lines: Vec<&str> = without_marker
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .collect();

    let mut command = lines.join("\n");
    if command.len() >= 2 && command.starts_with('`') && command.ends_with('`') && !command.contains('\n') {
        command = command[1..command.len() - 1].trim().to_string();
    }
    if let Some(rest) = command.strip_prefix("$ ") {
        command = rest.trim().to_string();
    }

    Generated {
        command,
        explanation,
    }
}
