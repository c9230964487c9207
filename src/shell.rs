use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Exit code reported when a command is killed for running too long.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// How long to keep reading stderr once the command has exited or been killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);
const KILL_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ShellTarget {
    #[default]
    Auto,
    Bash,
    Zsh,
    Powershell,
    Cmd,
}

impl ShellTarget {
    /// Replace `Auto` with the shell this process would most likely be run from.
    pub fn resolve(self) -> ShellTarget {
        if self != ShellTarget::Auto {
            return self;
        }
        if cfg!(windows) {
            if std::env::var_os("PSModulePath").is_some() {
                ShellTarget::Powershell
            } else {
                ShellTarget::Cmd
            }
        } else {
            Self::from_shell_path(std::env::var("SHELL").ok().as_deref())
        }
    }

    fn from_shell_path(shell: Option<&str>) -> ShellTarget {
        let name = shell
            .and_then(|s| s.rsplit('/').next())
            .unwrap_or_default();
        match name {
            "zsh" => ShellTarget::Zsh,
            "pwsh" | "powershell" => ShellTarget::Powershell,
            _ => ShellTarget::Bash,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShellTarget::Auto => "auto",
            ShellTarget::Bash => "bash",
            ShellTarget::Zsh => "zsh",
            ShellTarget::Powershell => "powershell",
            ShellTarget::Cmd => "cmd",
        }
    }

    /// Program and leading arguments used to run one command string.
    pub fn invocation(&self, command: &str) -> (&'static str, Vec<String>) {
        match self.resolve() {
            ShellTarget::Zsh => ("zsh", vec!["-c".to_string(), command.to_string()]),
            ShellTarget::Powershell => {
                let program = if cfg!(windows) { "powershell" } else { "pwsh" };
                (
                    program,
                    vec![
                        "-NoProfile".to_string(),
                        "-Command".to_string(),
                        command.to_string(),
                    ],
                )
            }
            ShellTarget::Cmd => ("cmd", vec!["/C".to_string(), command.to_string()]),
            ShellTarget::Bash | ShellTarget::Auto => {
                ("bash", vec!["-c".to_string(), command.to_string()])
            }
        }
    }
}

impl fmt::Display for ShellTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ShellError {
    SpawnFailed(String),
    WaitFailed(String),
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellError::SpawnFailed(msg) => write!(f, "Failed to start command: {}", msg),
            ShellError::WaitFailed(msg) => write!(f, "Failed to wait for command: {}", msg),
        }
    }
}

impl std::error::Error for ShellError {}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Exit code to hand back to our own caller.
    pub fn reported_code(&self) -> i32 {
        if self.timed_out {
            TIMEOUT_EXIT_CODE
        } else {
            self.exit_code.unwrap_or(1)
        }
    }
}

pub trait CommandRunner {
    fn run(&self, command: &str) -> Result<ExecutionOutcome, ShellError>;
}

/// Runs commands through a real shell.
pub struct ShellRunner {
    pub target: ShellTarget,
    pub timeout: Option<Duration>,
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<ExecutionOutcome, ShellError> {
        run_command(command, self.target, self.timeout)
    }
}

/// Run `command` through the target shell. stdin and stdout stay attached to
/// the terminal; stderr is echoed as it arrives and also captured so a failure
/// can be explained or corrected afterwards.
pub fn run_command(
    command: &str,
    target: ShellTarget,
    timeout: Option<Duration>,
) -> Result<ExecutionOutcome, ShellError> {
    let (program, args) = target.invocation(command);
    tracing::debug!(program, command, "spawning command");
    spawn_and_wait(program, &args, timeout)
}

fn spawn_and_wait(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
) -> Result<ExecutionOutcome, ShellError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped());
    // A timed-out command is killed together with everything it started.
    // Its own process group leaves the terminal's foreground group, so this
    // only happens when a timeout is set.
    if timeout.is_some() {
        own_process_group(&mut cmd);
    }
    let mut child = cmd
        .spawn()
        .map_err(|e| ShellError::SpawnFailed(format!("{}: {}", program, e)))?;

    let captured = Arc::new(Mutex::new(String::new()));
    let (done_tx, done_rx) = mpsc::channel::<()>();
    if let Some(stderr) = child.stderr.take() {
        let sink = Arc::clone(&captured);
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                eprintln!("{}", line);
                if let Ok(mut buf) = sink.lock() {
                    buf.push_str(&line);
                    buf.push('\n');
                }
            }
            let _ = done_tx.send(());
        });
    }

    let waited = match timeout {
        Some(limit) => child.wait_timeout(limit),
        None => child.wait().map(Some),
    };

    let (exit_code, timed_out) = match waited {
        Ok(Some(status)) => (status.code(), false),
        Ok(None) => {
            kill_tree(&mut child);
            (None, true)
        }
        Err(e) => {
            kill_tree(&mut child);
            return Err(ShellError::WaitFailed(e.to_string()));
        }
    };

    // Something the command left behind may still hold stderr open; do not
    // wait for it indefinitely.
    let grace = if timed_out {
        KILL_GRACE
    } else {
        EXIT_GRACE
    };
    let _ = done_rx.recv_timeout(grace);
    let stderr = captured
        .lock()
        .map(|buf| buf.trim_end().to_string())
        .unwrap_or_default();

    Ok(ExecutionOutcome {
        exit_code,
        stderr,
        timed_out,
    })
}

fn kill_tree(child: &mut Child) {
    kill_process_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    if let Ok(pid) = i32::try_from(child.id()) {
        // SAFETY: plain signal delivery to a process group; fails harmlessly
        // with ESRCH when the child never got its own group.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// If `command` is a plain `cd`, the directory it targets. `cd` cannot run in
/// a child process, so interactive mode applies it to this process instead.
pub fn cd_target(command: &str) -> Option<PathBuf> {
    let mut words = shell_words::split(command.trim()).ok()?.into_iter();
    if words.next()? != "cd" {
        return None;
    }
    let target = words.next();
    if words.next().is_some() {
        return None;
    }

    let home = dirs::home_dir();
    match target.as_deref() {
        None | Some("~") => home,
        Some(path) => match (path.strip_prefix("~/"), home) {
            (Some(rest), Some(home)) => Some(home.join(rest)),
            _ => Some(PathBuf::from(path)),
        },
    }
}
