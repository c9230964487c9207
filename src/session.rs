use crate::agent::prompt::Generated;
use crate::agent::CommandAgent;
use crate::config::{Config, ConfigError};
use crate::error::LinaixError;
use crate::history::{HistoryEntry, HistoryStore};
use crate::security::{classify_command, SafetyVerdict};
use crate::shell::{cd_target, CommandRunner, ShellTarget};
use colored::Colorize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub yes: bool,
    pub verbose: bool,
    pub fix: bool,
    pub interactive: bool,
}

/// How a task ended when nothing went wrong.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded,
    DryRun,
    Declined,
    ChangedDirectory(PathBuf),
}

/// One task end to end: generate, validate, confirm, execute.
pub struct Session {
    /// `None` when no provider is configured; only history reruns work then.
    agent: Option<CommandAgent>,
    pub shell: ShellTarget,
    pub config: Config,
    pub options: RunOptions,
    pub history: Option<HistoryStore>,
    runner: Box<dyn CommandRunner>,
}

impl Session {
    pub fn new(
        agent: Option<CommandAgent>,
        shell: ShellTarget,
        config: Config,
        options: RunOptions,
        history: Option<HistoryStore>,
        runner: Box<dyn CommandRunner>,
    ) -> Self {
        Self {
            agent,
            shell: shell.resolve(),
            config,
            options,
            history,
            runner,
        }
    }

    /// `confirm` is asked before anything runs; it gets the command and its verdict.
    pub fn handle_task(
        &mut self,
        task: &str,
        confirm: &mut dyn FnMut(&str, &SafetyVerdict) -> bool,
    ) -> Result<Outcome, LinaixError> {
        let task = self.config.resolve_task(task).to_string();
        let generated = self.agent()?.generate(&task)?;
        self.process(&task, generated, confirm, self.options.fix)
    }

    /// Validate and run a command from history again. The stored verdict is
    /// not trusted; the command is classified afresh.
    pub fn rerun(
        &mut self,
        entry: &HistoryEntry,
        confirm: &mut dyn FnMut(&str, &SafetyVerdict) -> bool,
    ) -> Result<Outcome, LinaixError> {
        let generated = Generated {
            command: entry.command.clone(),
            explanation: None,
        };
        self.process(&entry.task, generated, confirm, false)
    }

    fn process(
        &mut self,
        task: &str,
        generated: Generated,
        confirm: &mut dyn FnMut(&str, &SafetyVerdict) -> bool,
        allow_fix: bool,
    ) -> Result<Outcome, LinaixError> {
        let command = generated.command;
        println!("{} {}", "Command:".bold(), command.cyan());
        if self.options.verbose {
            if let Some(explanation) = &generated.explanation {
                println!("{} {}", "Explanation:".bold(), explanation.dimmed());
            }
        }

        let verdict = classify_command(&command);
        tracing::debug!(%command, %verdict, "classified");
        let entry_id = self.record(task, &command, &verdict);

        if verdict.is_blocked() {
            return Err(LinaixError::Blocked {
                command,
                reason: verdict.reason.unwrap_or_default(),
            });
        }
        if let Some(reason) = &verdict.reason {
            println!("{} {}", "Warning:".yellow().bold(), reason);
        }
        if self.options.dry_run {
            return Ok(Outcome::DryRun);
        }

        let ask = verdict.needs_confirmation() || !self.options.yes;
        if ask && !confirm(&command, &verdict) {
            println!("{}", "Cancelled.".dimmed());
            return Ok(Outcome::Declined);
        }

        if self.options.interactive {
            if let Some(dir) = cd_target(&command) {
                return self.change_directory(entry_id, dir);
            }
        }

        let outcome = self
            .runner
            .run(&command)
            .map_err(|e| LinaixError::from_shell(&command, e))?;
        self.mark_executed(entry_id, outcome.exit_code);

        if outcome.success() {
            return Ok(Outcome::Succeeded);
        }

        let code = outcome.reported_code();
        let message = if outcome.timed_out {
            "command timed out".to_string()
        } else {
            format!("command exited with status {}", code)
        };
        eprintln!("{} {}", "Error:".red().bold(), message);

        if let (true, false, Some(agent)) =
            (self.options.verbose, outcome.timed_out, self.agent.as_ref())
        {
            match agent.explain_error(&command, &outcome.stderr) {
                Ok(explanation) => println!("{} {}", "Why:".bold(), explanation),
                Err(e) => tracing::warn!(error = %e, "could not explain the failure"),
            }
        }

        if allow_fix {
            println!("{}", "Asking for a corrected command...".dimmed());
            let fixed = self.agent()?.suggest_fix(task, &command, &outcome.stderr)?;
            return self.process(task, fixed, confirm, false);
        }

        Err(LinaixError::Execution {
            command,
            code,
            message,
        })
    }

    fn agent(&self) -> Result<&CommandAgent, LinaixError> {
        self.agent
            .as_ref()
            .ok_or_else(|| ConfigError::NoProvider.into())
    }

    fn change_directory(
        &mut self,
        entry_id: Option<i64>,
        dir: PathBuf,
    ) -> Result<Outcome, LinaixError> {
        match std::env::set_current_dir(&dir) {
            Ok(()) => {
                self.mark_executed(entry_id, Some(0));
                println!("{} {}", "Now in".dimmed(), dir.display());
                Ok(Outcome::ChangedDirectory(dir))
            }
            Err(e) => {
                self.mark_executed(entry_id, Some(1));
                Err(LinaixError::Execution {
                    command: format!("cd {}", dir.display()),
                    code: 1,
                    message: format!("{}: {}", dir.display(), e),
                })
            }
        }
    }

    fn record(&self, task: &str, command: &str, verdict: &SafetyVerdict) -> Option<i64> {
        let store = self.history.as_ref()?;
        match store.record(task, command, verdict.severity) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "failed to record history");
                None
            }
        }
    }

    fn mark_executed(&self, entry_id: Option<i64>, exit_code: Option<i32>) {
        if let (Some(store), Some(id)) = (self.history.as_ref(), entry_id) {
            if let Err(e) = store.mark_executed(id, exit_code) {
                tracing::warn!(error = %e, "failed to update history");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmProvider};
    use crate::security::Severity;
    use crate::shell::{ExecutionOutcome, ShellError};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct MockLlm {
        replies: RefCell<Vec<String>>,
    }

    impl MockLlm {
        fn new(replies: &[&str]) -> Self {
            let mut r: Vec<String> = replies.iter().map(|s| s.to_string()).collect();
            r.reverse();
            Self {
                replies: RefCell::new(r),
            }
        }
    }

    impl LlmProvider for MockLlm {
        fn name(&self) -> &str {
            "mock"
        }

        fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
            self.replies
                .borrow_mut()
                .pop()
                .ok_or(LlmError::EmptyResponse)
        }
    }

    /// Records commands instead of running them; replies with scripted exit codes.
    struct RecordingRunner {
        ran: Rc<RefCell<Vec<String>>>,
        codes: RefCell<Vec<i32>>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, command: &str) -> Result<ExecutionOutcome, ShellError> {
            self.ran.borrow_mut().push(command.to_string());
            let code = self.codes.borrow_mut().pop().unwrap_or(0);
            Ok(ExecutionOutcome {
                exit_code: Some(code),
                stderr: if code == 0 {
                    String::new()
                } else {
                    "boom".to_string()
                },
                timed_out: false,
            })
        }
    }

    fn session(
        replies: &[&str],
        exit_codes: &[i32],
        options: RunOptions,
    ) -> (Session, Rc<RefCell<Vec<String>>>) {
        let ran = Rc::new(RefCell::new(Vec::new()));
        let mut codes = exit_codes.to_vec();
        codes.reverse();
        let runner = RecordingRunner {
            ran: Rc::clone(&ran),
            codes: RefCell::new(codes),
        };
        let agent = CommandAgent::new(Box::new(MockLlm::new(replies)), ShellTarget::Bash, false);
        let session = Session::new(
            Some(agent),
            ShellTarget::Bash,
            Config::default(),
            options,
            Some(HistoryStore::in_memory().unwrap()),
            Box::new(runner),
        );
        (session, ran)
    }

    #[test]
    fn test_safe_command_runs_after_confirmation() {
        let (mut s, ran) = session(&["ls *.py"], &[0], RunOptions::default());
        let mut asked = Vec::new();
        let outcome = s
            .handle_task("list python files", &mut |cmd, v| {
                asked.push((cmd.to_string(), v.severity));
                true
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Succeeded);
        assert_eq!(asked, vec![("ls *.py".to_string(), Severity::Safe)]);
        assert_eq!(*ran.borrow(), vec!["ls *.py"]);
    }

    #[test]
    fn test_yes_skips_prompt_for_safe_only() {
        let options = RunOptions {
            yes: true,
            ..Default::default()
        };
        let (mut s, ran) = session(&["ls", "rm -rf /tmp/cache"], &[0, 0], options);
        let mut prompts = 0;
        s.handle_task("list", &mut |_, _| {
            prompts += 1;
            true
        })
        .unwrap();
        assert_eq!(prompts, 0);

        let outcome = s
            .handle_task("clear cache", &mut |_, v| {
                prompts += 1;
                assert_eq!(v.severity, Severity::Destructive);
                false
            })
            .unwrap();
        assert_eq!(prompts, 1);
        assert_eq!(outcome, Outcome::Declined);
        assert_eq!(*ran.borrow(), vec!["ls"]);
    }

    #[test]
    fn test_blocked_command_never_runs_or_prompts() {
        let (mut s, ran) = session(&["ls | grep foo"], &[], RunOptions::default());
        let result = s.handle_task("find foo", &mut |_, _| panic!("must not prompt"));
        match result {
            Err(LinaixError::Blocked { command, .. }) => assert_eq!(command, "ls | grep foo"),
            other => panic!("expected blocked, got {:?}", other),
        }
        assert!(ran.borrow().is_empty());
        let entries = s.history.as_ref().unwrap().list().unwrap();
        assert_eq!(entries[0].verdict, Severity::Blocked);
        assert!(!entries[0].executed);
    }

    #[test]
    fn test_dry_run_never_executes() {
        let options = RunOptions {
            dry_run: true,
            ..Default::default()
        };
        let (mut s, ran) = session(&["rm -rf /tmp/cache"], &[], options);
        let outcome = s
            .handle_task("clear cache", &mut |_, _| panic!("must not prompt"))
            .unwrap();
        assert_eq!(outcome, Outcome::DryRun);
        assert!(ran.borrow().is_empty());
    }

    #[test]
    fn test_failure_propagates_exit_code() {
        let (mut s, _) = session(&["false"], &[3], RunOptions::default());
        let err = s.handle_task("fail", &mut |_, _| true).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        let entry = s.history.as_ref().unwrap().get(0).unwrap().unwrap();
        assert!(entry.executed);
        assert_eq!(entry.exit_code, Some(3));
    }

    #[test]
    fn test_fix_runs_one_corrected_command() {
        let options = RunOptions {
            fix: true,
            ..Default::default()
        };
        let (mut s, ran) = session(&["mkdir a/b", "mkdir -p a/b"], &[1, 0], options);
        let outcome = s.handle_task("make nested dir", &mut |_, _| true).unwrap();
        assert_eq!(outcome, Outcome::Succeeded);
        assert_eq!(*ran.borrow(), vec!["mkdir a/b", "mkdir -p a/b"]);
        assert_eq!(s.history.as_ref().unwrap().len().unwrap(), 2);
    }

    #[test]
    fn test_fix_is_attempted_once() {
        let options = RunOptions {
            fix: true,
            ..Default::default()
        };
        let (mut s, ran) = session(&["false", "false"], &[1, 2], options);
        let err = s.handle_task("fail", &mut |_, _| true).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(ran.borrow().len(), 2);
    }

    #[test]
    fn test_corrected_command_is_validated() {
        let options = RunOptions {
            fix: true,
            ..Default::default()
        };
        let (mut s, ran) = session(&["false", "rm -rf /"], &[1], options);
        let err = s.handle_task("fail", &mut |_, _| true).unwrap_err();
        assert!(matches!(err, LinaixError::Blocked { .. }));
        assert_eq!(*ran.borrow(), vec!["false"]);
    }

    #[test]
    fn test_alias_is_expanded() {
        let (mut s, _) = session(&["df -h"], &[0], RunOptions::default());
        s.config.add_alias("disk", "show disk usage").unwrap();
        s.handle_task("disk", &mut |_, _| true).unwrap();
        let entry = s.history.as_ref().unwrap().get(0).unwrap().unwrap();
        assert_eq!(entry.task, "show disk usage");
    }

    #[test]
    fn test_rerun_reclassifies() {
        let (mut s, ran) = session(&[], &[0], RunOptions::default());
        let entry = HistoryEntry {
            id: 1,
            task: "old".to_string(),
            command: "rm -rf /".to_string(),
            verdict: Severity::Safe,
            executed: false,
            exit_code: None,
            created_at: String::new(),
        };
        let err = s.rerun(&entry, &mut |_, _| true).unwrap_err();
        assert!(matches!(err, LinaixError::Blocked { .. }));
        assert!(ran.borrow().is_empty());
    }

    fn stored(command: &str) -> HistoryEntry {
        HistoryEntry {
            id: 1,
            task: "earlier task".to_string(),
            command: command.to_string(),
            verdict: Severity::Safe,
            executed: true,
            exit_code: Some(0),
            created_at: String::new(),
        }
    }

    #[test]
    fn test_rerun_without_provider() {
        let (mut s, ran) = session(&[], &[0], RunOptions::default());
        s.agent = None;
        let outcome = s.rerun(&stored("du -sh ."), &mut |_, _| true).unwrap();
        assert_eq!(outcome, Outcome::Succeeded);
        assert_eq!(*ran.borrow(), vec!["du -sh ."]);
    }

    #[test]
    fn test_new_task_without_provider_is_config_error() {
        let (mut s, _) = session(&[], &[], RunOptions::default());
        s.agent = None;
        let err = s.handle_task("list files", &mut |_, _| true).unwrap_err();
        assert!(matches!(err, LinaixError::Config(ConfigError::NoProvider)));
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFIG);
    }

    #[test]
    fn test_works_without_history() {
        let (mut s, ran) = session(&["pwd"], &[0], RunOptions::default());
        s.history = None;
        assert_eq!(
            s.handle_task("where am i", &mut |_, _| true).unwrap(),
            Outcome::Succeeded
        );
        assert_eq!(ran.borrow().len(), 1);
    }
}
