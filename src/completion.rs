use rustyline::completion::Completer;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};

/// Tab completion for the interactive prompt, offering earlier tasks.
pub struct TaskCompleter {
    tasks: Vec<String>,
}

impl TaskCompleter {
    /// `tasks` in the order candidates should be offered.
    pub fn new(tasks: Vec<String>) -> Self {
        Self { tasks }
    }

    pub fn remember(&mut self, task: &str) {
        let task = task.trim();
        if task.is_empty() {
            return;
        }
        self.tasks.retain(|t| t != task);
        self.tasks.insert(0, task.to_string());
    }

    /// Tasks starting with `prefix`, ignoring case.
    pub fn candidates(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.trim_start().to_lowercase();
        self.tasks
            .iter()
            .filter(|t| t.to_lowercase().starts_with(&prefix))
            .cloned()
            .collect()
    }
}

impl Completer for TaskCompleter {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let prefix = line.get(..pos).unwrap_or(line);
        Ok((0, self.candidates(prefix)))
    }
}

impl Hinter for TaskCompleter {
    type Hint = String;
}

impl Highlighter for TaskCompleter {}

impl Validator for TaskCompleter {}

impl Helper for TaskCompleter {}

#[cfg(test)]
mod tests {
    use super::*;

    fn completer() -> TaskCompleter {
        TaskCompleter::new(vec![
            "list python files".to_string(),
            "show disk usage".to_string(),
            "List hidden files".to_string(),
        ])
    }

    #[test]
    fn test_candidates_match_prefix_ignoring_case() {
        let c = completer();
        assert_eq!(
            c.candidates("lis"),
            vec!["list python files", "List hidden files"]
        );
        assert_eq!(c.candidates("SHOW"), vec!["show disk usage"]);
        assert!(c.candidates("remove").is_empty());
    }

    #[test]
    fn test_empty_prefix_offers_everything() {
        assert_eq!(completer().candidates("").len(), 3);
    }

    #[test]
    fn test_remember_moves_task_to_front() {
        let mut c = completer();
        c.remember("show disk usage");
        c.remember("  count lines  ");
        c.remember("");
        assert_eq!(
            c.candidates(""),
            vec![
                "count lines",
                "show disk usage",
                "list python files",
                "List hidden files"
            ]
        );
    }
}
