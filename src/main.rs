use clap::{Parser, Subcommand};
use colored::Colorize;
use rustyline::history::DefaultHistory;
use rustyline::Editor;

use linaix::agent::CommandAgent;
use linaix::completion::TaskCompleter;
use linaix::config::{Config, ConfigError, Overrides};
use linaix::error::LinaixError;
use linaix::history::HistoryStore;
use linaix::llm::{self, ProviderKind};
use linaix::security::{SafetyVerdict, Severity};
use linaix::session::{RunOptions, Session};
use linaix::shell::{ShellRunner, ShellTarget};

#[derive(Parser)]
#[command(name = "linaix", version)]
#[command(about = "Describe a task in plain language; get one shell command, checked before it runs.")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// What you want to do, e.g. "list all python files"
    task: Vec<String>,

    /// google | openai (aliases such as gemini or gpt are accepted)
    #[arg(short, long)]
    provider: Option<String>,
    /// Model name
    #[arg(short, long)]
    model: Option<String>,
    /// Shell the command is generated for and run with
    #[arg(short, long, value_enum)]
    shell: Option<ShellTarget>,
    /// Print the command without executing it
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Skip confirmation for SAFE commands (DESTRUCTIVE ones always ask)
    #[arg(short, long)]
    yes: bool,
    /// Network timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    /// Show explanations, and explain failures
    #[arg(short, long)]
    verbose: bool,
    /// After a failure, ask for one corrected command
    #[arg(long)]
    fix: bool,
    /// Read tasks in a loop
    #[arg(short, long)]
    interactive: bool,
    /// List recent commands
    #[arg(long)]
    history: bool,
    /// Check and run a command from the history again
    #[arg(long, value_name = "INDEX")]
    reuse: Option<usize>,
    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store provider, API key, model and shell
    Setup {
        #[arg(short, long)]
        provider: Option<String>,
        /// Prompted for when omitted and none is stored
        #[arg(long)]
        api_key: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short, long, value_enum)]
        shell: Option<ShellTarget>,
    },
    /// Manage task aliases
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },
    /// Show configuration
    Config,
}

#[derive(Subcommand)]
enum AliasAction {
    /// Add or replace an alias
    Add { name: String, task: Vec<String> },
    /// Remove an alias
    Remove { name: String },
    /// List aliases
    List,
}

fn main() {
    let cli = Cli::parse();
    linaix::logging::init(cli.debug);

    if let Err(e) = run(cli) {
        print_error(&e);
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), LinaixError> {
    match &cli.command {
        Some(Commands::Setup {
            provider,
            api_key,
            model,
            shell,
        }) => run_setup(provider.as_deref(), api_key.as_deref(), model.as_deref(), *shell),
        Some(Commands::Alias { action }) => run_alias(action),
        Some(Commands::Config) => {
            let config = Config::load()?;
            println!("{}", "Current configuration:".bold());
            println!();
            println!("{}", config.to_display_toml()?);
            Ok(())
        }
        None => run_task(&cli),
    }
}

fn run_task(cli: &Cli) -> Result<(), LinaixError> {
    if cli.history {
        return list_history();
    }

    let task = cli.task.join(" ");
    if !cli.interactive && cli.reuse.is_none() && task.trim().is_empty() {
        return Err(LinaixError::InvalidTask(
            "no task given; try `linaix \"list all python files\"`".to_string(),
        ));
    }

    let mut session = build_session(cli)?;

    if let Some(index) = cli.reuse {
        let entry = match session.history.as_ref() {
            Some(store) => store.get(index)?,
            None => None,
        }
        .ok_or_else(|| LinaixError::InvalidTask(format!("no history entry {}", index)))?;
        println!("{} {}", "Task:".bold(), entry.task);
        session.rerun(&entry, &mut confirm)?;
        return Ok(());
    }

    if cli.interactive {
        return run_interactive(&mut session);
    }

    session.handle_task(&task, &mut confirm)?;
    Ok(())
}

/// Rerunning a stored command needs no model unless it may have to explain
/// or correct a failure.
fn needs_provider(cli: &Cli) -> bool {
    cli.reuse.is_none() || cli.verbose || cli.fix
}

fn build_session(cli: &Cli) -> Result<Session, LinaixError> {
    let config = Config::load()?;
    let shell = cli.shell.unwrap_or(config.shell).resolve();

    let agent = if needs_provider(cli) {
        let overrides = Overrides {
            provider: cli.provider.clone(),
            model: cli.model.clone(),
            timeout_secs: cli.timeout,
        };
        let settings = config.provider_settings(&overrides)?;
        tracing::debug!(provider = %settings.kind, model = %settings.model, "provider selected");
        let provider = llm::create_provider(&settings)?;
        Some(CommandAgent::new(provider, shell, cli.verbose))
    } else {
        None
    };

    let runner = ShellRunner {
        target: shell,
        timeout: config.command_timeout(),
    };
    let options = RunOptions {
        dry_run: cli.dry_run,
        yes: cli.yes,
        verbose: cli.verbose,
        fix: cli.fix,
        interactive: cli.interactive,
    };

    Ok(Session::new(
        agent,
        shell,
        config,
        options,
        open_history(),
        Box::new(runner),
    ))
}

/// History is best effort; a broken database must not stop a command.
fn open_history() -> Option<HistoryStore> {
    let path = Config::history_path().ok()?;
    match HistoryStore::open(&path) {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!(
                "{} Failed to open history database: {}",
                "Warning:".yellow(),
                e
            );
            None
        }
    }
}

fn confirm(command: &str, verdict: &SafetyVerdict) -> bool {
    let prompt = if verdict.needs_confirmation() {
        format!("{} Run '{}'?", "This command is DESTRUCTIVE.".red().bold(), command)
    } else {
        format!("Run '{}'?", command)
    };
    // No terminal to ask on means no.
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}

fn run_interactive(session: &mut Session) -> Result<(), LinaixError> {
    println!("{}", format!("linaix v{}", env!("CARGO_PKG_VERSION")).bold());
    println!("Shell: {}", session.shell.to_string().green());
    println!(
        "Type {} or {} to exit, {} to complete an earlier task.\n",
        "exit".dimmed(),
        "Ctrl+D".dimmed(),
        "Tab".dimmed()
    );

    let earlier_tasks = match session.history.as_ref().map(HistoryStore::recent_tasks) {
        Some(Ok(tasks)) => tasks,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "cannot load earlier tasks");
            Vec::new()
        }
        None => Vec::new(),
    };

    let mut rl = Editor::<TaskCompleter, DefaultHistory>::new()
        .map_err(|e| LinaixError::Terminal(e.to_string()))?;
    // Oldest first, so the up arrow starts at the most recent task.
    for task in earlier_tasks.iter().rev() {
        let _ = rl.add_history_entry(task.as_str());
    }
    rl.set_helper(Some(TaskCompleter::new(earlier_tasks)));

    loop {
        match rl.readline(&format!("{} ", "linaix>".blue().bold())) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input == "exit" || input == "quit" {
                    break;
                }
                let _ = rl.add_history_entry(input);
                if let Some(helper) = rl.helper_mut() {
                    helper.remember(input);
                }

                if let Err(e) = session.handle_task(input, &mut confirm) {
                    print_error(&e);
                }
                println!();
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("Use Ctrl+D or 'exit' to quit.");
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => return Err(LinaixError::Terminal(err.to_string())),
        }
    }
    Ok(())
}

fn list_history() -> Result<(), LinaixError> {
    let store = HistoryStore::open(&Config::history_path()?)?;
    let entries = store.list()?;
    if entries.is_empty() {
        println!("No history yet.");
        return Ok(());
    }
    for (index, entry) in entries.iter().enumerate() {
        let verdict = match entry.verdict {
            Severity::Safe => entry.verdict.to_string().green(),
            Severity::Destructive => entry.verdict.to_string().yellow(),
            Severity::Blocked => entry.verdict.to_string().red(),
        };
        let status = match (entry.executed, entry.exit_code) {
            (false, _) => "not run".to_string(),
            (true, Some(code)) => format!("exit {}", code),
            (true, None) => "killed".to_string(),
        };
        println!(
            "{:>3}  {}  [{}] {}",
            index,
            entry.command.cyan(),
            verdict,
            status.dimmed()
        );
        println!("     {}", entry.task.dimmed());
    }
    Ok(())
}

fn run_setup(
    provider: Option<&str>,
    api_key: Option<&str>,
    model: Option<&str>,
    shell: Option<ShellTarget>,
) -> Result<(), LinaixError> {
    let path = Config::default_path()?;
    let mut config = Config::load_from(&path)?;

    let kind = config.provider_kind(provider)?;
    config.provider = kind.as_str().to_string();

    match api_key {
        Some(key) => config.set_api_key(kind, key),
        None if config.resolve_api_key(kind).is_err() => {
            let key = prompt_api_key(kind)?;
            config.set_api_key(kind, &key);
        }
        None => {}
    }
    if let Some(model) = model {
        config.model = Some(model.trim().to_string()).filter(|m| !m.is_empty());
    }
    if let Some(shell) = shell {
        config.shell = shell;
    }

    config.save_to(&path)?;
    println!("Saved configuration to {}", path.display().to_string().green());
    if config.model.is_none() {
        println!(
            "{} no model stored; pass --model on each run or rerun setup with --model",
            "Note:".yellow()
        );
    }
    Ok(())
}

fn prompt_api_key(kind: ProviderKind) -> Result<String, LinaixError> {
    let key = dialoguer::Password::new()
        .with_prompt(format!("{} API key", kind))
        .interact()
        .map_err(|e| LinaixError::Terminal(e.to_string()))?;
    if key.trim().is_empty() {
        return Err(ConfigError::MissingApiKey(kind).into());
    }
    Ok(key)
}

fn run_alias(action: &AliasAction) -> Result<(), LinaixError> {
    let path = Config::default_path()?;
    let mut config = Config::load_from(&path)?;
    match action {
        AliasAction::Add { name, task } => {
            config.add_alias(name, &task.join(" "))?;
            config.save_to(&path)?;
            println!("Alias '{}' saved.", name.cyan());
        }
        AliasAction::Remove { name } => {
            if config.remove_alias(name) {
                config.save_to(&path)?;
                println!("Alias '{}' removed.", name.cyan());
            } else {
                return Err(ConfigError::InvalidValue(format!("no alias named '{}'", name)).into());
            }
        }
        AliasAction::List => {
            if config.aliases.is_empty() {
                println!("No aliases defined.");
            }
            for (name, task) in &config.aliases {
                println!("  {} - {}", name.cyan(), task);
            }
        }
    }
    Ok(())
}

fn print_error(e: &LinaixError) {
    eprintln!("{} {}", "Error:".red().bold(), e);
    if let Some(hint) = e.hint() {
        eprintln!("  {} {}", "hint:".yellow(), hint);
    }
}
