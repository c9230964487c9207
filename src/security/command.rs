use super::{SafetyVerdict, Severity};
use regex::Regex;
use std::sync::LazyLock;

pub const UNPARSEABLE_REASON: &str = "empty or unparseable command";

/// Longer commands are refused outright.
pub const MAX_COMMAND_LENGTH: usize = 500;

/// Inline scripts (`bash -c '...'`) are classified recursively up to this depth.
const MAX_NESTING: usize = 4;

/// Operators that turn one command into several. Checked in order so `&&`
/// is reported before a lone `&`.
const COMPOSITION_OPERATORS: &[(&str, &str)] = &[
    ("\n", "a multi-line command"),
    ("\r", "a multi-line command"),
    ("`", "backtick substitution"),
    ("$(", "command substitution '$('"),
    ("&&", "command chaining '&&'"),
    ("||", "command chaining '||'"),
    ("|", "a pipe '|'"),
    (";", "command chaining ';'"),
    (">", "output redirection '>'"),
    ("<", "input redirection '<'"),
    ("&", "background execution '&'"),
];

const ELEVATION_PREFIXES: &[&str] = &[
    "sudo", "doas", "pkexec", "su", "runas", "gksudo", "kdesudo",
];

/// Prefixes that run the next token as the real command.
const WRAPPERS: &[&str] = &[
    "env", "nice", "ionice", "nohup", "time", "command", "exec", "timeout", "stdbuf", "builtin",
];

/// Options of `wrapper` that consume the following token.
fn wrapper_value_flags(wrapper: &str) -> &'static [&'static str] {
    match wrapper {
        "sudo" => &[
            "-u", "-g", "-p", "-h", "-C", "-D", "-r", "-t", "-T", "-U", "--user", "--group",
            "--prompt", "--host", "--close-from", "--chdir", "--role", "--type",
            "--command-timeout", "--other-user",
        ],
        "doas" => &["-u", "-C"],
        "pkexec" => &["--user"],
        "gksudo" | "kdesudo" => &["-u", "-D", "--user", "--description"],
        "env" => &["-u", "-C", "--unset", "--chdir"],
        "nice" => &["-n", "--adjustment"],
        "ionice" => &["-c", "-n", "-p", "-P", "-u", "--class", "--classdata", "--pid", "--pgid", "--uid"],
        "time" => &["-f", "-o", "--format", "--output"],
        "timeout" => &["-s", "-k", "--signal", "--kill-after"],
        "stdbuf" => &["-i", "-o", "-e", "--input", "--output", "--error"],
        "exec" => &["-a"],
        _ => &[],
    }
}

/// Options of `wrapper` whose value is itself a command line.
fn wrapper_script_flags(wrapper: &str) -> &'static [&'static str] {
    match wrapper {
        "env" => &["-S", "--split-string"],
        _ => &[],
    }
}

const DENYLIST: &[&str] = &[
    // filesystem
    "rm", "rmdir", "unlink", "shred", "truncate", "srm",
    // disks
    "dd", "mkfs", "mke2fs", "mkswap", "fdisk", "sfdisk", "cfdisk", "gdisk", "parted", "wipefs",
    "blkdiscard", "mount", "umount", "swapoff",
    // ownership and permissions
    "chown", "chmod", "chgrp", "chattr", "setfacl",
    // processes and services
    "kill", "killall", "pkill", "systemctl", "service",
    // power
    "shutdown", "reboot", "halt", "poweroff", "init", "telinit",
    // firewall and accounts
    "iptables", "ip6tables", "nft", "ufw", "firewall-cmd", "userdel", "deluser", "groupdel",
    "passwd", "crontab",
    // windows
    "del", "erase", "rd", "format", "diskpart", "takeown", "icacls", "remove-item", "ri",
    "stop-process", "stop-computer", "restart-computer", "format-volume", "clear-disk",
    "initialize-disk",
];

const SHELL_INTERPRETERS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "fish"];

/// `find` actions that run another program on each match.
const FIND_EXEC_ACTIONS: &[&str] = &["-exec", "-execdir", "-ok", "-okdir"];

const XARGS_VALUE_FLAGS: &[&str] = &[
    "-a", "-d", "-E", "-I", "-L", "-n", "-P", "-s", "--arg-file", "--delimiter", "--eof",
    "--max-lines", "--max-args", "--max-procs", "--max-chars", "--process-slot-var",
];

static SUSPICIOUS_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"(?i)--no-preserve-root",
            "disables the safeguard against deleting the root directory",
        ),
        (
            r"(?i)\bof=/dev/(?:sd[a-z]|hd[a-z]|vd[a-z]|xvd[a-z]|nvme\d|mmcblk\d|disk\d|md\d)",
            "writes directly to a raw block device",
        ),
        (
            r"(?i)\b(?:shred|wipefs|blkdiscard)\b.*\s/dev/(?:sd|hd|vd|xvd|nvme|mmcblk|disk|md)",
            "wipes a raw block device",
        ),
        (r"(?i)^\s*format(?:\.com)?\s+[a-z]:", "formats a drive"),
    ]
    .into_iter()
    .filter_map(|(pattern, reason)| Regex::new(pattern).ok().map(|re| (re, reason)))
    .collect()
});

static DRIVE_ROOT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:[\\/]?\*?$").ok());

/// Classify a generated command as SAFE, DESTRUCTIVE or BLOCKED.
///
/// Pure and deterministic: the same input always yields the same verdict.
pub fn classify_command(command: &str) -> SafetyVerdict {
    classify_nested(command, 0)
}

fn classify_nested(command: &str, depth: usize) -> SafetyVerdict {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return SafetyVerdict::blocked(UNPARSEABLE_REASON);
    }
    if trimmed.chars().count() > MAX_COMMAND_LENGTH {
        return SafetyVerdict::blocked(format!(
            "command is too long (max {} characters)",
            MAX_COMMAND_LENGTH
        ));
    }

    if let Some(what) = find_composition(trimmed) {
        return SafetyVerdict::blocked(format!(
            "{} is not allowed; only a single command may run",
            what
        ));
    }

    let tokens = match tokenize(trimmed) {
        Some(tokens) if !tokens.is_empty() => tokens,
        _ => return SafetyVerdict::blocked(UNPARSEABLE_REASON),
    };

    let mut verdict = check_suspicious_patterns(trimmed);

    let invocation = resolve_invocation(&tokens);
    verdict = verdict.escalate(check_denylist(&invocation));
    verdict = verdict.escalate(check_recursive_root(invocation.argv));
    if !invocation.prefixes.is_empty() {
        verdict = verdict.escalate(scan_wrapped_arguments(&tokens));
    }

    if depth < MAX_NESTING {
        for script in &invocation.scripts {
            verdict = verdict.escalate(classify_nested(script, depth + 1));
        }
        verdict = verdict.escalate(check_embedded_commands(invocation.argv, depth));
    }

    verdict
}

fn find_composition(command: &str) -> Option<&'static str> {
    COMPOSITION_OPERATORS
        .iter()
        .find(|(op, _)| command.contains(op))
        .map(|(_, what)| *what)
}

/// Quote-aware split. Falls back to plain whitespace splitting when the only
/// problem is a stray backslash (Windows paths such as `C:\`), but refuses
/// input with unbalanced quotes.
fn tokenize(command: &str) -> Option<Vec<String>> {
    match shell_words::split(command) {
        Ok(tokens) => Some(tokens),
        Err(_) if quotes_balanced(command) => Some(
            command
                .split_whitespace()
                .map(|t| t.trim_matches(|c| c == '"' || c == '\'').to_string())
                .collect(),
        ),
        Err(_) => None,
    }
}

fn quotes_balanced(command: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    for c in command.chars() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ => {}
        }
    }
    !in_single && !in_double
}

/// Lowercased basename of an executable token, without a `.exe` suffix or a
/// leading alias-bypass backslash.
fn executable_name(token: &str) -> String {
    let token = token.trim_start_matches('\\');
    let base = token.rsplit(['/', '\\']).next().unwrap_or(token);
    let lower = base.to_ascii_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stripped) => stripped.to_string(),
        None => lower,
    }
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

struct Invocation<'a> {
    /// Wrapper and elevation prefixes, in order, as executable names.
    prefixes: Vec<String>,
    /// Command lines passed through wrapper options (`env -S '...'`).
    scripts: Vec<String>,
    /// The real executable followed by its arguments.
    argv: &'a [String],
}

fn resolve_invocation(tokens: &[String]) -> Invocation<'_> {
    let mut prefixes = Vec::new();
    let mut scripts = Vec::new();
    let mut i = 0;

    loop {
        while i < tokens.len() && is_env_assignment(&tokens[i]) {
            i += 1;
        }
        let Some(token) = tokens.get(i) else {
            break;
        };

        let name = executable_name(token);
        // `su` takes its command through `-c`, handled as an inline script.
        let is_prefix = name != "su"
            && (ELEVATION_PREFIXES.contains(&name.as_str()) || WRAPPERS.contains(&name.as_str()));
        if !is_prefix {
            break;
        }

        let value_flags = wrapper_value_flags(&name);
        let script_flags = wrapper_script_flags(&name);
        prefixes.push(name);
        i += 1;
        while let Some(opt) = tokens.get(i) {
            if opt == "--" {
                i += 1;
                break;
            }
            let numeric = opt.chars().next().is_some_and(|c| c.is_ascii_digit());
            if !opt.starts_with('-') && !numeric {
                break;
            }
            i += 1;
            if script_flags.contains(&opt.as_str()) {
                if let Some(script) = tokens.get(i) {
                    scripts.push(script.clone());
                    i += 1;
                }
            } else if value_flags.contains(&opt.as_str()) && i < tokens.len() {
                i += 1;
            }
        }
    }

    Invocation {
        prefixes,
        scripts,
        argv: tokens.get(i..).unwrap_or(&[]),
    }
}

fn is_denylisted(name: &str) -> bool {
    DENYLIST.contains(&name) || name.starts_with("mkfs.")
}

fn check_denylist(invocation: &Invocation<'_>) -> SafetyVerdict {
    let mut verdict = SafetyVerdict::safe();

    if let Some(first) = invocation.argv.first() {
        let name = executable_name(first);
        if is_denylisted(&name) {
            verdict = verdict.escalate(SafetyVerdict::destructive(format!(
                "'{}' can delete data or change system state",
                name
            )));
        } else if ELEVATION_PREFIXES.contains(&name.as_str()) {
            verdict = verdict.escalate(SafetyVerdict::destructive(format!(
                "runs with elevated privileges via '{}'",
                name
            )));
        }
    }

    for prefix in &invocation.prefixes {
        if ELEVATION_PREFIXES.contains(&prefix.as_str()) {
            verdict = verdict.escalate(SafetyVerdict::destructive(format!(
                "runs with elevated privileges via '{}'",
                prefix
            )));
        }
    }

    verdict
}

/// Wrapper options are not fully understood, so every later token that names
/// a denylisted program is treated as a possible executable.
fn scan_wrapped_arguments(tokens: &[String]) -> SafetyVerdict {
    let mut verdict = SafetyVerdict::safe();
    for (i, token) in tokens.iter().enumerate().skip(1) {
        let name = executable_name(token);
        if !is_denylisted(&name) {
            continue;
        }
        verdict = verdict
            .escalate(SafetyVerdict::destructive(format!(
                "'{}' can delete data or change system state",
                name
            )))
            .escalate(check_recursive_root(&tokens[i..]));
    }
    verdict
}

fn check_suspicious_patterns(command: &str) -> SafetyVerdict {
    SUSPICIOUS_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(command))
        .map(|(_, reason)| SafetyVerdict::blocked(*reason))
        .unwrap_or_else(SafetyVerdict::safe)
}

fn is_short_flag_group(arg: &str) -> bool {
    arg.len() > 1 && arg.starts_with('-') && !arg.starts_with("--")
}

/// `/`, a home directory or a drive root, or everything directly inside one,
/// after lexically resolving `.`, `..` and repeated slashes.
fn is_root_target(arg: &str) -> bool {
    if arg == "\\" || DRIVE_ROOT.as_ref().is_some_and(|re| re.is_match(arg)) {
        return true;
    }
    for home in ["${HOME}", "$HOME", "~"] {
        if let Some(rest) = arg.strip_prefix(home) {
            if rest.is_empty() || rest.starts_with('/') {
                return names_base(rest, true);
            }
        }
    }
    arg.starts_with('/') && names_base(arg, false)
}

/// Whether `path`, taken relative to some base directory, names the base
/// itself or `base/*`. With `can_escape`, climbing above the base counts too.
fn names_base(path: &str, can_escape: bool) -> bool {
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if part == ".." {
            if stack.pop().is_none() && can_escape {
                return true;
            }
        } else {
            stack.push(part);
        }
    }
    matches!(stack.as_slice(), [] | ["*"])
}

/// Recursive delete or ownership/permission change aimed at `/`, a home
/// directory or a drive root.
fn check_recursive_root(argv: &[String]) -> SafetyVerdict {
    let Some(first) = argv.first() else {
        return SafetyVerdict::safe();
    };
    let name = executable_name(first);
    let args = &argv[1..];

    let recursive = match name.as_str() {
        "rm" => args.iter().any(|a| {
            a == "--recursive" || (is_short_flag_group(a) && (a.contains('r') || a.contains('R')))
        }),
        "chmod" | "chown" | "chgrp" | "setfacl" => args
            .iter()
            .any(|a| a == "--recursive" || (is_short_flag_group(a) && a.contains('R'))),
        "rd" | "rmdir" | "del" | "erase" => args.iter().any(|a| a.eq_ignore_ascii_case("/s")),
        "remove-item" | "ri" => args
            .iter()
            .any(|a| a.to_ascii_lowercase().starts_with("-r")),
        _ => false,
    };
    if !recursive {
        return SafetyVerdict::safe();
    }

    match args
        .iter()
        .find(|a| !a.starts_with('-') && is_root_target(a))
    {
        Some(target) => SafetyVerdict::blocked(format!(
            "recursive '{}' on '{}' would affect the whole system or home directory",
            name, target
        )),
        None => SafetyVerdict::safe(),
    }
}

/// Commands run by another command: inline scripts, `find -exec` and `xargs`.
fn check_embedded_commands(argv: &[String], depth: usize) -> SafetyVerdict {
    let Some(first) = argv.first() else {
        return SafetyVerdict::safe();
    };
    match executable_name(first).as_str() {
        "find" => check_find(argv, depth),
        "xargs" => match xargs_command(&argv[1..]) {
            Some(inner) => classify_nested(&shell_words::join(inner), depth + 1),
            None => SafetyVerdict::safe(),
        },
        _ => match inline_script(argv) {
            Some(inner) => classify_nested(&inner, depth + 1),
            None => SafetyVerdict::safe(),
        },
    }
}

/// `find` deletes through `-delete` or any program it runs with `-exec`;
/// either one starting from a root target is as bad as `rm -rf /`.
fn check_find(argv: &[String], depth: usize) -> SafetyVerdict {
    let args = &argv[1..];
    let root = args
        .iter()
        .take_while(|a| !a.starts_with('-') && !a.starts_with('(') && !a.starts_with('!'))
        .find(|a| is_root_target(a));

    let mut verdict = SafetyVerdict::safe();
    if args.iter().any(|a| a == "-delete") {
        verdict = verdict.escalate(match root {
            Some(root) => SafetyVerdict::blocked(format!(
                "'find -delete' on '{}' would affect the whole system or home directory",
                root
            )),
            None => SafetyVerdict::destructive("'find -delete' removes every match"),
        });
    }

    let mut i = 0;
    while let Some(pos) = args[i..]
        .iter()
        .position(|a| FIND_EXEC_ACTIONS.contains(&a.as_str()))
    {
        let start = i + pos + 1;
        let inner: Vec<String> = args[start..]
            .iter()
            .take_while(|t| t.as_str() != ";" && t.as_str() != "+")
            .cloned()
            .collect();
        i = start + inner.len();
        if inner.is_empty() {
            continue;
        }

        let inner_verdict = classify_nested(&shell_words::join(&inner), depth + 1);
        verdict = verdict.escalate(match root {
            Some(root) if inner_verdict.severity >= Severity::Destructive => {
                SafetyVerdict::blocked(format!(
                    "'find' on '{}' runs '{}' on every file",
                    root,
                    executable_name(&inner[0])
                ))
            }
            _ => inner_verdict,
        });
    }
    verdict
}

/// The program `xargs` would run, after its own options.
fn xargs_command(args: &[String]) -> Option<&[String]> {
    let mut i = 0;
    while let Some(opt) = args.get(i) {
        if opt == "--" {
            i += 1;
            break;
        }
        if !opt.starts_with('-') {
            break;
        }
        i += 1;
        if XARGS_VALUE_FLAGS.contains(&opt.as_str()) {
            i += 1;
        }
    }
    args.get(i..).filter(|rest| !rest.is_empty())
}

/// The script passed to an interpreter (`bash -c`, `su -c`, `pwsh -Command`,
/// `cmd /c`), if any.
fn inline_script(argv: &[String]) -> Option<String> {
    let first = argv.first()?;
    let name = executable_name(first);
    let args = &argv[1..];

    if SHELL_INTERPRETERS.contains(&name.as_str()) {
        let pos = args
            .iter()
            .position(|a| is_short_flag_group(a) && a.ends_with('c'))?;
        return args.get(pos + 1).cloned();
    }

    match name.as_str() {
        "su" => {
            let pos = args.iter().position(|a| a == "-c" || a == "--command")?;
            args.get(pos + 1).cloned()
        }
        "powershell" | "pwsh" => {
            let pos = args.iter().position(|a| {
                let lower = a.to_ascii_lowercase();
                lower == "-command" || lower == "-c"
            })?;
            let rest = args.get(pos + 1..)?;
            (!rest.is_empty()).then(|| rest.join(" "))
        }
        "cmd" => {
            let pos = args.iter().position(|a| {
                let lower = a.to_ascii_lowercase();
                lower == "/c" || lower == "/k"
            })?;
            let rest = args.get(pos + 1..)?;
            (!rest.is_empty()).then(|| rest.join(" "))
        }
        _ => None,
    }
}
