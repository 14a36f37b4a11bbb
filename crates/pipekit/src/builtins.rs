//! Engine builtins (set, trap, exit)
//!
//! These three commands mutate session state, so they run in-process
//! instead of being spawned. Output is returned to the executor, which
//! routes stdout through the command's redirections like any other
//! command's output.

use crate::error::TrapError;
use crate::options::{ShellOption, ShellOptions};
use crate::trap::{SignalSpec, TrapRegistry};

/// What a builtin produced: captured streams, a status, and optionally a
/// request to terminate the session.
pub(crate) struct BuiltinResult {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) status: i32,
    /// `Some` when the builtin asks the session to exit with this code.
    pub(crate) exit: Option<i32>,
}

impl BuiltinResult {
    fn ok(stdout: String) -> Self {
        Self {
            stdout,
            stderr: String::new(),
            status: 0,
            exit: None,
        }
    }

    fn failed(status: i32, stderr: String) -> Self {
        Self {
            stdout: String::new(),
            stderr,
            status,
            exit: None,
        }
    }

    fn exit(code: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            status: code,
            exit: Some(code),
        }
    }
}

/// Whether `program` is handled in-process rather than spawned.
pub(crate) fn is_builtin(program: &str) -> bool {
    matches!(program, "set" | "trap" | "exit")
}

pub(crate) fn run(
    program: &str,
    args: &[String],
    options: &mut ShellOptions,
    traps: &mut TrapRegistry,
    last_status: i32,
) -> BuiltinResult {
    match program {
        "set" => run_set(args, options),
        "trap" => run_trap(args, traps),
        "exit" => run_exit(args, last_status),
        other => BuiltinResult::failed(127, format!("pipekit: {other}: command not found\n")),
    }
}

/// `set [-+][ex]... [-+]o [name]`
///
/// Flags may be clustered (`set -ex`); `-o` with no name lists option
/// state and `+o` prints the `set` commands that would recreate it.
fn run_set(args: &[String], options: &mut ShellOptions) -> BuiltinResult {
    if args.is_empty() {
        return BuiltinResult::ok(String::new());
    }

    let mut index = 0;
    while index < args.len() {
        let arg = &args[index];
        if arg == "--" {
            index += 1;
            break;
        }
        let enable = match arg.chars().next() {
            Some('-') => true,
            Some('+') => false,
            _ => break,
        };
        let flags = &arg[1..];
        if flags.is_empty() {
            return BuiltinResult::failed(2, format!("pipekit: set: {arg}: invalid option\n"));
        }
        let mut chars = flags.chars();
        while let Some(flag) = chars.next() {
            if flag == 'o' {
                // The name is whatever is glued to the cluster, else the
                // next argument; with neither, -o/+o are queries
                let glued: String = chars.collect();
                let name = if glued.is_empty() {
                    index += 1;
                    args.get(index).cloned()
                } else {
                    Some(glued)
                };
                match name {
                    Some(name) => match ShellOption::from_name(&name) {
                        Ok(option) => options.set(option, enable),
                        Err(err) => {
                            return BuiltinResult::failed(2, format!("pipekit: set: {err}\n"));
                        }
                    },
                    None if enable => return BuiltinResult::ok(options.render_listing()),
                    None => return BuiltinResult::ok(options.render_commands()),
                }
                break;
            }
            match ShellOption::from_short_flag(flag) {
                Some(option) => options.set(option, enable),
                None => {
                    let sign = if enable { '-' } else { '+' };
                    return BuiltinResult::failed(
                        2,
                        format!("pipekit: set: {sign}{flag}: invalid option\n"),
                    );
                }
            }
        }
        index += 1;
    }

    if index < args.len() {
        return BuiltinResult::failed(
            2,
            "pipekit: set: positional parameters are not supported\n".to_string(),
        );
    }
    BuiltinResult::ok(String::new())
}

/// `trap [--] [command signal...]`
///
/// With no operands, prints the registered traps on stderr, where the
/// xtrace stream also lives. An empty command (or `-`) resets each named
/// condition; otherwise the command is registered for every named
/// condition, all-or-nothing.
fn run_trap(args: &[String], traps: &mut TrapRegistry) -> BuiltinResult {
    let operands: &[String] = match args.first() {
        Some(first) if first == "--" => &args[1..],
        _ => args,
    };

    match operands {
        [] => {
            let mut listing = String::new();
            for (spec, command) in traps.list() {
                listing.push_str(&format!("trap -- '{command}' {spec}\n"));
            }
            BuiltinResult {
                stdout: String::new(),
                stderr: listing,
                status: 0,
                exit: None,
            }
        }
        [_single] => BuiltinResult::failed(
            2,
            "pipekit: trap: usage: trap [--] [command signal ...]\n".to_string(),
        ),
        [command, names @ ..] => {
            let mut specs = Vec::with_capacity(names.len());
            for name in names {
                match SignalSpec::parse(name) {
                    Ok(spec) => specs.push(spec),
                    Err(err) => return trap_failed(err),
                }
            }
            if command.is_empty() || command == "-" {
                for spec in specs {
                    traps.clear(spec);
                }
                return BuiltinResult::ok(String::new());
            }
            match traps.register_all(&specs, command) {
                Ok(()) => BuiltinResult::ok(String::new()),
                Err(err) => trap_failed(err),
            }
        }
    }
}

fn trap_failed(err: TrapError) -> BuiltinResult {
    BuiltinResult::failed(1, format!("pipekit: trap: {err}\n"))
}

/// `exit [code]`
///
/// With no operand, exits with the last command's status. A non-numeric
/// operand still exits, with status 2; extra operands abort the exit.
fn run_exit(args: &[String], last_status: i32) -> BuiltinResult {
    match args {
        [] => BuiltinResult::exit(last_status),
        [code] => match code.parse::<i32>() {
            Ok(code) => BuiltinResult::exit(code),
            Err(_) => BuiltinResult {
                stdout: String::new(),
                stderr: format!("pipekit: exit: {code}: numeric argument required\n"),
                status: 2,
                exit: Some(2),
            },
        },
        _ => BuiltinResult::failed(1, "pipekit: exit: too many arguments\n".to_string()),
    }
}
