//! Shell execution options
//!
//! The three options a session tracks (errexit, xtrace, pipefail) plus
//! the conditional-context depth that exempts test expressions, and-or
//! chain operands, and negated pipelines from errexit. The depth is a
//! counter because contexts nest.

use std::fmt::Write as _;

use crate::error::OptionError;

/// The three execution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellOption {
    /// -e: terminate the session when a command fails outside a
    /// conditional context
    Errexit,
    /// -x: write each command to the trace stream before running it
    Xtrace,
    /// -o pipefail: report a pipeline's first failure instead of its last
    Pipefail,
}

impl ShellOption {
    /// All options, in `set -o` listing order.
    pub const ALL: [ShellOption; 3] = [Self::Errexit, Self::Pipefail, Self::Xtrace];

    /// Long name as used by `set -o`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Errexit => "errexit",
            Self::Xtrace => "xtrace",
            Self::Pipefail => "pipefail",
        }
    }

    /// Parse a long option name.
    pub fn from_name(name: &str) -> Result<Self, OptionError> {
        match name {
            "errexit" => Ok(Self::Errexit),
            "xtrace" => Ok(Self::Xtrace),
            "pipefail" => Ok(Self::Pipefail),
            _ => Err(OptionError::InvalidOptionName(name.to_string())),
        }
    }

    /// Option for a short flag letter (`-e`, `-x`).
    pub(crate) fn from_short_flag(flag: char) -> Option<Self> {
        match flag {
            'e' => Some(Self::Errexit),
            'x' => Some(Self::Xtrace),
            _ => None,
        }
    }
}

/// Current option state plus the conditional-context depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellOptions {
    errexit: bool,
    xtrace: bool,
    pipefail: bool,
    conditional_depth: usize,
}

impl ShellOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, option: ShellOption, enabled: bool) {
        match option {
            ShellOption::Errexit => self.errexit = enabled,
            ShellOption::Xtrace => self.xtrace = enabled,
            ShellOption::Pipefail => self.pipefail = enabled,
        }
    }

    pub fn is_enabled(&self, option: ShellOption) -> bool {
        match option {
            ShellOption::Errexit => self.errexit,
            ShellOption::Xtrace => self.xtrace,
            ShellOption::Pipefail => self.pipefail,
        }
    }

    /// Enter a context exempt from errexit. Must be paired with
    /// [`exit_conditional`](Self::exit_conditional).
    pub fn enter_conditional(&mut self) {
        self.conditional_depth += 1;
    }

    pub fn exit_conditional(&mut self) {
        debug_assert!(self.conditional_depth > 0, "unbalanced exit_conditional");
        self.conditional_depth = self.conditional_depth.saturating_sub(1);
    }

    pub fn conditional_depth(&self) -> usize {
        self.conditional_depth
    }

    /// Whether the given reported code should terminate the session right
    /// now: errexit on, failure, and no enclosing conditional context.
    pub fn should_exit_on(&self, code: i32) -> bool {
        self.errexit && code != 0 && self.conditional_depth == 0
    }

    /// Option states in listing order, for the `set -o` query form.
    pub fn describe(&self) -> Vec<(&'static str, bool)> {
        ShellOption::ALL
            .iter()
            .map(|&option| (option.name(), self.is_enabled(option)))
            .collect()
    }

    /// Human-readable listing, one option per line (`set -o`).
    pub fn render_listing(&self) -> String {
        let mut out = String::new();
        for (name, enabled) in self.describe() {
            let state = if enabled { "on" } else { "off" };
            let _ = writeln!(out, "{:<15} {}", name, state);
        }
        out
    }

    /// Reusable `set` commands that reproduce the current state
    /// (`set +o`).
    pub fn render_commands(&self) -> String {
        let mut out = String::new();
        for (name, enabled) in self.describe() {
            let sign = if enabled { '-' } else { '+' };
            let _ = writeln!(out, "set {}o {}", sign, name);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_all_disabled() {
        let options = ShellOptions::new();
        for option in ShellOption::ALL {
            assert!(!options.is_enabled(option));
        }
        assert_eq!(options.conditional_depth(), 0);
    }

    #[test]
    fn test_set_and_query() {
        let mut options = ShellOptions::new();
        options.set(ShellOption::Pipefail, true);
        assert!(options.is_enabled(ShellOption::Pipefail));
        assert!(!options.is_enabled(ShellOption::Errexit));
        options.set(ShellOption::Pipefail, false);
        assert!(!options.is_enabled(ShellOption::Pipefail));
    }

    #[test]
    fn test_should_exit_requires_errexit_and_failure() {
        let mut options = ShellOptions::new();
        assert!(!options.should_exit_on(1));
        options.set(ShellOption::Errexit, true);
        assert!(options.should_exit_on(1));
        assert!(!options.should_exit_on(0));
    }

    #[test]
    fn test_conditional_depth_suppresses_exit() {
        let mut options = ShellOptions::new();
        options.set(ShellOption::Errexit, true);
        options.enter_conditional();
        assert!(!options.should_exit_on(1));
        options.enter_conditional();
        options.exit_conditional();
        // Still nested one level deep
        assert!(!options.should_exit_on(1));
        options.exit_conditional();
        assert!(options.should_exit_on(1));
    }

    #[test]
    fn test_from_name_round_trips() {
        for option in ShellOption::ALL {
            assert_eq!(ShellOption::from_name(option.name()).unwrap(), option);
        }
    }

    #[test]
    fn test_from_name_rejects_unknown() {
        let err = ShellOption::from_name("nosuch").unwrap_err();
        assert!(err.to_string().contains("nosuch"));
    }

    #[test]
    fn test_describe_round_trips_with_is_enabled() {
        let mut options = ShellOptions::new();
        options.set(ShellOption::Errexit, true);
        options.set(ShellOption::Pipefail, true);

        let mut rebuilt = ShellOptions::new();
        for (name, enabled) in options.describe() {
            rebuilt.set(ShellOption::from_name(name).unwrap(), enabled);
        }
        for option in ShellOption::ALL {
            assert_eq!(rebuilt.is_enabled(option), options.is_enabled(option));
        }
    }

    #[test]
    fn test_render_listing_format() {
        let mut options = ShellOptions::new();
        options.set(ShellOption::Pipefail, true);
        let listing = options.render_listing();
        assert!(listing.contains("errexit"));
        assert!(listing.lines().any(|l| l.starts_with("pipefail") && l.ends_with("on")));
    }

    #[test]
    fn test_render_commands_format() {
        let mut options = ShellOptions::new();
        options.set(ShellOption::Errexit, true);
        let commands = options.render_commands();
        assert!(commands.contains("set -o errexit"));
        assert!(commands.contains("set +o pipefail"));
        assert!(commands.contains("set +o xtrace"));
    }
}
