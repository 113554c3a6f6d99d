use std::str::FromStr;

use debugger::{BreakpointAction, SingleStepMode};

/// One line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Continue,
    Pause,
    Step(SingleStepMode),
    Breakpoint(BreakpointAction, String),
    ToggleDebugger,
    /// Summary of the mirrored state
    State,
    /// Whole snapshot as JSON
    Dump,
    Help,
    Quit,
    Empty,
}

impl FromStr for ReplCommand {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(ReplCommand::Empty);
        };
        let argument = words.next();
        if words.next().is_some() {
            eyre::bail!("too many arguments to '{command}'");
        }

        let breakpoint = |action| match argument {
            Some(path) => Ok(ReplCommand::Breakpoint(action, path.to_string())),
            None => eyre::bail!("'{command}' needs a component path"),
        };

        let parsed = match command {
            "c" | "continue" => ReplCommand::Continue,
            "p" | "pause" => ReplCommand::Pause,
            "s" | "step" => match argument {
                Some(mode) => ReplCommand::Step(mode.parse()?),
                None => ReplCommand::Step(SingleStepMode::default()),
            },
            "b" | "break" => return breakpoint(BreakpointAction::Add),
            "rb" => return breakpoint(BreakpointAction::Remove),
            "eb" => return breakpoint(BreakpointAction::Enable),
            "db" => return breakpoint(BreakpointAction::Disable),
            "t" | "toggle" => ReplCommand::ToggleDebugger,
            "state" => ReplCommand::State,
            "dump" => ReplCommand::Dump,
            "h" | "help" => ReplCommand::Help,
            "q" | "quit" => ReplCommand::Quit,
            other => eyre::bail!("unknown command '{other}'"),
        };

        if argument.is_some() && !matches!(parsed, ReplCommand::Step(_)) {
            eyre::bail!("'{command}' takes no arguments");
        }
        Ok(parsed)
    }
}

pub const HELP: &str = "\
c                 resume
p                 pause
s [into|over|out] single step
b <path>          add breakpoint
rb <path>         remove breakpoint
eb <path>         enable breakpoint
db <path>         disable breakpoint
t                 toggle debug mode
state             show mirrored state
dump              print snapshot as JSON
q                 quit";
