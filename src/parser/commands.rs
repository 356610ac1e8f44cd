use thiserror::Error;

use super::parse_address;
use crate::debugger::BreakpointFlags;

/// Where a command points: a raw address or a label to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Address(u32),
    Label(String),
}

impl Target {
    /// Bare hex or `0x` hex is an address, anything else a label.
    pub fn parse(text: &str) -> Self {
        match parse_address(text) {
            Some(addr) => Target::Address(addr),
            None => Target::Label(text.to_string()),
        }
    }
}

/// A line typed at the interactive prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Step(u32),
    Continue,
    RunTo(Target),
    Break(Target, BreakpointFlags),
    Delete(Target),
    Toggle(Target),
    ListBreakpoints,
    Registers,
    Memory { addr: Target, len: usize },
    Disassemble { addr: Option<Target>, count: usize },
    Output,
    Windows,
    Stats,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unbalanced quotes")]
    Quotes,
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("{0} needs an address or label")]
    MissingTarget(&'static str),
    #[error("bad count {0:?}")]
    BadCount(String),
    #[error("unknown breakpoint flag {0:?}")]
    BadFlag(String),
}

/// Parses one prompt line. An empty line steps once.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let tokens = shlex::split(line).ok_or(CommandError::Quotes)?;
    let Some((name, args)) = tokens.split_first() else {
        return Ok(Command::Step(1));
    };

    let target = |what: &'static str| {
        args.first()
            .map(|t| Target::parse(t))
            .ok_or(CommandError::MissingTarget(what))
    };

    Ok(match name.to_lowercase().as_str() {
        "s" | "step" => Command::Step(count(args.first(), 1)?),
        "c" | "continue" => Command::Continue,
        "r" | "runto" => Command::RunTo(target("runto")?),
        "b" | "break" => {
            let mut flags = BreakpointFlags::default();
            for flag in args.iter().skip(1) {
                match flag.as_str() {
                    "temp" => flags.temporary = true,
                    "once" => flags.one_shot = true,
                    other => return Err(CommandError::BadFlag(other.to_string())),
                }
            }
            Command::Break(target("break")?, flags)
        }
        "d" | "delete" => Command::Delete(target("delete")?),
        "t" | "toggle" => Command::Toggle(target("toggle")?),
        "bl" | "breakpoints" => Command::ListBreakpoints,
        "regs" => Command::Registers,
        "x" => Command::Memory {
            addr: target("x")?,
            len: count(args.get(1), 16)? as usize,
        },
        "dis" => Command::Disassemble {
            addr: args.first().map(|t| Target::parse(t)),
            count: count(args.get(1), 8)? as usize,
        },
        "out" => Command::Output,
        "windows" => Command::Windows,
        "stats" => Command::Stats,
        "h" | "help" | "?" => Command::Help,
        "q" | "quit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    })
}

fn count(arg: Option<&String>, default: u32) -> Result<u32, CommandError> {
    match arg {
        None => Ok(default),
        Some(text) => text
            .parse()
            .map_err(|_| CommandError::BadCount(text.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_line_steps_once() {
        assert_eq!(parse_command("   "), Ok(Command::Step(1)));
        assert_eq!(parse_command("s 25"), Ok(Command::Step(25)));
    }

    #[test]
    fn targets_are_addresses_or_labels() {
        assert_eq!(
            parse_command("r 0x401000"),
            Ok(Command::RunTo(Target::Address(0x401000)))
        );
        assert_eq!(
            parse_command("runto WinMain"),
            Ok(Command::RunTo(Target::Label("WinMain".into())))
        );
        // Bare hex wins over a label that happens to look like hex.
        assert_eq!(
            parse_command("d beef"),
            Ok(Command::Delete(Target::Address(0xbeef)))
        );
    }

    #[test]
    fn break_flags() {
        assert_eq!(
            parse_command("b 401000 temp once"),
            Ok(Command::Break(
                Target::Address(0x401000),
                BreakpointFlags {
                    temporary: true,
                    one_shot: true
                }
            ))
        );
        assert_eq!(
            parse_command("b 401000 sticky"),
            Err(CommandError::BadFlag("sticky".into()))
        );
        assert_eq!(parse_command("b"), Err(CommandError::MissingTarget("break")));
    }

    #[test]
    fn unknown_command() {
        assert_eq!(
            parse_command("frobnicate"),
            Err(CommandError::Unknown("frobnicate".into()))
        );
    }
}
