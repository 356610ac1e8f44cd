use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use super::parse_address;

/// One guest instruction understood by `ScriptEngine`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Nop,
    Jmp(u32),
    Mov(String, u32),
    /// Decrements ecx and jumps while it is non-zero.
    Loop(u32),
    Time,
    Write(String),
    WriteLine(String),
    Exit(i32),
    Window { title: String, width: u32, height: u32 },
    Surface { width: u32, height: u32, primary: bool },
    Fill(u8),
    Flip,
    Poke(u32, u8),
    Fault(String),
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Nop => write!(f, "nop"),
            Op::Jmp(target) => write!(f, "jmp 0x{:08x}", target),
            Op::Mov(reg, value) => write!(f, "mov {}, 0x{:x}", reg, value),
            Op::Loop(target) => write!(f, "loop 0x{:08x}", target),
            Op::Time => write!(f, "time"),
            Op::Write(text) => write!(f, "write {:?}", text),
            Op::WriteLine(text) => write!(f, "writeln {:?}", text),
            Op::Exit(code) => write!(f, "exit {}", code),
            Op::Window {
                title,
                width,
                height,
            } => write!(f, "window {:?} {} {}", title, width, height),
            Op::Surface {
                width,
                height,
                primary,
            } => {
                write!(f, "surface {} {}", width, height)?;
                if *primary {
                    write!(f, " primary")?;
                }
                Ok(())
            }
            Op::Fill(byte) => write!(f, "fill 0x{:02x}", byte),
            Op::Flip => write!(f, "flip"),
            Op::Poke(addr, byte) => write!(f, "poke 0x{:08x} 0x{:02x}", addr, byte),
            Op::Fault(message) => write!(f, "fault {:?}", message),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListingError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: address 0x{addr:08x} defined twice")]
    Duplicate { line: usize, addr: u32 },
    #[error("listing has no instructions")]
    Empty,
}

/// A guest program: instructions keyed by address, executed in address order.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    ops: BTreeMap<u32, Op>,
}

impl Listing {
    pub fn from_ops(ops: impl IntoIterator<Item = (u32, Op)>) -> Self {
        Self {
            ops: ops.into_iter().collect(),
        }
    }

    pub fn entry(&self) -> Option<u32> {
        self.ops.keys().next().copied()
    }

    pub fn get(&self, addr: u32) -> Option<&Op> {
        self.ops.get(&addr)
    }

    /// Address of the instruction following `addr`.
    pub fn next_addr(&self, addr: u32) -> Option<u32> {
        let after = addr.checked_add(1)?;
        self.ops.range(after..).next().map(|(&a, _)| a)
    }

    pub fn iter_from(&self, addr: u32) -> impl Iterator<Item = (u32, &Op)> {
        self.ops.range(addr..).map(|(&a, op)| (a, op))
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Parses `HEXADDR op args...` lines. `;` starts a comment.
pub fn parse_listing(text: &str) -> Result<Listing, ListingError> {
    let mut ops = BTreeMap::new();

    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let syntax = |message: String| ListingError::Syntax { line, message };

        let tokens = shlex::split(strip_comment(raw))
            .ok_or_else(|| syntax("unbalanced quotes".into()))?;
        if tokens.is_empty() {
            continue;
        }

        let addr = parse_address(&tokens[0])
            .ok_or_else(|| syntax(format!("bad address {:?}", tokens[0])))?;
        let mnemonic = tokens
            .get(1)
            .ok_or_else(|| syntax("missing instruction".into()))?
            .to_lowercase();
        let args = &tokens[2..];

        let op = parse_op(&mnemonic, args).map_err(syntax)?;
        if ops.insert(addr, op).is_some() {
            return Err(ListingError::Duplicate { line, addr });
        }
    }

    if ops.is_empty() {
        return Err(ListingError::Empty);
    }
    Ok(Listing { ops })
}

fn parse_op(mnemonic: &str, args: &[String]) -> Result<Op, String> {
    let arg = |n: usize| {
        args.get(n)
            .map(String::as_str)
            .ok_or_else(|| format!("{} expects at least {} argument(s)", mnemonic, n + 1))
    };
    let addr = |n: usize| -> Result<u32, String> {
        let text = arg(n)?;
        parse_address(text).ok_or_else(|| format!("bad address {:?}", text))
    };
    let number = |n: usize| -> Result<u32, String> {
        let text = arg(n)?;
        parse_number(text).ok_or_else(|| format!("bad number {:?}", text))
    };

    Ok(match mnemonic {
        "nop" => Op::Nop,
        "jmp" => Op::Jmp(addr(0)?),
        "mov" => Op::Mov(arg(0)?.trim_end_matches(',').to_lowercase(), number(1)?),
        "loop" => Op::Loop(addr(0)?),
        "time" => Op::Time,
        "write" => Op::Write(arg(0)?.to_string()),
        "writeln" => Op::WriteLine(arg(0)?.to_string()),
        "exit" => {
            let text = arg(0)?;
            Op::Exit(text.parse().map_err(|_| format!("bad exit code {:?}", text))?)
        }
        "window" => Op::Window {
            title: arg(0)?.to_string(),
            width: number(1)?,
            height: number(2)?,
        },
        "surface" => Op::Surface {
            width: number(0)?,
            height: number(1)?,
            primary: match args.get(2).map(String::as_str) {
                None => false,
                Some("primary") => true,
                Some(other) => return Err(format!("unknown surface flag {:?}", other)),
            },
        },
        "fill" => Op::Fill(byte(number(0)?)?),
        "flip" => Op::Flip,
        "poke" => Op::Poke(addr(0)?, byte(number(1)?)?),
        "fault" => Op::Fault(args.join(" ")),
        other => return Err(format!("unknown instruction {:?}", other)),
    })
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

fn byte(value: u32) -> Result<u8, String> {
    u8::try_from(value).map_err(|_| format!("{} does not fit in a byte", value))
}

/// Decimal, or hex with a `0x` prefix.
fn parse_number(text: &str) -> Option<u32> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ops_and_comments() {
        let listing = parse_listing(
            r#"
; entry point, don't skip
401000 mov ecx, 3
401001 write "hi there"   ; greet
401002 loop 401001
401003 exit 0
"#,
        )
        .unwrap();

        assert_eq!(listing.len(), 4);
        assert_eq!(listing.entry(), Some(0x401000));
        assert_eq!(listing.get(0x401000), Some(&Op::Mov("ecx".into(), 3)));
        assert_eq!(listing.get(0x401001), Some(&Op::Write("hi there".into())));
        assert_eq!(listing.next_addr(0x401001), Some(0x401002));
        assert_eq!(listing.next_addr(0x401003), None);
    }

    #[test]
    fn rejects_duplicate_address() {
        let err = parse_listing("10 nop\n10 nop\n").unwrap_err();
        assert_eq!(err, ListingError::Duplicate { line: 2, addr: 0x10 });
    }

    #[test]
    fn rejects_unknown_instruction() {
        let err = parse_listing("10 hlt\n").unwrap_err();
        assert!(matches!(err, ListingError::Syntax { line: 1, .. }));
    }

    #[test]
    fn surface_flags() {
        let listing = parse_listing("10 surface 640 480 primary\n11 surface 8 8\n").unwrap();
        assert_eq!(
            listing.get(0x10),
            Some(&Op::Surface {
                width: 640,
                height: 480,
                primary: true
            })
        );
        assert_eq!(
            listing.get(0x11),
            Some(&Op::Surface {
                width: 8,
                height: 8,
                primary: false
            })
        );
    }
}
