use std::any::Any;
use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::debugger::{DebugContext, DriverState, StopReason};
use crate::engine::Engine;
use crate::parser::{parse_command, Command, Target};

/// Cooperative cancellation for continuous running, observed between turns.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether a stop was requested and clears the request.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Outcome of one scheduling turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    /// The driver is not running; nothing was executed.
    Idle,
    Continue,
    Stopped(StopReason),
}

/// Runs at most one batch. Panics inside the engine or a host callback stop
/// the driver with a fault instead of unwinding further.
pub fn run_turn<E: Engine>(ctx: &mut DebugContext<E>) -> Turn {
    if !ctx.state().is_running() {
        return Turn::Idle;
    }
    match panic::catch_unwind(AssertUnwindSafe(|| ctx.step_many())) {
        Ok(true) => Turn::Continue,
        Ok(false) => stopped(ctx).map_or(Turn::Idle, Turn::Stopped),
        Err(payload) => {
            ctx.fault(panic_message(payload.as_ref()));
            stopped(ctx).map_or(Turn::Idle, Turn::Stopped)
        }
    }
}

/// Executes one instruction under the same panic guard as [`run_turn`].
/// Returns `false` when a stop condition was reached.
pub fn run_step<E: Engine>(ctx: &mut DebugContext<E>) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| ctx.step())) {
        Ok(may_continue) => may_continue,
        Err(payload) => ctx.fault(panic_message(payload.as_ref())),
    }
}

/// Repeats turns until the driver stops or `stop` is requested.
/// `between_turns` runs after every turn that left the driver running.
pub fn run_until_stopped<E: Engine>(
    ctx: &mut DebugContext<E>,
    stop: &StopFlag,
    mut between_turns: impl FnMut(&mut DebugContext<E>),
) -> Option<StopReason> {
    loop {
        if stop.take() {
            ctx.stop_running();
        }
        match run_turn(ctx) {
            Turn::Continue => between_turns(ctx),
            Turn::Stopped(reason) => return Some(reason),
            Turn::Idle => return stopped(ctx),
        }
    }
}

fn stopped<E: Engine>(ctx: &DebugContext<E>) -> Option<StopReason> {
    match ctx.state() {
        DriverState::Stopped(reason) => Some(reason.clone()),
        _ => None,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

const HELP: &str = "\
commands:
  s, step [n]                 execute n instructions (default 1, also an empty line)
  c, continue                 run until a breakpoint, exit or fault
  r, runto <addr|label>       run until the address is reached
  b, break <addr|label> [temp] [once]
  d, delete <addr|label>
  t, toggle <addr|label>      enable or disable a breakpoint
  bl, breakpoints             list breakpoints
  regs                        show registers
  x <addr> [len]              dump guest memory
  dis [addr] [n]              disassemble
  out                         show guest output not yet printed
  windows                     list windows and surfaces
  stats                       execution statistics
  q, quit";

/// Terminal front end: reads commands from `input` until `quit` or end of input.
pub fn run_interactive<E: Engine>(
    ctx: &mut DebugContext<E>,
    stop: &StopFlag,
    input: impl BufRead,
    mut out: impl Write,
) -> io::Result<()> {
    let mut lines = input.lines();
    loop {
        write!(out, "{}> ", location(ctx, ctx.pc()))?;
        out.flush()?;
        let Some(line) = lines.next().transpose()? else {
            writeln!(out)?;
            return Ok(());
        };

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(err) => {
                writeln!(out, "error: {}", err)?;
                continue;
            }
        };
        debug!(?command, "interactive command");

        match command {
            Command::Step(n) => {
                for _ in 0..n {
                    if !run_step(ctx) {
                        break;
                    }
                }
                flush_output(ctx, &mut out)?;
                report(ctx, &mut out)?;
            }
            Command::Continue => {
                ctx.start_running();
                run_and_report(ctx, stop, &mut out)?;
            }
            Command::RunTo(target) => match resolve(ctx, &target) {
                Ok(addr) => {
                    ctx.run_to(addr);
                    run_and_report(ctx, stop, &mut out)?;
                }
                Err(err) => writeln!(out, "error: {}", err)?,
            },
            Command::Break(target, flags) => match resolve(ctx, &target) {
                Ok(addr) => {
                    ctx.add_breakpoint(addr, flags);
                    writeln!(out, "breakpoint at {}", location(ctx, addr))?;
                }
                Err(err) => writeln!(out, "error: {}", err)?,
            },
            Command::Delete(target) => match resolve(ctx, &target) {
                Ok(addr) => ctx.remove_breakpoint(addr),
                Err(err) => writeln!(out, "error: {}", err)?,
            },
            Command::Toggle(target) => {
                match resolve(ctx, &target).and_then(|addr| {
                    ctx.toggle_breakpoint(addr)
                        .map(|disabled| (addr, disabled))
                        .map_err(|e| e.to_string())
                }) {
                    Ok((addr, disabled)) => writeln!(
                        out,
                        "breakpoint at {} {}",
                        location(ctx, addr),
                        if disabled { "disabled" } else { "enabled" }
                    )?,
                    Err(err) => writeln!(out, "error: {}", err)?,
                }
            }
            Command::ListBreakpoints => {
                if ctx.breakpoints().is_empty() {
                    writeln!(out, "no breakpoints")?;
                }
                for bp in ctx.breakpoints().iter() {
                    let mut flags = String::new();
                    if bp.disabled {
                        flags.push_str(" disabled");
                    }
                    if bp.temporary {
                        flags.push_str(" temp");
                    }
                    if bp.one_shot {
                        flags.push_str(" once");
                    }
                    writeln!(out, "  {}{}", location(ctx, bp.address), flags)?;
                }
            }
            Command::Registers => {
                let regs = ctx.engine().registers();
                for (name, value) in regs.iter() {
                    writeln!(out, "  {:<3} {:08x}", name, value)?;
                }
            }
            Command::Memory { addr, len } => match resolve(ctx, &addr) {
                Ok(addr) => dump_memory(ctx.engine().memory(), addr, len, &mut out)?,
                Err(err) => writeln!(out, "error: {}", err)?,
            },
            Command::Disassemble { addr, count } => {
                let start = match addr {
                    Some(target) => match resolve(ctx, &target) {
                        Ok(addr) => addr,
                        Err(err) => {
                            writeln!(out, "error: {}", err)?;
                            continue;
                        }
                    },
                    None => ctx.pc(),
                };
                let pc = ctx.pc();
                for line in ctx.engine().disassemble(start, count) {
                    let marker = if line.addr == pc { "=>" } else { "  " };
                    writeln!(out, "{} {:08x}  {}", marker, line.addr, line.text)?;
                }
            }
            Command::Output => flush_output(ctx, &mut out)?,
            Command::Windows => {
                let display = ctx.host().display();
                for window in display.windows() {
                    writeln!(
                        out,
                        "  window {} {:?} {}x{} surface {:?}",
                        window.id.0, window.title, window.width, window.height, window.surface()
                    )?;
                }
                for (handle, surface) in display.surfaces() {
                    writeln!(
                        out,
                        "  surface {} {}x{}{}",
                        handle.index,
                        surface.width(),
                        surface.height(),
                        if surface.is_primary() { " primary" } else { "" }
                    )?;
                }
            }
            Command::Stats => {
                let exec = ctx.execution();
                writeln!(out, "  state         {:?}", ctx.state())?;
                writeln!(out, "  instructions  {}", exec.instruction_count)?;
                writeln!(out, "  batch size    {}", exec.step_batch_size)?;
                writeln!(out, "  instr/ms      {:.1}", exec.instructions_per_ms)?;
            }
            Command::Help => writeln!(out, "{}", HELP)?,
            Command::Quit => return Ok(()),
        }
    }
}

fn run_and_report<E: Engine>(
    ctx: &mut DebugContext<E>,
    stop: &StopFlag,
    out: &mut impl Write,
) -> io::Result<()> {
    let mut result = Ok(());
    run_until_stopped(ctx, stop, |ctx| {
        if result.is_ok() {
            result = flush_output(ctx, &mut *out);
        }
    });
    result?;
    flush_output(ctx, out)?;
    report(ctx, out)
}

fn report<E: Engine>(ctx: &DebugContext<E>, out: &mut impl Write) -> io::Result<()> {
    match ctx.state() {
        DriverState::Stopped(StopReason::Breakpoint { addr }) => {
            writeln!(out, "breakpoint hit at {}", location(ctx, *addr))
        }
        DriverState::Stopped(reason) => writeln!(out, "{}", reason),
        _ => Ok(()),
    }
}

fn flush_output<E: Engine>(ctx: &mut DebugContext<E>, out: &mut impl Write) -> io::Result<()> {
    let text = ctx.take_output();
    if !text.is_empty() {
        out.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            writeln!(out)?;
        }
    }
    Ok(())
}

fn resolve<E: Engine>(ctx: &DebugContext<E>, target: &Target) -> Result<u32, String> {
    match target {
        Target::Address(addr) => Ok(*addr),
        Target::Label(name) => ctx
            .labels()
            .lookup(name)
            .ok_or_else(|| format!("unknown label {:?}", name)),
    }
}

fn location<E: Engine>(ctx: &DebugContext<E>, addr: u32) -> String {
    if ctx.labels().is_empty() {
        format!("0x{:08x}", addr)
    } else {
        format!("0x{:08x} <{}>", addr, ctx.describe(addr))
    }
}

fn dump_memory(memory: &[u8], addr: u32, len: usize, out: &mut impl Write) -> io::Result<()> {
    let start = addr as usize;
    let Some(bytes) = memory.get(start..start.saturating_add(len).min(memory.len())) else {
        return writeln!(out, "error: 0x{:08x} is outside guest memory", addr);
    };
    if bytes.is_empty() {
        return writeln!(out, "error: 0x{:08x} is outside guest memory", addr);
    }
    for (i, row) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = row.iter().map(|b| format!("{:02x}", b)).collect();
        writeln!(out, "  {:08x}  {}", start + i * 16, hex.join(" "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::engine::{BreakSet, Disassembly, EngineError, Registers};
    use crate::host::{Host, ManualClock};

    /// Panics whenever it is asked to execute anything.
    struct Exploding;

    impl BreakSet for Exploding {
        fn add_breakpoint(&mut self, _addr: u32) {}
        fn remove_breakpoint(&mut self, _addr: u32) {}
    }

    impl Engine for Exploding {
        fn pc(&self) -> u32 {
            0
        }
        fn registers(&self) -> Registers {
            Registers::default()
        }
        fn memory(&self) -> &[u8] {
            &[]
        }
        fn disassemble(&self, _addr: u32, _count: usize) -> Vec<Disassembly> {
            Vec::new()
        }
        fn step(&mut self, _host: &mut dyn Host) -> Result<(), EngineError> {
            panic!("decoder blew up")
        }
        fn step_many(&mut self, _host: &mut dyn Host, _count: u32) -> Result<u32, EngineError> {
            panic!("decoder blew up")
        }
    }

    fn exploding() -> DebugContext<Exploding> {
        DebugContext::with_clock(Exploding, DriverConfig::default(), Arc::new(ManualClock::new()))
    }

    #[test]
    fn panic_in_turn_becomes_fault() {
        let mut ctx = exploding();
        ctx.start_running();
        let turn = run_turn(&mut ctx);
        assert_eq!(
            turn,
            Turn::Stopped(StopReason::Fault {
                message: "panic: decoder blew up".into()
            })
        );
        assert_eq!(run_turn(&mut ctx), Turn::Idle);
    }

    #[test]
    fn panic_in_single_step_keeps_lock_usable() {
        let ctx = std::sync::Mutex::new(exploding());
        {
            let mut guard = ctx.lock().unwrap();
            assert!(!run_step(&mut *guard));
        }
        assert!(!ctx.is_poisoned());

        let mut guard = ctx.lock().unwrap();
        assert_eq!(
            guard.state(),
            &DriverState::Stopped(StopReason::Fault {
                message: "panic: decoder blew up".into()
            })
        );
        // Stepping again faults again instead of unwinding.
        assert!(!run_step(&mut *guard));
        assert_eq!(guard.instruction_count(), 0);
    }

    #[test]
    fn step_command_survives_a_panicking_engine() {
        let mut ctx = exploding();
        let mut out = Vec::new();
        run_interactive(&mut ctx, &StopFlag::new(), &b"s 3\nregs\n"[..], &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("panic: decoder blew up"));
        assert!(out.contains("eip 00000000"));
    }

    #[test]
    fn stop_flag_is_cleared_by_take() {
        let flag = StopFlag::new();
        let other = flag.clone();
        other.request();
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn memory_dump_rows() {
        let memory: Vec<u8> = (0..32).collect();
        let mut out = Vec::new();
        dump_memory(&memory, 0x0c, 8, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "  0000000c  0c 0d 0e 0f 10 11 12 13\n"
        );
    }
}
