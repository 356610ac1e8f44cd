use std::collections::HashSet;

use tracing::trace;

use super::{BreakSet, Disassembly, Engine, EngineError, Registers};
use crate::display::{
    DisplayError, Surface, SurfaceHandle, SurfaceOptions, WindowHandle, WindowOptions, BYTES_PER_PIXEL,
};
use crate::host::Host;
use crate::parser::{Listing, Op};

const DEFAULT_MEMORY_SIZE: usize = 0x1_0000;

/// Executes a guest listing one op at a time.
///
/// Host-facing ops call into the [`Host`] exactly as an imported system
/// function would: synchronously, in the middle of `step`/`step_many`.
#[derive(Debug)]
pub struct ScriptEngine {
    listing: Listing,
    regs: Registers,
    memory: Vec<u8>,
    breakpoints: HashSet<u32>,
    last_window: Option<WindowHandle>,
    last_surface: Option<(SurfaceHandle, u32, u32)>,
}

impl ScriptEngine {
    pub fn new(listing: Listing) -> Self {
        Self::with_memory_size(listing, DEFAULT_MEMORY_SIZE)
    }

    pub fn with_memory_size(listing: Listing, memory_size: usize) -> Self {
        let mut regs = Registers::default();
        regs.eip = listing.entry().unwrap_or(0);
        regs.esp = memory_size as u32;
        Self {
            listing,
            regs,
            memory: vec![0; memory_size],
            breakpoints: HashSet::new(),
            last_window: None,
            last_surface: None,
        }
    }

    pub fn listing(&self) -> &Listing {
        &self.listing
    }

    /// Whether `addr` is in the engine's break set.
    pub fn has_breakpoint(&self, addr: u32) -> bool {
        self.breakpoints.contains(&addr)
    }

    fn current_surface(&self) -> Result<(SurfaceHandle, u32, u32), EngineError> {
        self.last_surface
            .ok_or_else(|| EngineError::Fault("no surface created yet".into()))
    }

    fn execute(&mut self, host: &mut dyn Host) -> Result<(), EngineError> {
        let pc = self.regs.eip;
        let op = self
            .listing
            .get(pc)
            .cloned()
            .ok_or(EngineError::NoInstruction(pc))?;
        trace!(pc, %op, "execute");

        let mut next = self.listing.next_addr(pc).unwrap_or(pc.wrapping_add(1));
        match op {
            Op::Nop => {}
            Op::Jmp(target) => next = target,
            Op::Mov(reg, value) => {
                if !self.regs.set(&reg, value) {
                    return Err(EngineError::Fault(format!("unknown register {}", reg)));
                }
            }
            Op::Loop(target) => {
                self.regs.ecx = self.regs.ecx.wrapping_sub(1);
                if self.regs.ecx != 0 {
                    next = target;
                }
            }
            Op::Time => self.regs.eax = host.time() as u32,
            Op::Write(text) => self.regs.eax = host.write(text.as_bytes()) as u32,
            Op::WriteLine(text) => {
                self.regs.eax = host.write(format!("{}\n", text).as_bytes()) as u32
            }
            Op::Exit(code) => host.exit(code),
            Op::Window {
                title,
                width,
                height,
            } => {
                let window = host.create_window(WindowOptions {
                    title,
                    width,
                    height,
                });
                self.last_window = Some(window);
                self.regs.eax = window.0;
            }
            Op::Surface {
                width,
                height,
                primary,
            } => {
                let surface = host.create_surface(&SurfaceOptions {
                    width,
                    height,
                    primary,
                    window: if primary { self.last_window } else { None },
                })?;
                self.last_surface = Some((surface, width, height));
                self.regs.eax = surface.index;
            }
            Op::Fill(byte) => {
                let (surface, width, height) = self.current_surface()?;
                let target = match host.get_attached(surface) {
                    Ok(back) => back,
                    Err(DisplayError::NoBackBuffer) => surface,
                    Err(err) => return Err(err.into()),
                };
                let len = Surface::byte_len(width, height, BYTES_PER_PIXEL)?;
                host.write_pixels(target, &vec![byte; len])?;
            }
            Op::Flip => {
                let (surface, _, _) = self.current_surface()?;
                host.flip(surface)?;
            }
            Op::Poke(addr, byte) => {
                let slot = self.memory.get_mut(addr as usize).ok_or_else(|| {
                    EngineError::Fault(format!("write outside memory at 0x{:08x}", addr))
                })?;
                *slot = byte;
            }
            Op::Fault(message) => return Err(EngineError::Fault(message)),
        }

        self.regs.eip = next;
        Ok(())
    }
}

impl BreakSet for ScriptEngine {
    fn add_breakpoint(&mut self, addr: u32) {
        self.breakpoints.insert(addr);
    }

    fn remove_breakpoint(&mut self, addr: u32) {
        self.breakpoints.remove(&addr);
    }
}

impl Engine for ScriptEngine {
    fn pc(&self) -> u32 {
        self.regs.eip
    }

    fn registers(&self) -> Registers {
        self.regs
    }

    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn disassemble(&self, addr: u32, count: usize) -> Vec<Disassembly> {
        self.listing
            .iter_from(addr)
            .take(count)
            .map(|(addr, op)| Disassembly {
                addr,
                text: op.to_string(),
            })
            .collect()
    }

    fn step(&mut self, host: &mut dyn Host) -> Result<(), EngineError> {
        self.execute(host)
    }

    fn step_many(&mut self, host: &mut dyn Host, count: u32) -> Result<u32, EngineError> {
        let mut executed = 0;
        while executed < count {
            if self.breakpoints.contains(&self.regs.eip) {
                break;
            }
            self.execute(host)?;
            executed += 1;
            if host.exit_code().is_some() {
                break;
            }
        }
        Ok(executed)
    }
}
