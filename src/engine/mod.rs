//! The boundary to the instruction-level execution engine.
//!
//! The driver treats the engine as a black box: it steps, reports where it is,
//! and calls back into the [`Host`] while it runs.

mod script;

use serde::Serialize;
use thiserror::Error;

use crate::display::DisplayError;
use crate::host::Host;

pub use script::ScriptEngine;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0}")]
    Fault(String),
    #[error("no instruction at 0x{0:08x}")]
    NoInstruction(u32),
    #[error("host call failed: {0}")]
    Display(#[from] DisplayError),
}

/// The engine's own break set, consulted while batch stepping.
///
/// The breakpoint table calls these after every mutation so both sides agree
/// on which addresses are active.
pub trait BreakSet {
    fn add_breakpoint(&mut self, addr: u32);
    fn remove_breakpoint(&mut self, addr: u32);
}

pub trait Engine: BreakSet {
    fn pc(&self) -> u32;
    fn registers(&self) -> Registers;
    fn memory(&self) -> &[u8];
    fn disassemble(&self, addr: u32, count: usize) -> Vec<Disassembly>;

    /// Executes exactly one instruction, ignoring the break set.
    fn step(&mut self, host: &mut dyn Host) -> Result<(), EngineError>;

    /// Executes up to `count` instructions and returns how many ran.
    ///
    /// Stops early, before executing it, at any address in the break set, and
    /// right after the guest calls `Host::exit`. A batch started on a break
    /// address runs nothing.
    fn step_many(&mut self, host: &mut dyn Host, count: u32) -> Result<u32, EngineError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disassembly {
    pub addr: u32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Registers {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,

    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,

    pub eip: u32,

    pub cs: u16,
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
    pub ss: u16,
}

impl Registers {
    pub const NAMES: [&'static str; 15] = [
        "eax", "ebx", "ecx", "edx", "esp", "ebp", "esi", "edi", "eip", "cs", "ds", "es", "fs",
        "gs", "ss",
    ];

    pub fn get(&self, name: &str) -> Option<u32> {
        Some(match name {
            "eax" => self.eax,
            "ebx" => self.ebx,
            "ecx" => self.ecx,
            "edx" => self.edx,
            "esp" => self.esp,
            "ebp" => self.ebp,
            "esi" => self.esi,
            "edi" => self.edi,
            "eip" => self.eip,
            "cs" => self.cs as u32,
            "ds" => self.ds as u32,
            "es" => self.es as u32,
            "fs" => self.fs as u32,
            "gs" => self.gs as u32,
            "ss" => self.ss as u32,
            _ => return None,
        })
    }

    /// Sets a register by name. Segment registers keep the low 16 bits.
    pub fn set(&mut self, name: &str, value: u32) -> bool {
        match name {
            "eax" => self.eax = value,
            "ebx" => self.ebx = value,
            "ecx" => self.ecx = value,
            "edx" => self.edx = value,
            "esp" => self.esp = value,
            "ebp" => self.ebp = value,
            "esi" => self.esi = value,
            "edi" => self.edi = value,
            "eip" => self.eip = value,
            "cs" => self.cs = value as u16,
            "ds" => self.ds = value as u16,
            "es" => self.es = value as u16,
            "fs" => self.fs = value as u16,
            "gs" => self.gs = value as u16,
            "ss" => self.ss = value as u16,
            _ => return false,
        }
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        Self::NAMES
            .iter()
            .filter_map(move |&name| self.get(name).map(|v| (name, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_registers_truncate() {
        let mut regs = Registers::default();
        assert!(regs.set("fs", 0x1_2345));
        assert_eq!(regs.get("fs"), Some(0x2345));
        assert!(!regs.set("rax", 1));
    }

    #[test]
    fn iter_covers_every_name() {
        let regs = Registers::default();
        assert_eq!(regs.iter().count(), Registers::NAMES.len());
    }
}
