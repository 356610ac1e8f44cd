use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::engine::BreakSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakpointFlags {
    /// Removed the first time execution stops on it.
    pub temporary: bool,
    /// Same lifetime as `temporary`; set by run-to.
    pub one_shot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub address: u32,
    pub disabled: bool,
    pub temporary: bool,
    pub one_shot: bool,
}

impl Breakpoint {
    /// Whether hitting it should delete it.
    pub fn is_transient(&self) -> bool {
        self.temporary || self.one_shot
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BreakpointError {
    #[error("no breakpoint at 0x{0:08x}")]
    NotFound(u32),
}

/// The authoritative breakpoint table. Every change is mirrored into the
/// engine's break set: enabled entries are present there, disabled ones are
/// not.
#[derive(Debug, Default)]
pub struct Breakpoints {
    points: BTreeMap<u32, Breakpoint>,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the breakpoint at `address`. It starts enabled.
    pub fn add<S: BreakSet + ?Sized>(&mut self, engine: &mut S, address: u32, flags: BreakpointFlags) {
        self.points.insert(
            address,
            Breakpoint {
                address,
                disabled: false,
                temporary: flags.temporary,
                one_shot: flags.one_shot,
            },
        );
        engine.add_breakpoint(address);
        info!(address = %format!("0x{:08x}", address), ?flags, "breakpoint set");
    }

    /// Removing an address with no breakpoint does nothing.
    pub fn remove<S: BreakSet + ?Sized>(&mut self, engine: &mut S, address: u32) {
        if self.points.remove(&address).is_some() {
            engine.remove_breakpoint(address);
            info!(address = %format!("0x{:08x}", address), "breakpoint removed");
        }
    }

    /// Flips the disabled flag and returns the new value.
    pub fn toggle_disabled<S: BreakSet + ?Sized>(
        &mut self,
        engine: &mut S,
        address: u32,
    ) -> Result<bool, BreakpointError> {
        let bp = self
            .points
            .get_mut(&address)
            .ok_or(BreakpointError::NotFound(address))?;
        bp.disabled = !bp.disabled;
        if bp.disabled {
            engine.remove_breakpoint(address);
        } else {
            engine.add_breakpoint(address);
        }
        Ok(bp.disabled)
    }

    pub fn lookup(&self, address: u32) -> Option<Breakpoint> {
        self.points.get(&address).copied()
    }

    /// A breakpoint exists at `address` and is enabled.
    pub fn is_active(&self, address: u32) -> bool {
        self.points.get(&address).is_some_and(|bp| !bp.disabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.points.values()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear<S: BreakSet + ?Sized>(&mut self, engine: &mut S) {
        for (address, bp) in std::mem::take(&mut self.points) {
            if !bp.disabled {
                engine.remove_breakpoint(address);
            }
        }
    }
}
