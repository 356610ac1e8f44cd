use std::sync::Arc;

use tracing::{debug, info, warn};

use super::breakpoints::{BreakpointError, BreakpointFlags, Breakpoints};
use super::stepping::{DriverState, StopReason};
use crate::config::DriverConfig;
use crate::display::BYTES_PER_PIXEL;
use crate::engine::Engine;
use crate::host::{Clock, Host, HostState, SystemClock};
use crate::parser::LabelMap;

/// Counters for one guest session.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionState {
    pub instruction_count: u64,
    pub step_batch_size: u32,
    pub instructions_per_ms: f64,
}

/// The execution driver: owns the engine, the host state the engine calls
/// into, and the breakpoint table, and decides when execution stops.
pub struct DebugContext<E: Engine> {
    engine: E,
    host: HostState,
    breakpoints: Breakpoints,
    exec: ExecutionState,
    state: DriverState,
    config: DriverConfig,
    labels: LabelMap,
}

impl<E: Engine> DebugContext<E> {
    pub fn new(engine: E, config: DriverConfig) -> Self {
        Self::with_clock(engine, config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(engine: E, config: DriverConfig, clock: Arc<dyn Clock>) -> Self {
        let exec = ExecutionState {
            instruction_count: 0,
            step_batch_size: config.initial_batch_size.max(1),
            instructions_per_ms: 0.0,
        };
        Self {
            engine,
            host: HostState::new(clock, BYTES_PER_PIXEL),
            breakpoints: Breakpoints::new(),
            exec,
            state: DriverState::Idle,
            config,
            labels: LabelMap::new(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn host(&self) -> &HostState {
        &self.host
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    pub fn execution(&self) -> &ExecutionState {
        &self.exec
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.host.exit_code()
    }

    pub fn instruction_count(&self) -> u64 {
        self.exec.instruction_count
    }

    pub fn step_batch_size(&self) -> u32 {
        self.exec.step_batch_size
    }

    pub fn instructions_per_ms(&self) -> f64 {
        self.exec.instructions_per_ms
    }

    pub fn pc(&self) -> u32 {
        self.engine.pc()
    }

    /// Drains guest output written since the last call.
    pub fn take_output(&mut self) -> String {
        self.host.take_output()
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn set_labels(&mut self, labels: LabelMap) {
        self.labels = labels;
    }

    /// Symbolic name for `addr`, falling back to hex.
    pub fn describe(&self, addr: u32) -> String {
        self.labels.describe(addr)
    }

    pub fn add_breakpoint(&mut self, addr: u32, flags: BreakpointFlags) {
        self.breakpoints.add(&mut self.engine, addr, flags);
    }

    pub fn remove_breakpoint(&mut self, addr: u32) {
        self.breakpoints.remove(&mut self.engine, addr);
    }

    /// Returns whether the breakpoint is now disabled.
    pub fn toggle_breakpoint(&mut self, addr: u32) -> Result<bool, BreakpointError> {
        let disabled = self.breakpoints.toggle_disabled(&mut self.engine, addr)?;
        info!(addr = %format!("0x{:08x}", addr), disabled, "breakpoint toggled");
        Ok(disabled)
    }

    /// Executes one instruction. Returns `false` when a stop condition was
    /// reached.
    pub fn step(&mut self) -> bool {
        if let Some(code) = self.host.exit_code() {
            return self.stop(StopReason::Exited { code });
        }
        if !self.state.is_running() {
            self.state = DriverState::SingleStepping;
        }
        if let Err(err) = self.engine.step(&mut self.host) {
            return self.fault(err.to_string());
        }
        self.exec.instruction_count += 1;
        self.evaluate_stop()
    }

    /// Executes one adaptively sized batch. Returns `false` when a stop
    /// condition was reached.
    pub fn step_many(&mut self) -> bool {
        if let Some(code) = self.host.exit_code() {
            return self.stop(StopReason::Exited { code });
        }

        // The engine refuses to run from a break address, so leave it first.
        if self.breakpoints.is_active(self.engine.pc()) {
            if let Err(err) = self.engine.step(&mut self.host) {
                return self.fault(err.to_string());
            }
            self.exec.instruction_count += 1;
            if self.host.exit_code().is_some() {
                return self.evaluate_stop();
            }
        }

        let clock = Arc::clone(self.host.clock());
        let started = clock.now_ms();
        let batch = self.exec.step_batch_size;
        let executed = match self.engine.step_many(&mut self.host, batch) {
            Ok(n) => n,
            Err(err) => return self.fault(err.to_string()),
        };
        let elapsed = clock.now_ms() - started;
        self.exec.instruction_count += u64::from(executed);

        if executed == batch && elapsed > 0.0 {
            let rate = f64::from(executed) / elapsed;
            self.exec.instructions_per_ms = 0.5 * rate - 0.5 * self.exec.instructions_per_ms;
        }
        if elapsed < self.config.fast_batch_ms {
            self.exec.step_batch_size = batch.saturating_mul(2);
            debug!(
                batch = self.exec.step_batch_size,
                elapsed_ms = elapsed,
                "batch size grown"
            );
        }

        self.evaluate_stop()
    }

    /// Runs until `addr` is reached, then forgets the breakpoint. Already
    /// being at `addr` counts as reaching it.
    pub fn run_to(&mut self, addr: u32) {
        if self.host.exit_code().is_none() && self.engine.pc() == addr {
            self.stop(StopReason::Breakpoint { addr });
            return;
        }
        self.add_breakpoint(
            addr,
            BreakpointFlags {
                temporary: false,
                one_shot: true,
            },
        );
        self.start_running();
    }

    pub fn start_running(&mut self) {
        if let Some(code) = self.host.exit_code() {
            self.stop(StopReason::Exited { code });
            return;
        }
        debug!(pc = self.engine.pc(), "running");
        self.state = DriverState::Running;
    }

    pub fn stop_running(&mut self) {
        if self.state.is_running() {
            self.stop(StopReason::Paused);
        }
    }

    pub(crate) fn fault(&mut self, message: String) -> bool {
        warn!(pc = self.engine.pc(), %message, "guest fault");
        self.stop(StopReason::Fault { message })
    }

    fn stop(&mut self, reason: StopReason) -> bool {
        info!(pc = self.engine.pc(), %reason, "stopped");
        self.state = DriverState::Stopped(reason);
        false
    }

    fn evaluate_stop(&mut self) -> bool {
        if let Some(code) = self.host.exit_code() {
            return self.stop(StopReason::Exited { code });
        }
        let pc = self.engine.pc();
        match self.breakpoints.lookup(pc) {
            Some(bp) if !bp.disabled => {
                if bp.is_transient() {
                    self.breakpoints.remove(&mut self.engine, pc);
                }
                self.stop(StopReason::Breakpoint { addr: pc })
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptEngine;
    use crate::host::ManualClock;
    use crate::parser::parse_listing;

    fn context(text: &str) -> DebugContext<ScriptEngine> {
        let engine = ScriptEngine::new(parse_listing(text).unwrap());
        DebugContext::with_clock(engine, DriverConfig::default(), Arc::new(ManualClock::new()))
    }

    #[test]
    fn continue_from_breakpoint_makes_progress() {
        let mut ctx = context("10 nop\n11 jmp 10\n");
        ctx.add_breakpoint(0x10, BreakpointFlags::default());
        assert!(!ctx.step_many());
        assert_eq!(ctx.state(), &DriverState::Stopped(StopReason::Breakpoint { addr: 0x10 }));
        let before = ctx.instruction_count();

        assert!(!ctx.step_many());
        assert_eq!(ctx.pc(), 0x10);
        assert_eq!(ctx.instruction_count(), before + 2);
    }

    #[test]
    fn disabled_breakpoint_does_not_stop() {
        let mut ctx = context("10 nop\n11 nop\n12 exit 0\n");
        ctx.add_breakpoint(0x11, BreakpointFlags::default());
        assert_eq!(ctx.toggle_breakpoint(0x11), Ok(true));
        assert!(ctx.step());
        assert!(ctx.step());
        assert!(!ctx.step());
        assert_eq!(ctx.exit_code(), Some(0));
    }

    #[test]
    fn run_to_current_pc_stops_in_place() {
        let mut ctx = context("10 nop\n11 jmp 10\n");
        ctx.run_to(0x10);
        assert_eq!(ctx.state(), &DriverState::Stopped(StopReason::Breakpoint { addr: 0x10 }));
        assert!(ctx.breakpoints().is_empty());
        assert_eq!(ctx.instruction_count(), 0);
    }

    #[test]
    fn zero_batch_size_is_raised() {
        let engine = ScriptEngine::new(parse_listing("10 nop\n").unwrap());
        let config = DriverConfig {
            initial_batch_size: 0,
            ..DriverConfig::default()
        };
        let ctx = DebugContext::new(engine, config);
        assert_eq!(ctx.step_batch_size(), 1);
    }
}
