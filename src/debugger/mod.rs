mod breakpoints;
mod context;
mod stepping;

pub use breakpoints::{Breakpoint, BreakpointError, BreakpointFlags, Breakpoints};
pub use context::{DebugContext, ExecutionState};
pub use stepping::{DriverState, StopReason};
