use serde::Serialize;

/// Why execution last stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StopReason {
    Breakpoint { addr: u32 },
    Exited { code: i32 },
    Fault { message: String },
    Paused,
}

impl StopReason {
    /// Reason string for a DAP `stopped` event.
    pub fn dap_reason(&self) -> &'static str {
        match self {
            StopReason::Breakpoint { .. } => "breakpoint",
            StopReason::Exited { .. } => "exited",
            StopReason::Fault { .. } => "exception",
            StopReason::Paused => "pause",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Breakpoint { addr } => write!(f, "breakpoint at 0x{:08x}", addr),
            StopReason::Exited { code } => write!(f, "exited with code {}", code),
            StopReason::Fault { message } => write!(f, "fault: {}", message),
            StopReason::Paused => write!(f, "paused"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DriverState {
    #[default]
    Idle,
    SingleStepping,
    Running,
    Stopped(StopReason),
}

impl DriverState {
    pub fn is_running(&self) -> bool {
        matches!(self, DriverState::Running)
    }

    pub fn is_exited(&self) -> bool {
        matches!(self, DriverState::Stopped(StopReason::Exited { .. }))
    }
}
