use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde_json::json;
use tracing::{debug, error};

use super::runner::{run_turn, StopFlag, Turn};
use crate::dap::DapWriter;
use crate::debugger::{DebugContext, StopReason};
use crate::engine::Engine;

/// Drives continuous running for the DAP front end. The context lock is held
/// for one turn at a time so requests can inspect state between turns.
pub struct ExecutionThread {
    wake: Sender<()>,
    stop: StopFlag,
    handle: JoinHandle<()>,
}

impl ExecutionThread {
    pub fn spawn<E>(ctx: Arc<Mutex<DebugContext<E>>>, writer: DapWriter) -> io::Result<Self>
    where
        E: Engine + Send + 'static,
    {
        let (wake, rx) = mpsc::channel();
        let stop = StopFlag::new();
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("guest".into())
            .spawn(move || run(ctx, writer, rx, thread_stop))?;
        Ok(Self { wake, stop, handle })
    }

    /// Starts turning if the driver is in the running state.
    pub fn resume(&self) {
        self.stop.take();
        if self.wake.send(()).is_err() {
            error!("execution thread is gone");
        }
    }

    pub fn pause(&self) {
        self.stop.request();
    }

    pub fn shutdown(self) {
        let Self { wake, stop, handle } = self;
        stop.request();
        drop(wake);
        if handle.join().is_err() {
            error!("execution thread panicked");
        }
    }
}

fn run<E: Engine>(
    ctx: Arc<Mutex<DebugContext<E>>>,
    writer: DapWriter,
    wake: Receiver<()>,
    stop: StopFlag,
) {
    debug!("execution thread started");
    while wake.recv().is_ok() {
        loop {
            let turn = {
                let Ok(mut guard) = ctx.lock() else {
                    error!("debug context lock poisoned");
                    return;
                };
                let turn = if stop.take() && guard.state().is_running() {
                    guard.stop_running();
                    Turn::Stopped(StopReason::Paused)
                } else {
                    run_turn(&mut *guard)
                };
                send_output(&writer, &mut *guard);
                turn
            };
            match turn {
                Turn::Continue => thread::yield_now(),
                Turn::Stopped(reason) => {
                    report_stop(&writer, &reason);
                    break;
                }
                Turn::Idle => break,
            }
        }
    }
    debug!("execution thread exiting");
}

/// Forwards guest output written since the last call as an `output` event.
pub fn send_output<E: Engine>(writer: &DapWriter, ctx: &mut DebugContext<E>) {
    let output = ctx.take_output();
    if !output.is_empty() {
        writer.send_event(
            "output",
            Some(json!({ "category": "stdout", "output": output })),
        );
    }
}

pub fn report_stop(writer: &DapWriter, reason: &StopReason) {
    match reason {
        StopReason::Exited { code } => {
            writer.send_event("exited", Some(json!({ "exitCode": code })));
            writer.send_event("terminated", None);
        }
        other => send_stopped(writer, other.dap_reason(), Some(other.to_string())),
    }
}

pub fn send_stopped(writer: &DapWriter, reason: &str, text: Option<String>) {
    writer.send_event(
        "stopped",
        Some(json!({
            "reason": reason,
            "threadId": 1,
            "allThreadsStopped": true,
            "text": text,
        })),
    );
}
