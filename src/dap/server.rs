use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::protocol::{DapMessage, DapMessageContent, DapWriter};
use crate::config::LaunchConfig;
use crate::debugger::{BreakpointFlags, DebugContext, DriverState};
use crate::engine::{Engine, ScriptEngine};
use crate::executor::{self, report_stop, run_step, send_output, send_stopped, ExecutionThread};
use crate::parser::parse_address;

const THREAD_ID: u64 = 1;
const REGISTERS_REF: u64 = 1;
const EXECUTION_REF: u64 = 2;

struct Session {
    ctx: Arc<Mutex<DebugContext<ScriptEngine>>>,
    thread: ExecutionThread,
    stop_on_entry: bool,
}

pub struct DapServer {
    writer: DapWriter,
    session: Option<Session>,
    /// Addresses owned by `setInstructionBreakpoints`, replaced on every call.
    instruction_breakpoints: BTreeSet<u32>,
}

impl DapServer {
    pub fn new(writer: DapWriter) -> Self {
        Self {
            writer,
            session: None,
            instruction_breakpoints: BTreeSet::new(),
        }
    }

    /// Handles one incoming message. Returns `false` once the client disconnects.
    pub fn handle_message(&mut self, msg: DapMessage) -> bool {
        let DapMessageContent::Request { command, arguments } = msg.content else {
            debug!("ignoring non-request message");
            return true;
        };
        let seq = msg.seq;
        let args = arguments.unwrap_or(Value::Null);
        debug!(%command, seq, "request");

        let result = match command.as_str() {
            "initialize" => self.handle_initialize(seq, &command),
            "launch" => self.handle_launch(seq, &command, args),
            "setInstructionBreakpoints" => self.handle_set_instruction_breakpoints(seq, &command, &args),
            "toggleBreakpoint" => self.handle_toggle_breakpoint(seq, &command, &args),
            "runTo" => self.handle_run_to(seq, &command, &args),
            "configurationDone" => self.handle_configuration_done(seq, &command),
            "threads" => {
                self.writer.send_response(
                    seq,
                    &command,
                    Some(json!({ "threads": [{ "id": THREAD_ID, "name": "guest" }] })),
                );
                Ok(())
            }
            "stackTrace" => self.handle_stack_trace(seq, &command),
            "scopes" => {
                self.writer.send_response(
                    seq,
                    &command,
                    Some(json!({
                        "scopes": [
                            { "name": "Registers", "variablesReference": REGISTERS_REF, "expensive": false },
                            { "name": "Execution", "variablesReference": EXECUTION_REF, "expensive": false },
                        ]
                    })),
                );
                Ok(())
            }
            "variables" => self.handle_variables(seq, &command, &args),
            "disassemble" => self.handle_disassemble(seq, &command, &args),
            "continue" => self.handle_continue(seq, &command),
            "next" | "stepIn" => self.handle_step(seq, &command),
            "pause" => self.handle_pause(seq, &command),
            "disconnect" => {
                self.writer.send_response(seq, &command, None);
                self.shutdown();
                return false;
            }
            _ => Err(format!("unsupported request {}", command)),
        };

        if let Err(message) = result {
            warn!(%command, %message, "request failed");
            self.writer.send_error(seq, &command, message);
        }
        true
    }

    /// Stops the execution thread, if one was started.
    pub fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            if let Ok(mut ctx) = session.ctx.lock() {
                ctx.stop_running();
            }
            session.thread.shutdown();
        }
    }

    fn handle_initialize(&mut self, seq: u64, command: &str) -> Result<(), String> {
        self.writer.send_response(
            seq,
            command,
            Some(json!({
                "supportsConfigurationDoneRequest": true,
                "supportsInstructionBreakpoints": true,
                "supportsDisassembleRequest": true,
                "supportsSteppingGranularity": false,
                "supportsStepBack": false,
                "supportsConditionalBreakpoints": false,
                "supportsSetVariable": false,
            })),
        );
        Ok(())
    }

    fn handle_launch(&mut self, seq: u64, command: &str, args: Value) -> Result<(), String> {
        if self.session.is_some() {
            return Err("a program is already running".into());
        }
        let config: LaunchConfig =
            serde_json::from_value(args).map_err(|e| format!("bad launch arguments: {}", e))?;
        let ctx = executor::launch(&config).map_err(|e| format!("{:#}", e))?;
        info!(program = %config.program.display(), "launch");

        let ctx = Arc::new(Mutex::new(ctx));
        let thread = ExecutionThread::spawn(Arc::clone(&ctx), self.writer.clone())
            .map_err(|e| format!("cannot start execution thread: {}", e))?;
        self.session = Some(Session {
            ctx,
            thread,
            stop_on_entry: config.stop_on_entry,
        });
        self.instruction_breakpoints.clear();

        self.writer.send_response(seq, command, None);
        self.writer.send_event("initialized", None);
        Ok(())
    }

    fn handle_configuration_done(&mut self, seq: u64, command: &str) -> Result<(), String> {
        self.writer.send_response(seq, command, None);
        let Some(session) = &self.session else {
            return Ok(());
        };
        if session.stop_on_entry {
            send_stopped(&self.writer, "entry", None);
        } else {
            lock(&session.ctx)?.start_running();
            session.thread.resume();
        }
        Ok(())
    }

    fn handle_set_instruction_breakpoints(
        &mut self,
        seq: u64,
        command: &str,
        args: &Value,
    ) -> Result<(), String> {
        let session = self.session.as_ref().ok_or("no program launched")?;
        let mut ctx = lock(&session.ctx)?;

        for addr in std::mem::take(&mut self.instruction_breakpoints) {
            ctx.remove_breakpoint(addr);
        }

        let requested = args
            .get("breakpoints")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut results = Vec::new();
        for bp in &requested {
            let reference = bp
                .get("instructionReference")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let offset = bp.get("offset").and_then(Value::as_i64).unwrap_or(0);
            match resolve(&ctx, reference) {
                Some(base) => {
                    let addr = base.wrapping_add(offset as u32);
                    ctx.add_breakpoint(addr, BreakpointFlags::default());
                    self.instruction_breakpoints.insert(addr);
                    results.push(json!({
                        "verified": true,
                        "instructionReference": format!("0x{:08x}", addr),
                    }));
                }
                None => results.push(json!({
                    "verified": false,
                    "message": format!("cannot resolve {:?}", reference),
                })),
            }
        }
        drop(ctx);

        self.writer
            .send_response(seq, command, Some(json!({ "breakpoints": results })));
        Ok(())
    }

    fn handle_toggle_breakpoint(&mut self, seq: u64, command: &str, args: &Value) -> Result<(), String> {
        let session = self.session.as_ref().ok_or("no program launched")?;
        let mut ctx = lock(&session.ctx)?;
        let addr = address_argument(&ctx, args)?;
        let disabled = ctx.toggle_breakpoint(addr).map_err(|e| e.to_string())?;
        drop(ctx);
        self.writer
            .send_response(seq, command, Some(json!({ "disabled": disabled })));
        Ok(())
    }

    fn handle_run_to(&mut self, seq: u64, command: &str, args: &Value) -> Result<(), String> {
        let session = self.session.as_ref().ok_or("no program launched")?;
        let mut ctx = lock(&session.ctx)?;
        let addr = address_argument(&ctx, args)?;
        ctx.run_to(addr);
        let reached = match ctx.state() {
            DriverState::Stopped(reason) => Some(reason.clone()),
            _ => None,
        };
        drop(ctx);
        self.writer.send_response(seq, command, None);
        match reached {
            Some(reason) => report_stop(&self.writer, &reason),
            None => session.thread.resume(),
        }
        Ok(())
    }

    fn handle_stack_trace(&mut self, seq: u64, command: &str) -> Result<(), String> {
        let session = self.session.as_ref().ok_or("no program launched")?;
        let ctx = lock(&session.ctx)?;
        let pc = ctx.pc();
        let frame = json!({
            "id": 0,
            "name": ctx.describe(pc),
            "line": 0,
            "column": 0,
            "instructionPointerReference": format!("0x{:08x}", pc),
        });
        drop(ctx);
        self.writer.send_response(
            seq,
            command,
            Some(json!({ "stackFrames": [frame], "totalFrames": 1 })),
        );
        Ok(())
    }

    fn handle_variables(&mut self, seq: u64, command: &str, args: &Value) -> Result<(), String> {
        let session = self.session.as_ref().ok_or("no program launched")?;
        let ctx = lock(&session.ctx)?;
        let reference = args
            .get("variablesReference")
            .and_then(Value::as_u64)
            .unwrap_or_default();

        let variables: Vec<Value> = match reference {
            REGISTERS_REF => ctx
                .engine()
                .registers()
                .iter()
                .map(|(name, value)| variable(name, format!("0x{:08x}", value)))
                .collect(),
            EXECUTION_REF => {
                let exec = ctx.execution();
                vec![
                    variable("state", format!("{:?}", ctx.state())),
                    variable("instructionCount", exec.instruction_count.to_string()),
                    variable("stepBatchSize", exec.step_batch_size.to_string()),
                    variable("instructionsPerMs", format!("{:.2}", exec.instructions_per_ms)),
                    variable(
                        "exitCode",
                        ctx.exit_code()
                            .map_or_else(|| "none".to_string(), |code| code.to_string()),
                    ),
                ]
            }
            other => return Err(format!("unknown variables reference {}", other)),
        };
        drop(ctx);

        self.writer
            .send_response(seq, command, Some(json!({ "variables": variables })));
        Ok(())
    }

    fn handle_disassemble(&mut self, seq: u64, command: &str, args: &Value) -> Result<(), String> {
        let session = self.session.as_ref().ok_or("no program launched")?;
        let ctx = lock(&session.ctx)?;
        let reference = args
            .get("memoryReference")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let start = resolve(&ctx, reference).ok_or_else(|| format!("cannot resolve {:?}", reference))?;
        let skip = args
            .get("instructionOffset")
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .max(0) as usize;
        let count = args
            .get("instructionCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        let instructions: Vec<Value> = ctx
            .engine()
            .disassemble(start, skip + count)
            .into_iter()
            .skip(skip)
            .map(|line| {
                let mut entry = json!({
                    "address": format!("0x{:08x}", line.addr),
                    "instruction": line.text,
                });
                if let Some(name) = ctx.labels().name_at(line.addr) {
                    entry["symbol"] = json!(name);
                }
                entry
            })
            .collect();
        drop(ctx);

        self.writer
            .send_response(seq, command, Some(json!({ "instructions": instructions })));
        Ok(())
    }

    fn handle_continue(&mut self, seq: u64, command: &str) -> Result<(), String> {
        let session = self.session.as_ref().ok_or("no program launched")?;
        lock(&session.ctx)?.start_running();
        self.writer
            .send_response(seq, command, Some(json!({ "allThreadsContinued": true })));
        session.thread.resume();
        Ok(())
    }

    fn handle_step(&mut self, seq: u64, command: &str) -> Result<(), String> {
        let session = self.session.as_ref().ok_or("no program launched")?;
        let mut ctx = lock(&session.ctx)?;
        if ctx.state().is_running() {
            return Err("cannot step while running".into());
        }
        self.writer.send_response(seq, command, None);

        let may_continue = run_step(&mut *ctx);
        send_output(&self.writer, &mut ctx);
        match (may_continue, ctx.state()) {
            (false, DriverState::Stopped(reason)) => report_stop(&self.writer, reason),
            _ => send_stopped(&self.writer, "step", None),
        }
        Ok(())
    }

    fn handle_pause(&mut self, seq: u64, command: &str) -> Result<(), String> {
        let session = self.session.as_ref().ok_or("no program launched")?;
        self.writer.send_response(seq, command, None);
        session.thread.pause();
        Ok(())
    }
}

fn lock<E: Engine>(
    ctx: &Mutex<DebugContext<E>>,
) -> Result<MutexGuard<'_, DebugContext<E>>, String> {
    ctx.lock().map_err(|_| "debug context lock poisoned".to_string())
}

/// An address in hex, or a label name.
fn resolve<E: Engine>(ctx: &DebugContext<E>, reference: &str) -> Option<u32> {
    parse_address(reference).or_else(|| ctx.labels().lookup(reference))
}

fn address_argument<E: Engine>(ctx: &DebugContext<E>, args: &Value) -> Result<u32, String> {
    let reference = args
        .get("address")
        .and_then(Value::as_str)
        .ok_or("missing address argument")?;
    resolve(ctx, reference).ok_or_else(|| format!("cannot resolve {:?}", reference))
}

fn variable(name: &str, value: String) -> Value {
    json!({ "name": name, "value": value, "variablesReference": 0 })
}
