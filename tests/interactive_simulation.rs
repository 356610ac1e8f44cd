// tests/interactive_simulation.rs
// Drives the terminal front end, the turn scheduler and the DAP server the
// way a user or an editor would.

use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use win32_debugger::config::DriverConfig;
use win32_debugger::debugger::{DebugContext, StopReason};
use win32_debugger::engine::ScriptEngine;
use win32_debugger::host::ManualClock;
use win32_debugger::parser::{parse_label_map, parse_listing};

const COUNTDOWN: &str = r#"
10 mov ecx 3
11 nop
12 loop 11
13 writeln "done"
14 exit 0
"#;

fn create_context(listing: &str) -> DebugContext<ScriptEngine> {
    let listing = parse_listing(listing).expect("Failed to parse listing");
    DebugContext::with_clock(
        ScriptEngine::new(listing),
        DriverConfig::default(),
        Arc::new(ManualClock::new()),
    )
}

// Helper to create listing files for launch requests
fn create_test_listing(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "win32_debugger_{}_{}.lst",
        name,
        std::process::id()
    ));
    fs::write(&path, content).expect("Failed to write test file");
    path
}

fn cleanup(path: &Path) {
    let _ = fs::remove_file(path);
}

#[cfg(test)]
mod interactive_tests {
    use win32_debugger::executor::{run_interactive, run_until_stopped, StopFlag};

    use super::*;

    fn run_session(ctx: &mut DebugContext<ScriptEngine>, input: &str) -> String {
        let mut out = Vec::new();
        run_interactive(ctx, &StopFlag::new(), Cursor::new(input), &mut out)
            .expect("session failed");
        String::from_utf8(out).expect("output is not UTF-8")
    }

    #[test]
    fn test_breakpoint_then_continue_to_exit() {
        let mut ctx = create_context(COUNTDOWN);
        let out = run_session(&mut ctx, "b 13\nc\nc\nq\n");

        assert!(out.contains("breakpoint at 0x00000013"));
        assert!(out.contains("breakpoint hit at 0x00000013"));
        assert!(out.contains("done\n"));
        assert!(out.contains("exited with code 0"));
        assert_eq!(ctx.exit_code(), Some(0));
    }

    #[test]
    fn test_empty_line_steps() {
        let mut ctx = create_context(COUNTDOWN);
        run_session(&mut ctx, "\n\ns 2\n");
        // mov, nop, loop back, nop
        assert_eq!(ctx.instruction_count(), 4);
        assert_eq!(ctx.pc(), 0x12);
    }

    #[test]
    fn test_run_to_label() {
        let mut ctx = create_context(COUNTDOWN);
        ctx.set_labels(parse_label_map("start\t10\nfinish\t13\n").unwrap());

        let out = run_session(&mut ctx, "r finish\nbl\nregs\n");

        assert!(out.contains("breakpoint hit at 0x00000013 <finish>"));
        assert!(out.contains("no breakpoints"));
        assert!(out.contains("ecx 00000000"));
    }

    #[test]
    fn test_errors_do_not_end_session() {
        let mut ctx = create_context(COUNTDOWN);
        let out = run_session(&mut ctx, "frob\nt 12\nr nowhere\ndis\nq\n");

        assert!(out.contains("error: unknown command \"frob\""));
        assert!(out.contains("error: no breakpoint at 0x00000012"));
        assert!(out.contains("error: unknown label \"nowhere\""));
        assert!(out.contains("=> 00000010  mov ecx, 0x3"));
        assert_eq!(ctx.instruction_count(), 0);
    }

    #[test]
    fn test_stop_flag_pauses_between_turns() {
        let mut ctx = create_context("10 jmp 10\n");
        let stop = StopFlag::new();
        let mut turns = 0;

        ctx.start_running();
        let reason = run_until_stopped(&mut ctx, &stop, |_| {
            turns += 1;
            if turns == 3 {
                stop.request();
            }
        });

        assert_eq!(reason, Some(StopReason::Paused));
        assert_eq!(turns, 3);
        // 1000, 2000 and 4000 instructions: the clock never moves, so every batch is fast
        assert_eq!(ctx.instruction_count(), 7000);
    }
}

#[cfg(test)]
mod dap_tests {
    use win32_debugger::dap::{DapMessage, DapServer, DapWriter};

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn messages(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap().clone();
            let text = String::from_utf8(bytes).unwrap();
            let mut messages = Vec::new();
            let mut rest = text.as_str();
            while let Some(header_end) = rest.find("\r\n\r\n") {
                let len: usize = rest[..header_end]
                    .trim_start_matches("Content-Length: ")
                    .parse()
                    .unwrap();
                let body = &rest[header_end + 4..header_end + 4 + len];
                messages.push(serde_json::from_str(body).unwrap());
                rest = &rest[header_end + 4 + len..];
            }
            messages
        }

        fn wait_for_event(&self, event: &str, count: usize) -> Vec<Value> {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                let found: Vec<Value> = self
                    .messages()
                    .into_iter()
                    .filter(|m| m["type"] == "event" && m["event"] == event)
                    .collect();
                if found.len() >= count {
                    return found;
                }
                assert!(Instant::now() < deadline, "timed out waiting for {}", event);
                thread::sleep(Duration::from_millis(10));
            }
        }

        fn response(&self, request_seq: u64) -> Value {
            self.messages()
                .into_iter()
                .find(|m| m["type"] == "response" && m["request_seq"] == request_seq)
                .unwrap_or_else(|| panic!("no response to request {}", request_seq))
        }
    }

    fn request(seq: u64, command: &str, arguments: Value) -> DapMessage {
        serde_json::from_value(json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        }))
        .unwrap()
    }

    #[test]
    fn test_dap_session_to_exit() {
        let path = create_test_listing("dap_session", COUNTDOWN);
        let buffer = SharedBuffer::default();
        let mut server = DapServer::new(DapWriter::new(buffer.clone()));

        assert!(server.handle_message(request(1, "initialize", json!({}))));
        assert_eq!(buffer.response(1)["success"], true);
        assert_eq!(buffer.response(1)["body"]["supportsInstructionBreakpoints"], true);

        server.handle_message(request(
            2,
            "launch",
            json!({ "program": path, "stopOnEntry": true }),
        ));
        assert_eq!(buffer.response(2)["success"], true);
        buffer.wait_for_event("initialized", 1);

        server.handle_message(request(
            3,
            "setInstructionBreakpoints",
            json!({ "breakpoints": [
                { "instructionReference": "0x13" },
                { "instructionReference": "missing" },
            ]}),
        ));
        let response = buffer.response(3);
        let bps = &response["body"]["breakpoints"];
        assert_eq!(bps[0]["verified"], true);
        assert_eq!(bps[1]["verified"], false);

        server.handle_message(request(4, "configurationDone", json!({})));
        let stopped = buffer.wait_for_event("stopped", 1);
        assert_eq!(stopped[0]["body"]["reason"], "entry");

        server.handle_message(request(5, "next", json!({ "threadId": 1 })));
        let stopped = buffer.wait_for_event("stopped", 2);
        assert_eq!(stopped[1]["body"]["reason"], "step");

        server.handle_message(request(6, "continue", json!({ "threadId": 1 })));
        let stopped = buffer.wait_for_event("stopped", 3);
        assert_eq!(stopped[2]["body"]["reason"], "breakpoint");

        server.handle_message(request(7, "variables", json!({ "variablesReference": 1 })));
        let vars = buffer.response(7)["body"]["variables"].clone();
        let eip = vars
            .as_array()
            .unwrap()
            .iter()
            .find(|v| v["name"] == "eip")
            .unwrap()
            .clone();
        assert_eq!(eip["value"], "0x00000013");

        server.handle_message(request(8, "continue", json!({ "threadId": 1 })));
        let exited = buffer.wait_for_event("exited", 1);
        assert_eq!(exited[0]["body"]["exitCode"], 0);
        buffer.wait_for_event("terminated", 1);
        let output = buffer.wait_for_event("output", 1);
        assert_eq!(output[0]["body"]["output"], "done\n");

        assert!(!server.handle_message(request(9, "disconnect", json!({}))));
        cleanup(&path);
    }

    #[test]
    fn test_dap_errors_are_responses() {
        let path = create_test_listing("dap_errors", "10 jmp 10\n");
        let buffer = SharedBuffer::default();
        let mut server = DapServer::new(DapWriter::new(buffer.clone()));

        server.handle_message(request(1, "threads", json!({})));
        assert_eq!(buffer.response(1)["success"], true);

        server.handle_message(request(2, "stackTrace", json!({ "threadId": 1 })));
        assert_eq!(buffer.response(2)["success"], false);

        server.handle_message(request(3, "launch", json!({ "program": path })));
        server.handle_message(request(4, "toggleBreakpoint", json!({ "address": "0x10" })));
        let response = buffer.response(4);
        assert_eq!(response["success"], false);
        assert_eq!(response["message"], "no breakpoint at 0x00000010");

        server.handle_message(request(5, "stepBack", json!({})));
        assert_eq!(buffer.response(5)["success"], false);

        server.handle_message(request(6, "disassemble", json!({
            "memoryReference": "0x10",
            "instructionCount": 4,
        })));
        let instructions = buffer.response(6)["body"]["instructions"].clone();
        assert_eq!(instructions[0]["instruction"], "jmp 0x00000010");

        // Start running the endless loop, then pause it
        server.handle_message(request(7, "configurationDone", json!({})));
        server.handle_message(request(8, "continue", json!({ "threadId": 1 })));
        server.handle_message(request(9, "pause", json!({ "threadId": 1 })));
        let stopped = buffer.wait_for_event("stopped", 2);
        assert_eq!(stopped[1]["body"]["reason"], "pause");

        server.shutdown();
        cleanup(&path);
    }
}
