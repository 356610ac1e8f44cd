mod dap_runner;
mod runner;

use std::fs;

use anyhow::Context;
use tracing::info;

use crate::config::LaunchConfig;
use crate::debugger::DebugContext;
use crate::engine::ScriptEngine;
use crate::parser::{parse_label_map, parse_listing};

pub use dap_runner::{report_stop, send_output, send_stopped, ExecutionThread};
pub use runner::{run_interactive, run_step, run_turn, run_until_stopped, StopFlag, Turn};

/// Loads the guest listing (and label map, if any) and builds a driver for it.
pub fn launch(config: &LaunchConfig) -> anyhow::Result<DebugContext<ScriptEngine>> {
    let text = fs::read_to_string(&config.program)
        .with_context(|| format!("reading {}", config.program.display()))?;
    let listing = parse_listing(&text)
        .with_context(|| format!("parsing {}", config.program.display()))?;
    info!(
        program = %config.program.display(),
        instructions = listing.len(),
        "loaded program"
    );

    let mut ctx = DebugContext::new(ScriptEngine::new(listing), config.driver.clone());
    if let Some(path) = &config.labels {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let labels =
            parse_label_map(&text).with_context(|| format!("parsing {}", path.display()))?;
        info!(labels = labels.len(), "loaded labels");
        ctx.set_labels(labels);
    }
    Ok(ctx)
}
