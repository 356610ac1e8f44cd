use std::io;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use win32_debugger::config::LaunchConfig;
use win32_debugger::dap::{self, DapWriter};
use win32_debugger::executor::{self, StopFlag};

const USAGE: &str = "usage: win32-debugger [--dap] [--labels PATH] [--batch N] PROGRAM";

fn main() -> anyhow::Result<()> {
    // stdout carries the DAP wire protocol, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let dap_mode = args
        .iter()
        .any(|arg| arg == "--dap" || arg == "--debug-adapter");

    if dap_mode {
        info!("starting in DAP mode");
        let stdin = io::stdin();
        dap::run_dap_mode(stdin.lock(), DapWriter::stdout())?;
        return Ok(());
    }

    let config = parse_args(&args)?;
    info!(program = %config.program.display(), "starting in interactive mode");
    let mut ctx = executor::launch(&config)?;
    let stdin = io::stdin();
    executor::run_interactive(&mut ctx, &StopFlag::new(), stdin.lock(), io::stdout())?;
    Ok(())
}

fn parse_args(args: &[String]) -> anyhow::Result<LaunchConfig> {
    let mut program = None;
    let mut labels = None;
    let mut batch = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--labels" => labels = Some(iter.next().context("--labels needs a path")?.into()),
            "--batch" => {
                let value = iter.next().context("--batch needs a number")?;
                batch = Some(
                    value
                        .parse::<u32>()
                        .with_context(|| format!("bad batch size {:?}", value))?,
                );
            }
            "-h" | "--help" => bail!(USAGE),
            other if other.starts_with("--") => bail!("unknown option {}\n{}", other, USAGE),
            other => program = Some(other),
        }
    }

    let mut config = LaunchConfig::new(program.context(USAGE)?);
    config.labels = labels;
    if let Some(batch) = batch {
        config.driver.initial_batch_size = batch;
    }
    Ok(config)
}
