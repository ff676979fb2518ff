// src/main.rs

use anyhow::{Context as _, Result};
use clap::Parser;
use rustpack::cli::Cli;
use rustpack::commands::{self, Session};
use rustpack::repository::RepositoryClient;
use rustpack::scriptlet::ShellRunner;
use rustpack::ui::TerminalPrompt;
use rustpack::{Error, aur};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Log to stderr; `--debug` wins over `RUST_LOG`, which wins over `warn`
fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Vec<String>) -> Result<i32> {
    if aur::requested(&args) {
        init_logging(args.iter().any(|a| a == "--debug"));
        let code = aur::run_passthrough(&args[1..])?;
        return Ok(code);
    }

    // clap prints help and usage errors itself and exits with status 2
    let cli = Cli::parse_from(&args);
    init_logging(cli.debug);
    let request = cli.into_request()?;
    debug!("request: {:?}", request);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        eprintln!("\ninterrupt received, stopping at the next safe point");
        flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install the interrupt handler")?;

    let mut ctx = commands::load_context(&request.flags)?;
    let client = RepositoryClient::new(ctx.max_retries, ctx.retry_delay)?;
    let prompt = TerminalPrompt::default();
    let session = Session {
        fetcher: &client,
        confirm: &prompt,
        scriptlets: &ShellRunner,
        interrupted,
        require_root: true,
    };

    commands::run(&request, &mut ctx, &session)?;
    Ok(0)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    match run(args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            let code = e.downcast_ref::<Error>().map(Error::exit_code).unwrap_or(1);
            process::exit(code);
        }
    }
}
