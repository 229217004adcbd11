//! Process entry point: argument parsing, tracing/log setup, privilege-drop
//! wiring, and the exit-code contract. No update-flow logic lives here; it
//! all belongs to `tpmfwupd-core`, which `main` only wires up and hands
//! requests to.
//!
//! Calls into core are wrapped in `anyhow::Result` here at the process
//! boundary only, the way `sisctl::main` wraps its own supervisor calls:
//! `anyhow::Context` attaches the file/path the failure happened on, but the
//! numeric exit code always comes from the `CoreError` at the root of the
//! chain (hard `Err` paths) or from `UpdateResult::return_code` (a flow that
//! ran to completion but reports a non-zero envelope code, e.g. a
//! `WrongFwImage` verdict), never from the anyhow wrapper's own formatting.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tpmfwupd_cli::cli::{Action, Cli};
use tpmfwupd_cli::{logfile, privilege, render};
use tpmfwupd_core::channel::open_channel;
use tpmfwupd_core::error::CoreError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let error_store = logfile::ErrorStore::new();

    // `-log [path]` keeps a worker guard alive for the process lifetime so
    // buffered file writes are flushed even on an early `process::exit`-free
    // return from `main`.
    let mut _log_guard = None;
    let log_path = cli.log.clone();
    init_tracing(&error_store, log_path.as_deref(), &mut _log_guard);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting tpmfwupd");

    match run(&cli) {
        Ok(code) => code,
        Err(err) => finish(&err, &error_store, log_path.as_deref()),
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let action = cli.resolve()?;
    let privilege: Box<dyn tpmfwupd_core::channel::PrivilegeDrop> = Box::new(privilege::UnixPrivilegeDrop);
    run_action(action, cli, privilege)
}

fn run_action(action: Action, cli: &Cli, privilege: Box<dyn tpmfwupd_core::channel::PrivilegeDrop>) -> anyhow::Result<ExitCode> {
    match action {
        Action::Info => {
            let mut channel = open_channel(cli.access_mode(), privilege).context("opening device channel")?;
            let state = tpmfwupd_core::driver_fsm::run_info(channel.as_mut()).context("probing TPM state")?;
            render::render_tpm_state(&state);
            Ok(ExitCode::SUCCESS)
        }
        Action::ClearOwnership => {
            let mut channel = open_channel(cli.access_mode(), privilege).context("opening device channel")?;
            let result = tpmfwupd_core::driver_fsm::run_clear_ownership(channel.as_mut()).context("clearing TPM 1.2 ownership")?;
            render::render_update_result(&result);
            Ok(ExitCode::SUCCESS)
        }
        Action::Update(request) => {
            let mut channel = open_channel(request.access_mode.clone(), privilege).context("opening device channel")?;
            let mut progress_cb = |pct: u8| render::render_progress(pct);
            let result = tpmfwupd_core::driver_fsm::run_update(&request, channel.as_mut(), &mut progress_cb)
                .with_context(|| format!("running firmware update ({:?})", request.update_type))?;
            render::render_update_result(&result);
            Ok(exit_code_for_update_result(&result))
        }
    }
}

/// `run_update` reports some terminal states (e.g. an image that fails the
/// chip-compatibility check) as a successful `UpdateResult` carrying a
/// non-zero `return_code` rather than an `Err`, so the envelope/chip
/// distinction in `error_details` survives into the rendered output. The
/// process exit code still has to reflect that code either way.
fn exit_code_for_update_result(result: &tpmfwupd_core::request::UpdateResult) -> ExitCode {
    if result.return_code != 0 {
        if let Some(msg) = &result.error_details {
            eprintln!("error {:#010x}: {msg}", result.return_code);
        }
    }
    ExitCode::from((result.return_code & 0xFF) as u8)
}

/// Recover the numeric exit code and user-visible message from the
/// originating `CoreError`, wherever it sits in the anyhow context chain,
/// rather than from whatever `Context` string wraps it outermost.
fn finish(err: &anyhow::Error, error_store: &logfile::ErrorStore, log_path: Option<&std::path::Path>) -> ExitCode {
    tracing::error!(error = %err, "tpmfwupd failed");
    let core_err = err.chain().find_map(|cause| cause.downcast_ref::<CoreError>()).cloned().unwrap_or(CoreError::Internal);
    render::render_error(&core_err, error_store.last_message().as_deref(), log_path);
    let code = core_err.to_code();
    ExitCode::from((code & 0xFF) as u8)
}

fn init_tracing(error_store: &logfile::ErrorStore, log_path: Option<&std::path::Path>, guard_slot: &mut Option<tracing_appender::non_blocking::WorkerGuard>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tpmfwupd=debug"));

    let registry = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .with(error_store.layer());

    match log_path {
        Some(path) => match logfile::open_rotating(path, 10 * 1024 * 1024) {
            Ok((writer, guard)) => {
                *guard_slot = Some(guard);
                registry.with(fmt::layer().with_target(true).with_ansi(false).with_writer(writer)).init();
            }
            Err(e) => {
                registry.init();
                tracing::error!(error = %e, path = %path.display(), "failed to open log file; continuing without file logging");
            }
        },
        None => registry.init(),
    }
}
