use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use tracing_subscriber::EnvFilter;

use glass_mirror::config::{MirrorArgs, MirrorConfig};

fn main() -> ExitCode {
    let args = match MirrorArgs::try_parse() {
        Ok(args) => args,
        Err(error) => {
            // --help / --version exit 0; real argument errors exit 1.
            let code = match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
            let _ = error.print();
            return code;
        }
    };

    init_tracing(args.debug);

    if args.list {
        return list_monitors();
    }

    let config = match MirrorConfig::from_args(&args) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("ERROR: {error}");
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR: {error:#}");
            ExitCode::FAILURE
        }
    }
}

/// Diagnostics go to stderr through tracing; the banner and the
/// per-second stats line own stdout.
fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "glass_mirror=debug"
    } else {
        "glass_mirror=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(target_os = "windows")]
fn run(config: MirrorConfig) -> anyhow::Result<()> {
    glass_mirror::session::run(config)?;
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn run(_config: MirrorConfig) -> anyhow::Result<()> {
    anyhow::bail!("display mirroring is only supported on Windows")
}

#[cfg(target_os = "windows")]
fn list_monitors() -> ExitCode {
    match glass_mirror::session::print_monitor_table() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR: {error:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(not(target_os = "windows"))]
fn list_monitors() -> ExitCode {
    eprintln!("ERROR: display mirroring is only supported on Windows");
    ExitCode::FAILURE
}
