//! `fontpress` command-line app.

use std::{io::Write, process::ExitCode};

use clap::Parser;
use fontpress_cli::{run, Args, RunSummary};

const KIB: usize = 1_024;

fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env)
        .format(|buffer, record| writeln!(buffer, "[{}] {}", record.level(), record.args()))
        .init();
}

fn report(summary: &RunSummary) {
    if summary.files_skipped > 0 {
        log::warn!("skipped {} unreadable file(s)", summary.files_skipped);
    }
    log::info!(
        "retained {} glyph(s) for {} distinct char(s)",
        summary.retained_glyphs,
        summary.distinct_chars
    );
    log::info!(
        "compression complete: {}KB -> {}KB",
        summary.original_size / KIB,
        summary.new_size / KIB
    );
    log::info!("size reduced by {:.1}%", summary.reduction_percent());
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // `--help` and `--version` are reported as "errors" printed to stdout
            let is_failure = err.use_stderr();
            err.print().ok();
            return if is_failure {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_logging();

    match run(&args) {
        Ok(summary) => {
            report(&summary);
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
