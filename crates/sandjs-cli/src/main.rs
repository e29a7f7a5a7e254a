//! sandjs command-line runner
//!
//! Executes a script's default export inside the sandboxed engine and
//! prints the captured run log, the result value, and the run metrics.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use sandjs_runtime::{run, CachedLogger, CancelSignal, Limits, RunOptions, SourceDir};

#[derive(Parser)]
#[command(name = "sandjs")]
#[command(about = "Sandboxed QuickJS script runner", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script's default export in the sandbox
    Run {
        /// Main module file
        file: PathBuf,
        /// Additional importable modules, as NAME=PATH pairs
        #[arg(short, long = "module", value_name = "NAME=PATH")]
        modules: Vec<String>,
        /// Maximum interrupt checkpoints before aborting
        #[arg(long, default_value_t = 1024)]
        cycle_cap: u64,
        /// Wall-clock deadline in milliseconds
        #[arg(long, default_value_t = 2500)]
        deadline_ms: u64,
        /// Guest heap ceiling in MiB
        #[arg(long, default_value_t = 10)]
        memory_mib: usize,
        /// Guest stack ceiling in MiB
        #[arg(long, default_value_t = 1)]
        stack_mib: usize,
        /// Captured log capacity in entries
        #[arg(long, default_value_t = 256)]
        log_capacity: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            modules,
            cycle_cap,
            deadline_ms,
            memory_mib,
            stack_mib,
            log_capacity,
        } => {
            let main_source = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let main_name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "main.js".to_string());
            let mut dir = SourceDir::new(main_name, main_source);
            for spec in modules {
                let Some((name, path)) = spec.split_once('=') else {
                    bail!("invalid module spec {spec:?}, expected NAME=PATH");
                };
                let source = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {path}"))?;
                dir = dir.with_file(name, source);
            }

            let limits = Limits {
                memory_bytes: memory_mib * 1024 * 1024,
                stack_bytes: stack_mib * 1024 * 1024,
                cycle_cap,
                deadline: Duration::from_millis(deadline_ms),
            };
            let logger = Arc::new(CachedLogger::new(log_capacity));
            let cancel = CancelSignal::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                });
            }

            let result = run(
                &dir,
                RunOptions {
                    logger: logger.clone(),
                    cancel,
                    limits,
                },
            )
            .await?;

            if logger.is_wrapped() {
                println!("... (older log entries omitted)");
            }
            for entry in logger.output() {
                println!("{entry}");
            }
            match &result.value {
                Some(value) => println!("value: {}", serde_json::to_string_pretty(value)?),
                None => println!("value: none"),
            }
            println!(
                "duration: {} ms, cycles: {}",
                result.duration.as_millis(),
                result.cycles
            );
        }
    }

    Ok(())
}
