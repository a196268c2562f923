//! emu - run unmodified riscv64 Linux binaries in userland emulation.
//!
//! No kernel boot, no ptrace: syscalls are serviced in-process against
//! an in-memory rootfs.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use log::info;

use emu::net::NoNetwork;
use emu::proc::EmuCore;
use emu::runner::{Emulator, RunOutcome};
use emu::setup;
use emu::term::{QueueTerminal, SharedTerminal};

/// Container-grade userland emulator for riscv64 Linux binaries.
#[derive(Parser, Debug)]
#[command(name = "emu", author, version, about, long_about = None)]
struct Args {
    /// Populate the guest filesystem from a rootfs tar before running
    /// ENTRY from inside it
    #[arg(long, value_name = "TAR")]
    rootfs: Option<PathBuf>,

    /// On clean exit, serialize the guest filesystem to a tar at PATH
    #[arg(long, value_name = "PATH")]
    export_tar: Option<PathBuf>,

    /// Entry binary: a host path, or a guest path with --rootfs
    binary: String,

    /// Arguments passed to the guest program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "[emu] Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Args::parse();

    let mut queue = QueueTerminal::new();
    queue.echo = true;
    let term = SharedTerminal::new(queue);
    let feeder = term.clone();
    let mut core = EmuCore::with_bridges(Box::new(term), Box::new(NoNetwork));

    let binary = if let Some(rootfs) = &cli.rootfs {
        info!("loading rootfs {}", rootfs.display());
        let tar = std::fs::read(rootfs)
            .with_context(|| format!("reading rootfs {}", rootfs.display()))?;
        core.fs.load_tar(&tar);
        let resolved = core.resolve_path(&cli.binary);
        if resolved.is_empty() {
            bail!("entry binary {} not found in rootfs", cli.binary);
        }
        core.fs
            .read_file(&resolved)
            .map_err(|e| anyhow::anyhow!("reading {} from rootfs: {}", cli.binary, e))?
    } else {
        std::fs::read(&cli.binary)
            .with_context(|| format!("reading binary {}", cli.binary))?
    };

    setup::install_virtual_files(&mut core.fs, &cli.binary);

    let mut guest_args = vec![cli.binary.clone()];
    guest_args.extend(cli.args.iter().cloned());

    let mut emulator = Emulator::with_core(Box::new(rv64::Interpreter::new()), core);
    emulator.load(binary, guest_args, setup::default_env())?;

    info!("starting execution");
    let mut outcome = emulator.run()?;
    loop {
        match outcome {
            RunOutcome::Exited(code) => {
                let _ = std::io::stdout().flush();
                info!(
                    "execution complete: {} instructions, exit code {}",
                    emulator.machine.instret, code
                );
                if let Some(path) = &cli.export_tar {
                    let tar = emulator.core.fs.export_tar();
                    std::fs::write(path, tar)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!("exported guest filesystem to {}", path.display());
                }
                return Ok(code);
            }
            RunOutcome::WaitingForStdin => {
                // Blocking host read; one line per wakeup keeps the
                // cooperative loop simple.
                let mut line = String::new();
                let n = std::io::stdin()
                    .lock()
                    .read_line(&mut line)
                    .context("reading host stdin")?;
                if n == 0 {
                    feeder.set_eof();
                } else {
                    feeder.push_stdin(line.as_bytes());
                }
                outcome = emulator.resume()?;
            }
        }
    }
}
