use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vm::{io::StdIO, mmu::RAMConfig, ram::MAX_RAM_SIZE, CPUConfig, CPU};

#[derive(Debug, Parser)]
#[command(
    about = "Runs a program image as the kernel process",
    after_help = "The exit code is the low byte of the kernel's HLT status."
)]
struct App {
    /// Path to a program image.
    pub bin: PathBuf,
    /// Address the image is loaded at.
    #[arg(long, default_value_t = 0, value_parser = parse_u16)]
    pub offset: u16,
    /// Memory size in bytes.
    #[arg(long, default_value_t = MAX_RAM_SIZE)]
    pub memory_size: u32,
    /// Stop after this many instructions.
    #[arg(long)]
    pub max_steps: Option<u64>,
    /// Log more, repeat for trace output.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Accepts decimal or `0x`-prefixed hex.
fn parse_u16(value: &str) -> Result<u16, String> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };

    parsed.map_err(|e| e.to_string())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Exit codes are a byte wide; only the low byte of the status survives.
fn exit_code(status: u16) -> u8 {
    if status > u8::MAX as u16 {
        tracing::warn!(status, "exit status truncated to its low byte");
    }

    status as u8
}

fn run(app: &App) -> anyhow::Result<Option<u16>> {
    let image = fs::read(&app.bin)
        .with_context(|| format!("failed to read '{}'", app.bin.display()))?;
    let config = CPUConfig {
        ram: RAMConfig {
            size: app.memory_size,
        },
    };
    let mut cpu = CPU::new(config, Box::new(StdIO))?;

    cpu.load(&image, app.offset)
        .with_context(|| format!("failed to load '{}'", app.bin.display()))?;

    Ok(cpu.run(app.max_steps)?)
}

fn main() -> ExitCode {
    let app = App::parse();

    init_logging(app.verbose);

    match run(&app) {
        Ok(Some(status)) => {
            tracing::info!(status, "kernel halted");

            ExitCode::from(exit_code(status))
        }
        Ok(None) => {
            tracing::warn!(steps = ?app.max_steps, "step limit reached");

            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err:#}");

            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{exit_code, parse_u16, App};
    use clap::Parser;

    #[test]
    fn parse_args() {
        let app = App::try_parse_from(["emulator", "prog.bin", "--offset", "0x100", "-vv"]).unwrap();

        assert_eq!(app.offset, 0x100);
        assert_eq!(app.memory_size, 0x1_0000);
        assert_eq!(app.max_steps, None);
        assert_eq!(app.verbose, 2);
    }

    #[test]
    fn exit_code_keeps_low_byte() {
        assert_eq!(exit_code(42), 42);
        assert_eq!(exit_code(0x1234), 0x34);
    }

    #[test]
    fn offsets() {
        assert_eq!(parse_u16("16"), Ok(16));
        assert_eq!(parse_u16("0xFFFF"), Ok(0xFFFF));
        assert!(parse_u16("0x10000").is_err());
    }
}
