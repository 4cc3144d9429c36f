//! gasprobe CLI: gas-pattern detector for EVM smart contracts.

use anyhow::{Context, Result};
use clap::Parser;
use gasprobe::analysis::{analyse_source, AnalysisConfig, OutputFormat};
use gasprobe::errors::{DEFAULT_SOLVER_TIMEOUT_MS, DEFAULT_TIMEOUT_SECS, MAX_PATH_COUNT};
use std::io::{IsTerminal, Read};

#[derive(Parser, Debug)]
#[command(
    name = "gasprobe",
    version,
    about = "Symbolic gas-pattern detector for Solidity functions"
)]
struct Cli {
    /// Front-end IR document (JSON). Reads stdin when omitted.
    #[arg(value_name = "FILE")]
    file: Option<String>,

    /// Only analyse this contract.
    #[arg(short = 'c', long)]
    contract: Option<String>,

    /// Only analyse functions with this name.
    #[arg(short = 'n', long = "function")]
    function: Option<String>,

    /// Output format: text (default), json.
    #[arg(short = 'o', long, default_value = "text")]
    format: String,

    /// Exploration timeout per function, in seconds.
    #[arg(short = 't', long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Maximum number of explored paths per function.
    #[arg(long, default_value_t = MAX_PATH_COUNT)]
    max_paths: usize,

    /// Solver timeout per query, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_SOLVER_TIMEOUT_MS)]
    solver_timeout: u32,

    /// Disable coloured output.
    #[arg(long)]
    no_color: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let source = if let Some(ref path) = cli.file {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?
    } else if std::io::stdin().is_terminal() {
        anyhow::bail!("no input provided; pass an IR file or pipe JSON to stdin");
    } else {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    };

    let format = match cli.format.as_str() {
        "text" => OutputFormat::Text,
        "json" => OutputFormat::Json,
        other => anyhow::bail!("unknown output format `{other}` (expected text or json)"),
    };

    let config = AnalysisConfig {
        timeout_secs: cli.timeout,
        max_paths: cli.max_paths,
        solver_timeout_ms: cli.solver_timeout,
        format,
        color: !cli.no_color && std::io::stdout().is_terminal(),
    };

    let result = analyse_source(&source, cli.contract.as_deref(), cli.function.as_deref(), &config)?;
    println!("{}", result.text);

    Ok(())
}
