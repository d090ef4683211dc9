use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::Parser;
use log::debug;
use vtfs::{operation::dispatch, wire::decode_response, FsEngine, VtfsConfig, VtfsResult};

#[derive(Parser)]
#[command(name = "vtfs", version, about = "Run one vtfs operation against a database")]
struct Cli {
    /// JSON config file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overrides the config.
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Write the raw response envelope to stdout.
    #[arg(long)]
    raw: bool,

    /// list, create, mkdir, read, write, delete, rmdir, link, truncate or size.
    #[arg(value_name = "OP")]
    op: String,

    /// Form-encoded parameters (e.g. token=t&file_ino=1001).
    #[arg(value_name = "QUERY", default_value = "")]
    query: String,
}

fn main() -> VtfsResult<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => VtfsConfig::load(path)?,
        None => VtfsConfig::default(),
    };
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_filter.clone()),
    )
    .init();
    debug!("opening {}", config.db_path.display());

    let engine = FsEngine::open(&config)?;
    let envelope = dispatch(&engine, &cli.op, &cli.query);

    let mut stdout = io::stdout().lock();
    if cli.raw {
        stdout.write_all(&envelope)?;
        stdout.flush()?;
        return Ok(ExitCode::SUCCESS);
    }

    let (status, payload) = decode_response(&envelope)?;
    stdout.write_all(payload)?;
    stdout.flush()?;
    if status == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("status {}", status);
        Ok(ExitCode::FAILURE)
    }
}
