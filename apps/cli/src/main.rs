mod args;

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::process::ExitCode;

use clap::Parser;
use meter_app::{
    AppError, Result, default_config_path, init_logging, load_or_create, load_samples, open_store,
};
use serde::Serialize;
use tracing::info;

use crate::args::{Cli, Command};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            match err {
                AppError::Db(db) if db.is_configuration() => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let load = load_or_create(&config_path)?;
    let mut config = load.config;
    config.apply_env();
    config.apply_database_override(cli.database);

    init_logging(&config.log_filter)?;
    if load.created {
        info!(path = %load.paths.file.display(), "created default config");
    }

    let conn = open_store(&config)?;
    match cli.command {
        Command::Record { input } => {
            let stats = if input == "-" {
                load_samples(&conn, io::stdin().lock())?
            } else {
                load_samples(&conn, BufReader::new(File::open(&input)?))?
            };
            print_json(&stats)
        }
        Command::Users { source } => print_json(&conn.list_users(source.as_deref())?),
        Command::Projects { source } => print_json(&conn.list_projects(source.as_deref())?),
        Command::Resources(args) => print_json(&conn.list_resources(&args.to_query())?),
        Command::Events(args) => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for event in conn.list_raw_events(&args.to_filter())? {
                writeln!(out, "{}", serde_json::to_string(&event?)?)?;
            }
            Ok(())
        }
        Command::Sum(args) => print_json(&conn.volume_sum(&args.to_filter())?),
        Command::Max(args) => print_json(&conn.volume_max(&args.to_filter())?),
        Command::Interval(args) => print_json(&conn.event_interval(&args.to_filter())?),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}
