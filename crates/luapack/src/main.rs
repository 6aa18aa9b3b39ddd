use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use luapack::{
    config::{ConfigLoader, ConfigOverrides, ObfuscationTool, parse_toggle},
    orchestrator::BundleOrchestrator,
    reporter::{self, ConsoleReporter},
};

/// Bundle a Lua entry file and every module it requires into one file
#[derive(Debug, Parser)]
#[command(name = "luapack", version, about, long_about = None)]
struct Cli {
    /// Entry Lua file (may also come from the configuration file)
    entry: Option<PathBuf>,

    /// Output file; with --analyze, where the JSON report is written
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Configuration file (.json or .toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory first-party modules resolve against
    #[arg(long = "sourceroot", alias = "source-root", value_name = "DIR")]
    source_root: Option<PathBuf>,

    /// Minify the bundle
    #[arg(long, value_name = "BOOL", num_args = 0..=1, require_equals = true,
          default_missing_value = "true", value_parser = parse_toggle)]
    minify: Option<bool>,

    /// Replace local and global identifiers with random names
    #[arg(long, value_name = "BOOL", num_args = 0..=1, require_equals = true,
          default_missing_value = "true", value_parser = parse_toggle)]
    rename_variables: Option<bool>,

    /// Encode the bundle as byte codes loaded at runtime
    #[arg(long, value_name = "BOOL", num_args = 0..=1, require_equals = true,
          default_missing_value = "true", value_parser = parse_toggle)]
    ascii: Option<bool>,

    /// Obfuscation tool: `internal` or `none`
    #[arg(long, value_name = "TOOL")]
    obfuscation: Option<ObfuscationTool>,

    /// Only analyze dependencies, do not write a bundle
    #[arg(long)]
    analyze: bool,

    /// Treat unresolved modules as warnings
    #[arg(long)]
    ignore_missing: bool,

    /// Comma separated environment variables holding extra search paths;
    /// an empty value disables them
    #[arg(long, value_name = "VARS")]
    env: Option<String>,

    /// Verbose report and debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level
    #[arg(long, value_name = "LEVEL",
          value_parser = ["error", "warn", "info", "debug", "trace"])]
    log_level: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            entry: self.entry.clone(),
            output: self.output.clone(),
            source_root: self.source_root.clone(),
            config: self.config.clone(),
            minify: self.minify,
            rename_variables: self.rename_variables,
            ascii: self.ascii,
            obfuscation_tool: self.obfuscation,
            ignore_missing: self.ignore_missing.then_some(true),
            env: self.env.as_deref().map(|names| {
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_owned)
                    .collect()
            }),
        }
    }

    fn log_filter(&self) -> &str {
        match self.log_level.as_deref() {
            Some(level) => level,
            None if self.verbose => "debug",
            None => "info",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .format_timestamp(None)
        .init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<bool> {
    let mut config = ConfigLoader::new()
        .load(cli.overrides())
        .context("Failed to load configuration")?;
    config.analyze_only = cli.analyze;

    let orchestrator = BundleOrchestrator::new(config);
    let analysis = orchestrator.run();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if cli.json {
        reporter::write_json(&analysis, &mut out)?;
    } else {
        ConsoleReporter::new(cli.verbose).write_report(&analysis, &mut out)?;
    }
    out.flush()?;

    if cli.analyze && cli.output.is_some() {
        let path = &orchestrator.config().output;
        reporter::save_json(&analysis, path)?;
        info!("Analysis report written to {}", path.display());
    }

    Ok(analysis.success)
}
