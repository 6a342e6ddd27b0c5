use crate::{
    config::{ConfigLoader, Configuration, DEFAULT_CONFIG, ParamValue, Strictness},
    context::AgentContext,
    error::Error,
    logging::{LogConfig, init_logging},
    runner::{AgentRunner, RunOptions},
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

#[derive(Debug, Parser)]
#[command(
    name = "openmog",
    version,
    about = "Configure and run an OpenMog agent"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the agent with the specified configuration
    Run {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
        /// Reject unknown top-level keys instead of warning
        #[arg(long)]
        strict: bool,
        /// Validate and set up the run without executing the agent task
        #[arg(long)]
        dry_run: bool,
    },
    /// Initialize a new configuration file
    Init {
        /// Agent's purpose description
        #[arg(short, long)]
        purpose: String,
        /// Output configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        output: PathBuf,
        /// Agent parameter, may be repeated
        #[arg(short = 'P', long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, ParamValue)>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check a configuration file without running it
    Validate {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        #[arg(long)]
        strict: bool,
    },
    /// Show the OpenMog version
    Version,
}

pub fn run() -> Result<u8> {
    let cli = Cli::parse();
    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    init_logging(&LogConfig::from_verbosity(verbose));

    let stdout = io::stdout();
    let mut out = stdout.lock();
    dispatch(cli, &mut out)
}

/// Exit code for an error that escaped a command handler: 2 for
/// configuration problems, 1 for everything else.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .map(|err| u8::try_from(err.exit_code()).unwrap_or(1))
        .unwrap_or(1)
}

fn dispatch(cli: Cli, out: &mut dyn Write) -> Result<u8> {
    match cli.command {
        Commands::Run {
            config,
            verbose,
            strict,
            dry_run,
        } => run_agent(&config, verbose, strictness(strict), dry_run, out),
        Commands::Init {
            purpose,
            output,
            params,
            force,
        } => init(purpose, &output, params, force, out),
        Commands::Validate { config, strict } => validate(&config, strictness(strict), out),
        Commands::Version => {
            writeln!(out, "OpenMog version {}", env!("CARGO_PKG_VERSION"))?;
            Ok(0)
        }
    }
}

fn run_agent(
    config_path: &Path,
    verbose: bool,
    strictness: Strictness,
    dry_run: bool,
    out: &mut dyn Write,
) -> Result<u8> {
    writeln!(out, "OpenMog starting with config: {}", config_path.display())?;
    if verbose {
        writeln!(out, "Verbose mode enabled")?;
    }

    let config = ConfigLoader::new().strictness(strictness).load(config_path)?;
    let mut ctx = AgentContext::create(config).with_verbose(verbose);
    let result = AgentRunner::new(&mut *out)
        .with_options(RunOptions { dry_run })
        .execute(&mut ctx);

    writeln!(out, "\nRun complete.")?;
    writeln!(out, "Status: {}", result.status())?;
    if let Some(summary) = result.summary() {
        writeln!(out, "Summary: {summary}")?;
    }
    if let Some(error) = result.error() {
        writeln!(out, "Error: {error}")?;
    }
    Ok(u8::try_from(result.exit_code()).unwrap_or(1))
}

fn init(
    purpose: String,
    output: &Path,
    params: Vec<(String, ParamValue)>,
    force: bool,
    out: &mut dyn Write,
) -> Result<u8> {
    writeln!(out, "Initializing OpenMog configuration")?;
    writeln!(out, "Purpose: {purpose}")?;
    writeln!(out, "Output: {}", output.display())?;

    if output.exists() && !force {
        bail!(
            "{} already exists. Re-run with --force to overwrite.",
            output.display()
        );
    }

    let config = Configuration::new(purpose, params.into_iter().collect(), output)?;
    config
        .write(output)
        .with_context(|| format!("failed to initialize {}", output.display()))?;

    writeln!(out, "Wrote {}", output.display())?;
    writeln!(out, "Next: openmog run --config {}", output.display())?;
    Ok(0)
}

fn validate(config_path: &Path, strictness: Strictness, out: &mut dyn Write) -> Result<u8> {
    let config = ConfigLoader::new().strictness(strictness).load(config_path)?;
    writeln!(out, "Config is valid: {}", config_path.display())?;
    writeln!(out, "Purpose: {}", config.purpose())?;
    writeln!(out, "Parameters: {}", config.agent_parameters().len())?;
    Ok(0)
}

fn strictness(strict: bool) -> Strictness {
    if strict {
        Strictness::Strict
    } else {
        Strictness::Warn
    }
}

fn parse_param(raw: &str) -> std::result::Result<(String, ParamValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("parameter key cannot be empty in `{raw}`"));
    }
    Ok((key.to_string(), ParamValue::parse_scalar(value)))
}
