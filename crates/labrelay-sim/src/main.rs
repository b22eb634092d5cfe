//! `labrelay-sim`: run a lab relay scenario and print the ground console.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use labrelay_sim::{Scenario, ScenarioConfig, ScenarioResult};
use tracing::{error, Level};
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Simulate the controller, air relay and ground station over a lossy LoRa link",
    long_about = None
)]
struct Cli {
    /// Scenario file (YAML). The built-in demo runs when omitted.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the scenario duration in milliseconds
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Override the loss model seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the per-receiver packet loss probability (0..=1)
    #[arg(long)]
    loss: Option<f64>,

    /// Emit events and the summary as JSON lines instead of console text
    #[arg(long)]
    json: bool,

    /// Print the effective scenario as YAML and exit
    #[arg(long)]
    print_config: bool,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG also applies.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(subscriber_fmt::layer().with_writer(io::stderr))
        .try_init();
}

fn load_scenario(cli: &Cli) -> ScenarioResult<ScenarioConfig> {
    let mut config = match &cli.config {
        Some(path) => ScenarioConfig::load(path)?,
        None => ScenarioConfig::demo(),
    };
    if let Some(duration_ms) = cli.duration_ms {
        config.duration_ms = duration_ms;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(loss) = cli.loss {
        config.loss = loss;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> ScenarioResult<()> {
    let config = load_scenario(cli)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if cli.print_config {
        out.write_all(serde_yaml::to_string(&config)?.as_bytes())?;
        return Ok(());
    }

    labrelay_metrics::describe_metrics();
    let mut scenario = Scenario::new(config)?;

    let mut write_error = None;
    let summary = scenario.run(|event| {
        if write_error.is_some() {
            return;
        }
        let written = if cli.json {
            serde_json::to_string(event)
                .map_err(io::Error::from)
                .and_then(|json| writeln!(out, "{}", json))
        } else {
            writeln!(out, "{}", event.line)
        };
        if let Err(e) = written {
            write_error = Some(e);
        }
    });
    if let Some(e) = write_error {
        return Err(e.into());
    }

    if cli.json {
        writeln!(out, "{}", serde_json::to_string(&summary)?)?;
    } else {
        for line in summary.lines() {
            writeln!(out, "{}", line)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("labrelay-sim: {}", e);
            ExitCode::FAILURE
        }
    }
}
