use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use otto_gait_runtime::config::{RobotConfig, SERVO_CONTROLLER_CHANNELS, SERVO_PORT};
use otto_gait_runtime::messages::{Action, ActionCommand};
use otto_gait_runtime::servo::{Clock, MaestroBus, ServoBus, SimBus, SystemClock};
use otto_gait_runtime::{Otto, runtime};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Otto biped gait runtime
#[derive(Parser, Debug)]
#[command(name = "otto")]
#[command(about = "Oscillator gait engine for the Otto biped", long_about = None)]
struct Args {
    /// Robot config (JSON); built-in six-servo wiring when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port of the servo controller
    #[arg(long, default_value = SERVO_PORT)]
    port: String,

    /// Drive an in-memory servo bus instead of hardware
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Read JSON action commands from stdin (default)
    Run,
    /// Play the demo choreography once
    Show,
    /// Perform a single action
    Act {
        action: Action,
        #[arg(long)]
        steps: Option<f32>,
        #[arg(long)]
        period_ms: Option<u32>,
        #[arg(long)]
        amount: Option<f32>,
    },
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr) // stdout carries status lines
        .init();

    if let Err(e) = start(Args::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn start(args: Args) -> Result<(), BoxError> {
    let config = match &args.config {
        Some(path) => RobotConfig::load(path)?,
        None => RobotConfig::default(),
    };
    let command = args.command.unwrap_or(Command::Run);

    if args.simulate {
        info!("Simulating {} servo channels", SERVO_CONTROLLER_CHANNELS);
        let bus = SimBus::new(SERVO_CONTROLLER_CHANNELS);
        return drive(Otto::init(&config, bus, SystemClock::new())?, command).await;
    }

    info!("Opening servo controller on {}", args.port);
    let mut bus = MaestroBus::open(&args.port, SERVO_CONTROLLER_CHANNELS)?;
    bus.probe()?;
    drive(Otto::init(&config, bus, SystemClock::new())?, command).await
}

async fn drive<B, C>(mut otto: Otto<B, C>, command: Command) -> Result<(), BoxError>
where
    B: ServoBus + Send + 'static,
    C: Clock + Send + 'static,
{
    let action = match command {
        // The runtime homes on its own worker thread
        Command::Run => return runtime::run(otto).await,
        Command::Show => ActionCommand::new(Action::Show),
        Command::Act {
            action,
            steps,
            period_ms,
            amount,
        } => ActionCommand {
            action,
            steps,
            period_ms,
            amount,
        },
    };

    // Gaits block; keep them off the async executor
    tokio::task::spawn_blocking(move || {
        otto.home(true);
        let report = otto.perform(&action);
        info!(
            "{} done in {}ms ({} ticks)",
            action.action.name(),
            report.elapsed_ms,
            report.ticks
        );
        otto.shutdown()
    })
    .await??;
    Ok(())
}
