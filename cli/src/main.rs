use clap::Parser;
use clap::Subcommand;
use engine_bridge_cli::RunArgs;
use engine_bridge_core::BridgeErr;
use engine_bridge_core::protocol::exit_code;
use tracing_subscriber::EnvFilter;

/// Supervises the document conversion engine.
#[derive(Debug, Parser)]
#[command(name = "engine-bridge", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one conversion job.
    Run(RunArgs),
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    setup_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Command::Run(args) => match engine_bridge_cli::run(args).await {
            Ok(code) => code,
            Err(err) => {
                eprintln!("Error: {err:#}");
                match err.downcast_ref::<BridgeErr>() {
                    Some(BridgeErr::InvalidRequest { .. }) => exit_code::INVALID_INPUT,
                    _ => exit_code::ENGINE_FAILED,
                }
            }
        },
    };
    std::process::exit(code);
}
