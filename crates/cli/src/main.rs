use clap::{Parser, Subcommand};

mod commands;

use commands::{RunArgs, StatusArgs};

#[derive(Parser)]
#[command(name = "algo-options")]
#[command(about = "Delta-managed calendar and iron-fly controller for index options", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling controller until Ctrl-C
    Run(RunArgs),
    /// Print persisted strategy state and realized P&L
    Status(StatusArgs),
}

fn init_logging(log_file: Option<&str>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            init_logging(args.log_file.as_deref())?;
            commands::run_controller(args).await?;
        }
        Commands::Status(args) => {
            init_logging(None)?;
            commands::run_status(&args)?;
        }
    }

    Ok(())
}
