mod cli;
mod commands;
mod config;
mod error;
mod output;

use crate::{
    cli::{Args, Commands, ConfigAction, OutputFormat},
    commands::CommandExecutor,
    config::AppConfig,
    error::Result,
};
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use std::{path::Path, process, time::Duration};
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let json_errors = matches!(
        &args.command,
        Commands::Resolve { output, .. } | Commands::Watch { output, .. } if output.is_json()
    ) || matches!(&args.command, Commands::List { output, json } if *json || output.is_json());

    let result = run(args).await;

    if let Err(e) = result {
        if e.is_interrupted() {
            eprintln!("Cancelled");
            process::exit(e.exit_code());
        }

        if json_errors {
            let error_json = serde_json::json!({
                "status": "error",
                "message": e.to_string(),
            });
            println!("{error_json}");
        } else {
            error!("Application error: {}", e);
            #[cfg(feature = "colored-output")]
            {
                eprintln!("{} {}", "Error:".red().bold(), e);
            }
            #[cfg(not(feature = "colored-output"))]
            {
                eprintln!("Error: {}", e);
            }
        }
        process::exit(e.exit_code());
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet);

    let config_path = args.config.as_deref();
    let config = AppConfig::load(config_path)?;

    let command = match args.command {
        Commands::Config { action } => return run_config(action, config, config_path),
        Commands::Completions { shell } => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Args::command();
            let bin_name = cmd.get_name().to_string();
            generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
            return Ok(());
        }
        command => command,
    };

    let executor = CommandExecutor::new(config, args.storage_dir)?;
    match command {
        Commands::Resolve { url, output } => executor.resolve(&url, output).await?,
        Commands::Download {
            url,
            video,
            audio,
            interactive,
        } => executor.download(&url, video, audio, interactive).await?,
        Commands::List { output, json } => {
            let format = if json { OutputFormat::Json } else { output };
            executor.list(format).await?
        }
        Commands::Delete { id } => executor.delete(&id).await?,
        Commands::Play { id } => executor.play(&id).await?,
        Commands::Watch { output, interval } => {
            executor
                .watch(output, Duration::from_secs(interval.max(1)))
                .await?
        }
        Commands::Config { .. } | Commands::Completions { .. } => {}
    }

    Ok(())
}

fn run_config(action: ConfigAction, config: AppConfig, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", config.show()?);
        }
        ConfigAction::SetInstance { url } => {
            let mut config = config;
            config.set_instance(&url)?;
            config.save(config_path)?;
            println!("✓ Metadata API instance set to {url}");
        }
        ConfigAction::Reset => {
            AppConfig::reset(config_path)?;
            println!("✓ Configuration reset to defaults");
        }
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
}
