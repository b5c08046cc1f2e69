//! oidc-device - OpenID Connect device authorization client
//!
#![doc = "oidc-device - OpenID Connect device authorization client"]
#![doc = "Main entry point for the oidc-device application."]

use std::process::ExitCode;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use oidc_device::cli::{Cli, Commands};
use oidc_device::commands;
use oidc_device::config::Config;
use oidc_device::OidcError;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    let name = cli.command.name();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<OidcError>() {
                Some(kind) => eprintln!("ERROR: '{}' has failed ({}): {:#}", name, kind.kind(), e),
                None => eprintln!("ERROR: '{}' has failed: {:#}", name, e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    let mut stdout = std::io::stdout();
    match cli.command {
        Commands::Login => {
            tracing::info!("Starting device authorization");
            let cancel = commands::cancel_on_ctrl_c();
            commands::login::run(
                &config,
                commands::build_transport(&config)?,
                config.token_store()?,
                &cancel,
                &mut stdout,
            )
            .await?;
        }
        Commands::Logout => {
            commands::logout::run(
                &config,
                commands::build_transport(&config)?,
                config.token_store()?,
                &mut stdout,
            )
            .await?;
        }
        Commands::Headers { .. } => {
            commands::headers::run(
                &config,
                commands::build_transport(&config)?,
                config.token_store()?,
                &mut stdout,
            )
            .await?;
        }
        Commands::Status => {
            commands::status::run(config.token_store()?.as_ref(), &mut stdout)?;
        }
        Commands::Serve { .. } => {
            tracing::info!("Starting resource server");
            commands::serve::run(&config, commands::build_transport(&config)?).await?;
        }
    }
    Ok(())
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "oidc_device=debug"
    } else {
        "oidc_device=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
