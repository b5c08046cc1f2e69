//! Command-line interface definition for oidc-device
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for login, logout, calling the protected resource,
//! inspecting the stored session and running the resource server.

use clap::{Parser, Subcommand};

/// oidc-device - OpenID Connect device authorization client and resource server
///
/// Sign in on a device without a browser, call a protected resource with the
/// resulting bearer token, or run a resource server that verifies such tokens
/// against the provider's published keys.
#[derive(Parser, Debug, Clone)]
#[command(name = "oidc-device")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Override the issuer URL from config
    #[arg(long, global = true)]
    pub issuer: Option<String>,

    /// Override the OAuth client id from config
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for oidc-device
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Sign in using the device authorization grant
    Login,

    /// End the provider session and remove the stored token
    Logout,

    /// Call the protected resource's /headers route with the stored token
    Headers {
        /// Override the resource server base URL from config
        #[arg(short, long)]
        resource: Option<String>,
    },

    /// Show the signed-in user and token expiry
    Status,

    /// Run the resource server
    Serve {
        /// Override the listen address from config (e.g. 0.0.0.0:9090)
        #[arg(short, long)]
        listen: Option<String>,
    },
}

impl Commands {
    /// Name used in error reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Headers { .. } => "headers",
            Self::Status => "status",
            Self::Serve { .. } => "serve",
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            issuer: None,
            client_id: None,
            verbose: false,
            json_logs: false,
            command: Commands::Status,
        }
    }
}
