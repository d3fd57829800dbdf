//! Scaffold HTTP CLI
//!
//! Issues requests through the resilient API client and prints the decoded
//! JSON response.

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use scaffold_api_client::ApiError;
use scaffold_telemetry::TelemetryConfig;
use std::process::ExitCode;

mod commands;
mod config;
mod output;

use config::ConnectionArgs;

/// Resilient HTTP client for Scaffold APIs
#[derive(Parser)]
#[command(name = "scaffold-http")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a resource
    Get {
        /// Path relative to the base URL, or an absolute URL
        path: String,
    },

    /// Delete a resource
    Delete {
        /// Path relative to the base URL, or an absolute URL
        path: String,
    },

    /// Create a resource with a JSON body
    Post {
        /// Path relative to the base URL, or an absolute URL
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Replace a resource with a JSON body
    Put {
        /// Path relative to the base URL, or an absolute URL
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Partially update a resource with a JSON body
    Patch {
        /// Path relative to the base URL, or an absolute URL
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Upload a file as multipart form data
    Upload {
        /// Path relative to the base URL, or an absolute URL
        path: String,

        /// File to upload
        #[arg(long)]
        file: std::path::PathBuf,

        /// Form field name for the file
        #[arg(long, default_value = "file")]
        field: String,

        /// Extra text fields (NAME=VALUE)
        #[arg(long = "form", value_parser = config::parse_form_field)]
        form: Vec<(String, String)>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::from_env();
    if cli.verbose {
        telemetry = telemetry.with_log_level("scaffold_api_client=debug,scaffold_http=debug,info");
    }
    let _telemetry = match scaffold_telemetry::init_with_config(telemetry) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("{} {}", "Warning:".yellow().bold(), e);
            None
        }
    };

    let result = match cli.command {
        Commands::Get { path } => commands::request::get(&cli.connection, &path, &cli.format).await,

        Commands::Delete { path } => {
            commands::request::delete(&cli.connection, &path, &cli.format).await
        }

        Commands::Post { path, data } => {
            commands::request::with_body(
                &cli.connection,
                commands::request::BodyMethod::Post,
                &path,
                data.as_deref(),
                &cli.format,
            )
            .await
        }

        Commands::Put { path, data } => {
            commands::request::with_body(
                &cli.connection,
                commands::request::BodyMethod::Put,
                &path,
                data.as_deref(),
                &cli.format,
            )
            .await
        }

        Commands::Patch { path, data } => {
            commands::request::with_body(
                &cli.connection,
                commands::request::BodyMethod::Patch,
                &path,
                data.as_deref(),
                &cli.format,
            )
            .await
        }

        Commands::Upload {
            path,
            file,
            field,
            form,
        } => commands::upload::run(&cli.connection, &path, &file, &field, &form, &cli.format).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(api_error) = e.downcast_ref::<ApiError>() {
                output::print_api_error(api_error, &cli.format);
            } else {
                eprintln!("{} {:#}", "Error:".red().bold(), e);
            }
            ExitCode::FAILURE
        }
    }
}
