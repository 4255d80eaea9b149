//! mdtsdb - command-line client for the mdtsdb time-series service.
//!
//! Reads connection settings from a YAML file and `MDTSDB_*` environment
//! variables, then runs one command.

use clap::{Parser, Subcommand};
use colored::Colorize;
use mdtsdb_client::{Client, ClientConfig, ClientError, QueryOptions};
use mdtsdb_protocol::{Outcome, Response, StreamOutcome, StreamResponse};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mdtsdb")]
#[command(about = "Command-line client for the mdtsdb time-series service")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "MDTSDB_CONFIG")]
    config: Option<PathBuf>,

    /// Service host (overrides configuration)
    #[arg(long)]
    host: Option<String>,

    /// Service port (overrides configuration)
    #[arg(long)]
    port: Option<u16>,

    /// Log requests and responses
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping the service
    Ping {
        /// Timeout in milliseconds (waits forever when omitted)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Execute a query language script
    Query {
        /// Script text (or @file to read from file)
        script: String,

        /// Use query language v1
        #[arg(long)]
        v1: bool,

        /// Stream the response body and merge the frames
        #[arg(long)]
        stream: bool,

        /// Postpone execution and print the job uuid
        #[arg(long = "async")]
        async_mode: bool,
    },

    /// Upload sensor data
    Insert {
        /// Data JSON, an object or an array of objects (or @file.json)
        data: String,
    },

    /// Fetch the result of a postponed job
    Stored {
        /// Job uuid
        uuid: String,
    },

    /// Fetch diagnostic messages about storing and indexing
    Messages,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::load_from(cli.config.as_deref()).map_err(|e| {
        eprintln!("{}: {}", "Error".red(), e);
        e
    })?;
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }
    if let Some(host) = cli.host {
        config.endpoint.host = host;
    }
    if let Some(port) = cli.port {
        config.endpoint.port = port;
    }
    config.transport.debug |= cli.debug;

    let client = Client::new(config).map_err(|e| {
        eprintln!("{}: {}", "Error".red(), e);
        e
    })?;

    if let Err(e) = run(&client, cli.command) {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }

    Ok(())
}

fn run(client: &Client, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Ping { timeout } => report(client.ping(timeout)?)?,
        Commands::Query {
            script,
            v1,
            stream,
            async_mode,
        } => {
            let script = read_arg(&script)?;
            let mut options = if v1 {
                QueryOptions::v1()
            } else {
                QueryOptions::default()
            };
            if async_mode {
                options = options.asynchronous();
            }
            if stream {
                report_stream(client.query_stream(&script, options)?);
            } else {
                report(client.events_query(&script, options)?)?;
            }
        }
        Commands::Insert { data } => {
            let data: Value = serde_json::from_str(&read_arg(&data)?)?;
            report(client.send_events_data(&data)?)?;
        }
        Commands::Stored { uuid } => {
            let text = client.get_stored(&uuid)?;
            match Response::parse(&text) {
                Ok(response) => report(response)?,
                Err(_) => println!("{}", text),
            }
        }
        Commands::Messages => report(client.get_messages()?)?,
    }

    Ok(())
}

/// Reads an argument inline, or from a file when prefixed with `@`.
fn read_arg(arg: &str) -> Result<String, Box<dyn std::error::Error>> {
    match arg.strip_prefix('@') {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => Ok(arg.to_string()),
    }
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn report(response: Response) -> Result<(), ClientError> {
    match response.outcome() {
        Outcome::Ok(result) => println!("{}", format_json(&result)),
        Outcome::Postponed { uuid } => {
            println!("{} {}", "Postponed job:".yellow(), uuid.cyan());
        }
        Outcome::ServerError { code, message, .. } => {
            return Err(ClientError::server(code, message));
        }
    }
    Ok(())
}

fn report_stream(stream: StreamResponse) {
    match stream.classify_all() {
        StreamOutcome::Errors(errors) => {
            for message in errors {
                eprintln!("{}: {}", "Server error".red(), message);
            }
            std::process::exit(1);
        }
        StreamOutcome::Postponed(uuids) => {
            for uuid in uuids {
                println!("{} {}", "Postponed job:".yellow(), uuid.cyan());
            }
        }
        StreamOutcome::Ok(frames) => {
            tracing::info!("Received {} frame(s)", frames.len());
            println!("{}", format_json(&Value::Object(stream.merge_values())));
        }
    }
}
