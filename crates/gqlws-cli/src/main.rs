//! # gqlws
//!
//! Run a GraphQL operation over a websocket and print every result as one
//! JSON line on stdout. Logs go to stderr.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::StreamExt;
use gqlws_core::GraphQLRequest;
use gqlws_settings::TransportSettings;
use gqlws_transport::GraphqlWsTransport;
use serde_json::Value;

/// GraphQL over websocket client.
#[derive(Parser, Debug)]
#[command(name = "gqlws", about = "Run GraphQL operations over a websocket")]
struct Cli {
    /// Operation document. Use `--file` to read it from disk instead.
    query: Option<String>,

    /// Read the operation document from a file.
    #[arg(long, short = 'f', conflicts_with = "query")]
    file: Option<PathBuf>,

    /// Server endpoint (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Variables as a JSON object.
    #[arg(long, short = 'v')]
    variables: Option<String>,

    /// Operation to run when the document holds several.
    #[arg(long)]
    operation_name: Option<String>,

    /// Subprotocol to offer; repeat for several (overrides settings).
    #[arg(long = "subprotocol")]
    subprotocols: Vec<String>,

    /// Settings file (defaults to `~/.gqlws/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Return the first result only, without stopping the operation.
    #[arg(long)]
    once: bool,

    /// Stop the subscription after this many results.
    #[arg(long)]
    count: Option<usize>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn request(&self) -> Result<GraphQLRequest> {
        let document = match (&self.query, &self.file) {
            (Some(query), _) => query.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read query file: {}", path.display()))?,
            (None, None) => bail!("no operation given: pass a query or --file"),
        };

        let mut request = GraphQLRequest::new(document);
        if let Some(raw) = &self.variables {
            let variables: Value =
                serde_json::from_str(raw).context("Failed to parse --variables as JSON")?;
            if !variables.is_object() {
                bail!("--variables must be a JSON object");
            }
            request = request.with_variables(variables);
        }
        if let Some(name) = &self.operation_name {
            request = request.with_operation_name(name);
        }
        Ok(request)
    }

    fn settings(&self) -> Result<TransportSettings> {
        let mut settings = match &self.settings {
            Some(path) => gqlws_settings::load_settings_from_path(path),
            None => gqlws_settings::load_settings(),
        }
        .context("Failed to load settings")?;

        if let Some(url) = &self.url {
            settings.url.clone_from(url);
        }
        if !self.subprotocols.is_empty() {
            settings.subprotocols.clone_from(&self.subprotocols);
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

async fn run(transport: &GraphqlWsTransport, args: &Cli, request: GraphQLRequest) -> Result<()> {
    if args.once {
        let result = transport.execute(request).await.context("Operation failed")?;
        return print_json(&result);
    }

    let mut subscription = transport
        .subscribe(request)
        .await
        .context("Failed to start operation")?;
    let mut received = 0usize;
    loop {
        let item = tokio::select! {
            item = subscription.next() => item,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        };
        let Some(item) = item else { break };
        print_json(&item.context("Operation failed")?)?;
        received += 1;
        if args.count.is_some_and(|limit| received >= limit) {
            break;
        }
    }
    subscription.stop().await.context("Failed to stop operation")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    if args.json_logs {
        gqlws_core::logging::init_json_subscriber(&args.log_level);
    } else {
        gqlws_core::logging::init_subscriber(&args.log_level);
    }

    let request = args.request()?;
    let settings = args.settings()?;
    tracing::info!(url = %settings.url, "connecting");

    let transport = GraphqlWsTransport::new(settings);
    transport.connect().await.context("Failed to connect")?;

    let outcome = run(&transport, &args, request).await;
    transport.close().await;
    outcome
}
