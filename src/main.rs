//! `wsrpc-echo`: demo server and client for the `demo.Echo` service.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use wsrpc::client;
use wsrpc::{CallContext, Decoder, Hub, HubConfig, MethodDesc, Reply, ServiceDescriptor, Status};

const ECHO_SERVICE: &str = "demo.Echo";

/// Contract for the demo service.
trait Echo: Send + Sync {
    fn say(&self, text: String) -> String;
    fn shout(&self, text: String) -> String;
}

struct EchoServer;

impl Echo for EchoServer {
    fn say(&self, text: String) -> String {
        text
    }

    fn shout(&self, text: String) -> String {
        text.to_uppercase()
    }
}

fn say(svc: &dyn Echo, ctx: &CallContext, dec: &Decoder<'_>) -> Result<Reply, Status> {
    let text: String = dec.decode()?;
    log::debug!("Say from {}: {:?}", ctx.connection(), text);
    Ok(Reply::new(svc.say(text)))
}

fn shout(svc: &dyn Echo, _ctx: &CallContext, dec: &Decoder<'_>) -> Result<Reply, Status> {
    let text: String = dec.decode()?;
    if text.is_empty() {
        return Err(Status::invalid_argument("nothing to shout"));
    }
    Ok(Reply::new(svc.shout(text)))
}

fn echo_descriptor() -> ServiceDescriptor<dyn Echo> {
    ServiceDescriptor {
        name: ECHO_SERVICE.to_string(),
        methods: vec![MethodDesc::unary("Say", say), MethodDesc::unary("Shout", shout)],
        metadata: Some(serde_json::json!({ "description": "echoes its input" })),
    }
}

// CLI
#[derive(Parser)]
#[command(name = "wsrpc-echo")]
#[command(version)]
#[command(about = "Echo service over a wsrpc hub")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the echo hub
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Call the echo hub once and print the reply
    Call {
        /// Hub URL
        #[arg(long, default_value = "ws://127.0.0.1:8080/")]
        url: String,
        /// Method to call (Say or Shout)
        #[arg(long, default_value = "Say")]
        method: String,
        /// Text to send
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    match cli.command {
        Commands::Serve { host, port } => serve(&host, port).await,
        Commands::Call { url, method, text } => call(&url, &method, &text).await,
    }
}

async fn serve(host: &str, port: u16) -> Result<()> {
    let hub = Hub::new(HubConfig::from_env()).context("invalid hub configuration")?;
    hub.register_service(echo_descriptor(), Arc::new(EchoServer))?;
    let event_loop = hub.start()?;

    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;

    tokio::select! {
        () = hub.serve(listener) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            log::info!("Interrupted, shutting down");
        }
    }

    hub.shutdown();
    event_loop.await.context("hub event loop panicked")?;
    Ok(())
}

async fn call(url: &str, method: &str, text: &str) -> Result<()> {
    let (mut writer, mut reader) = client::connect(url, &[]).await?;
    writer.call(ECHO_SERVICE, method, text).await?;

    let reply: String = reader.recv().await?.decode()?;
    println!("{reply}");

    writer.close().await?;
    Ok(())
}
