//! wsrpc - unary RPC over persistent WebSocket connections.
//!
//! Many peers each hold one WebSocket to a [`Hub`]. Every inbound message is
//! one enveloped request naming a service and method; the hub dispatches it to
//! the registered handler and queues the reply on the originating
//! connection's mailbox. The hub can also broadcast a payload to every live
//! connection.
//!
//! # Architecture
//!
//! - **Hub** - single event loop owning the live-connection set and the
//!   registry; the only place cross-connection state changes
//! - **Connection** - inbound/outbound pump pair per socket, with ping/pong
//!   liveness and a bounded outbound mailbox
//! - **Registry** - service name → method table, frozen when the hub starts
//! - **Codec** - JSON marshal/unmarshal with pooled scratch buffers
//!
//! # Wire format
//!
//! Requests are binary (or text) messages laid out as described in
//! [`envelope`]. A successful reply is one binary message holding exactly the
//! marshaled return value. A failed call is answered with one text message
//! holding a JSON [`Status`]. Replies on a connection follow request order.
//! Protocol violations (oversized or malformed frames) close the connection.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wsrpc::{CallContext, Decoder, Hub, HubConfig, MethodDesc, Reply, ServiceDescriptor, Status};
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self, name: String) -> String;
//! }
//!
//! struct English;
//!
//! impl Greeter for English {
//!     fn greet(&self, name: String) -> String {
//!         format!("hello {name}")
//!     }
//! }
//!
//! fn greet(svc: &dyn Greeter, _ctx: &CallContext, dec: &Decoder<'_>) -> Result<Reply, Status> {
//!     Ok(Reply::new(svc.greet(dec.decode()?)))
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let hub = Hub::new(HubConfig::default())?;
//! hub.register_service(
//!     ServiceDescriptor::<dyn Greeter> {
//!         name: "demo.Greeter".to_string(),
//!         methods: vec![MethodDesc::unary("Greet", greet)],
//!         metadata: None,
//!     },
//!     Arc::new(English),
//! )?;
//! hub.start()?;
//! hub.serve(tokio::net::TcpListener::bind("127.0.0.1:8080").await?).await;
//! # Ok(())
//! # }
//! ```

// Rust guideline compliant 2026-02

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod hub;
pub mod registry;
pub mod status;
pub mod upgrade;

pub use codec::{BufferPool, Codec, CodecError};
pub use config::{ConfigError, HubConfig, OverflowPolicy};
pub use connection::{ConnectionId, ConnectionInfo};
pub use envelope::{Envelope, EnvelopeError};
pub use hub::{Hub, HubError, StatsSnapshot};
pub use registry::{
    CallContext, Decoder, MethodDesc, MethodHandler, MethodInfo, RegistrationError, Registry,
    Reply, ServiceDescriptor, ServiceInfo,
};
pub use status::{Code, Status};
pub use upgrade::UpgradeError;
