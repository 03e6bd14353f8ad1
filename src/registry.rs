//! Service registry: descriptors in, handler lookup out.
//!
//! Generated code describes each service with a [`ServiceDescriptor`] whose
//! type parameter is the service contract, usually `dyn MyService`. Passing
//! the implementation as `Arc<S>` makes the compiler check that it satisfies
//! the contract, so registration only has to validate names.
//!
//! At registration every method handler is bound to its implementation and
//! type-erased. After the hub starts the registry is moved into the event
//! loop and never mutated again.

// Rust guideline compliant 2026-02

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::codec::{Codec, CodecError};
use crate::connection::ConnectionId;
use crate::status::Status;

/// Dispatch function emitted per RPC method by the code generator.
///
/// Receives the service implementation, the call context, and a decoder
/// over the request payload; returns the reply or an error status.
pub type MethodHandler<S> = fn(&S, &CallContext, &Decoder<'_>) -> Result<Reply, Status>;

/// One method of a [`ServiceDescriptor`].
pub struct MethodDesc<S: ?Sized> {
    /// Method name, unique within the service.
    pub name: String,
    /// Dispatch function.
    pub handler: MethodHandler<S>,
    /// Whether the client sends a stream of requests.
    pub client_streaming: bool,
    /// Whether the server sends a stream of replies.
    pub server_streaming: bool,
}

impl<S: ?Sized> MethodDesc<S> {
    /// Describe a unary method.
    pub fn unary(name: impl Into<String>, handler: MethodHandler<S>) -> Self {
        Self {
            name: name.into(),
            handler,
            client_streaming: false,
            server_streaming: false,
        }
    }
}

impl<S: ?Sized> fmt::Debug for MethodDesc<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDesc")
            .field("name", &self.name)
            .field("client_streaming", &self.client_streaming)
            .field("server_streaming", &self.server_streaming)
            .finish_non_exhaustive()
    }
}

/// Static description of an RPC service, produced by the code generator.
pub struct ServiceDescriptor<S: ?Sized> {
    /// Fully qualified service name (`package.Service`).
    pub name: String,
    /// Methods in declaration order.
    pub methods: Vec<MethodDesc<S>>,
    /// Opaque metadata exposed through [`Registry::describe`].
    pub metadata: Option<serde_json::Value>,
}

impl<S: ?Sized> fmt::Debug for ServiceDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Public description of a registered method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    /// Method name.
    pub name: String,
    /// Whether the client sends a stream of requests.
    pub is_client_stream: bool,
    /// Whether the server sends a stream of replies.
    pub is_server_stream: bool,
}

impl MethodInfo {
    /// True for plain request → reply methods.
    pub fn is_unary(&self) -> bool {
        !self.is_client_stream && !self.is_server_stream
    }
}

/// Public description of a registered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Methods sorted by name.
    pub methods: Vec<MethodInfo>,
    /// Metadata supplied at registration.
    pub metadata: Option<serde_json::Value>,
}

/// Rejected registration. The registry is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The hub's event loop is already running.
    #[error("cannot register service {0:?}: hub is already active")]
    HubActive(String),
    /// A service with this name is already registered.
    #[error("duplicate service registration for {0:?}")]
    DuplicateService(String),
    /// The descriptor has no service name.
    #[error("service name is empty")]
    EmptyServiceName,
    /// A method in the descriptor has no name.
    #[error("service {0:?} has a method with an empty name")]
    EmptyMethodName(String),
    /// The descriptor lists the same method twice.
    #[error("service {service:?} declares method {method:?} more than once")]
    DuplicateMethod {
        /// Service being registered.
        service: String,
        /// Repeated method name.
        method: String,
    },
}

/// Failed handler lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// No service with this name.
    #[error("unknown service {0:?}")]
    UnknownService(String),
    /// The service exists but has no such method.
    #[error("unknown method {method:?} for service {service:?}")]
    UnknownMethod {
        /// Service that was found.
        service: String,
        /// Method that was not.
        method: String,
    },
}

impl From<LookupError> for Status {
    fn from(err: LookupError) -> Self {
        Status::not_found(err.to_string())
    }
}

/// Per-call information handed to a method handler.
#[derive(Debug, Clone)]
pub struct CallContext {
    connection: ConnectionId,
    service: String,
    method: String,
    received_at: Instant,
    cancel: CancellationToken,
}

impl CallContext {
    /// Build a context for one call.
    pub fn new(
        connection: ConnectionId,
        service: impl Into<String>,
        method: impl Into<String>,
        received_at: Instant,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection,
            service: service.into(),
            method: method.into(),
            received_at,
            cancel,
        }
    }

    /// Connection the request arrived on.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Service being called.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method being called.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// When the inbound pump read the request frame.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Token cancelled when the hub shuts down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the call should be abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Decodes the request payload of one call.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
    codec: &'a Codec,
    payload: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Wrap `payload` for decoding with `codec`.
    pub fn new(codec: &'a Codec, payload: &'a [u8]) -> Self {
        Self { codec, payload }
    }

    /// Decode the payload as `T`.
    ///
    /// # Errors
    ///
    /// Returns an `invalid_argument` status if the payload is not a `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Status> {
        self.codec
            .unmarshal(self.payload)
            .map_err(|e| Status::invalid_argument(e.to_string()))
    }

    /// Decode the payload into `target`, replacing its contents.
    ///
    /// # Errors
    ///
    /// Returns an `invalid_argument` status if the payload is not a `T`.
    pub fn decode_into<T: Deserialize<'a>>(&self, target: &mut T) -> Result<(), Status> {
        self.codec
            .unmarshal_into(self.payload, target)
            .map_err(|e| Status::invalid_argument(e.to_string()))
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

trait MarshalReply: Send {
    fn marshal(&self, codec: &Codec) -> Result<Bytes, CodecError>;
}

impl<T: Serialize + Send> MarshalReply for T {
    fn marshal(&self, codec: &Codec) -> Result<Bytes, CodecError> {
        codec.marshal(self)
    }
}

/// Type-erased reply value; the hub marshals it with its codec.
pub struct Reply(Box<dyn MarshalReply>);

impl Reply {
    /// Wrap a typed reply.
    pub fn new<T: Serialize + Send + 'static>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Encode the reply.
    ///
    /// # Errors
    ///
    /// Returns the codec's error if the value cannot be serialized.
    pub fn marshal(&self, codec: &Codec) -> Result<Bytes, CodecError> {
        self.0.marshal(codec)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reply(..)")
    }
}

type BoundHandler = Box<dyn Fn(&CallContext, &Decoder<'_>) -> Result<Reply, Status> + Send + Sync>;

/// A method bound to its service implementation.
pub struct RegisteredMethod {
    info: MethodInfo,
    handler: BoundHandler,
}

impl RegisteredMethod {
    /// Method description.
    pub fn info(&self) -> &MethodInfo {
        &self.info
    }

    /// Invoke the handler.
    ///
    /// # Errors
    ///
    /// Returns whatever status the handler produced.
    pub fn call(&self, ctx: &CallContext, decoder: &Decoder<'_>) -> Result<Reply, Status> {
        (self.handler)(ctx, decoder)
    }
}

impl fmt::Debug for RegisteredMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredMethod")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct RegisteredService {
    methods: HashMap<String, RegisteredMethod>,
    metadata: Option<serde_json::Value>,
}

/// Service name → method table.
#[derive(Debug, Default)]
pub struct Registry {
    services: HashMap<String, RegisteredService>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `implementation` under `descriptor`.
    ///
    /// # Errors
    ///
    /// Rejects empty or duplicate service names and empty or repeated
    /// method names. Nothing is inserted on error.
    pub fn insert<S>(
        &mut self,
        descriptor: ServiceDescriptor<S>,
        implementation: Arc<S>,
    ) -> Result<(), RegistrationError>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let ServiceDescriptor {
            name,
            methods,
            metadata,
        } = descriptor;

        if name.is_empty() {
            return Err(RegistrationError::EmptyServiceName);
        }
        if self.services.contains_key(&name) {
            return Err(RegistrationError::DuplicateService(name));
        }

        let mut table = HashMap::with_capacity(methods.len());
        for method in methods {
            if method.name.is_empty() {
                return Err(RegistrationError::EmptyMethodName(name));
            }
            if table.contains_key(&method.name) {
                return Err(RegistrationError::DuplicateMethod {
                    service: name,
                    method: method.name,
                });
            }

            let bound = Arc::clone(&implementation);
            let handler = method.handler;
            let registered = RegisteredMethod {
                info: MethodInfo {
                    name: method.name.clone(),
                    is_client_stream: method.client_streaming,
                    is_server_stream: method.server_streaming,
                },
                handler: Box::new(move |ctx: &CallContext, decoder: &Decoder<'_>| {
                    handler(&bound, ctx, decoder)
                }),
            };
            table.insert(method.name, registered);
        }

        log::debug!("[Registry] Registered {} ({} methods)", name, table.len());
        self.services.insert(
            name,
            RegisteredService {
                methods: table,
                metadata,
            },
        );
        Ok(())
    }

    /// Find the handler for `service`/`method`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] if either name is unknown.
    pub fn lookup(&self, service: &str, method: &str) -> Result<&RegisteredMethod, LookupError> {
        let svc = self
            .services
            .get(service)
            .ok_or_else(|| LookupError::UnknownService(service.to_string()))?;
        svc.methods
            .get(method)
            .ok_or_else(|| LookupError::UnknownMethod {
                service: service.to_string(),
                method: method.to_string(),
            })
    }

    /// Service name → methods and metadata, for introspection.
    pub fn describe(&self) -> BTreeMap<String, ServiceInfo> {
        self.services
            .iter()
            .map(|(name, svc)| {
                let mut methods: Vec<MethodInfo> =
                    svc.methods.values().map(|m| m.info.clone()).collect();
                methods.sort_by(|a, b| a.name.cmp(&b.name));
                (
                    name.clone(),
                    ServiceInfo {
                        methods,
                        metadata: svc.metadata.clone(),
                    },
                )
            })
            .collect()
    }

    /// Whether a service with this name is registered.
    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// True when no service is registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
