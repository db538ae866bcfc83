//! The protocol engine of the `srvmgmt` management protocol.
//!
//! A host process describes the methods it serves, and the notifications and requests it sends,
//! in a [`RegistryBuilder`].  The frozen [`Registry`] is handed to a [`Server`], which accepts
//! connections and runs one [`Connection`] per management client.  Each connection decodes the
//! JSON-RPC traffic, dispatches calls (on the host's main thread where the method requires it),
//! and correlates responses to the requests the host sent.
//!
//! The standard method surface for a game server lives in [`methods`]; hosts that implement
//! [`srvmgmt_core::ManagementApi`] get it with one call to
//! [`methods::register_builtin_methods`].

/// Re-export the exact async-trait macro we use, for implementing [`Acceptor`]
#[doc(hidden)]
pub use async_trait::async_trait;

mod config;
mod connection;
mod discovery;
mod dispatch;
mod error;
mod method_id;
pub mod methods;
mod pending;
mod registry;
mod server;
#[cfg(test)]
pub mod testing;

pub use config::ServerConfig;
pub use connection::Connection;
pub use discovery::{
    Components, ContentDescriptor, DiscoveryDocument, DiscoveryInfo, MethodDocument, OPENRPC_VERSION, Schemas,
    discover,
};
pub use error::{
    ConnectionError, DispatchError, MethodError, OutgoingMethodError, RegistryError, RequestError, Result,
    ServerError,
};
pub use method_id::{DEFAULT_NAMESPACE, MethodId, NOTIFICATION_PREFIX};
pub use pending::PendingResponse;
pub use registry::{
    Attributes, ClientInfo, IncomingMethod, MethodBuilder, MethodInfo, OutgoingMethod, OutgoingNotification,
    OutgoingRequest, ParamSpec, Registry, RegistryBuilder, ResultSpec, SchemaSpec,
};
pub use server::{Acceptor, LinesAcceptor, Server};
