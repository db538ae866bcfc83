//! Embeddable JSON-RPC 2.0 management protocol for live game servers.
//!
//! This crate only re-exports the workspace crates:
//!
//! - [`core`]: domain models, the [`core::ManagementApi`] host boundary and the main-thread
//!   hand-off queue.  Always available.
//! - [`jsonrpc`]: the wire layer (`jsonrpc` feature).
//! - [`server`]: method registry, connections, the server and discovery (`server` feature, on by
//!   default).
pub use srvmgmt_core as core;

#[cfg(feature = "jsonrpc")]
pub use srvmgmt_jsonrpc as jsonrpc;

#[cfg(feature = "server")]
pub use srvmgmt_server as server;

#[cfg(feature = "server")]
pub use srvmgmt_server::{
    Connection, LinesAcceptor, MethodError, MethodId, Registry, RegistryBuilder, Server, ServerConfig,
    methods::{BuiltinNotifications, register_builtin_methods},
};
