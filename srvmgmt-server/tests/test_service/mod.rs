use std::sync::Arc;

use serde_json::Value as JsonValue;
use srvmgmt_core::is_main_thread;
use srvmgmt_server::methods::{BuiltinNotifications, register_builtin_methods};
use srvmgmt_server::{MethodError, MethodId, OutgoingRequest, Registry, Server, ServerConfig};

use crate::test_helpers::{FakeServer, fake_server};

/// A server with a handful of `example:` methods on top of the built-in catalogue, backed by the
/// in-memory fake game server.
///
/// Its behavior matches what the cases in `testdata/` expect, so it can exercise the engine
/// end-to-end.
pub struct TestService {
    pub server: Server<FakeServer>,
    pub api: Arc<FakeServer>,
    pub notifications: BuiltinNotifications,

    /// Asks the client to confirm a prompt, expecting a yes/no answer
    pub confirm: OutgoingRequest<String, bool>,
}

pub fn test_service() -> TestService {
    test_service_with_config(ServerConfig::default())
}

pub fn test_service_with_config(config: ServerConfig) -> TestService {
    let mut builder = Registry::<FakeServer>::builder().with_info("Test service", "0.0.0");

    builder
        .method(MethodId::new("example", "echo").unwrap(), "Return the param unchanged")
        .handler_with_params("value", "value", |_api: &FakeServer, value: JsonValue, _client| Ok(value))
        .unwrap();

    builder
        .method(MethodId::new("example", "sum").unwrap(), "Add up some numbers")
        .handler_with_params("values", "sum", |_api: &FakeServer, values: Vec<i64>, _client| {
            values
                .into_iter()
                .try_fold(0i64, |sum, value| sum.checked_add(value))
                .ok_or_else(|| MethodError::invalid_params("Sum overflows"))
        })
        .unwrap();

    builder
        .method(MethodId::new("example", "whoami").unwrap(), "Connection id of the caller")
        .handler("connection_id", |_api: &FakeServer, client| Ok(client.connection_id()))
        .unwrap();

    builder
        .method(MethodId::new("example", "main_thread").unwrap(), "Whether this ran on the main thread")
        .on_main_thread()
        .handler("on_main_thread", |_api: &FakeServer, _client| Ok(is_main_thread()))
        .unwrap();

    builder
        .method(MethodId::new("example", "fail").unwrap(), "Fail with an internal error")
        .handler("nothing", |_api: &FakeServer, _client| -> Result<(), MethodError> {
            Err(anyhow::anyhow!("something secret went wrong").into())
        })
        .unwrap();

    builder
        .method(MethodId::new("example", "panic").unwrap(), "Panic on the main thread")
        .on_main_thread()
        .handler("nothing", |_api: &FakeServer, _client| -> Result<(), MethodError> {
            panic!("the main thread handler exploded")
        })
        .unwrap();

    let confirm = builder
        .request_with_params::<String, bool>(
            MethodId::new("example", "confirm").unwrap(),
            "Ask the client to confirm something",
            "prompt",
            "confirmed",
        )
        .unwrap();

    let notifications = register_builtin_methods(&mut builder).unwrap();

    let api = fake_server();
    let server = Server::new(builder.build().unwrap(), api.clone(), config);

    TestService {
        server,
        api,
        notifications,
        confirm,
    }
}
