//! Routing an incoming call to the thread its handler must run on.
use std::sync::Arc;

use serde_json::Value as JsonValue;
use srvmgmt_core::HostApi;

use crate::registry::{ClientInfo, Registry};
use crate::{DispatchError, MethodId};

/// Resolve `method`, then run its handler either inline or on the host's main thread, as its
/// descriptor demands.
///
/// A main-thread method is handed to the host's main loop and this waits for it to finish.  The
/// caller is an I/O worker, never the main thread itself.
pub(crate) async fn dispatch<A: HostApi>(
    registry: &Arc<Registry<A>>,
    api: &Arc<A>,
    client: ClientInfo,
    method: &str,
    params: Option<JsonValue>,
) -> Result<JsonValue, DispatchError> {
    let not_found = || DispatchError::MethodNotFound {
        method: method.to_string(),
    };

    let id = MethodId::resolve(method).ok_or_else(not_found)?;
    let descriptor = registry.incoming(&id).ok_or_else(not_found)?;

    if descriptor.attributes().run_on_main_thread {
        let task = {
            let registry = registry.clone();
            let api = api.clone();
            move || registry.invoke(&api, &id, params, client)
        };

        api.main_thread()
            .submit(task)
            .await
            .map_err(|e| DispatchError::InternalError { source: e.into() })?
    } else {
        descriptor.invoke(api, params, client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MethodError;
    use crate::testing::{FakeServer, fake_server};
    use assert_matches::assert_matches;
    use serde_json::json;
    use srvmgmt_core::is_main_thread;

    fn test_registry() -> Arc<Registry<FakeServer>> {
        let mut builder = Registry::<FakeServer>::builder();

        builder
            .method(MethodId::new("example", "where").unwrap(), "Which thread am I on")
            .on_main_thread()
            .handler("on_main_thread", |_api, _client| Ok(is_main_thread()))
            .unwrap();
        builder
            .method(MethodId::new("example", "where_inline").unwrap(), "Which thread am I on")
            .handler("on_main_thread", |_api, _client| Ok(is_main_thread()))
            .unwrap();
        builder
            .method(MethodId::new("example", "explode").unwrap(), "Panic on the main thread")
            .on_main_thread()
            .handler("nothing", |_api, _client| -> Result<(), MethodError> { panic!("main loop exploded") })
            .unwrap();

        builder.build().unwrap()
    }

    #[tokio::test]
    async fn main_thread_methods_are_handed_off() {
        let registry = test_registry();
        let api = fake_server();
        let client = ClientInfo::new(1);

        assert_eq!(
            dispatch(&registry, &api, client, "example:where", None).await.unwrap(),
            json!(true)
        );
        assert_eq!(
            dispatch(&registry, &api, client, "example:where_inline", None)
                .await
                .unwrap(),
            json!(false)
        );
    }

    #[tokio::test]
    async fn panics_on_the_main_thread_are_internal_errors() {
        let registry = test_registry();
        let api = fake_server();

        assert_matches!(
            dispatch(&registry, &api, ClientInfo::new(1), "example:explode", None).await,
            Err(DispatchError::InternalError { .. })
        );

        // The main thread survived
        assert_eq!(
            dispatch(&registry, &api, ClientInfo::new(1), "example:where", None)
                .await
                .unwrap(),
            json!(true)
        );
    }

    #[tokio::test]
    async fn unknown_and_unresolvable_methods() {
        let registry = test_registry();
        let api = fake_server();

        for name in ["does-not-exist", "example:nope", "Not A Method"] {
            assert_matches!(
                dispatch(&registry, &api, ClientInfo::new(1), name, None).await,
                Err(DispatchError::MethodNotFound { method }) if method == name
            );
        }
    }
}
