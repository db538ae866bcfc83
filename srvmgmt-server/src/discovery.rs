//! The self-description of a registry, in the shape of an [OpenRPC](https://open-rpc.org)
//! document.
use std::collections::BTreeMap;

use schemars::schema::Schema;
use serde::{Deserialize, Serialize};
use srvmgmt_core::HostApi;

use crate::registry::{MethodInfo, Registry, SchemaSpec};

pub const OPENRPC_VERSION: &str = "1.3.2";

/// Named schemas, keyed by the type name that `$ref`s in method schemas point at.
pub type Schemas = BTreeMap<String, Schema>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    pub title: String,
    pub version: String,
}

impl Default for DiscoveryInfo {
    fn default() -> Self {
        Self {
            title: "Server Management Protocol".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryDocument {
    pub openrpc: String,
    pub info: DiscoveryInfo,
    pub methods: Vec<MethodDocument>,
    pub components: Components,
}

#[derive(Debug, Clone, Serialize)]
pub struct Components {
    pub schemas: Schemas,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodDocument {
    pub name: String,
    pub description: String,
    pub params: Vec<ContentDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ContentDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentDescriptor {
    pub name: String,
    pub schema: Schema,
}

impl From<&SchemaSpec> for ContentDescriptor {
    fn from(spec: &SchemaSpec) -> Self {
        Self {
            name: spec.name.clone(),
            schema: spec.schema.clone(),
        }
    }
}

impl From<&MethodInfo> for MethodDocument {
    fn from(info: &MethodInfo) -> Self {
        Self {
            name: info.id().to_string(),
            description: info.description().to_string(),
            params: info.params().map(ContentDescriptor::from).into_iter().collect(),
            result: info.result().map(ContentDescriptor::from),
        }
    }
}

/// Describe every discoverable method of `registry`, incoming methods first.
pub fn discover<A: HostApi>(registry: &Registry<A>) -> DiscoveryDocument {
    let incoming = registry
        .incoming_methods()
        .filter(|method| method.attributes().discoverable)
        .map(|method| method.info());
    let outgoing = registry
        .outgoing_methods()
        .filter(|method| method.attributes().discoverable)
        .map(|method| method.info());

    DiscoveryDocument {
        openrpc: OPENRPC_VERSION.to_string(),
        info: registry.info().clone(),
        methods: incoming.chain(outgoing).map(MethodDocument::from).collect(),
        components: Components {
            schemas: registry.schemas().clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::register_builtin_methods;
    use crate::testing::{FakeServer, fake_server};
    use crate::{ClientInfo, MethodId};
    use serde_json::{Value as JsonValue, json};

    fn builtin_document() -> JsonValue {
        let mut builder = Registry::<FakeServer>::builder().with_info("Fake server", "9.9.9");
        register_builtin_methods(&mut builder).unwrap();
        builder
            .method(MethodId::new("example", "secret").unwrap(), "Hidden")
            .undiscoverable()
            .handler("nothing", |_api, _client| Ok(()))
            .unwrap();
        let registry = builder.build().unwrap();

        serde_json::to_value(registry.discover()).unwrap()
    }

    fn method_names(document: &JsonValue) -> Vec<String> {
        document["methods"]
            .as_array()
            .unwrap()
            .iter()
            .map(|method| method["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn document_header() {
        let document = builtin_document();

        assert_eq!(document["openrpc"], json!("1.3.2"));
        assert_eq!(document["info"], json!({"title": "Fake server", "version": "9.9.9"}));
    }

    #[test]
    fn undiscoverable_methods_are_left_out() {
        let names = method_names(&builtin_document());

        assert!(names.contains(&"game:players".to_string()));
        assert!(names.contains(&"game:notification/players/joined".to_string()));
        assert!(!names.contains(&"game:rpc.discover".to_string()));
        assert!(!names.contains(&"example:secret".to_string()));

        // Incoming methods come before outgoing ones
        let first_notification = names.iter().position(|name| name.contains(":notification/")).unwrap();
        assert!(names[first_notification..].iter().all(|name| name.contains(":notification/")));
    }

    #[test]
    fn named_types_are_components() {
        let document = builtin_document();

        let schemas = document["components"]["schemas"].as_object().unwrap();
        for name in ["Player", "UserBan", "IpBan", "GameRule", "ServerState", "Difficulty"] {
            assert!(schemas.contains_key(name), "{name} missing from components");
        }

        let kick = document["methods"]
            .as_array()
            .unwrap()
            .iter()
            .find(|method| method["name"] == json!("game:players/kick"))
            .unwrap();
        assert_eq!(kick["params"][0]["name"], json!("kick"));
        assert_eq!(
            kick["params"][0]["schema"]["items"]["$ref"],
            json!("#/components/schemas/KickPlayer")
        );
        assert_eq!(kick["result"]["name"], json!("kicked"));
    }

    #[test]
    fn rpc_discover_returns_the_document() {
        let mut builder = Registry::<FakeServer>::builder();
        register_builtin_methods(&mut builder).unwrap();
        let registry = builder.build().unwrap();

        let api = fake_server();
        let served = registry
            .resolve("rpc.discover")
            .unwrap()
            .invoke(&api, None, ClientInfo::new(1))
            .unwrap();

        assert_eq!(served, serde_json::to_value(registry.discover()).unwrap());
    }
}
