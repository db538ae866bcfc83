//! Method descriptors and the registry that holds them.
//!
//! Incoming methods are the ones a management client calls on us; outgoing methods are the ones
//! we call (or notify) on the client.  Both are registered once at startup through a
//! [`RegistryBuilder`], which freezes into an immutable [`Registry`].  There is no way to add or
//! remove methods after that.
//!
//! Handlers are typed: params are decoded with serde and results encoded with serde, and the
//! JSON schema of each comes from [`schemars`] so the registry can describe itself (see
//! [`crate::discovery`]).
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use itertools::Itertools;
use schemars::JsonSchema;
use schemars::r#gen::{SchemaGenerator, SchemaSettings};
use schemars::schema::Schema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use srvmgmt_core::{HostApi, panic_message};

use crate::discovery::{self, DiscoveryInfo};
use crate::{DispatchError, MethodError, MethodId, OutgoingMethodError, RegistryError};

/// Where named schemas live in the discovery document
const SCHEMA_DEFINITIONS_PATH: &str = "#/components/schemas/";

/// Identifies the connection an incoming call arrived on.
///
/// Passed to every handler so it can correlate calls from the same client.  It carries nothing
/// else, and handlers can't use it to reach the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientInfo {
    connection_id: u64,
}

impl ClientInfo {
    pub fn new(connection_id: u64) -> Self {
        Self { connection_id }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection-{}", self.connection_id)
    }
}

/// A named, schema-described value: a method's param or its result.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSpec {
    pub name: String,
    pub schema: Schema,
}

pub type ParamSpec = SchemaSpec;
pub type ResultSpec = SchemaSpec;

/// Everything about a method that is independent of how it's dispatched.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    id: MethodId,
    description: String,
    params: Option<ParamSpec>,
    result: Option<ResultSpec>,
}

impl MethodInfo {
    pub fn id(&self) -> &MethodId {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn params(&self) -> Option<&ParamSpec> {
        self.params.as_ref()
    }

    pub fn result(&self) -> Option<&ResultSpec> {
        self.result.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    /// The handler must run serialized with the host's main loop
    pub run_on_main_thread: bool,
    /// The method is listed in the discovery document
    pub discoverable: bool,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            run_on_main_thread: false,
            discoverable: true,
        }
    }
}

type ParameterlessHandler<A> = Box<dyn Fn(&A, ClientInfo) -> Result<JsonValue, DispatchError> + Send + Sync>;
type WithParamsHandler<A> =
    Box<dyn Fn(&A, JsonValue, ClientInfo) -> Result<JsonValue, DispatchError> + Send + Sync>;

/// A method the peer can call on us.
pub enum IncomingMethod<A> {
    Parameterless {
        info: MethodInfo,
        attributes: Attributes,
        handler: ParameterlessHandler<A>,
    },
    WithParams {
        info: MethodInfo,
        attributes: Attributes,
        handler: WithParamsHandler<A>,
    },
}

impl<A> IncomingMethod<A> {
    pub fn info(&self) -> &MethodInfo {
        match self {
            IncomingMethod::Parameterless { info, .. } | IncomingMethod::WithParams { info, .. } => info,
        }
    }

    pub fn attributes(&self) -> Attributes {
        match self {
            IncomingMethod::Parameterless { attributes, .. } | IncomingMethod::WithParams { attributes, .. } => {
                *attributes
            }
        }
    }

    /// Validate the raw params against this method's arity, decode them, run the handler and
    /// encode its result.
    ///
    /// Runs the handler on the calling thread.  Whether that's the right thread is the caller's
    /// problem; see [`crate::dispatch`].  A panicking handler is reported as an internal error.
    pub fn invoke(&self, api: &A, params: Option<JsonValue>, client: ClientInfo) -> Result<JsonValue, DispatchError> {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| match self {
            IncomingMethod::Parameterless { handler, .. } => {
                expect_no_params(params)?;
                handler(api, client)
            }
            IncomingMethod::WithParams { info, handler, .. } => {
                let name = info.params().map(|spec| spec.name.as_str()).unwrap_or_default();
                let value = select_param(name, params)?;
                handler(api, value, client)
            }
        }));

        outcome.unwrap_or_else(|panic| {
            Err(DispatchError::InternalError {
                source: anyhow::anyhow!(
                    "Handler for '{}' panicked: {}",
                    self.info().id(),
                    panic_message(panic.as_ref())
                ),
            })
        })
    }
}

impl<A> fmt::Debug for IncomingMethod<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMethod")
            .field("info", self.info())
            .field("attributes", &self.attributes())
            .finish_non_exhaustive()
    }
}

fn expect_no_params(params: Option<JsonValue>) -> Result<(), DispatchError> {
    match params {
        None => Ok(()),
        Some(JsonValue::Array(values)) if values.is_empty() => Ok(()),
        Some(_) => Err(DispatchError::InvalidParams {
            message: "Method takes no params".to_string(),
        }),
    }
}

/// Pick the single param out of either positional (`[value]`) or by-name (`{"name": value}`)
/// params.
fn select_param(name: &str, params: Option<JsonValue>) -> Result<JsonValue, DispatchError> {
    let invalid = |message: String| DispatchError::InvalidParams { message };

    match params {
        None | Some(JsonValue::Null) => Err(invalid(format!("Missing required param '{name}'"))),
        Some(JsonValue::Array(mut values)) => match values.len() {
            1 => Ok(values.remove(0)),
            count => Err(invalid(format!(
                "Expected exactly one positional param '{name}', got {count}"
            ))),
        },
        Some(JsonValue::Object(mut fields)) => fields
            .remove(name)
            .ok_or_else(|| invalid(format!("Missing required param '{name}'"))),
        Some(_) => Err(invalid("Params must be an array or an object".to_string())),
    }
}

fn encode_result<R: Serialize>(id: &MethodId, result: R) -> Result<JsonValue, DispatchError> {
    serde_json::to_value(result).map_err(|e| DispatchError::InternalError {
        source: anyhow::Error::new(e).context(format!("Error encoding result of '{id}'")),
    })
}

/// A method we call on the peer.
///
/// Only a [`OutgoingMethod::Request`] has a result.  Whether either kind takes a param is
/// recorded in its [`MethodInfo`].
#[derive(Debug, Clone)]
pub enum OutgoingMethod {
    Notification { info: MethodInfo, attributes: Attributes },
    Request { info: MethodInfo, attributes: Attributes },
}

impl OutgoingMethod {
    pub fn info(&self) -> &MethodInfo {
        match self {
            OutgoingMethod::Notification { info, .. } | OutgoingMethod::Request { info, .. } => info,
        }
    }

    pub fn attributes(&self) -> Attributes {
        match self {
            OutgoingMethod::Notification { attributes, .. } | OutgoingMethod::Request { attributes, .. } => {
                *attributes
            }
        }
    }

    pub fn id(&self) -> &MethodId {
        self.info().id()
    }

    /// Encode `params` as the wire `params` member, which is always positional.
    ///
    /// Giving params to a parameterless method, or none to a method that takes one, is an error.
    pub fn encode_params<P: Serialize>(&self, params: Option<&P>) -> Result<Option<JsonValue>, OutgoingMethodError> {
        match (self.info().params(), params) {
            (None, None) => Ok(None),
            (None, Some(_)) => Err(OutgoingMethodError::UnexpectedParams {
                method: self.id().clone(),
            }),
            (Some(_), None) => Err(OutgoingMethodError::MissingParams {
                method: self.id().clone(),
            }),
            (Some(_), Some(params)) => serde_json::to_value(params)
                .map(|value| Some(JsonValue::Array(vec![value])))
                .map_err(|source| OutgoingMethodError::EncodeParams {
                    method: self.id().clone(),
                    source,
                }),
        }
    }

    /// Decode the `result` member of the peer's response.  Notifications have no result.
    pub fn decode_result<R: DeserializeOwned>(&self, result: JsonValue) -> Result<R, OutgoingMethodError> {
        match self {
            OutgoingMethod::Notification { info, .. } => Err(OutgoingMethodError::NoResult {
                method: info.id().clone(),
            }),
            OutgoingMethod::Request { info, .. } => {
                serde_json::from_value(result).map_err(|source| OutgoingMethodError::DecodeResult {
                    method: info.id().clone(),
                    source,
                })
            }
        }
    }
}

/// Typed handle to a registered outgoing notification whose param (if any) is a `P`.
pub struct OutgoingNotification<P = ()> {
    method: Arc<OutgoingMethod>,
    _params: PhantomData<fn(P)>,
}

impl<P> OutgoingNotification<P> {
    pub fn method(&self) -> &Arc<OutgoingMethod> {
        &self.method
    }
}

impl<P> Clone for OutgoingNotification<P> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            _params: PhantomData,
        }
    }
}

impl<P> fmt::Debug for OutgoingNotification<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OutgoingNotification").field(self.method.id()).finish()
    }
}

/// Typed handle to a registered outgoing request taking a `P` and answered with an `R`.
pub struct OutgoingRequest<P, R> {
    method: Arc<OutgoingMethod>,
    _types: PhantomData<fn(P) -> R>,
}

impl<P, R> OutgoingRequest<P, R> {
    pub fn method(&self) -> &Arc<OutgoingMethod> {
        &self.method
    }
}

impl<P, R> Clone for OutgoingRequest<P, R> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            _types: PhantomData,
        }
    }
}

impl<P, R> fmt::Debug for OutgoingRequest<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OutgoingRequest").field(self.method.id()).finish()
    }
}

/// Collects method registrations and freezes them into a [`Registry`].
pub struct RegistryBuilder<A> {
    info: DiscoveryInfo,
    incoming: Vec<IncomingMethod<A>>,
    outgoing: Vec<Arc<OutgoingMethod>>,
    ids: HashSet<MethodId>,
    generator: SchemaGenerator,
}

impl<A: HostApi> Default for RegistryBuilder<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: HostApi> RegistryBuilder<A> {
    pub fn new() -> Self {
        let generator = SchemaSettings::draft07()
            .with(|settings| {
                settings.definitions_path = SCHEMA_DEFINITIONS_PATH.to_string();
            })
            .into_generator();

        Self {
            info: DiscoveryInfo::default(),
            incoming: Vec::new(),
            outgoing: Vec::new(),
            ids: HashSet::new(),
            generator,
        }
    }

    /// Set the `info` block of the discovery document.
    pub fn with_info(mut self, title: impl Into<String>, version: impl Into<String>) -> Self {
        self.info = DiscoveryInfo {
            title: title.into(),
            version: version.into(),
        };
        self
    }

    /// Start registering an incoming method.  Finish with [`MethodBuilder::handler`] or
    /// [`MethodBuilder::handler_with_params`].
    pub fn method(&mut self, id: MethodId, description: impl Into<String>) -> MethodBuilder<'_, A> {
        MethodBuilder {
            builder: self,
            id,
            description: description.into(),
            attributes: Attributes::default(),
        }
    }

    /// Register a notification we send without params.
    pub fn notification(
        &mut self,
        id: MethodId,
        description: impl Into<String>,
    ) -> Result<OutgoingNotification<()>, RegistryError> {
        let info = self.method_info(id, description.into(), None, None)?;
        let method = self.add_outgoing(OutgoingMethod::Notification {
            info,
            attributes: Attributes::default(),
        });

        Ok(OutgoingNotification {
            method,
            _params: PhantomData,
        })
    }

    /// Register a notification we send with a single `P` param.
    pub fn notification_with_params<P: Serialize + JsonSchema>(
        &mut self,
        id: MethodId,
        description: impl Into<String>,
        param_name: &str,
    ) -> Result<OutgoingNotification<P>, RegistryError> {
        let params = self.spec_for::<P>(param_name);
        let info = self.method_info(id, description.into(), Some(params), None)?;
        let method = self.add_outgoing(OutgoingMethod::Notification {
            info,
            attributes: Attributes::default(),
        });

        Ok(OutgoingNotification {
            method,
            _params: PhantomData,
        })
    }

    /// Register a request we send without params, answered with an `R`.
    pub fn request<R: DeserializeOwned + JsonSchema>(
        &mut self,
        id: MethodId,
        description: impl Into<String>,
        result_name: &str,
    ) -> Result<OutgoingRequest<(), R>, RegistryError> {
        let result = self.spec_for::<R>(result_name);
        let info = self.method_info(id, description.into(), None, Some(result))?;
        let method = self.add_outgoing(OutgoingMethod::Request {
            info,
            attributes: Attributes::default(),
        });

        Ok(OutgoingRequest {
            method,
            _types: PhantomData,
        })
    }

    /// Register a request we send with a single `P` param, answered with an `R`.
    pub fn request_with_params<P: Serialize + JsonSchema, R: DeserializeOwned + JsonSchema>(
        &mut self,
        id: MethodId,
        description: impl Into<String>,
        param_name: &str,
        result_name: &str,
    ) -> Result<OutgoingRequest<P, R>, RegistryError> {
        let params = self.spec_for::<P>(param_name);
        let result = self.spec_for::<R>(result_name);
        let info = self.method_info(id, description.into(), Some(params), Some(result))?;
        let method = self.add_outgoing(OutgoingMethod::Request {
            info,
            attributes: Attributes::default(),
        });

        Ok(OutgoingRequest {
            method,
            _types: PhantomData,
        })
    }

    /// Freeze the registry.
    ///
    /// Adds the built-in `rpc.discover` method, whose document is computed here once since the
    /// registry can't change afterwards.
    pub fn build(mut self) -> Result<Arc<Registry<A>>, RegistryError> {
        let document = Arc::new(OnceLock::<JsonValue>::new());

        self.method(
            MethodId::game("rpc.discover")?,
            "Describe the methods of this server as an OpenRPC document",
        )
        .undiscoverable()
        .handler("document", {
            let document = document.clone();
            move |_api: &A, _client| {
                document
                    .get()
                    .cloned()
                    .ok_or_else(|| MethodError::Internal(anyhow::anyhow!("Discovery document was never built")))
            }
        })?;

        let index = self
            .incoming
            .iter()
            .enumerate()
            .map(|(index, method)| (method.info().id().clone(), index))
            .collect();

        let registry = Registry {
            info: self.info,
            incoming: self.incoming,
            incoming_index: index,
            outgoing: self.outgoing,
            schemas: self.generator.take_definitions().into_iter().collect(),
        };

        let discovery_document = serde_json::to_value(registry.discover())
            .map_err(|source| RegistryError::Discovery { source })?;
        // The cell was created above and nothing else can have set it
        let _ = document.set(discovery_document);

        tracing::debug!(
            incoming = registry.incoming.len(),
            outgoing = registry.outgoing.len(),
            schemas = registry.schemas.len(),
            namespaces = %registry
                .incoming
                .iter()
                .map(|method| method.info().id().namespace())
                .sorted()
                .dedup()
                .join(", "),
            "Method registry built"
        );

        Ok(Arc::new(registry))
    }

    fn spec_for<T: JsonSchema>(&mut self, name: &str) -> SchemaSpec {
        SchemaSpec {
            name: name.to_string(),
            schema: self.generator.subschema_for::<T>(),
        }
    }

    fn method_info(
        &mut self,
        id: MethodId,
        description: String,
        params: Option<ParamSpec>,
        result: Option<ResultSpec>,
    ) -> Result<MethodInfo, RegistryError> {
        if !self.ids.insert(id.clone()) {
            return Err(RegistryError::Duplicate { id });
        }

        Ok(MethodInfo {
            id,
            description,
            params,
            result,
        })
    }

    fn add_outgoing(&mut self, method: OutgoingMethod) -> Arc<OutgoingMethod> {
        let method = Arc::new(method);
        self.outgoing.push(method.clone());
        method
    }
}

/// Registration of a single incoming method, started by [`RegistryBuilder::method`].
#[must_use = "the method is not registered until a handler is set"]
pub struct MethodBuilder<'b, A> {
    builder: &'b mut RegistryBuilder<A>,
    id: MethodId,
    description: String,
    attributes: Attributes,
}

impl<A: HostApi> MethodBuilder<'_, A> {
    /// Run the handler on the host's main thread rather than on the connection's I/O worker.
    pub fn on_main_thread(mut self) -> Self {
        self.attributes.run_on_main_thread = true;
        self
    }

    /// Leave the method out of the discovery document.
    pub fn undiscoverable(mut self) -> Self {
        self.attributes.discoverable = false;
        self
    }

    /// Register the method as taking no params, with `handler` producing the result.
    pub fn handler<R, F>(self, result_name: &str, handler: F) -> Result<(), RegistryError>
    where
        R: Serialize + JsonSchema,
        F: Fn(&A, ClientInfo) -> Result<R, MethodError> + Send + Sync + 'static,
    {
        let result = self.builder.spec_for::<R>(result_name);
        let info = self
            .builder
            .method_info(self.id.clone(), self.description, None, Some(result))?;

        let id = self.id;
        let handler: ParameterlessHandler<A> = Box::new(move |api: &A, client: ClientInfo| {
            let result = handler(api, client)?;
            encode_result(&id, result)
        });

        self.builder.incoming.push(IncomingMethod::Parameterless {
            info,
            attributes: self.attributes,
            handler,
        });
        Ok(())
    }

    /// Register the method as taking a single `P` param named `param_name`.
    pub fn handler_with_params<P, R, F>(self, param_name: &str, result_name: &str, handler: F) -> Result<(), RegistryError>
    where
        P: DeserializeOwned + JsonSchema,
        R: Serialize + JsonSchema,
        F: Fn(&A, P, ClientInfo) -> Result<R, MethodError> + Send + Sync + 'static,
    {
        let params = self.builder.spec_for::<P>(param_name);
        let result = self.builder.spec_for::<R>(result_name);
        let info = self
            .builder
            .method_info(self.id.clone(), self.description, Some(params), Some(result))?;

        let id = self.id;
        let handler: WithParamsHandler<A> = Box::new(move |api: &A, value: JsonValue, client: ClientInfo| {
            let params: P = serde_json::from_value(value)
                .map_err(|e| DispatchError::InvalidParams { message: e.to_string() })?;
            let result = handler(api, params, client)?;
            encode_result(&id, result)
        });

        self.builder.incoming.push(IncomingMethod::WithParams {
            info,
            attributes: self.attributes,
            handler,
        });
        Ok(())
    }
}

/// The frozen set of methods, shared by every connection.
pub struct Registry<A> {
    info: DiscoveryInfo,
    incoming: Vec<IncomingMethod<A>>,
    incoming_index: HashMap<MethodId, usize>,
    outgoing: Vec<Arc<OutgoingMethod>>,
    schemas: discovery::Schemas,
}

impl<A: HostApi> Registry<A> {
    pub fn builder() -> RegistryBuilder<A> {
        RegistryBuilder::new()
    }

    pub fn info(&self) -> &DiscoveryInfo {
        &self.info
    }

    pub fn incoming(&self, id: &MethodId) -> Option<&IncomingMethod<A>> {
        self.incoming_index.get(id).map(|&index| &self.incoming[index])
    }

    /// Look up an incoming method by the name a peer used for it.
    pub fn resolve(&self, name: &str) -> Option<&IncomingMethod<A>> {
        MethodId::resolve(name).and_then(|id| self.incoming(&id))
    }

    /// Incoming methods in registration order.
    pub fn incoming_methods(&self) -> impl Iterator<Item = &IncomingMethod<A>> {
        self.incoming.iter()
    }

    /// Outgoing methods in registration order.
    pub fn outgoing_methods(&self) -> impl Iterator<Item = &Arc<OutgoingMethod>> {
        self.outgoing.iter()
    }

    /// Named schemas referenced from the param and result schemas of all methods.
    pub fn schemas(&self) -> &discovery::Schemas {
        &self.schemas
    }

    pub fn discover(&self) -> discovery::DiscoveryDocument {
        discovery::discover(self)
    }

    /// Invoke the incoming method `id` on the calling thread.
    pub fn invoke(
        &self,
        api: &A,
        id: &MethodId,
        params: Option<JsonValue>,
        client: ClientInfo,
    ) -> Result<JsonValue, DispatchError> {
        let method = self.incoming(id).ok_or_else(|| DispatchError::MethodNotFound {
            method: id.to_string(),
        })?;

        method.invoke(api, params, client)
    }
}

impl<A> fmt::Debug for Registry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("info", &self.info)
            .field("incoming", &self.incoming)
            .field("outgoing", &self.outgoing)
            .finish_non_exhaustive()
    }
}
