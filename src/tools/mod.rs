pub mod calendar;
pub mod github;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use crate::auth::{self, AccessToken, AuthorizationContext};
use crate::error::{SchemaError, ToolError};

#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutcome {
    Text(String),
    Json(Value),
}

impl ToolOutcome {
    pub fn into_text(self) -> String {
        match self {
            ToolOutcome::Text(text) => text,
            ToolOutcome::Json(value) => value.to_string(),
        }
    }
}

type DynDependency = Arc<dyn Any + Send + Sync>;
type ToolHandler = dyn Fn(Value, ToolContext) -> BoxFuture<'static, Result<ToolOutcome, ToolError>>
    + Send
    + Sync;

/// Type-keyed bag of shared values available to tool bodies.
///
/// Clones share storage, so values inserted through one handle are visible
/// through every other.
#[derive(Clone, Default, Debug)]
pub struct DependencyMap {
    values: Arc<RwLock<HashMap<TypeId, DynDependency>>>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T>(&self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.values
            .write()
            .expect("dependency map lock poisoned")
            .insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let values = self.values.read().ok()?;
        let value = values.get(&TypeId::of::<T>())?.clone();
        Arc::downcast::<T>(value).ok()
    }

    pub fn contains<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.values
            .read()
            .map(|values| values.contains_key(&TypeId::of::<T>()))
            .unwrap_or(false)
    }

    /// Returns a new map holding `self`'s values with `overrides` layered on
    /// top.
    pub fn merged_with(&self, overrides: &DependencyMap) -> DependencyMap {
        let mut merged = HashMap::new();
        for layer in [self, overrides] {
            if let Ok(values) = layer.values.read() {
                merged.extend(values.iter().map(|(key, value)| (*key, value.clone())));
            }
        }

        DependencyMap {
            values: Arc::new(RwLock::new(merged)),
        }
    }
}

/// Capabilities handed to a tool body: the runtime dependencies and, for
/// gated tools, the access token resolved before the body runs.
#[derive(Clone, Debug, Default)]
pub struct ToolContext {
    dependencies: DependencyMap,
    access_token: Option<AccessToken>,
}

impl ToolContext {
    pub fn new(dependencies: DependencyMap, access_token: Option<AccessToken>) -> Self {
        Self {
            dependencies,
            access_token,
        }
    }

    pub fn dependencies(&self) -> &DependencyMap {
        &self.dependencies
    }

    pub fn dependency<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.dependencies.get::<T>()
    }

    pub fn access_token(&self) -> Option<&AccessToken> {
        self.access_token.as_ref()
    }
}

/// What a gated tool does when the broker could not hand out a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MissingTokenPolicy {
    /// Skip the body and answer with an `auth_required` payload.
    ReportAuthRequired { message: String },
    /// Run the body without a token.
    Proceed,
}

impl MissingTokenPolicy {
    pub fn report(message: impl Into<String>) -> Self {
        MissingTokenPolicy::ReportAuthRequired {
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug)]
struct AccessGate {
    context: AuthorizationContext,
    on_missing: MissingTokenPolicy,
}

pub fn auth_required_payload(message: &str) -> Value {
    json!({
        "auth_required": true,
        "message": message,
        "events": [],
    })
}

#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    description: String,
    json_schema: Value,
    access: Option<AccessGate>,
    handler: Arc<ToolHandler>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("json_schema", &self.json_schema)
            .field("access", &self.access)
            .finish()
    }
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            json_schema: json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": true,
            }),
            access: None,
            handler: Arc::new(|_args, _ctx| {
                Box::pin(async {
                    Err(ToolError::Execution(
                        "tool handler not configured".to_string(),
                    ))
                })
            }),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Result<Self, SchemaError> {
        validate_schema(&schema)?;
        self.json_schema = schema;
        Ok(self)
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutcome, ToolError>> + Send + 'static,
    {
        self.handler = Arc::new(move |args, ctx| Box::pin(handler(args, ctx)));
        self
    }

    /// Gates the tool behind an access token for `context`.
    pub fn requires_access(
        mut self,
        context: AuthorizationContext,
        on_missing: MissingTokenPolicy,
    ) -> Self {
        self.access = Some(AccessGate {
            context,
            on_missing,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    pub fn authorization_context(&self) -> Option<&AuthorizationContext> {
        self.access.as_ref().map(|gate| &gate.context)
    }

    pub async fn execute(
        &self,
        args: Value,
        dependencies: &DependencyMap,
    ) -> Result<ToolOutcome, ToolError> {
        validate_arguments(self.name(), &self.json_schema, &args)?;

        let access_token = match &self.access {
            None => None,
            Some(gate) => {
                let token = auth::authorize(&gate.context, dependencies)
                    .await
                    .map_err(|source| ToolError::Authorization {
                        tool: self.name.clone(),
                        source,
                    })?;
                match (token, &gate.on_missing) {
                    (Some(token), _) => Some(token),
                    (None, MissingTokenPolicy::ReportAuthRequired { message }) => {
                        return Ok(ToolOutcome::Json(auth_required_payload(message)));
                    }
                    (None, MissingTokenPolicy::Proceed) => None,
                }
            }
        };

        tracing::info!(tool = %self.name, "Run tool");
        let ctx = ToolContext::new(dependencies.clone(), access_token);
        (self.handler)(args, ctx).await
    }
}

fn validate_schema(schema: &Value) -> Result<(), SchemaError> {
    let schema_obj = schema.as_object().ok_or(SchemaError::SchemaNotObject)?;

    let root_type = schema_obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SchemaError::RootTypeMustBeObject)?;

    if root_type != "object" {
        return Err(SchemaError::RootTypeMustBeObject);
    }

    if let Some(required) = schema_obj.get("required") {
        let required_arr = required.as_array().ok_or(SchemaError::InvalidRequired)?;
        for item in required_arr {
            if !item.is_string() {
                return Err(SchemaError::InvalidRequired);
            }
        }
    }

    Ok(())
}

fn validate_arguments(tool_name: &str, schema: &Value, args: &Value) -> Result<(), ToolError> {
    let args_obj = args
        .as_object()
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool_name.to_string(),
            message: "arguments must be a JSON object".to_string(),
        })?;

    let schema_obj = schema
        .as_object()
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool_name.to_string(),
            message: "tool schema must be a JSON object".to_string(),
        })?;

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for field in required {
            let Some(field_name) = field.as_str() else {
                continue;
            };
            if !args_obj.contains_key(field_name) {
                return Err(ToolError::InvalidArguments {
                    tool: tool_name.to_string(),
                    message: format!("missing required field: {field_name}"),
                });
            }
        }
    }

    let properties = schema_obj
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if schema_obj
        .get("additionalProperties")
        .and_then(Value::as_bool)
        == Some(false)
    {
        for key in args_obj.keys() {
            if !properties.contains_key(key) {
                return Err(ToolError::InvalidArguments {
                    tool: tool_name.to_string(),
                    message: format!("unknown field: {key}"),
                });
            }
        }
    }

    for (key, value) in args_obj {
        if let Some(field_schema) = properties.get(key) {
            if let Some(type_name) = field_schema.get("type").and_then(Value::as_str) {
                if !value_matches_type(value, type_name) {
                    return Err(ToolError::InvalidArguments {
                        tool: tool_name.to_string(),
                        message: format!("field '{key}' must be of type {type_name}"),
                    });
                }
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.as_f64().is_some(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::auth::{AuthUrlHandler, TokenBroker, TokenResolution};
    use crate::error::AuthError;

    struct FixedBroker(Result<TokenResolution, String>);

    #[async_trait]
    impl TokenBroker for FixedBroker {
        async fn resolve(
            &self,
            _context: &AuthorizationContext,
        ) -> Result<TokenResolution, AuthError> {
            self.0.clone().map_err(AuthError::Broker)
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuthUrlHandler for RecordingHandler {
        async fn on_auth_url(&self, url: &str) {
            self.urls.lock().expect("lock poisoned").push(url.to_string());
        }
    }

    fn gated_deps(
        resolution: Result<TokenResolution, String>,
    ) -> (DependencyMap, Arc<RecordingHandler>) {
        let handler = Arc::new(RecordingHandler::default());
        let deps = DependencyMap::new();
        deps.insert::<Arc<dyn TokenBroker>>(Arc::new(FixedBroker(resolution)));
        deps.insert::<Arc<dyn AuthUrlHandler>>(handler.clone());
        (deps, handler)
    }

    fn echo_token_tool(policy: MissingTokenPolicy) -> ToolSpec {
        ToolSpec::new("echo_token", "echo the injected token")
            .with_schema(json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": false
            }))
            .expect("schema should be valid")
            .requires_access(
                AuthorizationContext::new("test-provider", "https://app.test/cb"),
                policy,
            )
            .with_handler(|_args, ctx| async move {
                let rendered = ctx
                    .access_token()
                    .map(|token| token.secret().to_string())
                    .unwrap_or_else(|| "<none>".to_string());
                Ok(ToolOutcome::Text(rendered))
            })
    }

    fn pending() -> Result<TokenResolution, String> {
        Ok(TokenResolution::AuthorizationRequired {
            authorization_url: "https://idp.test/authorize".to_string(),
        })
    }

    #[test]
    fn schema_validation_rejects_non_object_root() {
        let result = ToolSpec::new("bad", "bad").with_schema(json!({"type": "string"}));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dependency_overrides_win() {
        let base = DependencyMap::new();
        base.insert::<u32>(1);

        let overrides = DependencyMap::new();
        overrides.insert::<u32>(9);

        let merged = base.merged_with(&overrides);
        assert_eq!(merged.get::<u32>().as_deref(), Some(&9));

        let tool = ToolSpec::new("read", "read dep")
            .with_schema(json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": false
            }))
            .expect("schema should be valid")
            .with_handler(|_args, ctx| async move {
                let value = ctx.dependency::<u32>().map(|v| *v).unwrap_or(0);
                Ok(ToolOutcome::Text(value.to_string()))
            });

        let outcome = tool
            .execute(json!({}), &merged)
            .await
            .expect("tool executes");
        assert_eq!(outcome, ToolOutcome::Text("9".to_string()));
    }

    #[tokio::test]
    async fn argument_validation_reports_missing_required() {
        let tool = ToolSpec::new("req", "required")
            .with_schema(json!({
                "type": "object",
                "properties": {"value": {"type": "string"}},
                "required": ["value"],
                "additionalProperties": false
            }))
            .expect("schema valid")
            .with_handler(|_args, _ctx| async move { Ok(ToolOutcome::Text("ok".into())) });

        let err = tool
            .execute(json!({}), &DependencyMap::new())
            .await
            .expect_err("should fail");

        let message = err.to_string();
        assert!(message.contains("missing required field"));
    }

    #[tokio::test]
    async fn granted_token_is_injected_into_body() {
        let (deps, handler) = gated_deps(Ok(TokenResolution::Granted(AccessToken::new("tok"))));
        let tool = echo_token_tool(MissingTokenPolicy::report("auth needed"));

        let outcome = tool.execute(json!({}), &deps).await.expect("executes");
        assert_eq!(outcome, ToolOutcome::Text("tok".to_string()));
        assert!(handler.urls.lock().expect("lock poisoned").is_empty());
    }

    #[tokio::test]
    async fn missing_token_reports_auth_required_without_running_body() {
        let (deps, handler) = gated_deps(pending());
        let tool = echo_token_tool(MissingTokenPolicy::report("auth needed"));

        let outcome = tool.execute(json!({}), &deps).await.expect("executes");
        assert_eq!(
            outcome,
            ToolOutcome::Json(json!({
                "auth_required": true,
                "message": "auth needed",
                "events": []
            }))
        );
        assert_eq!(
            *handler.urls.lock().expect("lock poisoned"),
            vec!["https://idp.test/authorize".to_string()]
        );
    }

    #[tokio::test]
    async fn proceed_policy_runs_body_without_token() {
        let (deps, handler) = gated_deps(pending());
        let tool = echo_token_tool(MissingTokenPolicy::Proceed);

        let outcome = tool.execute(json!({}), &deps).await.expect("executes");
        assert_eq!(outcome, ToolOutcome::Text("<none>".to_string()));
        assert_eq!(handler.urls.lock().expect("lock poisoned").len(), 1);
    }

    #[tokio::test]
    async fn broker_failure_becomes_authorization_error() {
        let (deps, _handler) = gated_deps(Err("vault offline".to_string()));
        let tool = echo_token_tool(MissingTokenPolicy::Proceed);

        let err = tool.execute(json!({}), &deps).await.expect_err("fails");
        assert!(matches!(err, ToolError::Authorization { ref tool, .. } if tool == "echo_token"));
        assert!(err.to_string().contains("vault offline"));
    }

    #[test]
    fn json_outcome_renders_compact_text() {
        let outcome = ToolOutcome::Json(json!({"events": []}));
        assert_eq!(outcome.into_text(), r#"{"events":[]}"#);
    }
}
