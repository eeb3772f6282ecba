//! Rust callables registered next to the Python tools.

use super::{CallFuture, Callable};
use crate::error::{Error, Result};
use crate::parse::{Parameter, Signature};
use schemars::JsonSchema;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Type-erased async handler for [`NativeFunction`].
type ErasedHandler = Arc<dyn Fn(Map<String, Value>) -> CallFuture<'static> + Send + Sync>;

/// A closure-backed callable with an explicit signature.
///
/// # Example
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct AddArgs { a: i64, b: i64 }
///
/// let add = NativeFunction::typed("add", |args: AddArgs| async move {
///     Ok(json!(args.a + args.b))
/// })
/// .with_description("Add two integers.");
/// namespace.register_native(add);
/// ```
#[derive(Clone)]
pub struct NativeFunction {
    name: String,
    description: Option<String>,
    signature: Signature,
    handler: ErasedHandler,
}

impl NativeFunction {
    /// Wrap a handler that takes the raw keyword arguments.
    pub fn new<F, Fut>(name: impl Into<String>, signature: Signature, handler: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            signature,
            handler: Arc::new(move |args: Map<String, Value>| -> CallFuture<'static> {
                Box::pin(handler(args))
            }),
        }
    }

    /// Wrap a handler taking deserialized arguments. The signature is
    /// derived from `A`'s JSON Schema.
    pub fn typed<A, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        A: JsonSchema + serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let name = name.into();
        let signature = signature_from_schema(&crate::json_schema_for::<A>());
        let tool = name.clone();
        let erased = move |args: Map<String, Value>| -> CallFuture<'static> {
            let parsed: A = match serde_json::from_value(Value::Object(args)) {
                Ok(a) => a,
                Err(e) => {
                    let err = Error::tool_failed(&tool, format!("invalid arguments: {e}"));
                    return Box::pin(async move { Err(err) });
                }
            };
            Box::pin(handler(parsed))
        };
        Self {
            name,
            description: None,
            signature,
            handler: Arc::new(erased),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Callable for NativeFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn invoke(&self, args: Map<String, Value>) -> CallFuture<'_> {
        (self.handler)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

/// Annotation text for a JSON Schema `type`.
fn annotation_for(json_type: &str) -> &'static str {
    match json_type {
        "integer" => "int",
        "number" => "float",
        "string" => "str",
        "boolean" => "bool",
        "array" => "list",
        "object" => "dict",
        "null" => "None",
        _ => "any",
    }
}

/// Map an object schema's properties to parameters. Properties not listed
/// in `required` get a `None` default. Order follows the schema's property
/// map.
pub(crate) fn signature_from_schema(schema: &Value) -> Signature {
    let required: Vec<&str> = schema["required"]
        .as_array()
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let params = schema["properties"]
        .as_object()
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| {
                    let json_type = match &prop["type"] {
                        Value::String(t) => t.as_str(),
                        Value::Array(types) => types
                            .iter()
                            .filter_map(Value::as_str)
                            .find(|t| *t != "null")
                            .unwrap_or("null"),
                        _ => "any",
                    };
                    let param =
                        Parameter::new(name.clone()).with_annotation(annotation_for(json_type));
                    if required.contains(&name.as_str()) {
                        param
                    } else {
                        param.with_default("None")
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Signature {
        params,
        returns: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct SearchArgs {
        query: String,
        limit: Option<u32>,
        exact: bool,
    }

    #[test]
    fn typed_signature_from_schema() {
        let f = NativeFunction::typed("search", |_: SearchArgs| async { Ok(Value::Null) });
        let sig = f.signature();
        let find = |n: &str| sig.params.iter().find(|p| p.name == n).unwrap();
        assert_eq!(find("query").annotation.as_deref(), Some("str"));
        assert_eq!(find("query").default, None);
        assert_eq!(find("limit").annotation.as_deref(), Some("int"));
        assert_eq!(find("limit").default.as_deref(), Some("None"));
        assert_eq!(find("exact").annotation.as_deref(), Some("bool"));
    }

    #[test]
    fn schema_mapping_is_deterministic() {
        let schema = crate::json_schema_for::<SearchArgs>();
        assert_eq!(signature_from_schema(&schema), signature_from_schema(&schema));
    }

    #[tokio::test]
    async fn typed_invocation_and_bad_arguments() {
        #[derive(Deserialize, JsonSchema)]
        struct AddArgs {
            a: i64,
            b: i64,
        }
        let f = NativeFunction::typed("add", |args: AddArgs| async move {
            Ok(json!(args.a + args.b))
        });

        let args = json!({"a": 2, "b": 3}).as_object().cloned().unwrap();
        assert_eq!(f.invoke(args).await.unwrap(), json!(5));

        let args = json!({"a": "two"}).as_object().cloned().unwrap();
        let err = f.invoke(args).await.unwrap_err();
        assert!(matches!(err, Error::ToolExecution { ref tool, .. } if tool == "add"));
    }

    #[tokio::test]
    async fn raw_handler_sees_arguments() {
        let sig = Signature {
            params: vec![Parameter::new("x").with_annotation("int")],
            returns: Some("int".into()),
        };
        let f = NativeFunction::new("double", sig, |args| async move {
            let x = args.get("x").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(x * 2))
        })
        .with_description("Double a number.");
        assert_eq!(f.description(), Some("Double a number."));
        let args = json!({"x": 21}).as_object().cloned().unwrap();
        assert_eq!(f.invoke(args).await.unwrap(), json!(42));
    }
}
