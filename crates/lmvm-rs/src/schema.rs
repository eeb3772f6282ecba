//! Provider-agnostic tool descriptors built from callable signatures.

use crate::error::{Error, Result};
use crate::extract::ExtractedFunction;
use crate::namespace::{Callable, Namespace};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value, json};

/// What to do with a parameter that has no type annotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnannotatedParams {
    /// Fail with [`Error::Schema`] naming the tool and parameter.
    #[default]
    Reject,
    /// Describe the parameter with type `"any"` (no JSON type constraint).
    Any,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaOptions {
    pub unannotated: UnannotatedParams,
}

impl SchemaOptions {
    pub fn with_unannotated(mut self, policy: UnannotatedParams) -> Self {
        self.unannotated = policy;
        self
    }
}

/// One parameter of a tool as presented to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSchema {
    pub name: String,
    /// Annotation text, e.g. `int` or `List[str]`.
    #[serde(rename = "type")]
    pub type_name: String,
    pub required: bool,
    pub description: String,
}

/// A tool as presented to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSchema>,
}

impl ToolDescriptor {
    /// Describe one callable. `docstring` overrides the callable's own
    /// description when present.
    pub fn describe(
        callable: &dyn Callable,
        docstring: Option<&str>,
        options: SchemaOptions,
    ) -> Result<Self> {
        let name = callable.name().to_string();
        let mut parameters = Vec::new();
        for param in callable.signature().named_params() {
            let type_name = match (&param.annotation, options.unannotated) {
                (Some(annotation), _) if !annotation.trim().is_empty() => annotation.clone(),
                (_, UnannotatedParams::Any) => "any".to_string(),
                (_, UnannotatedParams::Reject) => {
                    return Err(Error::Schema {
                        tool: name,
                        message: format!("parameter '{}' has no type annotation", param.name),
                    });
                }
            };
            parameters.push(ParamSchema {
                name: param.name.clone(),
                type_name,
                required: param.default.is_none(),
                description: String::new(),
            });
        }
        let description = docstring
            .or_else(|| callable.description())
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            name,
            description,
            parameters,
        })
    }

    /// JSON Schema (`type: object`) for the tool's parameters.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            let mut prop = Map::new();
            if let Some(t) = json_type(&p.type_name) {
                prop.insert("type".into(), json!(t));
            }
            if !p.description.is_empty() {
                prop.insert("description".into(), json!(p.description));
            }
            properties.insert(p.name.clone(), Value::Object(prop));
            if p.required {
                required.push(json!(p.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Descriptors for every callable, in namespace order.
///
/// The docstring of the matching extracted function is the description;
/// callables without one fall back to their own description, else empty.
pub fn build_descriptors(
    namespace: &Namespace,
    functions: &IndexMap<String, ExtractedFunction>,
    options: SchemaOptions,
) -> Result<Vec<ToolDescriptor>> {
    namespace
        .iter()
        .map(|callable| {
            let docstring = functions
                .get(callable.name())
                .and_then(|f| f.docstring.as_deref());
            ToolDescriptor::describe(callable.as_ref(), docstring, options)
        })
        .collect()
}

fn strip_typing(s: &str) -> &str {
    s.strip_prefix("typing.")
        .or_else(|| s.strip_prefix("collections.abc."))
        .unwrap_or(s)
}

/// JSON type for an annotation, or `None` when unconstrained.
pub fn json_type(annotation: &str) -> Option<&'static str> {
    let annotation = annotation.trim();

    // `X | None` unions.
    let members: Vec<&str> = annotation.split('|').map(str::trim).collect();
    if members.len() > 1 && !annotation.contains('[') {
        let non_null: Vec<&str> = members.into_iter().filter(|m| *m != "None").collect();
        return match non_null.as_slice() {
            [single] => json_type(single),
            _ => None,
        };
    }

    let (base, inner) = match annotation.split_once('[') {
        Some((base, rest)) => (strip_typing(base.trim()), rest.strip_suffix(']')),
        None => (strip_typing(annotation), None),
    };
    match base {
        "Optional" => inner.and_then(json_type),
        "int" => Some("integer"),
        "float" => Some("number"),
        "str" => Some("string"),
        "bool" => Some("boolean"),
        "None" | "NoneType" => Some("null"),
        "list" | "List" | "tuple" | "Tuple" | "set" | "Set" | "frozenset" | "FrozenSet"
        | "Sequence" | "Iterable" => Some("array"),
        "dict" | "Dict" | "Mapping" | "MutableMapping" => Some("object"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::NativeFunction;
    use crate::parse::{ParamKind, Parameter, Signature};

    fn native(name: &str, params: Vec<Parameter>) -> NativeFunction {
        NativeFunction::new(
            name,
            Signature {
                params,
                returns: None,
            },
            |_| async { Ok(Value::Null) },
        )
    }

    #[test]
    fn type_map() {
        assert_eq!(json_type("int"), Some("integer"));
        assert_eq!(json_type("float"), Some("number"));
        assert_eq!(json_type("str"), Some("string"));
        assert_eq!(json_type("bool"), Some("boolean"));
        assert_eq!(json_type("List[int]"), Some("array"));
        assert_eq!(json_type("typing.Sequence[str]"), Some("array"));
        assert_eq!(json_type("tuple"), Some("array"));
        assert_eq!(json_type("Dict[str, int]"), Some("object"));
        assert_eq!(json_type("Optional[float]"), Some("number"));
        assert_eq!(json_type("str | None"), Some("string"));
        assert_eq!(json_type("None"), Some("null"));
        assert_eq!(json_type("any"), None);
        assert_eq!(json_type("Any"), None);
        assert_eq!(json_type("MyClass"), None);
        assert_eq!(json_type("int | str"), None);
    }

    #[test]
    fn descriptor_matches_signature() {
        let f = native(
            "add",
            vec![
                Parameter::new("a").with_annotation("int"),
                Parameter::new("b").with_annotation("int").with_default("0"),
                Parameter::new("rest").with_kind(ParamKind::VarPositional),
                Parameter::new("opts").with_kind(ParamKind::VarKeyword),
            ],
        );
        let d = ToolDescriptor::describe(&f, Some("Add."), SchemaOptions::default()).unwrap();
        assert_eq!(d.name, "add");
        assert_eq!(d.description, "Add.");
        let names: Vec<&str> = d.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(d.parameters[0].required);
        assert!(!d.parameters[1].required);
        assert!(d.parameters.iter().all(|p| !p.type_name.is_empty()));
        assert!(d.parameters.iter().all(|p| p.description.is_empty()));

        let schema = d.to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["a"]["type"], "integer");
        assert_eq!(schema["required"], json!(["a"]));
    }

    #[test]
    fn unannotated_policy() {
        let f = native("f", vec![Parameter::new("x")]);
        let err = ToolDescriptor::describe(&f, None, SchemaOptions::default()).unwrap_err();
        match err {
            Error::Schema { tool, message } => {
                assert_eq!(tool, "f");
                assert!(message.contains("'x'"));
            }
            other => panic!("unexpected {other}"),
        }

        let options = SchemaOptions::default().with_unannotated(UnannotatedParams::Any);
        let d = ToolDescriptor::describe(&f, None, options).unwrap();
        assert_eq!(d.parameters[0].type_name, "any");
        assert_eq!(d.description, "");
        assert_eq!(d.to_json_schema()["properties"]["x"], json!({}));
    }

    #[test]
    fn build_uses_extracted_docstrings_in_namespace_order() {
        let mut ns = Namespace::new();
        ns.register_native(native("b", vec![]).with_description("native b"));
        ns.register_native(native("a", vec![]));
        let mut functions = IndexMap::new();
        functions.insert(
            "a".to_string(),
            ExtractedFunction {
                name: "a".into(),
                source_text: "def a():\n    'doc a'".into(),
                docstring: Some("doc a".into()),
                signature: Signature::default(),
                tool: "t".into(),
                nested: false,
                is_async: false,
                line: 1,
            },
        );
        let descriptors = build_descriptors(&ns, &functions, SchemaOptions::default()).unwrap();
        assert_eq!(descriptors[0].name, "b");
        assert_eq!(descriptors[0].description, "native b");
        assert_eq!(descriptors[1].description, "doc a");
    }
}
