//! Bundle → extraction → namespace → conversation, end to end.
//!
//! Tests that evaluate Python skip themselves when `python3` is not on PATH.

use lmvm_rs::prelude::*;
use lmvm_rs::provider::{ProviderFuture, ProviderRequest};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const ADD_TOOL: &str = r#"import math


def add(a: int, b: int) -> int:
    """Add two integers."""
    return a + b


def hypot(x: float, y: float = 0.0) -> float:
    """Length of the vector (x, y)."""
    return math.sqrt(x * x + y * y)
"#;

const TEXT_TOOL: &str = r#"import asyncio


async def shout(text: str) -> str:
    """Upper-case the text."""
    await asyncio.sleep(0)
    print("tool output must not reach the result channel")
    return text.upper()


def explode(reason: str) -> str:
    raise ValueError(reason)
"#;

fn python_available() -> bool {
    std::process::Command::new(lmvm_rs::namespace::DEFAULT_PYTHON)
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

macro_rules! require_python {
    () => {
        if !python_available() {
            eprintln!("python3 not available; skipping");
            return;
        }
    };
}

/// `tools/<id>/<file>` and `bundles/<name>` under a temp dir.
fn workspace(tools: &[(&str, &str, &str)], bundle: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (id, file, source) in tools {
        let tool_dir = dir.path().join("tools").join(id);
        std::fs::create_dir_all(&tool_dir).unwrap();
        std::fs::write(tool_dir.join(file), source).unwrap();
    }
    std::fs::create_dir_all(dir.path().join("bundles")).unwrap();
    std::fs::write(dir.path().join("bundles/test.lmvm"), bundle).unwrap();
    dir
}

/// The loader `lmvm run` builds, minus dependency installation.
fn loader(root: &Path) -> BundleLoader {
    let extractor =
        Extractor::new(ExtractConfig::new(root.join("tools"))).with_installer(SkipInstall);
    BundleLoader::new(root.join("bundles"), extractor)
}

async fn load(root: &Path) -> Result<LoadedBundle> {
    loader(root).load("test.lmvm").await
}

fn kwargs(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().cloned().unwrap()
}

/// Replays queued replies and counts requests.
struct ScriptedProvider {
    replies: Mutex<VecDeque<ProviderReply>>,
    requests: AtomicUsize,
    last_results: Mutex<Vec<ToolResult>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<ProviderReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: AtomicUsize::new(0),
            last_results: Mutex::new(Vec::new()),
        }
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn tool_definitions(&self, descriptors: &[ToolDescriptor]) -> Vec<Value> {
        descriptors.iter().map(|d| d.to_json_schema()).collect()
    }

    fn complete<'a>(&'a self, request: ProviderRequest<'a>) -> ProviderFuture<'a> {
        Box::pin(async move {
            self.requests.fetch_add(1, Ordering::SeqCst);
            *self.last_results.lock().unwrap() = request.tool_results.to_vec();
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ProviderReply::text("done")))
        })
    }
}

impl Provider for &'static ScriptedProvider {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn tool_definitions(&self, descriptors: &[ToolDescriptor]) -> Vec<Value> {
        (**self).tool_definitions(descriptors)
    }

    fn complete<'a>(&'a self, request: ProviderRequest<'a>) -> ProviderFuture<'a> {
        (**self).complete(request)
    }
}

fn leak(provider: ScriptedProvider) -> &'static ScriptedProvider {
    Box::leak(Box::new(provider))
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

#[tokio::test]
async fn missing_tool_fails_before_the_provider_is_built() {
    require_python!();
    let dir = workspace(&[("add_tool", "add.py", ADD_TOOL)], "add_tool\nghost_tool\n");
    let provider = leak(ScriptedProvider::new(vec![]));
    let built = AtomicUsize::new(0);

    let result = loader(dir.path())
        .conversation(
            "test.lmvm",
            || {
                built.fetch_add(1, Ordering::SeqCst);
                let provider: Box<dyn Provider> = Box::new(provider);
                Ok(provider)
            },
            ConversationConfig::default(),
        )
        .await;
    let err = result.err().unwrap();
    assert!(
        matches!(err, Error::ResourceNotFound { ref name, .. } if name == "ghost_tool"),
        "{err}"
    );
    assert_eq!(built.load(Ordering::SeqCst), 0);
    assert_eq!(provider.requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_bundle_is_resource_not_found() {
    let dir = TempDir::new().unwrap();
    let err = ToolBundle::load(dir.path(), "nope.lmvm").await.unwrap_err();
    assert!(matches!(err, Error::ResourceNotFound { .. }));
}

#[tokio::test]
async fn add_tool_conversation() {
    require_python!();
    let dir = workspace(&[("add_tool", "add.py", ADD_TOOL)], "add_tool\n");
    let loaded = load(dir.path()).await.unwrap();
    assert_eq!(loaded.extraction.functions.len(), 2);
    assert_eq!(loaded.extraction.import_lines(), vec!["import math"]);
    assert_eq!(loaded.namespace.names().collect::<Vec<_>>(), ["add", "hypot"]);

    let provider = leak(ScriptedProvider::new(vec![
        ProviderReply::tool_calls(vec![call("call_1", "add", json!({"a": 2, "b": 5}))]),
        ProviderReply::text("2 + 5 = 7"),
    ]));
    let mut conversation = loader(dir.path())
        .conversation(
            "test.lmvm",
            || Ok(Box::new(provider) as Box<dyn Provider>),
            ConversationConfig::default(),
        )
        .await
        .unwrap();

    let descriptors = conversation.descriptors().unwrap();
    assert_eq!(descriptors[0].description, "Add two integers.");
    assert!(descriptors[0].parameters.iter().all(|p| p.required));
    assert!(!descriptors[1].parameters[1].required);

    let outcome = conversation.run("What is 2 + 5?").await.unwrap();
    assert!(outcome.completed());
    assert_eq!(outcome.text, "2 + 5 = 7");
    assert_eq!(outcome.tool_results[0].output, json!(7));
    assert_eq!(provider.requests.load(Ordering::SeqCst), 2);
    assert_eq!(provider.last_results.lock().unwrap()[0].call_id, "call_1");
    assert_eq!(conversation.history().len(), 2);
}

#[tokio::test]
async fn async_tools_are_awaited_and_stdout_is_isolated() {
    require_python!();
    let dir = workspace(&[("text", "text.py", TEXT_TOOL)], "text\n");
    let namespace = load(dir.path()).await.unwrap().namespace;

    let out = namespace
        .get("shout")
        .unwrap()
        .invoke(kwargs(json!({"text": "hi"})))
        .await
        .unwrap();
    assert_eq!(out, json!("HI"));
}

#[tokio::test]
async fn tool_exception_carries_traceback() {
    require_python!();
    let dir = workspace(&[("text", "text.py", TEXT_TOOL)], "text\n");
    let namespace = load(dir.path()).await.unwrap().namespace;

    let err = namespace
        .get("explode")
        .unwrap()
        .invoke(kwargs(json!({"reason": "kaboom"})))
        .await
        .unwrap_err();
    match err {
        Error::ToolExecution { tool, message } => {
            assert_eq!(tool, "explode");
            assert!(message.contains("ValueError"), "{message}");
            assert!(message.contains("kaboom"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn failing_import_is_evaluation_error() {
    require_python!();
    let source = "import lmvm_no_such_module\n\ndef f(x: int) -> int:\n    return x\n";
    let dir = workspace(&[("broken", "broken.py", source)], "broken\n");
    let err = load(dir.path()).await.err().unwrap();
    match err {
        Error::Evaluation(traceback) => assert!(traceback.contains("lmvm_no_such_module")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn building_twice_yields_identical_signatures() {
    require_python!();
    let dir = workspace(&[("add_tool", "add.py", ADD_TOOL)], "add_tool\n");
    let loaded = load(dir.path()).await.unwrap();
    let second = NamespaceBuilder::default()
        .build_extraction(&loaded.extraction)
        .await
        .unwrap();

    for callable in loaded.namespace.iter() {
        let other = second.get(callable.name()).unwrap();
        assert_eq!(callable.signature(), other.signature());
    }
}

#[tokio::test]
async fn later_tool_wins_on_name_collision() {
    require_python!();
    let first = "def pick() -> str:\n    return 'first'\n";
    let second = "def pick() -> str:\n    return 'second'\n";
    let dir = workspace(&[("one", "a.py", first), ("two", "b.py", second)], "one\ntwo\n");
    let loaded = load(dir.path()).await.unwrap();
    assert_eq!(loaded.extraction.functions["pick"].tool, "two");

    let out = loaded
        .namespace
        .get("pick")
        .unwrap()
        .invoke(Default::default())
        .await
        .unwrap();
    assert_eq!(out, json!("second"));
}

#[tokio::test]
async fn malformed_source_is_parse_error() {
    require_python!();
    let cases = [
        // Broken statements outside any function.
        ("x = = 1\nwhile\ndef f(a: int) -> int:\n    return a\n", 1),
        // Broken expression inside a body.
        ("def f(a: int) -> int:\n    return a +\n", 2),
    ];
    for (source, line) in cases {
        let dir = workspace(&[("bad", "bad.py", source)], "bad\n");
        match load(dir.path()).await.err().unwrap() {
            Error::Parse {
                tool,
                file,
                line: found,
                ..
            } => {
                assert_eq!(tool, "bad");
                assert!(file.ends_with("bad.py"), "{}", file.display());
                assert_eq!(found, line, "{source}");
            }
            other => panic!("expected a parse error for {source:?}, got {other}"),
        }
    }
}

const STATE_TOOL: &str = r#"def set_v(v: int) -> int:
    global V
    V = v
    return V


def get_v() -> int:
    return V
"#;

#[tokio::test]
async fn calls_share_module_state() {
    require_python!();
    let dir = workspace(&[("state", "state.py", STATE_TOOL)], "state\n");
    let namespace = load(dir.path()).await.unwrap().namespace;

    let set = namespace.get("set_v").unwrap().clone();
    let get = namespace.get("get_v").unwrap().clone();
    assert_eq!(set.invoke(kwargs(json!({"v": 5}))).await.unwrap(), json!(5));
    assert_eq!(get.invoke(Default::default()).await.unwrap(), json!(5));
    assert_eq!(set.invoke(kwargs(json!({"v": 8}))).await.unwrap(), json!(8));
    assert_eq!(get.invoke(Default::default()).await.unwrap(), json!(8));
}

#[tokio::test]
async fn positional_only_parameters_are_bound_by_position() {
    require_python!();
    let source = "def neg(a: int, /) -> int:\n    return -a\n";
    let dir = workspace(&[("neg", "neg.py", source)], "neg\n");
    let loaded = load(dir.path()).await.unwrap();

    let params = &loaded.descriptors[0].parameters;
    assert_eq!(params.len(), 1);
    assert_eq!((params[0].name.as_str(), params[0].required), ("a", true));

    let out = loaded
        .namespace
        .get("neg")
        .unwrap()
        .invoke(kwargs(json!({"a": 3})))
        .await
        .unwrap();
    assert_eq!(out, json!(-3));
}

#[tokio::test]
async fn method_with_flush_left_string_evaluates() {
    require_python!();
    let source = "class K:\n    def m(x: int) -> str:\n        return \"\"\"a\nb\"\"\" + str(x)\n\n\ndef top(x: int) -> int:\n    return x\n";
    let dir = workspace(&[("k", "k.py", source)], "k\n");
    let namespace = load(dir.path()).await.unwrap().namespace;
    assert_eq!(namespace.names().collect::<Vec<_>>(), ["top", "m"]);

    let out = namespace
        .get("m")
        .unwrap()
        .invoke(kwargs(json!({"x": 1})))
        .await
        .unwrap();
    assert_eq!(out, json!("a\nb1"));
}
