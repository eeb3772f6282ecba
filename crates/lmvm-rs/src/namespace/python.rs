//! Python-backed callables.
//!
//! A namespace owns one long-lived interpreter running `runner.py`. The
//! runner keeps a single module scope for its whole life: imports and
//! function sources are evaluated into it once, and every call runs against
//! that same scope, so globals set by one call are seen by the next.
//!
//! The channel is line-delimited JSON. Each request carries an `id` and an
//! `op` (`check`, `load`, or `call`); each reply echoes the `id` and holds
//! either `"ok"` or `"error"` (a formatted traceback). Tool output printed to
//! stdout is redirected to stderr, which is drained into the debug log.

use super::{CallFuture, Callable};
use crate::error::{Error, Result};
use crate::parse::{ParamKind, Signature, SyntaxError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

const RUNNER: &str = include_str!("runner.py");

/// Stderr lines kept for error messages when the interpreter dies.
const STDERR_TAIL: usize = 20;

/// Imports and dedented function sources evaluated together.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationUnit {
    pub imports: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Check {
        source: &'a str,
    },
    Load {
        #[serde(flatten)]
        unit: &'a EvaluationUnit,
        names: &'a [String],
    },
    Call {
        name: &'a str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    },
}

/// Outcome reported by the runner.
#[derive(Debug)]
enum Reply {
    Ok(Value),
    Raised(String),
}

/// One running interpreter and its pipes.
#[derive(Debug)]
struct Runner {
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_tail: Arc<std::sync::Mutex<VecDeque<String>>>,
    next_id: u64,
    /// A request was written but its reply never read (the caller's future
    /// was dropped). The channel can no longer be trusted.
    in_flight: bool,
}

impl Runner {
    fn spawn(python: &Path) -> Result<Self> {
        let mut child = Command::new(python)
            .arg("-c")
            .arg(RUNNER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Evaluation(format!(
                    "failed to start interpreter {}: {e}",
                    python.display()
                ))
            })?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(Error::Evaluation("interpreter pipes unavailable".into()));
        };

        let stderr_tail = Arc::new(std::sync::Mutex::new(VecDeque::new()));
        tokio::spawn(drain_stderr(stderr, stderr_tail.clone()));
        debug!("Started interpreter {} (pid {:?})", python.display(), child.id());

        Ok(Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr_tail,
            next_id: 0,
            in_flight: false,
        })
    }

    async fn request(&mut self, request: &Request<'_>) -> Result<Reply> {
        self.next_id += 1;
        let id = self.next_id;
        let mut value = serde_json::to_value(request)?;
        if let Value::Object(map) = &mut value {
            map.insert("id".into(), id.into());
        }
        let mut line = serde_json::to_vec(&value)?;
        line.push(b'\n');
        trace!("python request: {}", String::from_utf8_lossy(&line).trim_end());

        self.in_flight = true;
        if let Err(e) = self.send(&line).await {
            return Err(self.exited(&e.to_string()));
        }
        loop {
            let text = match self.stdout.next_line().await {
                Ok(Some(text)) => text,
                Ok(None) => return Err(self.exited("end of output")),
                Err(e) => return Err(self.exited(&e.to_string())),
            };
            let Ok(mut reply) = serde_json::from_str::<Map<String, Value>>(&text) else {
                debug!("python stdout: {text}");
                continue;
            };
            if reply.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            self.in_flight = false;
            if let Some(Value::String(traceback)) = reply.remove("error") {
                return Ok(Reply::Raised(traceback));
            }
            return match reply.remove("ok") {
                Some(value) => Ok(Reply::Ok(value)),
                None => Err(Error::Evaluation(format!(
                    "malformed interpreter reply: {text}"
                ))),
            };
        }
    }

    async fn send(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.stdin.write_all(line).await?;
        self.stdin.flush().await
    }

    fn exited(&self, cause: &str) -> Error {
        let tail = self
            .stderr_tail
            .lock()
            .map(|t| t.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default();
        Error::Evaluation(format!("interpreter exited ({cause}): {tail}"))
    }

    /// Evaluate `unit` and return which of `names` are bound to callables.
    async fn load(&mut self, unit: &EvaluationUnit, names: &[String]) -> Result<Vec<String>> {
        match self.request(&Request::Load { unit, names }).await? {
            Reply::Ok(bound) => Ok(serde_json::from_value(bound)?),
            Reply::Raised(traceback) => {
                Err(Error::Evaluation(traceback.trim_end().to_string()))
            }
        }
    }
}

async fn drain_stderr(stderr: ChildStderr, tail: Arc<std::sync::Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("python stderr: {line}");
        if let Ok(mut tail) = tail.lock() {
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
}

/// Compile `source` with the interpreter's own parser. Returns the first
/// syntax error, with its line in `source`.
pub(crate) async fn check_syntax(python: &Path, source: &str) -> Result<Option<SyntaxError>> {
    let mut runner = Runner::spawn(python)?;
    match runner.request(&Request::Check { source }).await? {
        Reply::Ok(Value::Null) => Ok(None),
        Reply::Ok(found) => Ok(Some(serde_json::from_value(found)?)),
        Reply::Raised(traceback) => Err(Error::Evaluation(traceback.trim_end().to_string())),
    }
}

/// The interpreter shared by every Python function of one namespace.
///
/// If a call is abandoned mid-flight (its future dropped, e.g. by a tool
/// timeout) the interpreter is restarted and the unit evaluated again
/// before the next call; module state set by earlier calls is lost.
#[derive(Debug)]
pub(crate) struct PythonSession {
    python: PathBuf,
    unit: EvaluationUnit,
    names: Vec<String>,
    runner: Mutex<Option<Runner>>,
}

impl PythonSession {
    /// Start the interpreter and evaluate `unit` once. Returns the session
    /// and the subset of `names` bound to callables.
    pub(crate) async fn start(
        python: PathBuf,
        unit: EvaluationUnit,
        names: Vec<String>,
    ) -> Result<(Arc<Self>, Vec<String>)> {
        let mut runner = Runner::spawn(&python)?;
        let bound = runner.load(&unit, &names).await?;
        let session = Self {
            python,
            unit,
            names,
            runner: Mutex::new(Some(runner)),
        };
        Ok((Arc::new(session), bound))
    }

    async fn call(&self, name: &str, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Reply> {
        let mut slot = self.runner.lock().await;
        let runner = match slot.take() {
            Some(runner) if !runner.in_flight => slot.insert(runner),
            abandoned => {
                if abandoned.is_some() {
                    warn!("Previous Python call did not finish; restarting the interpreter");
                } else {
                    warn!("Python interpreter is gone; restarting it");
                }
                drop(abandoned);
                let mut runner = Runner::spawn(&self.python)?;
                runner.load(&self.unit, &self.names).await?;
                slot.insert(runner)
            }
        };
        let reply = runner.request(&Request::Call { name, args, kwargs }).await;
        if reply.is_err() {
            *slot = None;
        }
        reply
    }
}

/// Move arguments of positional-only parameters out of `kwargs`, in
/// declaration order. Stops at the first one the caller left out so later
/// ones are never shifted into its place.
fn bind_positional(
    signature: &Signature,
    mut kwargs: Map<String, Value>,
) -> (Vec<Value>, Map<String, Value>) {
    let mut args = Vec::new();
    for param in signature
        .params
        .iter()
        .filter(|p| p.kind == ParamKind::PositionalOnly)
    {
        match kwargs.remove(&param.name) {
            Some(value) => args.push(value),
            None => break,
        }
    }
    (args, kwargs)
}

/// A function defined by tool source, invoked in the namespace's interpreter.
#[derive(Debug, Clone)]
pub struct PythonFunction {
    name: String,
    signature: Signature,
    docstring: Option<String>,
    session: Arc<PythonSession>,
}

impl PythonFunction {
    pub(crate) fn new(
        name: String,
        signature: Signature,
        docstring: Option<String>,
        session: Arc<PythonSession>,
    ) -> Self {
        Self {
            name,
            signature,
            docstring,
            session,
        }
    }
}

impl Callable for PythonFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn description(&self) -> Option<&str> {
        self.docstring.as_deref()
    }

    fn invoke(&self, args: Map<String, Value>) -> CallFuture<'_> {
        Box::pin(async move {
            let (positional, kwargs) = bind_positional(&self.signature, args);
            match self.session.call(&self.name, positional, kwargs).await {
                Ok(Reply::Ok(value)) => Ok(value),
                Ok(Reply::Raised(traceback)) => {
                    Err(Error::tool_failed(&self.name, traceback.trim_end()))
                }
                Err(e) => Err(Error::tool_failed(&self.name, e.to_string())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Parameter;
    use serde_json::json;

    #[test]
    fn request_shape() {
        let unit = EvaluationUnit {
            imports: vec!["import math".into()],
            sources: vec!["def f(x):\n    return x".into()],
        };
        let names = vec!["f".to_string()];
        let value = serde_json::to_value(Request::Load {
            unit: &unit,
            names: &names,
        })
        .unwrap();
        assert_eq!(value["op"], "load");
        assert_eq!(value["imports"][0], "import math");
        assert_eq!(value["names"], json!(["f"]));

        let kwargs = json!({"x": 1}).as_object().cloned().unwrap();
        let value = serde_json::to_value(Request::Call {
            name: "f",
            args: vec![json!(2)],
            kwargs,
        })
        .unwrap();
        assert_eq!(value["op"], "call");
        assert_eq!(value["args"], json!([2]));
        assert_eq!(value["kwargs"]["x"], 1);
    }

    #[test]
    fn positional_only_arguments_bind_by_position() {
        let signature = Signature {
            params: vec![
                Parameter::new("a").with_kind(ParamKind::PositionalOnly),
                Parameter::new("b").with_kind(ParamKind::PositionalOnly),
                Parameter::new("c"),
            ],
            returns: None,
        };
        let kwargs = json!({"c": 3, "b": 2, "a": 1}).as_object().cloned().unwrap();
        let (args, rest) = bind_positional(&signature, kwargs);
        assert_eq!(args, vec![json!(1), json!(2)]);
        assert_eq!(rest.keys().collect::<Vec<_>>(), ["c"]);

        // `b` stays a keyword when `a` is missing, so Python reports it.
        let kwargs = json!({"b": 2}).as_object().cloned().unwrap();
        let (args, rest) = bind_positional(&signature, kwargs);
        assert!(args.is_empty());
        assert!(rest.contains_key("b"));
    }

    #[tokio::test]
    async fn missing_interpreter_is_evaluation_error() {
        let err = PythonSession::start(
            PathBuf::from("/nonexistent/python-for-lmvm-tests"),
            EvaluationUnit::default(),
            Vec::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Evaluation(_)));

        let err = check_syntax(Path::new("/nonexistent/python-for-lmvm-tests"), "x = 1\n")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Evaluation(_)));
    }
}
