//! External producer bridge.
//!
//! LLM suggestion and embedding calls run in a subprocess speaking a
//! JSON-lines protocol over stdin/stdout:
//!
//! ```text
//! bridge → {"type":"ready"}
//! folio  → {"type":"request","id":"req-1","task":{"kind":"suggest_heading_changes",...}}
//! bridge → {"type":"result","id":"req-1","text":"..."}
//!        | {"type":"embeddings","id":"req-1","vectors":[[...],...]}
//!        | {"type":"error","id":"req-1","error":"..."}
//! folio  → {"type":"shutdown"}
//! ```

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use tracing::{debug, info, instrument, warn};

use folio_shared::{BridgeConfig, FolioError, Result, expand_home};

use crate::vectorize::Embedder;

/// Producers of LLM-generated text consumed by the pipeline.
///
/// Replies are never trusted: callers re-validate them before writing.
pub trait SuggestionProducer {
    /// Titles document (one heading per line) for the given markdown.
    fn extract_titles(&mut self, markdown: &str) -> Result<String>;

    /// Heading-change directive document (keyword dialect) for a titles listing.
    fn suggest_heading_changes(&mut self, titles: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// A unit of work for the bridge.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeTask {
    ExtractTitles { markdown: String, model: String },
    SuggestHeadingChanges { titles: String, model: String },
    Embed { texts: Vec<String> },
}

impl BridgeTask {
    fn name(&self) -> &'static str {
        match self {
            Self::ExtractTitles { .. } => "extract_titles",
            Self::SuggestHeadingChanges { .. } => "suggest_heading_changes",
            Self::Embed { .. } => "embed",
        }
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage {
    Request { id: String, task: BridgeTask },
    Shutdown,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result {
        id: String,
        text: String,
    },
    Embeddings {
        id: String,
        vectors: Vec<Vec<f32>>,
    },
    Error {
        #[allow(dead_code)]
        id: String,
        error: String,
    },
}

/// Successful reply payload.
#[derive(Debug)]
enum Reply {
    Text(String),
    Vectors(Vec<Vec<f32>>),
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

/// Handle to the spawned bridge subprocess.
pub struct BridgeHandle {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
    model: String,
}

impl BridgeHandle {
    /// Spawn `<command> run <script>` and wait for its ready message.
    pub fn spawn(config: &BridgeConfig) -> Result<Self> {
        info!(cmd = %config.command, script = %config.script, "spawning bridge");

        let working_dir = match &config.working_dir {
            Some(dir) => expand_home(dir)?,
            None => std::env::current_dir().map_err(|e| FolioError::io(PathBuf::from("."), e))?,
        };

        let mut child = Command::new(&config.command)
            .arg("run")
            .arg(&config.script)
            .current_dir(&working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Bridge logs go to parent stderr
            .spawn()
            .map_err(|e| {
                FolioError::Bridge(format!(
                    "failed to spawn bridge: {e}. Is `{}` installed?",
                    config.command
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FolioError::Bridge("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FolioError::Bridge("failed to capture bridge stdout".into()))?;

        let mut handle = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            request_counter: 0,
            model: config.model.clone(),
        };
        handle.wait_for_ready()?;
        Ok(handle)
    }

    fn read_message(&mut self) -> Result<ResponseMessage> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| FolioError::Bridge(format!("bridge read error: {e}")))?;

        if line.is_empty() {
            return Err(FolioError::Bridge("bridge closed stdout unexpectedly".into()));
        }

        parse_response(&line)
    }

    fn wait_for_ready(&mut self) -> Result<()> {
        match self.read_message()? {
            ResponseMessage::Ready => {
                info!("bridge is ready");
                Ok(())
            }
            other => Err(FolioError::Bridge(format!(
                "expected ready message, got {other:?}"
            ))),
        }
    }

    #[instrument(skip_all, fields(task = task.name()))]
    fn send_task(&mut self, task: BridgeTask) -> Result<Reply> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);

        let json = serde_json::to_string(&RequestMessage::Request {
            id: id.clone(),
            task,
        })
        .map_err(|e| FolioError::Bridge(format!("failed to serialize request: {e}")))?;

        writeln!(self.stdin, "{json}")
            .map_err(|e| FolioError::Bridge(format!("failed to write to bridge stdin: {e}")))?;
        self.stdin
            .flush()
            .map_err(|e| FolioError::Bridge(format!("failed to flush bridge stdin: {e}")))?;

        let reply = match self.read_message()? {
            ResponseMessage::Result { id: resp_id, text } => {
                check_id(&id, &resp_id)?;
                Reply::Text(text)
            }
            ResponseMessage::Embeddings {
                id: resp_id,
                vectors,
            } => {
                check_id(&id, &resp_id)?;
                Reply::Vectors(vectors)
            }
            ResponseMessage::Error { error, .. } => return Err(FolioError::Bridge(error)),
            ResponseMessage::Ready => {
                return Err(FolioError::Bridge(
                    "unexpected ready message during request".into(),
                ));
            }
        };
        debug!(%id, "bridge replied");
        Ok(reply)
    }

    fn send_text_task(&mut self, task: BridgeTask) -> Result<String> {
        match self.send_task(task)? {
            Reply::Text(text) => Ok(text),
            Reply::Vectors(_) => Err(FolioError::Bridge(
                "expected a text result, got embeddings".into(),
            )),
        }
    }

    /// Send shutdown and wait for the bridge to exit.
    pub fn shutdown(mut self) -> Result<()> {
        match serde_json::to_string(&RequestMessage::Shutdown) {
            Ok(json) => {
                let _ = writeln!(self.stdin, "{json}");
                let _ = self.stdin.flush();
            }
            Err(e) => warn!("failed to serialize shutdown: {e}"),
        }

        match self.child.wait() {
            Ok(status) => info!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
        Ok(())
    }
}

impl SuggestionProducer for BridgeHandle {
    fn extract_titles(&mut self, markdown: &str) -> Result<String> {
        let model = self.model.clone();
        self.send_text_task(BridgeTask::ExtractTitles {
            markdown: markdown.to_string(),
            model,
        })
    }

    fn suggest_heading_changes(&mut self, titles: &str) -> Result<String> {
        let model = self.model.clone();
        self.send_text_task(BridgeTask::SuggestHeadingChanges {
            titles: titles.to_string(),
            model,
        })
    }
}

impl Embedder for BridgeHandle {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let reply = self
            .send_task(BridgeTask::Embed {
                texts: texts.to_vec(),
            })
            .map_err(|e| FolioError::Embedding(e.to_string()))?;
        match reply {
            Reply::Vectors(vectors) => Ok(vectors),
            Reply::Text(_) => Err(FolioError::Embedding(
                "expected embeddings, got a text result".into(),
            )),
        }
    }
}

fn parse_response(line: &str) -> Result<ResponseMessage> {
    serde_json::from_str(line.trim()).map_err(|e| {
        let preview: String = line.chars().take(200).collect();
        FolioError::Bridge(format!("invalid bridge response: {e} (got: {preview})"))
    })
}

fn check_id(expected: &str, got: &str) -> Result<()> {
    if expected != got {
        return Err(FolioError::Bridge(format!(
            "response id {got} does not match request {expected}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_message_serializes_correctly() {
        let msg = RequestMessage::Request {
            id: "req-1".into(),
            task: BridgeTask::SuggestHeadingChanges {
                titles: "3: ## One".into(),
                model: "m".into(),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"request""#));
        assert!(json.contains(r#""id":"req-1""#));
        assert!(json.contains(r#""kind":"suggest_heading_changes""#));
        assert!(json.contains(r#""titles":"3: ## One""#));
    }

    #[test]
    fn embed_task_has_no_model() {
        let task = BridgeTask::Embed {
            texts: vec!["a".into(), "b".into()],
        };
        let json = serde_json::to_string(&task).unwrap();
        assert_eq!(json, r#"{"kind":"embed","texts":["a","b"]}"#);
        assert_eq!(task.name(), "embed");
    }

    #[test]
    fn shutdown_message_serializes_correctly() {
        let json = serde_json::to_string(&RequestMessage::Shutdown).unwrap();
        assert_eq!(json, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn response_message_deserializes_ready() {
        let msg = parse_response("{\"type\":\"ready\"}\n").unwrap();
        assert!(matches!(msg, ResponseMessage::Ready));
    }

    #[test]
    fn response_message_deserializes_result() {
        let msg = parse_response(r#"{"type":"result","id":"req-1","text":"```\n3: H2\n```"}"#).unwrap();
        match msg {
            ResponseMessage::Result { id, text } => {
                assert_eq!(id, "req-1");
                assert!(text.contains("3: H2"));
            }
            other => panic!("expected Result, got {other:?}"),
        }
    }

    #[test]
    fn response_message_deserializes_embeddings() {
        let msg =
            parse_response(r#"{"type":"embeddings","id":"req-4","vectors":[[0.5,1.0],[2.0,-1.5]]}"#)
                .unwrap();
        match msg {
            ResponseMessage::Embeddings { id, vectors } => {
                assert_eq!(id, "req-4");
                assert_eq!(vectors, vec![vec![0.5, 1.0], vec![2.0, -1.5]]);
            }
            other => panic!("expected Embeddings, got {other:?}"),
        }
    }

    #[test]
    fn response_message_deserializes_error() {
        let msg = parse_response(r#"{"type":"error","id":"req-2","error":"rate limited"}"#).unwrap();
        match msg {
            ResponseMessage::Error { id, error } => {
                assert_eq!(id, "req-2");
                assert_eq!(error, "rate limited");
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn garbage_response_is_bridge_error() {
        let err = parse_response("not json").unwrap_err();
        assert!(matches!(err, FolioError::Bridge(_)));
        assert!(err.to_string().contains("not json"));
    }

    #[test]
    fn mismatched_ids_are_rejected() {
        assert!(check_id("req-1", "req-1").is_ok());
        assert!(check_id("req-1", "req-2").is_err());
    }

    #[test]
    fn spawn_failure_names_command() {
        let config = BridgeConfig {
            command: "folio-test-no-such-runtime".into(),
            ..BridgeConfig::default()
        };
        let err = BridgeHandle::spawn(&config).err().expect("spawn should fail");
        assert!(err.to_string().contains("folio-test-no-such-runtime"));
    }
}
