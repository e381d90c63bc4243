//! Orchestrator - runs builds and the persistent worker loop.
//!
//! Build lifecycle: Idle -> Opened -> Compiling -> Closed.
//! 1. Open a BuildState for the request
//! 2. Resolve attributes and compile; every failure, panics included, is
//!    recorded on the state instead of propagating
//! 3. Record metadata, outputs and references, then close
//!
//! In persistent mode each BuildRequest received on the channel is answered
//! with exactly one BuildResult before the next message is read.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bridge::channel::MessageChannel;
use crate::bridge::protocol::{Message, MessageType};
use crate::build_state::{BuildRequest, BuildState};
use crate::compiler::{CompileError, Compiler, write_metadata};
use crate::paths::with_extension_path;

pub struct Orchestrator {
    compiler: Arc<dyn Compiler>,
    working_dir: PathBuf,
}

impl Orchestrator {
    /// Relative request paths are resolved against `working_dir`.
    pub fn new(compiler: Arc<dyn Compiler>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            compiler,
            working_dir: working_dir.into(),
        }
    }

    pub fn version(&self) -> u32 {
        self.compiler.version()
    }

    /// Run one build to completion on the calling thread.
    ///
    /// The returned state is not closed; callers decide how to report it.
    pub fn build(&self, request: BuildRequest) -> BuildState {
        run_build(self.compiler.as_ref(), request, &self.working_dir)
    }

    /// Serve requests from `channel` until it closes or `cancel` fires.
    ///
    /// Cancellation abandons a build in progress without replying to it.
    /// Only channel I/O errors are returned.
    pub async fn serve<C>(&self, channel: &mut C, cancel: &CancellationToken) -> io::Result<()>
    where
        C: MessageChannel + ?Sized,
    {
        tracing::info!(
            compiler = self.compiler.name(),
            version = self.version(),
            "Worker serving requests"
        );

        loop {
            let inbound = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!("Cancellation requested, exiting");
                    break;
                }
                inbound = channel.recv() => inbound,
            };

            let envelope = match inbound {
                Some(Ok(envelope)) => envelope,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Channel error");
                    return Err(e);
                }
                None => {
                    tracing::info!("Channel closed (cache gone?), exiting");
                    break;
                }
            };

            let code = envelope.code;
            let payload = (code == MessageType::BuildRequest.code()).then(|| envelope.data.clone());
            match envelope.decode() {
                Ok(Some(Message::VersionQuery)) => {
                    tracing::trace!("Version query");
                    channel.send(Message::version_reply(self.version())).await?;
                }
                Ok(Some(Message::BuildRequest(request))) => {
                    let Some(mut state) = self.build_abandonable(request.over_channel(), cancel).await
                    else {
                        break;
                    };
                    if let Some(result) = state.close() {
                        channel.send(Message::BuildResult(result)).await?;
                    }
                }
                Ok(Some(other)) => {
                    tracing::trace!(message_type = ?other.message_type(), "Ignoring message meant for the cache");
                }
                Ok(None) => {
                    tracing::trace!(code, "Ignoring unrecognized message type");
                }
                Err(e) if e.message_type == MessageType::BuildRequest => {
                    tracing::warn!(error = %e, "Malformed build request, replying with failure");
                    let request = BuildRequest::from_partial(payload.as_ref().unwrap_or(&Value::Null));
                    let mut state = BuildState::open(request.over_channel(), &self.working_dir);
                    state.add_error(e);
                    if let Some(result) = state.close() {
                        channel.send(Message::BuildResult(result)).await?;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding malformed message");
                }
            }
        }

        Ok(())
    }

    /// Run a build on the blocking pool, giving up on it if `cancel` fires.
    async fn build_abandonable(
        &self,
        request: BuildRequest,
        cancel: &CancellationToken,
    ) -> Option<BuildState> {
        let compiler = Arc::clone(&self.compiler);
        let working_dir = self.working_dir.clone();
        let fallback = request.clone();
        let task =
            tokio::task::spawn_blocking(move || run_build(compiler.as_ref(), request, &working_dir));

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::warn!("Cancellation requested during build, abandoning it");
                None
            }
            joined = task => Some(joined.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Build task failed");
                let mut state = BuildState::open(fallback, &self.working_dir);
                state.add_error(format!("build task failed: {e}"));
                state
            })),
        }
    }
}

fn run_build(compiler: &dyn Compiler, request: BuildRequest, working_dir: &Path) -> BuildState {
    let started = Instant::now();
    let generic = request.is_generic();
    let mut state = BuildState::open(request, working_dir);
    tracing::debug!(
        compiler = compiler.name(),
        generic,
        source_path = %state.source_path().display(),
        target_path = %state.target_path().display(),
        platform = state.platform(),
        "Build opened"
    );

    match panic::catch_unwind(AssertUnwindSafe(|| compile(compiler, &mut state))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => state.add_error(e),
        Err(payload) => state.add_error(format!("compiler panicked: {}", panic_message(&*payload))),
    }

    tracing::debug!(
        success = state.success(),
        errors = state.errors().len(),
        outputs = state.outputs().len(),
        references = state.references().len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Build finished"
    );
    state
}

fn compile(compiler: &dyn Compiler, state: &mut BuildState) -> Result<(), CompileError> {
    let attributes = compiler.attributes(state)?;
    let output = compiler.compile(attributes)?;

    if let Some(ext) = compiler.metadata_extension() {
        let path = with_extension_path(state.target_path(), ext);
        write_metadata(&path, &output.metadata)?;
        state.add_output(path);
    }
    for path in &output.outputs {
        state.add_output(path);
    }
    for path in &output.references {
        state.add_reference(path);
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel::FramedChannel;
    use crate::compiler::{CompileOutput, DEFAULT_COMPILER_VERSION};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::mpsc;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};

    /// Compiler with no overrides that declares nothing.
    struct NoOp;

    impl Compiler for NoOp {
        fn name(&self) -> &str {
            "noop"
        }

        fn output_extension(&self) -> &str {
            "out"
        }

        fn attributes(&self, _state: &mut BuildState) -> Result<Value, CompileError> {
            Ok(Value::Null)
        }

        fn compile(&self, _attributes: Value) -> Result<CompileOutput, CompileError> {
            Ok(CompileOutput::default())
        }
    }

    #[derive(Default)]
    struct Scripted {
        version: u32,
        metadata_extension: Option<&'static str>,
        outputs: Vec<PathBuf>,
        references: Vec<PathBuf>,
        recorded_errors: Vec<&'static str>,
        fail_compile: Option<&'static str>,
        panic: bool,
    }

    impl Compiler for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn version(&self) -> u32 {
            self.version
        }

        fn output_extension(&self) -> &str {
            "out"
        }

        fn metadata_extension(&self) -> Option<&str> {
            self.metadata_extension
        }

        fn attributes(&self, state: &mut BuildState) -> Result<Value, CompileError> {
            let source = state.add_reference(state.source_path().to_path_buf());
            for error in &self.recorded_errors {
                state.add_error(error);
            }
            Ok(json!({ "sourcePath": source, "quality": "high" }))
        }

        fn compile(&self, attributes: Value) -> Result<CompileOutput, CompileError> {
            if self.panic {
                panic!("pixel buffer overflow");
            }
            if let Some(message) = self.fail_compile {
                return Err(CompileError::failed(message));
            }
            Ok(CompileOutput {
                metadata: attributes,
                outputs: self.outputs.clone(),
                references: self.references.clone(),
            })
        }
    }

    fn orchestrator(compiler: impl Compiler) -> Orchestrator {
        Orchestrator::new(Arc::new(compiler), "/work")
    }

    fn build_request(source: &str, target: &str) -> Value {
        json!({
            "type": 2,
            "data": { "sourcePath": source, "targetPath": target, "platform": "" }
        })
    }

    /// Feed `messages` to the worker, serve until the channel closes, and
    /// collect every reply.
    async fn exchange(orchestrator: &Orchestrator, messages: &[Value]) -> Vec<Value> {
        exchange_with(orchestrator, messages, &CancellationToken::new()).await
    }

    async fn exchange_with(
        orchestrator: &Orchestrator,
        messages: &[Value],
        cancel: &CancellationToken,
    ) -> Vec<Value> {
        let (mut cache_out, worker_in) = duplex(64 * 1024);
        let (worker_out, cache_in) = duplex(64 * 1024);

        for message in messages {
            cache_out
                .write_all(format!("{message}\n").as_bytes())
                .await
                .unwrap();
        }
        drop(cache_out);

        let mut channel = FramedChannel::new(worker_in, worker_out);
        orchestrator.serve(&mut channel, cancel).await.unwrap();
        drop(channel);

        let mut replies = Vec::new();
        let mut lines = BufReader::new(cache_in).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            replies.push(serde_json::from_str(&line).unwrap());
        }
        replies
    }

    #[tokio::test]
    async fn version_query_defaults_to_one() {
        let replies = exchange(&orchestrator(NoOp), &[json!({"type": 0})]).await;
        assert_eq!(replies, vec![json!({"type": 1, "data": {"version": 1}})]);
        assert_eq!(orchestrator(NoOp).version(), DEFAULT_COMPILER_VERSION);
    }

    #[tokio::test]
    async fn version_query_reports_compiler_version() {
        let compiler = Scripted {
            version: 3,
            ..Default::default()
        };
        let replies = exchange(&orchestrator(compiler), &[json!({"type": 0})]).await;
        assert_eq!(replies, vec![json!({"type": 1, "data": {"version": 3}})]);
    }

    #[tokio::test]
    async fn channel_build_reports_declared_output() {
        let compiler = Scripted {
            outputs: vec![PathBuf::from("tex.texture")],
            ..Default::default()
        };
        let replies = exchange(
            &orchestrator(compiler),
            &[build_request("a/tex.png", "out/tex")],
        )
        .await;

        assert_eq!(
            replies,
            vec![json!({
                "type": 3,
                "data": {
                    "sourcePath": "/work/a/tex.png",
                    "targetPath": "/work/out/tex",
                    "platform": "",
                    "success": true,
                    "errors": [],
                    "outputs": ["/work/out/tex.texture"],
                    "references": ["/work/a/tex.png"]
                }
            })]
        );
    }

    #[tokio::test]
    async fn no_op_compiler_reports_empty_success() {
        let replies = exchange(&orchestrator(NoOp), &[build_request("/a/tex.png", "/out/tex")]).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["data"]["success"], json!(true));
        assert_eq!(replies[0]["data"]["outputs"], json!([]));
        assert_eq!(replies[0]["data"]["references"], json!([]));
    }

    #[tokio::test]
    async fn failed_build_replies_once_and_keeps_serving() {
        let compiler = Scripted {
            recorded_errors: vec!["missing palette", "bad gamma"],
            fail_compile: Some("unsupported format"),
            outputs: vec![PathBuf::from("tex.texture")],
            ..Default::default()
        };
        let replies = exchange(
            &orchestrator(compiler),
            &[build_request("/a/tex.png", "/out/tex"), json!({"type": 0})],
        )
        .await;

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["type"], json!(3));
        assert_eq!(replies[0]["data"]["success"], json!(false));
        assert_eq!(
            replies[0]["data"]["errors"],
            json!(["missing palette", "bad gamma", "unsupported format"])
        );
        assert_eq!(replies[0]["data"]["outputs"], json!([]));
        assert_eq!(replies[0]["data"]["references"], json!(["/a/tex.png"]));
        assert_eq!(replies[1], json!({"type": 1, "data": {"version": 0}}));
    }

    #[tokio::test]
    async fn compiler_panic_becomes_build_error() {
        let compiler = Scripted {
            panic: true,
            ..Default::default()
        };
        let replies = exchange(&orchestrator(compiler), &[build_request("/a/tex.png", "/out/tex")]).await;

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["data"]["success"], json!(false));
        assert_eq!(
            replies[0]["data"]["errors"],
            json!(["compiler panicked: pixel buffer overflow"])
        );
    }

    #[tokio::test]
    async fn results_follow_request_order() {
        let replies = exchange(
            &orchestrator(NoOp),
            &[
                build_request("/a/one.png", "/out/one"),
                build_request("/a/two.png", "/out/two"),
            ],
        )
        .await;

        let sources: Vec<_> = replies.iter().map(|r| r["data"]["sourcePath"].clone()).collect();
        assert_eq!(sources, vec![json!("/a/one.png"), json!("/a/two.png")]);
    }

    #[tokio::test]
    async fn unrecognized_and_cache_bound_messages_are_ignored() {
        let replies = exchange(
            &orchestrator(NoOp),
            &[
                json!({"type": 42, "data": {"future": true}}),
                json!({"type": 1, "data": {"version": 9}}),
                json!({"type": 3, "data": {}}),
                json!({"type": 1, "data": "not a version"}),
                json!({"type": 0}),
            ],
        )
        .await;

        assert_eq!(replies, vec![json!({"type": 1, "data": {"version": 1}})]);
    }

    #[tokio::test]
    async fn malformed_build_request_gets_failed_result() {
        let replies = exchange(
            &orchestrator(NoOp),
            &[
                json!({"type": 2, "data": {"targetPath": "/out/tex"}}),
                json!({"type": 2, "data": {"sourcePath": 7, "targetPath": "/out/tex", "platform": "ps5"}}),
                json!({"type": 0}),
            ],
        )
        .await;

        assert_eq!(replies.len(), 3);
        for reply in &replies[..2] {
            assert_eq!(reply["type"], json!(3));
            assert_eq!(reply["data"]["success"], json!(false));
            assert_eq!(reply["data"]["sourcePath"], json!("/work"));
            assert_eq!(reply["data"]["targetPath"], json!("/out/tex"));
            assert_eq!(reply["data"]["outputs"], json!([]));
            let errors = reply["data"]["errors"].as_array().unwrap();
            assert_eq!(errors.len(), 1);
        }
        assert!(replies[0]["data"]["errors"][0].as_str().unwrap().contains("sourcePath"));
        assert_eq!(replies[1]["data"]["platform"], json!("ps5"));
        assert_eq!(replies[2], json!({"type": 1, "data": {"version": 1}}));
    }

    /// Reads the source file while resolving attributes.
    struct ReadsSource;

    impl Compiler for ReadsSource {
        fn name(&self) -> &str {
            "reads-source"
        }

        fn output_extension(&self) -> &str {
            "out"
        }

        fn attributes(&self, state: &mut BuildState) -> Result<Value, CompileError> {
            let source = state.add_reference(state.source_path().to_path_buf());
            let text = std::fs::read_to_string(&source).map_err(|e| CompileError::read(&source, e))?;
            Ok(json!({ "length": text.len() }))
        }

        fn compile(&self, attributes: Value) -> Result<CompileOutput, CompileError> {
            Ok(CompileOutput {
                metadata: attributes,
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn unreadable_source_gets_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(Arc::new(ReadsSource), dir.path());
        let missing = dir.path().join("missing.json");

        let replies = exchange(
            &orchestrator,
            &[build_request(&missing.to_string_lossy(), "out/tex")],
        )
        .await;

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["type"], json!(3));
        assert_eq!(replies[0]["data"]["success"], json!(false));
        let errors = replies[0]["data"]["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].as_str().unwrap().starts_with("failed to read"));
        assert_eq!(replies[0]["data"]["references"], json!([missing.to_string_lossy()]));
    }

    #[tokio::test]
    async fn metadata_descriptor_is_first_output() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = Scripted {
            metadata_extension: Some("texture"),
            outputs: vec![PathBuf::from("tex"), PathBuf::from("tex.texture")],
            references: vec![PathBuf::from("palette.json")],
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(Arc::new(compiler), dir.path());

        let mut state = orchestrator.build(BuildRequest::new("a/tex.png", "out/tex", ""));
        assert!(state.success(), "errors: {:?}", state.errors());

        let metadata = dir.path().join("out/tex.texture");
        let outputs: Vec<_> = state.outputs().map(Path::to_path_buf).collect();
        assert_eq!(outputs, vec![metadata.clone(), dir.path().join("out/tex")]);

        let references: Vec<_> = state.references().map(Path::to_path_buf).collect();
        assert_eq!(
            references,
            vec![dir.path().join("a/tex.png"), dir.path().join("a/palette.json")]
        );

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&metadata).unwrap()).unwrap();
        assert_eq!(written["quality"], json!("high"));
        assert!(state.close().is_none());
    }

    #[test]
    fn command_line_build_records_errors_without_reply() {
        let compiler = Scripted {
            fail_compile: Some("unsupported format"),
            ..Default::default()
        };
        let mut state = orchestrator(compiler).build(BuildRequest::new("a/tex.png", "out/tex", ""));

        assert!(!state.success());
        assert_eq!(state.errors(), ["unsupported format"]);
        assert!(!state.reply_pending());
        assert!(state.close().is_none());
    }

    #[tokio::test]
    async fn cancelled_worker_stops_reading() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let replies = exchange_with(
            &orchestrator(NoOp),
            &[json!({"type": 0}), build_request("/a/tex.png", "/out/tex")],
            &cancel,
        )
        .await;
        assert!(replies.is_empty());
    }

    /// Blocks inside compile until released.
    struct Blocking {
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Compiler for Blocking {
        fn name(&self) -> &str {
            "blocking"
        }

        fn output_extension(&self) -> &str {
            "out"
        }

        fn attributes(&self, _state: &mut BuildState) -> Result<Value, CompileError> {
            Ok(Value::Null)
        }

        fn compile(&self, _attributes: Value) -> Result<CompileOutput, CompileError> {
            let _ = self.started.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
            Ok(CompileOutput::default())
        }
    }

    #[tokio::test]
    async fn cancellation_abandons_build_in_progress() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let orchestrator = orchestrator(Blocking {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::task::spawn_blocking(move || {
            if started_rx.recv().is_ok() {
                canceller.cancel();
            }
        });

        let replies = exchange_with(
            &orchestrator,
            &[build_request("/a/tex.png", "/out/tex"), json!({"type": 0})],
            &cancel,
        )
        .await;

        assert!(replies.is_empty());
        drop(release_tx);
    }
}
