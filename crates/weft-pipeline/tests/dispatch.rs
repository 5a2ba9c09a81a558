//! Dispatch engine behavior: stage rejections, acknowledged silence,
//! reply delivery, deadlines.

use std::time::Duration;

use tempfile::TempDir;
use weft_pipeline::{
    Delivery, Envelope, Pipeline, PipelineConfig, PipelineError, RejectKind, Response,
};
use weft_testkit::handlers::{Recorded, RecordingHandler, ScriptedTool, StalledTool};
use weft_testkit::{mem_kernel, organisms, schemas_builder, tool_response_payload};

const WAIT: Duration = Duration::from_secs(5);

async fn pipeline_with_sink(
    dir: &TempDir,
    config: PipelineConfig,
) -> (Pipeline, tokio::sync::mpsc::UnboundedReceiver<Recorded>) {
    let organism = organisms::tool_calling();
    let (agent_stub, agent_rx) = RecordingHandler::silent();
    drop(agent_rx);
    let (sink, sink_rx) = RecordingHandler::silent();
    let pipeline = schemas_builder(organism)
        .config(config)
        .register("file-read", ScriptedTool::replying("file contents"))
        .unwrap()
        .register("file-write", ScriptedTool::replying("written"))
        .unwrap()
        .register("file-erase", ScriptedTool::replying("erased"))
        .unwrap()
        .register("command-exec", ScriptedTool::replying("ran"))
        .unwrap()
        .register("coding-agent", agent_stub)
        .unwrap()
        .register("response-sink", sink)
        .unwrap()
        .build(mem_kernel(dir.path()))
        .unwrap();
    pipeline.init_root("coding").await.unwrap();
    (pipeline, sink_rx)
}

fn read_request(profile: &str) -> Envelope {
    let root = weft_kernel::threads::ThreadId::root();
    let payload = weft_pipeline::encode_record([
        ("path", serde_cbor::Value::Text("/tmp/demo".into())),
        ("call_id", serde_cbor::Value::Text("c1".into())),
    ]);
    Envelope::build("weft:test", "FileReadRequest", payload, "console", root, profile).unwrap()
}

#[tokio::test]
async fn reply_reaches_the_awaiter_validated() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _sink) = pipeline_with_sink(&dir, PipelineConfig::default()).await;

    let envelope = read_request("coding");
    let delivery = pipeline.submit_and_wait(envelope, WAIT).await.unwrap();
    match delivery {
        Delivery::Reply { tag, payload } => {
            assert_eq!(tag, "ToolResponse");
            assert_eq!(payload, tool_response_payload("c1", "file contents", false));
        }
        other => panic!("expected a reply, got {other:?}"),
    }
    pipeline.shutdown().await;
}

#[tokio::test]
async fn silence_is_acknowledged_exactly_once() {
    let dir = TempDir::new().unwrap();
    let organism = organisms::tool_calling();
    let (agent_stub, _agent_rx) = RecordingHandler::silent();
    let (sink, _sink_rx) = RecordingHandler::silent();
    let (silent_tool, _tool_rx) = RecordingHandler::silent();
    let pipeline = schemas_builder(organism)
        .register("file-read", silent_tool)
        .unwrap()
        .register("file-write", ScriptedTool::replying("w"))
        .unwrap()
        .register("file-erase", ScriptedTool::replying("e"))
        .unwrap()
        .register("command-exec", ScriptedTool::replying("x"))
        .unwrap()
        .register("coding-agent", agent_stub)
        .unwrap()
        .register("response-sink", sink)
        .unwrap()
        .build(mem_kernel(dir.path()))
        .unwrap();
    pipeline.init_root("coding").await.unwrap();

    let envelope = read_request("coding");
    let delivery = pipeline.submit_and_wait(envelope, WAIT).await.unwrap();
    assert_eq!(delivery, Delivery::Ack);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn schema_violation_rejected_before_any_handler() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _sink) = pipeline_with_sink(&dir, PipelineConfig::default()).await;

    // `path` is required by the FileReadRequest schema.
    let bad_payload = weft_pipeline::encode_record([(
        "nonsense",
        serde_cbor::Value::Text("x".into()),
    )]);
    let envelope = Envelope::build(
        "weft:test",
        "FileReadRequest",
        bad_payload,
        "console",
        weft_kernel::threads::ThreadId::root(),
        "coding",
    )
    .unwrap();

    let delivery = pipeline.submit_and_wait(envelope, WAIT).await.unwrap();
    match delivery {
        Delivery::Error { kind, .. } => assert_eq!(kind, RejectKind::SchemaViolation),
        other => panic!("expected schema violation, got {other:?}"),
    }
    pipeline.shutdown().await;
}

#[tokio::test]
async fn unknown_thread_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _sink) = pipeline_with_sink(&dir, PipelineConfig::default()).await;

    let mut envelope = read_request("coding");
    envelope.thread_id = weft_kernel::threads::ThreadId::parse("root.ghost").unwrap();
    let delivery = pipeline.submit_and_wait(envelope, WAIT).await.unwrap();
    match delivery {
        Delivery::Error { kind, .. } => assert_eq!(kind, RejectKind::UnknownThread),
        other => panic!("expected unknown thread, got {other:?}"),
    }
    pipeline.shutdown().await;
}

#[tokio::test]
async fn unknown_profile_is_rejected_at_submit() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _sink) = pipeline_with_sink(&dir, PipelineConfig::default()).await;

    let envelope = read_request("ghost-profile");
    let err = pipeline.submit(envelope).unwrap_err();
    assert!(matches!(err, PipelineError::UnknownProfile(_)));
    pipeline.shutdown().await;
}

#[tokio::test]
async fn oversized_payload_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig {
        max_payload_bytes: 64,
        ..Default::default()
    };
    let (pipeline, _sink) = pipeline_with_sink(&dir, config).await;

    let mut envelope = read_request("coding");
    envelope.payload = vec![0u8; 1024];
    let err = pipeline.submit(envelope).unwrap_err();
    assert!(matches!(err, PipelineError::PayloadTooLarge { .. }));
    pipeline.shutdown().await;
}

#[tokio::test]
async fn malformed_envelope_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _sink) = pipeline_with_sink(&dir, PipelineConfig::default()).await;

    let mut envelope = read_request("coding");
    envelope.sender = String::new();
    let err = pipeline.submit(envelope).unwrap_err();
    assert!(matches!(err, PipelineError::Malformed(_)));
    pipeline.shutdown().await;
}

#[tokio::test]
async fn stalled_handler_times_out() {
    let dir = TempDir::new().unwrap();
    let organism = organisms::tool_calling();
    let (agent_stub, _agent_rx) = RecordingHandler::silent();
    let (sink, _sink_rx) = RecordingHandler::silent();
    let config = PipelineConfig {
        handler_deadline: Duration::from_millis(50),
        ..Default::default()
    };
    let pipeline = schemas_builder(organism)
        .config(config)
        .register("file-read", StalledTool)
        .unwrap()
        .register("file-write", ScriptedTool::replying("w"))
        .unwrap()
        .register("file-erase", ScriptedTool::replying("e"))
        .unwrap()
        .register("command-exec", ScriptedTool::replying("x"))
        .unwrap()
        .register("coding-agent", agent_stub)
        .unwrap()
        .register("response-sink", sink)
        .unwrap()
        .build(mem_kernel(dir.path()))
        .unwrap();
    pipeline.init_root("coding").await.unwrap();

    let envelope = read_request("coding");
    let delivery = pipeline.submit_and_wait(envelope, WAIT).await.unwrap();
    match delivery {
        Delivery::Error { kind, .. } => assert_eq!(kind, RejectKind::Timeout),
        other => panic!("expected timeout, got {other:?}"),
    }
    pipeline.shutdown().await;
}

#[tokio::test]
async fn handler_error_surfaces_structured() {
    let dir = TempDir::new().unwrap();
    let organism = organisms::tool_calling();
    let (agent_stub, _agent_rx) = RecordingHandler::silent();
    let (sink, _sink_rx) = RecordingHandler::silent();
    let (failing, _rx) = RecordingHandler::replying(Response::Error {
        kind: "io_error".into(),
        message: "disk on fire".into(),
    });
    let pipeline = schemas_builder(organism)
        .register("file-read", failing)
        .unwrap()
        .register("file-write", ScriptedTool::replying("w"))
        .unwrap()
        .register("file-erase", ScriptedTool::replying("e"))
        .unwrap()
        .register("command-exec", ScriptedTool::replying("x"))
        .unwrap()
        .register("coding-agent", agent_stub)
        .unwrap()
        .register("response-sink", sink)
        .unwrap()
        .build(mem_kernel(dir.path()))
        .unwrap();
    pipeline.init_root("coding").await.unwrap();

    let envelope = read_request("coding");
    let delivery = pipeline.submit_and_wait(envelope, WAIT).await.unwrap();
    match delivery {
        Delivery::Error { kind, message } => {
            assert_eq!(kind, RejectKind::HandlerError);
            assert!(message.contains("disk on fire"));
        }
        other => panic!("expected handler error, got {other:?}"),
    }
    pipeline.shutdown().await;
}
