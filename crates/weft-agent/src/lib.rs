//! The agent loop — the single component that invokes a reasoning model.
//!
//! One handler per agent listener. Each dispatched `AgentTask` runs on
//! its own (engine-spawned) thread; tool calls fan out as envelopes and
//! come back as `ToolResponse` payloads or engine-synthesized errors.
//! Iteration is bounded durably: the count lives in the kernel's thread
//! record, so a crash mid-loop cannot reset the budget.

pub mod inference;
pub mod prompts;
pub mod state;
pub mod translate;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use weft_kernel::segments::ContentType;
use weft_kernel::threads::ThreadId;
use weft_kernel::Kernel;
use weft_organism::AgentSpec;
use weft_pipeline::{
    ErrorPayload, Handler, HandlerContext, Outgoing, Response, ACK_TAG, ERROR_TAG,
};

use inference::{ContentBlock, InferenceClient, ToolSpec};
use state::{AgentState, AgentThread, PendingToolCall, ToolResultBlock};

pub const AGENT_TASK_TAG: &str = "AgentTask";
pub const TOOL_RESPONSE_TAG: &str = "ToolResponse";
pub const AGENT_RESPONSE_TAG: &str = "AgentResponse";

/// A tool the agent may call, bound to the payload tag its listener
/// accepts.
#[derive(Debug, Clone)]
pub struct ToolBinding {
    pub spec: ToolSpec,
    pub payload_tag: String,
}

pub struct AgentHandler {
    name: String,
    client: Arc<dyn InferenceClient>,
    kernel: Arc<Mutex<Kernel>>,
    system_prompt: String,
    tools: Vec<ToolSpec>,
    tool_tags: IndexMap<String, String>,
    spec: AgentSpec,
    threads: StdMutex<HashMap<ThreadId, Arc<Mutex<AgentThread>>>>,
}

impl AgentHandler {
    pub fn new(
        name: &str,
        client: Arc<dyn InferenceClient>,
        kernel: Arc<Mutex<Kernel>>,
        system_prompt: String,
        bindings: Vec<ToolBinding>,
        spec: AgentSpec,
    ) -> Self {
        let mut tools = Vec::with_capacity(bindings.len());
        let mut tool_tags = IndexMap::new();
        for binding in bindings {
            tool_tags.insert(binding.spec.name.clone(), binding.payload_tag);
            tools.push(binding.spec);
        }
        Self {
            name: name.to_string(),
            client,
            kernel,
            system_prompt,
            tools,
            tool_tags,
            spec,
            threads: StdMutex::new(HashMap::new()),
        }
    }

    fn thread_slot(&self, thread_id: &ThreadId) -> Arc<Mutex<AgentThread>> {
        let mut threads = self.threads.lock().expect("agent thread map lock");
        Arc::clone(threads.entry(thread_id.clone()).or_default())
    }

    async fn append_context(&self, thread_id: &ThreadId, content: &[u8], kind: ContentType) {
        let mut kernel = self.kernel.lock().await;
        if let Err(err) = kernel.append_segment(thread_id, content, kind) {
            log::warn!("context append failed for {thread_id}: {err}");
        }
    }

    /// One thinking pass: bounded-iteration inference, then either a
    /// final reply or a tool-call fan-out. Loops only when every call in
    /// a round was unroutable locally (unknown tool name).
    async fn think(&self, ctx: &HandlerContext, thread: &mut AgentThread) -> Response {
        loop {
            // Iteration cap first, durably.
            let iterations = {
                let mut kernel = self.kernel.lock().await;
                let current = kernel
                    .threads()
                    .get(&ctx.thread_id)
                    .map(|r| r.iteration_count)
                    .unwrap_or(0);
                if current >= self.spec.max_iterations {
                    let _ = kernel.fail_thread(&ctx.thread_id, "iteration cap exceeded");
                    thread.state = AgentState::Failed;
                    return Response::Error {
                        kind: "iteration_cap_exceeded".into(),
                        message: format!(
                            "agent '{}' hit its cap of {} iterations",
                            self.name, self.spec.max_iterations
                        ),
                    };
                }
                match kernel.bump_iteration(&ctx.thread_id) {
                    Ok(count) => count,
                    Err(err) => {
                        thread.state = AgentState::Failed;
                        return Response::Error {
                            kind: "unknown_thread".into(),
                            message: err.to_string(),
                        };
                    }
                }
            };
            log::debug!("agent '{}' iteration {iterations} on {}", self.name, ctx.thread_id);

            let completion = match self
                .client
                .complete(
                    &self.spec.model,
                    &self.system_prompt,
                    &thread.messages,
                    &self.tools,
                    self.spec.max_tokens,
                )
                .await
            {
                Ok(completion) => completion,
                Err(err) => {
                    let mut kernel = self.kernel.lock().await;
                    let _ = kernel.fail_thread(&ctx.thread_id, &err.to_string());
                    thread.state = AgentState::Failed;
                    return Response::Error {
                        kind: "inference_error".into(),
                        message: err.to_string(),
                    };
                }
            };

            let tool_uses: Vec<(String, String, serde_json::Value)> = completion
                .blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.clone(), name.clone(), input.clone()))
                    }
                    _ => None,
                })
                .collect();

            if tool_uses.is_empty() {
                // Text-only response: the turn is done.
                let text = completion.text().unwrap_or("").to_string();
                thread.push_assistant(completion.blocks);
                thread.state = AgentState::Done;
                self.append_context(&ctx.thread_id, text.as_bytes(), ContentType::Message)
                    .await;
                {
                    let mut kernel = self.kernel.lock().await;
                    let _ = kernel.return_thread(&ctx.thread_id);
                }
                return Response::Reply {
                    tag: AGENT_RESPONSE_TAG.into(),
                    payload: translate::agent_response_payload(&text),
                };
            }

            thread.push_assistant(completion.blocks);

            let mut pending = Vec::new();
            let mut outgoing = Vec::new();
            let mut immediate_failures = Vec::new();
            for (call_id, tool, input) in tool_uses {
                match self.tool_tags.get(&tool) {
                    Some(tag) => {
                        outgoing.push(Outgoing {
                            target: tool.clone(),
                            tag: tag.clone(),
                            payload: translate::tool_call_payload(&call_id, &input),
                        });
                        pending.push(PendingToolCall {
                            call_id,
                            tool,
                            payload_tag: tag.clone(),
                            input,
                        });
                    }
                    None => immediate_failures.push(ToolResultBlock {
                        call_id,
                        content: format!("unknown tool '{tool}'"),
                        is_error: true,
                    }),
                }
            }

            if outgoing.is_empty() {
                // Every call referenced a tool the agent does not carry;
                // feed the failures back and think again.
                thread.messages.push(inference::ChatMessage::tool_results(
                    immediate_failures
                        .into_iter()
                        .map(|r| ContentBlock::ToolResult {
                            tool_use_id: r.call_id,
                            content: r.content,
                            is_error: true,
                        })
                        .collect(),
                ));
                continue;
            }

            thread.state = AgentState::AwaitingToolResults {
                pending,
                collected: immediate_failures,
            };
            return Response::Broadcast(outgoing);
        }
    }

    async fn on_task(&self, payload: &[u8], ctx: &HandlerContext) -> Response {
        let Some(task) = translate::decode_task(payload) else {
            return Response::Error {
                kind: "malformed_task".into(),
                message: "AgentTask payload is missing a 'task' field".into(),
            };
        };

        self.append_context(&ctx.thread_id, task.as_bytes(), ContentType::Message)
            .await;

        let slot = self.thread_slot(&ctx.thread_id);
        let mut thread = slot.lock().await;
        *thread = AgentThread::new();
        thread.push_user_text(&task);
        self.think(ctx, &mut thread).await
    }

    async fn on_tool_result(&self, result: ToolResultBlock, ctx: &HandlerContext) -> Response {
        self.append_context(&ctx.thread_id, result.content.as_bytes(), ContentType::ToolResult)
            .await;

        let slot = self.thread_slot(&ctx.thread_id);
        let mut thread = slot.lock().await;
        if !matches!(thread.state, AgentState::AwaitingToolResults { .. }) {
            log::warn!(
                "agent '{}' got a stray tool result on {}",
                self.name,
                ctx.thread_id
            );
            return Response::Silence;
        }
        if !thread.record_result(result) {
            return Response::Silence;
        }
        thread.absorb_results();
        self.think(ctx, &mut thread).await
    }

    /// Engine-synthesized acks and errors correlate by original tag; map
    /// them onto the oldest unanswered call with that tag.
    async fn on_engine_notice(&self, payload: &[u8], ctx: &HandlerContext, is_error: bool) -> Response {
        let (tag, content) = if is_error {
            match serde_cbor::from_slice::<ErrorPayload>(payload) {
                Ok(err) => (err.original_tag, format!("{}: {}", err.kind, err.message)),
                Err(_) => return Response::Silence,
            }
        } else {
            match serde_cbor::from_slice::<weft_pipeline::AckPayload>(payload) {
                Ok(ack) => (ack.acknowledged_tag, "acknowledged".to_string()),
                Err(_) => return Response::Silence,
            }
        };

        let slot = self.thread_slot(&ctx.thread_id);
        let mut thread = slot.lock().await;
        let Some(call) = thread.unanswered_call_for_tag(&tag) else {
            return Response::Silence;
        };
        let result = ToolResultBlock {
            call_id: call.call_id.clone(),
            content,
            is_error,
        };
        if !thread.record_result(result) {
            return Response::Silence;
        }
        thread.absorb_results();
        self.think(ctx, &mut thread).await
    }
}

#[async_trait]
impl Handler for AgentHandler {
    async fn handle(&self, payload: &[u8], ctx: HandlerContext) -> Response {
        match ctx.payload_tag.as_str() {
            tag if tag == AGENT_TASK_TAG => self.on_task(payload, &ctx).await,
            TOOL_RESPONSE_TAG => match translate::decode_tool_response(payload) {
                Some(result) => self.on_tool_result(result, &ctx).await,
                None => Response::Error {
                    kind: "malformed_tool_response".into(),
                    message: "ToolResponse payload did not decode".into(),
                },
            },
            ERROR_TAG => self.on_engine_notice(payload, &ctx, true).await,
            ACK_TAG => self.on_engine_notice(payload, &ctx, false).await,
            other => Response::Error {
                kind: "unsupported_tag".into(),
                message: format!("agent '{}' has no handling for tag '{other}'", self.name),
            },
        }
    }
}
