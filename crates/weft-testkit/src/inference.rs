//! Scripted inference client.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use weft_agent::inference::{
    ChatMessage, Completion, ContentBlock, InferenceClient, InferenceError, ToolSpec,
};

/// One captured inference call, for assertions.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub model: String,
    pub system: String,
    pub message_count: usize,
}

/// Replays a queue of scripted completions. Once the queue is empty,
/// every further call answers with plain text `"done"`.
pub struct ScriptedInference {
    steps: StdMutex<VecDeque<Result<Completion, String>>>,
    calls: StdMutex<Vec<CapturedCall>>,
}

impl ScriptedInference {
    pub fn new() -> Self {
        Self {
            steps: StdMutex::new(VecDeque::new()),
            calls: StdMutex::new(Vec::new()),
        }
    }

    pub fn then_text(self, text: &str) -> Self {
        self.push(Ok(Completion {
            blocks: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        }));
        self
    }

    /// Queue a tool-calling step: `(call_id, tool_name, json input)`.
    pub fn then_tool_calls(self, calls: &[(&str, &str, serde_json::Value)]) -> Self {
        self.push(Ok(Completion {
            blocks: calls
                .iter()
                .map(|(id, name, input)| ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: input.clone(),
                })
                .collect(),
        }));
        self
    }

    pub fn then_error(self, reason: &str) -> Self {
        self.push(Err(reason.to_string()));
        self
    }

    fn push(&self, step: Result<Completion, String>) {
        self.steps.lock().expect("step lock").push_back(step);
    }

    pub fn calls(&self) -> Vec<CapturedCall> {
        self.calls.lock().expect("call lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("call lock").len()
    }
}

impl Default for ScriptedInference {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn complete(
        &self,
        model: &str,
        system: &str,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
        _max_tokens: u32,
    ) -> Result<Completion, InferenceError> {
        self.calls.lock().expect("call lock").push(CapturedCall {
            model: model.to_string(),
            system: system.to_string(),
            message_count: messages.len(),
        });
        match self.steps.lock().expect("step lock").pop_front() {
            Some(Ok(completion)) => Ok(completion),
            Some(Err(reason)) => Err(InferenceError(reason)),
            None => Ok(Completion {
                blocks: vec![ContentBlock::Text {
                    text: "done".into(),
                }],
            }),
        }
    }
}
