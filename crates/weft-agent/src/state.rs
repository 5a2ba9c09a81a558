//! Per-thread agent state.
//!
//! AwaitingTask → Thinking → AwaitingToolResults → Thinking → … until a
//! text-only response (Done) or a failure (Failed). Done and Failed are
//! absorbing; the thread table mirrors them durably.

use crate::inference::{ChatMessage, ContentBlock};

#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    pub call_id: String,
    pub tool: String,
    pub payload_tag: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultBlock {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, PartialEq)]
pub enum AgentState {
    AwaitingTask,
    AwaitingToolResults {
        pending: Vec<PendingToolCall>,
        collected: Vec<ToolResultBlock>,
    },
    Done,
    Failed,
}

#[derive(Debug)]
pub struct AgentThread {
    pub messages: Vec<ChatMessage>,
    pub state: AgentState,
}

impl Default for AgentThread {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            state: AgentState::AwaitingTask,
        }
    }
}

impl AgentThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user_text(&mut self, text: &str) {
        self.messages.push(ChatMessage::user_text(text));
    }

    pub fn push_assistant(&mut self, blocks: Vec<ContentBlock>) {
        self.messages.push(ChatMessage::assistant(blocks));
    }

    /// Record one tool result. Returns true when every pending call has
    /// now produced a result (success or error).
    pub fn record_result(&mut self, result: ToolResultBlock) -> bool {
        match &mut self.state {
            AgentState::AwaitingToolResults { pending, collected } => {
                if pending.iter().any(|p| p.call_id == result.call_id)
                    && !collected.iter().any(|c| c.call_id == result.call_id)
                {
                    collected.push(result);
                }
                collected.len() >= pending.len()
            }
            _ => false,
        }
    }

    /// Match an engine ack/error (which carries only the original tag)
    /// to the oldest still-unanswered call with that tag.
    pub fn unanswered_call_for_tag(&self, tag: &str) -> Option<&PendingToolCall> {
        match &self.state {
            AgentState::AwaitingToolResults { pending, collected } => pending
                .iter()
                .find(|p| p.payload_tag == tag && !collected.iter().any(|c| c.call_id == p.call_id)),
            _ => None,
        }
    }

    /// Fold the collected results into the conversation and return to a
    /// thinking-ready state.
    pub fn absorb_results(&mut self) {
        if let AgentState::AwaitingToolResults { collected, .. } = &mut self.state {
            let blocks = collected
                .drain(..)
                .map(|r| ContentBlock::ToolResult {
                    tool_use_id: r.call_id,
                    content: r.content,
                    is_error: r.is_error,
                })
                .collect();
            self.messages.push(ChatMessage::tool_results(blocks));
            self.state = AgentState::AwaitingTask;
        }
    }
}
