//! Conversation turns and the prompt they form.
//!
//! A [`Prompt`] is the ordered list of turns sent to the model. Its contents
//! can only grow through a handful of methods, and an action result can only
//! enter paired with the action request it answers, so a prompt is never
//! sent with a result that lacks its preceding request.

use serde::{Deserialize, Serialize};

use crate::action::{ActionRequest, ActionResult};

/// The response half of an action exchange, as the model sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub name: String,
    pub response: serde_json::Value,
}

impl ActionResponse {
    /// `{"result": payload}` on success, `{"result": {"error": message}}` on failure.
    pub fn from_result(result: &ActionResult) -> Self {
        let inner = if result.succeeded {
            result.payload.clone()
        } else {
            serde_json::json!({
                "error": result.error_message.as_deref().unwrap_or("action failed"),
            })
        };
        Self {
            name: result.name.clone(),
            response: serde_json::json!({ "result": inner }),
        }
    }
}

/// One turn of a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationTurn {
    User { text: String },
    Model { text: String },
    ModelAction(ActionRequest),
    ActionResult(ActionResponse),
}

impl ConversationTurn {
    pub fn is_action_result(&self) -> bool {
        matches!(self, Self::ActionResult(_))
    }
}

/// Ordered turns sent to the model for one generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Prompt {
    turns: Vec<ConversationTurn>,
}

impl Prompt {
    /// A prompt holding a single user turn.
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            turns: vec![ConversationTurn::User {
                text: user_text.into(),
            }],
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(ConversationTurn::User { text: text.into() });
    }

    pub fn push_model_text(&mut self, text: impl Into<String>) {
        self.turns.push(ConversationTurn::Model { text: text.into() });
    }

    /// Append a model action request immediately followed by its result.
    pub fn append_exchange(&mut self, request: ActionRequest, response: ActionResponse) {
        self.turns.push(ConversationTurn::ModelAction(request));
        self.turns.push(ConversationTurn::ActionResult(response));
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Whether every action result is directly preceded by an action request.
    pub fn is_well_ordered(&self) -> bool {
        self.turns.iter().enumerate().all(|(i, turn)| {
            !turn.is_action_result()
                || (i > 0 && matches!(self.turns[i - 1], ConversationTurn::ModelAction(_)))
        })
    }
}
