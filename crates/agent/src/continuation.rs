//! The follow-up prompt that hands an action result back to the model.
//!
//! [`build_followup`] is the only place a follow-up is put together. It
//! goes through [`Prompt::append_exchange`], so the model's action request
//! is always immediately followed by its result.

use sagebot_core::action::{ActionRequest, ActionResult};
use sagebot_core::turn::{ActionResponse, Prompt};

/// `original` plus the model's request (verbatim) and its result.
pub fn build_followup(original: &Prompt, request: &ActionRequest, result: &ActionResult) -> Prompt {
    let mut followup = original.clone();
    followup.append_exchange(request.clone(), ActionResponse::from_result(result));
    followup
}
