//! The turn orchestration core of sagebot.
//!
//! A turn follows an **Assemble → Invoke → Act → Continue → Stream** cycle:
//!
//! 1. **Assemble** the prompt (policy, retrieved context, history, page, query)
//! 2. **Invoke** the model once with the action declarations attached
//! 3. **Act**: if the model asked for an action, execute it
//! 4. **Continue**: append the request and its result to the prompt
//! 5. **Stream** the final answer to the caller
//!
//! Model calls are retried on "service unavailable" only, and the whole
//! turn runs under a deadline.

pub mod context;
pub mod continuation;
pub mod engine;
pub mod executor;
pub mod invoker;
#[cfg(any(test, feature = "test-util"))]
pub mod recording;
pub mod relay;
pub mod retry;

#[cfg(test)]
mod test_helpers;

pub use context::{ContextAssembler, ContextInput, render_history};
pub use continuation::build_followup;
pub use engine::{TurnEngine, TurnOutcome, TurnRequest};
pub use executor::{ActionExecutor, parse_arguments};
pub use invoker::ModelInvoker;
#[cfg(any(test, feature = "test-util"))]
pub use recording::{RecordingSink, SinkEvent};
pub use relay::{SinkClosed, StreamRelay, StreamSink};
pub use retry::{RetryDecision, RetryPolicy};
