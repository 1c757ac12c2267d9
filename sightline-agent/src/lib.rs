//! Model-driven test execution for Sightline.
//!
//! A [`TestDefinition`] is either run live by the [`Orchestrator`], which lets
//! the model drive the session through the tools in [`tools`] until it
//! returns a [`Verdict`], or replayed from a cached trace with [`replay()`].
//! Both paths execute actions through the same [`Adapter`].
pub mod adapter;
pub mod definition;
pub mod error;
pub mod github;
pub mod mailosaur;
pub mod orchestrator;
pub mod replay;
pub mod tools;

pub use adapter::{Adapter, Integrations, ToolOutcome, ToolOutput};
pub use definition::{
    assert_equal, callback, AssertionFailed, Callback, Expectation, TestContext, TestDefinition,
};
pub use error::AgentError;
pub use orchestrator::{Orchestrator, RunOutcome, Verdict};
pub use replay::{replay, ReplayOutcome, REPLAY_PASS_REASON};
pub use tools::ToolCall;
