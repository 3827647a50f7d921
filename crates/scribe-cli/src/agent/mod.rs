//! Autonomous writing agent
//!
//! A single sequential loop: ask the model, run the tools it requests,
//! compress the context when it grows too large, checkpoint along the way.

mod agent_loop;
mod prompt;
mod state;

pub use agent_loop::AgentLoop;
pub use state::{AgentConfig, RunReport};
