//! Built-in tools for the writing agent

pub mod create_project;
pub mod write_file;

/// `compress_context` takes no arguments and touches nothing on disk;
/// the agent loop performs the compression at its next boundary.
pub mod compress_context {
    use crate::tools::ParameterSchema;

    pub const DESCRIPTION: &str = "Compresses the conversation history into a summary to free context space. \
The system runs this automatically when the token limit is approached; call it only if you want to \
checkpoint progress before starting a large new section.";

    pub const SCHEDULED: &str =
        "Context compression scheduled. The conversation will be summarized before your next turn.";

    pub fn parameters() -> ParameterSchema {
        ParameterSchema::new()
    }
}
