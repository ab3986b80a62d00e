//! Assistant service client interface.

use crate::assistant::types::{Run, ThreadMessage, ThreadRef, ToolOutput};
use crate::error::Result;
use async_trait::async_trait;

/// Operations the conversation driver needs from the hosted assistant
/// service. Threads and runs live on the service; the client holds no
/// per-conversation state.
#[async_trait]
pub trait AssistantClient: Send + Sync {
    async fn create_thread(&self) -> Result<ThreadRef>;

    async fn list_runs(&self, thread: &str) -> Result<Vec<Run>>;

    async fn cancel_run(&self, thread: &str, run_id: &str) -> Result<()>;

    /// Append a user message to the thread.
    async fn post_message(&self, thread: &str, text: &str) -> Result<()>;

    async fn start_run(&self, thread: &str, assistant_id: &str) -> Result<Run>;

    async fn get_run(&self, thread: &str, run_id: &str) -> Result<Run>;

    async fn submit_tool_results(
        &self,
        thread: &str,
        run_id: &str,
        results: Vec<ToolOutput>,
    ) -> Result<()>;

    /// Messages on the thread, most recent first.
    async fn list_messages(&self, thread: &str) -> Result<Vec<ThreadMessage>>;
}
