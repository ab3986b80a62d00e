//! Conversation driver: runs one assistant turn on a thread.
//!
//! A turn is: cancel stale runs, post the input, start a run, poll it to a
//! terminal state (answering tool calls along the way), and read the reply.
//! The driver is stateless between turns; everything lives on the thread.

use crate::assistant::client::AssistantClient;
use crate::assistant::types::{MessageRole, Run, RunStatus};
use crate::config::DriverConfig;
use crate::error::{AssistantError, Result};
use crate::tools::{ToolContext, ToolRegistry};
use futures::future::join_all;
use std::sync::Arc;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The run completed and the assistant replied.
    Reply(String),
    /// The run ended in `failed`, `cancelled`, `expired` or `incomplete`.
    Failed(RunStatus),
    /// The poll budget ran out before the run finished.
    TimedOut { polls: u32 },
}

impl TurnOutcome {
    pub fn reply(&self) -> Option<&str> {
        match self {
            TurnOutcome::Reply(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct ConversationDriver {
    client: Arc<dyn AssistantClient>,
    tools: Arc<ToolRegistry>,
    config: DriverConfig,
}

impl ConversationDriver {
    pub fn new(
        client: Arc<dyn AssistantClient>,
        tools: Arc<ToolRegistry>,
        config: DriverConfig,
    ) -> Self {
        Self {
            client,
            tools,
            config,
        }
    }

    pub fn client(&self) -> &Arc<dyn AssistantClient> {
        &self.client
    }

    /// Run one turn. Transport errors propagate; terminal run states and
    /// timeouts are outcomes, not errors.
    pub async fn run_turn(
        &self,
        thread: &str,
        assistant_id: &str,
        input: &str,
        ctx: &ToolContext,
    ) -> Result<TurnOutcome> {
        self.cancel_stale_runs(thread).await;

        self.client.post_message(thread, input).await?;
        let run = self.client.start_run(thread, assistant_id).await?;
        tracing::debug!(thread, run_id = %run.id, assistant_id, "run started");

        let mut polls = 0u32;
        loop {
            let run = self.client.get_run(thread, &run.id).await?;
            match run.status {
                RunStatus::RequiresAction => self.answer_tool_calls(thread, &run, ctx).await?,
                RunStatus::Completed => break,
                status if status.is_terminal() => {
                    tracing::warn!(thread, run_id = %run.id, %status, "run ended without completing");
                    return Ok(TurnOutcome::Failed(status));
                }
                _ => {}
            }

            polls += 1;
            if polls >= self.config.max_polls {
                tracing::warn!(thread, run_id = %run.id, polls, "run did not finish in time");
                return Ok(TurnOutcome::TimedOut { polls });
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }

        self.latest_reply(thread).await.map(TurnOutcome::Reply)
    }

    /// Cancel every run still occupying the thread. Failures are logged;
    /// starting the next run reports any run that is still active.
    async fn cancel_stale_runs(&self, thread: &str) {
        let runs = match self.client.list_runs(thread).await {
            Ok(runs) => runs,
            Err(error) => {
                tracing::warn!(%error, thread, "failed to list runs");
                return;
            }
        };

        for run in runs.iter().filter(|run| run.status.is_active()) {
            match self.client.cancel_run(thread, &run.id).await {
                Ok(()) => {
                    tracing::info!(thread, run_id = %run.id, status = %run.status, "cancelled stale run");
                    tokio::time::sleep(self.config.cancel_settle()).await;
                }
                Err(error) => {
                    tracing::warn!(%error, thread, run_id = %run.id, "failed to cancel stale run");
                }
            }
        }
    }

    /// Run every requested tool and submit all results in one batch.
    async fn answer_tool_calls(&self, thread: &str, run: &Run, ctx: &ToolContext) -> Result<()> {
        if run.required_tool_calls.is_empty() {
            return Ok(());
        }

        let outputs = join_all(
            run.required_tool_calls
                .iter()
                .map(|invocation| self.tools.dispatch(ctx, invocation)),
        )
        .await;

        tracing::debug!(thread, run_id = %run.id, count = outputs.len(), "submitting tool outputs");
        self.client
            .submit_tool_results(thread, &run.id, outputs)
            .await
    }

    /// The newest message on the thread, if it is a non-empty assistant
    /// reply. Older messages belong to earlier turns and are never resent.
    async fn latest_reply(&self, thread: &str) -> Result<String> {
        let messages = self.client.list_messages(thread).await?;
        match messages.into_iter().next() {
            Some(message)
                if message.role == MessageRole::Assistant && !message.text.trim().is_empty() =>
            {
                Ok(message.text)
            }
            _ => Err(AssistantError::NoReply {
                thread_id: thread.to_string(),
            }
            .into()),
        }
    }
}
