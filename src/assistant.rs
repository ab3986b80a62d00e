//! Hosted assistant conversations: client interface, HTTP client, driver.

pub mod client;
pub mod driver;
pub mod openai;
pub mod types;

pub use client::AssistantClient;
pub use driver::{ConversationDriver, TurnOutcome};
pub use openai::OpenAiAssistantClient;
pub use types::{Run, RunStatus, ThreadMessage, ThreadRef, ToolInvocation, ToolOutput};
