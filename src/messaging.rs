//! Outbound WhatsApp messaging: channel trait, gateway client, dispatch sink.

pub mod dispatch;
pub mod evolution;
pub mod traits;

pub use dispatch::DispatchSink;
pub use evolution::EvolutionGateway;
pub use traits::{OutboundChannel, OutboundChannelDyn, OutboundMedia};
