//! HTTP surface: the gateway webhook and a health probe.

mod server;
mod webhook;

pub use server::{ApiState, router, start_http_server};

#[cfg(test)]
pub(crate) use webhook::testing;
