//! loom-client: host-side plumbing for the conversation engine
//!
//! Configuration, on-disk conversation storage, logging setup, and a
//! facade that wires them to a `loom_engine::Conversation`.

pub mod client;
pub mod config;
pub mod logging;
pub mod store;

pub use client::ChatClient;
pub use config::Config;
pub use store::{ConversationInfo, ConversationStore};
