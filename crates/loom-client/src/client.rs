//! High-level client facade
//!
//! Ties the pieces together for a host application: configuration,
//! conversation storage, and the engine itself.

use crate::config::Config;
use crate::store::{ConversationInfo, ConversationStore};
use loom_engine::{
    Backend, Conversation, EngineConfig, EngineEvent, EngineHandle, QueryOptions, RenderDelegate,
    SendRequest,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// A configured conversation plus its persistence
pub struct ChatClient {
    conversation: Conversation,
    store: Arc<ConversationStore>,
}

impl ChatClient {
    /// Create a client from configuration
    pub fn new(
        config: &Config,
        backend: Arc<dyn Backend>,
        render: Arc<dyn RenderDelegate>,
    ) -> anyhow::Result<Self> {
        let store = match &config.data_dir {
            Some(dir) => ConversationStore::open(dir.clone())?,
            None => ConversationStore::open_default()?,
        };
        let store = Arc::new(store);

        let engine_config = EngineConfig {
            options: QueryOptions {
                allowed_tools: config.allowed_tools.clone(),
                model: config.model.clone(),
                context_paths: config.context_paths.clone(),
                ..Default::default()
            },
            ..Default::default()
        };

        let mut conversation = Conversation::new(engine_config, backend, render);
        conversation.set_sink(store.clone());

        Ok(Self {
            conversation,
            store,
        })
    }

    /// Send a message, or queue it if a turn is in flight
    pub async fn send(&mut self, request: SendRequest) -> loom_engine::Result<()> {
        self.conversation.send(request).await
    }

    /// Cooperatively cancel the in-flight turn
    pub fn interrupt(&self) {
        self.conversation.handle().interrupt();
    }

    /// Subscribe to engine lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.conversation.subscribe()
    }

    /// A cloneable handle usable from other tasks
    pub fn handle(&self) -> EngineHandle {
        self.conversation.handle()
    }

    /// Resume a stored conversation, invalidating any in-flight stream
    pub async fn resume(&mut self, id: &str) -> anyhow::Result<()> {
        let snapshot = self.store.load(id)?;
        self.conversation.reset(snapshot).await;
        Ok(())
    }

    /// Start a fresh conversation
    pub async fn new_conversation(&mut self) {
        self.conversation
            .reset(loom_protocol::ConversationSnapshot::new())
            .await;
    }

    /// List stored conversations, newest first
    pub fn list_conversations(&self) -> std::io::Result<Vec<ConversationInfo>> {
        self.store.list()
    }

    /// Delete a stored conversation
    pub fn delete_conversation(&self, id: &str) -> std::io::Result<()> {
        self.store.delete(id)
    }

    /// Direct access to the underlying conversation
    pub fn conversation(&mut self) -> &mut Conversation {
        &mut self.conversation
    }
}
