use std::sync::Arc;

use crate::config::Config;
use crate::db::connection::DbPool;
use crate::realtime::registry::{ConnectionRegistry, InProcessRegistry};
use crate::realtime::relay::SignalingRelay;
use crate::repositories::{
    AnalyticsRepository, ConsentRepository, FileRepository, MessageRepository,
    SessionEventRepository, SessionRepository,
};
use crate::services::{AnalyticsService, ChatService, ConsentService, SessionService};
use crate::utils::crypto::ChannelCrypto;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Config,
    /// Process-local registry of live connections; injectable so a
    /// distributed backing can replace it without touching the services.
    pub registry: Arc<dyn ConnectionRegistry>,
    pub crypto: Arc<ChannelCrypto>,
}

impl AppState {
    pub fn new(pool: DbPool, config: Config) -> Self {
        let crypto = Arc::new(ChannelCrypto::new(config.encryption_key));
        Self {
            pool,
            config,
            registry: Arc::new(InProcessRegistry::new()),
            crypto,
        }
    }

    pub fn consent_service(&self) -> ConsentService {
        ConsentService::new(
            self.pool.clone(),
            Arc::new(SessionRepository::new()),
            Arc::new(ConsentRepository::new()),
        )
    }

    pub fn analytics_service(&self) -> AnalyticsService {
        AnalyticsService::new(
            self.pool.clone(),
            Arc::new(SessionRepository::new()),
            Arc::new(SessionEventRepository::new()),
            Arc::new(MessageRepository::new()),
            Arc::new(FileRepository::new()),
            Arc::new(AnalyticsRepository::new()),
        )
    }

    pub fn session_service(&self) -> SessionService {
        SessionService::new(
            self.pool.clone(),
            Arc::new(SessionRepository::new()),
            Arc::new(SessionEventRepository::new()),
            self.registry.clone(),
            self.consent_service(),
            self.analytics_service(),
            self.crypto.clone(),
        )
    }

    pub fn chat_service(&self) -> ChatService {
        ChatService::new(
            self.pool.clone(),
            Arc::new(SessionRepository::new()),
            Arc::new(MessageRepository::new()),
            Arc::new(FileRepository::new()),
            self.crypto.clone(),
        )
    }

    pub fn signaling_relay(&self) -> SignalingRelay {
        SignalingRelay::new(
            self.pool.clone(),
            Arc::new(SessionRepository::new()),
            self.consent_service(),
            self.registry.clone(),
        )
    }
}
