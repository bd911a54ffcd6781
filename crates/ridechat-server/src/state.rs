//! Shared server state and backend wiring.

use crate::auth::JwtAuthenticator;
use crate::config::{BackendKind, Config};
use crate::postgres_store::PostgresStore;
use crate::redis_store::{self, RedisAppendLog, RedisFanout};
use anyhow::{bail, Context, Result};
use ridechat_core::memory::{MemoryAppendLog, MemoryFanout, MemoryMessageStore};
use ridechat_core::{
    AllowAnonymous, AppendLog, Authenticator, ConnectionRegistry, Dispatcher, Fanout,
    HistoryLoader, IngestPipeline, MessageStore, PersistQueue,
};
use std::sync::Arc;
use tracing::{info, warn};

/// The storage and fanout services a server runs against.
#[derive(Clone)]
pub struct Backends {
    /// Per-room append-log.
    pub log: Arc<dyn AppendLog>,
    /// Relational store.
    pub store: Arc<dyn MessageStore>,
    /// Cross-instance fanout.
    pub fanout: Arc<dyn Fanout>,
}

impl Backends {
    /// In-process backends for a single instance.
    #[must_use]
    pub fn memory(config: &Config) -> Self {
        let log = match config.history.max_log_len {
            Some(max_len) => MemoryAppendLog::with_max_len(max_len),
            None => MemoryAppendLog::new(),
        };
        Self {
            log: Arc::new(log),
            store: Arc::new(MemoryMessageStore::new()),
            fanout: Arc::new(MemoryFanout::new()),
        }
    }

    /// Connect the backends named by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis cannot be reached or the database pool
    /// cannot be configured.
    pub async fn connect(config: &Config) -> Result<Self> {
        match config.backend {
            BackendKind::Memory => {
                warn!("Using in-memory backends; messages are not shared between instances");
                Ok(Self::memory(config))
            }
            BackendKind::Redis => {
                let (client, conn) = redis_store::connect(&config.redis.url)
                    .await
                    .context("Failed to connect to Redis")?;
                info!("Connected to Redis");

                let store = PostgresStore::new(&config.postgres)?;
                if config.postgres.ensure_schema {
                    if let Err(e) = store.ensure_schema().await {
                        warn!(error = %e, "Could not ensure database schema");
                    }
                }

                Ok(Self {
                    log: Arc::new(RedisAppendLog::new(
                        conn.clone(),
                        config.redis.stream_prefix.clone(),
                        config.history.max_log_len,
                    )),
                    store: Arc::new(store),
                    fanout: Arc::new(RedisFanout::new(
                        client,
                        conn,
                        config.redis.fanout_channel.clone(),
                    )),
                })
            }
        }
    }
}

/// Pick the token verifier for the configuration.
///
/// # Errors
///
/// Returns an error if authentication is required but no secret is set.
pub fn build_authenticator(config: &Config) -> Result<Arc<dyn Authenticator>> {
    match config.auth.jwt_secret.as_deref() {
        Some(secret) => Ok(Arc::new(JwtAuthenticator::new(secret.as_bytes()))),
        None if config.auth.required => {
            bail!("auth.required is set but no JWT secret is configured (RIDECHAT_JWT_SECRET)")
        }
        None => Ok(Arc::new(AllowAnonymous)),
    }
}

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// History replay.
    pub history: HistoryLoader,
    /// Inbound message handling.
    pub ingest: IngestPipeline,
    /// Write-behind queue.
    pub persist: PersistQueue,
    /// Token verification.
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    /// Build the state and start the background tasks.
    ///
    /// Spawns the persistence worker and the single dispatcher, so it must
    /// be called from within a tokio runtime.
    #[must_use]
    pub fn start(config: Config, backends: Backends, auth: Arc<dyn Authenticator>) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let persist = PersistQueue::spawn(Arc::clone(&backends.store), &config.persist());
        let history = HistoryLoader::new(Arc::clone(&backends.log), config.history.limit);
        let ingest = IngestPipeline::new(
            backends.log,
            backends.store,
            Arc::clone(&backends.fanout),
            persist.clone(),
            config.ingest(),
        );

        Dispatcher::new(backends.fanout, Arc::clone(&registry), config.dispatcher()).spawn();

        Arc::new(Self {
            config,
            registry,
            history,
            ingest,
            persist,
            auth,
        })
    }
}
