//! Process-wide wiring of engines, token services, and the lock service.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;

use crate::auth::{TokenRecord, TokenService};
use crate::errors::{Error, Result};
use crate::locks::AdvisoryLockService;

use super::model::{SyncCycleResult, SyncEngineStats};
use super::scheduler::EngineHandle;

/// Owns every registered engine handle and token service for the lifetime of
/// the process. Built once at startup, then shared behind an `Arc`.
pub struct SyncRegistry {
    engines: HashMap<&'static str, Arc<EngineHandle>>,
    token_services: HashMap<String, Arc<TokenService>>,
    locks: Arc<AdvisoryLockService>,
}

impl SyncRegistry {
    pub fn new(locks: Arc<AdvisoryLockService>) -> Self {
        Self {
            engines: HashMap::new(),
            token_services: HashMap::new(),
            locks,
        }
    }

    /// Register an engine handle under its runner name. Last registration
    /// wins when a name repeats.
    pub fn register_engine(&mut self, handle: Arc<EngineHandle>) {
        self.engines.insert(handle.name(), handle);
    }

    pub fn register_token_service(&mut self, provider: &str, service: Arc<TokenService>) {
        self.token_services.insert(provider.to_string(), service);
    }

    pub fn engine(&self, name: &str) -> Result<Arc<EngineHandle>> {
        self.engines
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| Error::UnknownEngine(name.to_string()))
    }

    pub fn locks(&self) -> Arc<AdvisoryLockService> {
        Arc::clone(&self.locks)
    }

    /// Trigger one cycle of the named engine and wait for its result.
    pub async fn sync_now(&self, engine: &str) -> Result<SyncCycleResult> {
        let handle = self.engine(engine)?;
        Ok(handle.sync_now().await)
    }

    /// Stats snapshot for the named engine.
    pub async fn get_sync_stats(&self, engine: &str) -> Result<SyncEngineStats> {
        let handle = self.engine(engine)?;
        Ok(handle.stats().await)
    }

    /// Stats snapshot for every registered engine, ordered by engine name so
    /// the dashboard renders deterministically.
    pub async fn get_all_sync_stats(&self) -> Vec<SyncEngineStats> {
        let mut stats = Vec::with_capacity(self.engines.len());
        for handle in self.engines.values() {
            stats.push(handle.stats().await);
        }
        stats.sort_by(|a, b| a.engine.cmp(&b.engine));
        stats
    }

    /// Fetch a usable token for `user_id` from the named provider's token
    /// service, refreshing if needed.
    pub async fn get_valid_token(
        &self,
        provider: &str,
        user_id: &str,
    ) -> Result<Option<TokenRecord>> {
        let service = self
            .token_services
            .get(provider)
            .ok_or_else(|| Error::UnknownProvider(provider.to_string()))?;
        service.get_valid_token(user_id).await
    }

    pub fn token_service(&self, provider: &str) -> Result<Arc<TokenService>> {
        self.token_services
            .get(provider)
            .map(Arc::clone)
            .ok_or_else(|| Error::UnknownProvider(provider.to_string()))
    }

    /// Start every background loop: engine schedules plus the pending-state
    /// sweepers of the token services.
    pub async fn start_all(&self) {
        for service in self.token_services.values() {
            service.start_state_sweep().await;
        }
        for handle in self.engines.values() {
            handle.start().await;
        }
        info!(
            "[Sync] Registry started: {} engine(s), {} token service(s)",
            self.engines.len(),
            self.token_services.len()
        );
    }

    /// Stop background work and release every advisory lock this process
    /// still holds. Called from the server's shutdown path.
    pub async fn shutdown(&self) {
        info!("[Sync] Shutting down registry");
        for handle in self.engines.values() {
            handle.stop().await;
        }
        for service in self.token_services.values() {
            service.stop_state_sweep().await;
        }
        self.locks.release_all().await;
    }
}
