//! Typed client for the project tracker.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;

use fleetmon_core::sync::{RemoteTask, SourceError, TaskTrackerSource};

use crate::client::{ApiClient, RequestOptions};
use crate::error::Result;
use crate::token::AccessTokenProvider;

/// Task endpoints in preference order. The tracker's v3 API renamed a few
/// fields but kept task reads compatible; v2 remains for older workspaces.
const TASK_PATHS: [&str; 2] = ["/api/v3/tasks", "/api/v2/tasks"];

pub struct TaskTrackerClient {
    api: ApiClient,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl TaskTrackerClient {
    pub fn new(api: ApiClient, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self { api, tokens }
    }

    /// Fetch one task by its tracker identifier.
    pub async fn get_task(&self, task_id: &str) -> Result<RemoteTask> {
        let encoded = urlencoding::encode(task_id);
        let candidates: Vec<String> = TASK_PATHS
            .iter()
            .map(|path| format!("{}/{}", path, encoded))
            .collect();
        let candidate_refs: Vec<&str> = candidates.iter().map(String::as_str).collect();

        let token = self.tokens.access_token().await?;
        self.api
            .request_json(
                &token,
                Method::GET,
                &candidate_refs,
                &RequestOptions::default(),
            )
            .await
    }
}

#[async_trait]
impl TaskTrackerSource for TaskTrackerClient {
    async fn fetch_task(&self, task_id: &str) -> Result<RemoteTask, SourceError> {
        self.get_task(task_id).await.map_err(SourceError::from)
    }
}
