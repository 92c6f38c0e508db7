//! Remote workout store.
//!
//! [`RemoteWorkoutStore`] is the single persist call shared by the
//! immediate-save path and the sync reconciler. With the `http` feature,
//! [`RestWorkoutStore`] implements it against a PostgREST-style endpoint
//! (`POST {base_url}/rest/v1/{table}`).

use std::future::Future;
use std::sync::Arc;

use crate::error::RemoteError;
use crate::types::WorkoutRecord;

/// Accepts a finalized workout, or explains why it did not.
pub trait RemoteWorkoutStore: Send + Sync {
    fn insert_workout(
        &self,
        record: &WorkoutRecord,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

impl<R: RemoteWorkoutStore> RemoteWorkoutStore for Arc<R> {
    fn insert_workout(
        &self,
        record: &WorkoutRecord,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send {
        (**self).insert_workout(record)
    }
}

#[cfg(feature = "http")]
pub use rest::{RestStoreConfig, RestWorkoutStore, classify_response};

#[cfg(feature = "http")]
mod rest {
    use std::future::Future;
    use std::time::{Duration, Instant};

    use log::{debug, info, warn};
    use reqwest::{Client, StatusCode};
    use serde::{Deserialize, Serialize};

    use super::RemoteWorkoutStore;
    use crate::error::RemoteError;
    use crate::types::WorkoutRecord;

    /// PostgREST error codes raised while the schema cache is being reloaded.
    const SCHEMA_CACHE_CODES: &[&str] = &["PGRST002", "PGRST204", "PGRST205"];

    /// Record fields that only matter on the device; the `workouts` table has
    /// no column for them.
    const CLIENT_ONLY_FIELDS: &[&str] = &["session_id"];

    /// Connection settings for the REST store.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RestStoreConfig {
        /// Project URL, without trailing slash
        pub base_url: String,
        /// Public API key sent as `apikey`
        pub api_key: String,
        /// User access token; falls back to the API key when absent
        #[serde(default)]
        pub access_token: Option<String>,
        #[serde(default = "default_table")]
        pub table: String,
        #[serde(default = "default_timeout_secs")]
        pub timeout_secs: u64,
    }

    fn default_table() -> String {
        "workouts".to_string()
    }

    fn default_timeout_secs() -> u64 {
        30
    }

    /// Error body returned by PostgREST.
    #[derive(Debug, Default, Deserialize)]
    struct ApiErrorBody {
        code: Option<String>,
        message: Option<String>,
    }

    pub struct RestWorkoutStore {
        client: Client,
        endpoint: String,
        api_key: String,
        bearer: String,
    }

    impl RestWorkoutStore {
        pub fn new(config: RestStoreConfig) -> Result<Self, String> {
            let client = Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .tcp_keepalive(Duration::from_secs(30))
                .build()
                .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

            let token = config.access_token.unwrap_or_else(|| config.api_key.clone());
            Ok(Self {
                client,
                endpoint: format!(
                    "{}/rest/v1/{}",
                    config.base_url.trim_end_matches('/'),
                    config.table
                ),
                api_key: config.api_key,
                bearer: format!("Bearer {}", token),
            })
        }

        async fn post(&self, record: &WorkoutRecord) -> Result<(), RemoteError> {
            let start = Instant::now();
            let body = insert_body(record)?;
            let response = self
                .client
                .post(&self.endpoint)
                .header("apikey", &self.api_key)
                .header("Authorization", &self.bearer)
                .header("Prefer", "return=minimal")
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    warn!("[RestWorkoutStore] Request failed: {}", e);
                    RemoteError::ConnectivityUnavailable {
                        message: e.to_string(),
                    }
                })?;

            let status = response.status();
            if status.is_success() {
                info!(
                    "[RestWorkoutStore] Inserted workout {} ({} ms)",
                    record.queue_id(),
                    start.elapsed().as_millis()
                );
                return Ok(());
            }

            let body = response.text().await.unwrap_or_default();
            debug!("[RestWorkoutStore] HTTP {} body: {}", status, body);
            Err(classify_response(status.as_u16(), &body))
        }
    }

    impl RemoteWorkoutStore for RestWorkoutStore {
        fn insert_workout(
            &self,
            record: &WorkoutRecord,
        ) -> impl Future<Output = Result<(), RemoteError>> + Send {
            self.post(record)
        }
    }

    /// Insert payload for `record`, without client-only fields.
    fn insert_body(record: &WorkoutRecord) -> Result<serde_json::Value, RemoteError> {
        let mut body = serde_json::to_value(record).map_err(|e| RemoteError::Permanent {
            status: None,
            message: format!("Failed to encode workout: {}", e),
        })?;
        if let Some(row) = body.as_object_mut() {
            for field in CLIENT_ONLY_FIELDS {
                row.remove(*field);
            }
        }
        Ok(body)
    }

    /// Map a non-success HTTP response onto the remote error taxonomy.
    ///
    /// Schema-cache staleness is the only transient class; gateway errors
    /// mean the backend is unreachable; everything else is permanent.
    pub fn classify_response(status: u16, body: &str) -> RemoteError {
        let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed
            .message
            .clone()
            .unwrap_or_else(|| body.chars().take(200).collect());

        let schema_stale = parsed
            .code
            .as_deref()
            .is_some_and(|code| SCHEMA_CACHE_CODES.contains(&code))
            || message.contains("schema cache");
        if schema_stale {
            return RemoteError::TransientBackendFault { message };
        }

        match StatusCode::from_u16(status) {
            Ok(StatusCode::BAD_GATEWAY)
            | Ok(StatusCode::SERVICE_UNAVAILABLE)
            | Ok(StatusCode::GATEWAY_TIMEOUT) => RemoteError::ConnectivityUnavailable { message },
            _ => RemoteError::Permanent {
                status: Some(status),
                message,
            },
        }
    }

}
