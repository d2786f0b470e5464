//! Remote document store reached over HTTP.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::store::{InsertSummary, RemoteStore, StoreError};
use crate::config::StoreConfig;
use crate::journal::AuditEvent;

/// Body of a bulk insert request.
#[derive(Serialize)]
struct BulkInsertRequest<'a> {
    ordered: bool,
    documents: &'a [AuditEvent],
}

/// Bulk-inserts audit records into a collection of an HTTP document store.
///
/// Records are posted to `{uri}/{database}/{collection}/_bulk` with
/// `ordered: false`. The connection is established on first use and
/// shared by every later call; a failed attempt is retried on the next
/// call.
pub struct HttpStore {
    config: StoreConfig,
    base_url: String,
    client: OnceCell<reqwest::Client>,
}

impl HttpStore {
    /// Create a store from configuration. Requires `store.uri`.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let base_url = config
            .uri
            .as_deref()
            .map(|uri| uri.trim_end_matches('/').to_string())
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| StoreError::Connect("store.uri is not configured".to_string()))?;

        Ok(Self {
            config,
            base_url,
            client: OnceCell::new(),
        })
    }

    fn bulk_url(&self) -> String {
        format!(
            "{}/{}/{}/_bulk",
            self.base_url, self.config.database, self.config.collection
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_ref()),
            None => request,
        }
    }

    async fn client(&self) -> Result<&reqwest::Client, StoreError> {
        self.client.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> Result<reqwest::Client, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(self.config.request_timeout())
            .build()
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        let response = self
            .authorize(client.get(format!("{}/health", self.base_url)))
            .send()
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Connect(format!(
                "health check returned {}",
                response.status()
            )));
        }

        info!(uri = %self.base_url, "Connected to remote store");
        Ok(client)
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn bulk_insert(&self, records: &[AuditEvent]) -> Result<InsertSummary, StoreError> {
        let client = self.client().await?;

        let response = self
            .authorize(client.post(self.bulk_url()))
            .json(&BulkInsertRequest {
                ordered: false,
                documents: records,
            })
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        // Stores that do not report counts accepted the whole batch
        let summary = response.json::<InsertSummary>().await.unwrap_or(InsertSummary {
            inserted: records.len(),
            rejected: 0,
        });

        debug!(
            collection = %self.config.collection,
            inserted = summary.inserted,
            rejected = summary.rejected,
            "Bulk insert completed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::AuditStatus;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Deserialize)]
    struct ReceivedBatch {
        ordered: bool,
        documents: Vec<AuditEvent>,
    }

    #[derive(Default)]
    struct FakeStore {
        health_checks: AtomicUsize,
        batches: Mutex<Vec<ReceivedBatch>>,
        reject_with: Mutex<Option<StatusCode>>,
    }

    async fn health(State(fake): State<Arc<FakeStore>>) -> StatusCode {
        fake.health_checks.fetch_add(1, Ordering::SeqCst);
        StatusCode::OK
    }

    async fn bulk(
        State(fake): State<Arc<FakeStore>>,
        Json(batch): Json<ReceivedBatch>,
    ) -> Result<Json<InsertSummary>, StatusCode> {
        if let Some(status) = *fake.reject_with.lock() {
            return Err(status);
        }
        let summary = InsertSummary {
            inserted: batch.documents.len(),
            rejected: 0,
        };
        fake.batches.lock().push(batch);
        Ok(Json(summary))
    }

    async fn start_fake() -> (Arc<FakeStore>, String) {
        let fake = Arc::new(FakeStore::default());
        let app = Router::new()
            .route("/health", get(health))
            .route("/PimjoLogger/Logs/_bulk", post(bulk))
            .with_state(Arc::clone(&fake));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (fake, format!("http://{}", addr))
    }

    fn store_for(uri: String) -> HttpStore {
        HttpStore::new(StoreConfig {
            uri: Some(uri),
            ..StoreConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_requires_uri() {
        assert!(HttpStore::new(StoreConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_bulk_insert_posts_unordered_batch() {
        let (fake, uri) = start_fake().await;
        let store = store_for(uri);
        let records = vec![
            AuditEvent::new("1.2.3.4", "/api/action", AuditStatus::Allowed),
            AuditEvent::new("1.2.3.4", "/api/action", AuditStatus::Blocked),
        ];

        let summary = store.bulk_insert(&records).await.unwrap();

        assert_eq!(summary.inserted, 2);
        let batches = fake.batches.lock();
        assert_eq!(batches.len(), 1);
        assert!(!batches[0].ordered);
        assert_eq!(batches[0].documents, records);
    }

    #[tokio::test]
    async fn test_connection_is_established_once() {
        let (fake, uri) = start_fake().await;
        let store = store_for(uri);
        let records = vec![AuditEvent::new("a", "/", AuditStatus::Allowed)];

        store.bulk_insert(&records).await.unwrap();
        store.bulk_insert(&records).await.unwrap();

        assert_eq!(fake.health_checks.load(Ordering::SeqCst), 1);
        assert_eq!(fake.batches.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_batch_reports_status() {
        let (fake, uri) = start_fake().await;
        *fake.reject_with.lock() = Some(StatusCode::SERVICE_UNAVAILABLE);
        let store = store_for(uri);

        let err = store
            .bulk_insert(&[AuditEvent::new("a", "/", AuditStatus::Allowed)])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Rejected { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_to_connect() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = store_for(format!("http://{}", addr));
        let err = store
            .bulk_insert(&[AuditEvent::new("a", "/", AuditStatus::Allowed)])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Connect(_)));
    }
}
