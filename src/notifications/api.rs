//! Server side of the notification feed.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::NotificationRecord;
use crate::client::RequestClient;
use crate::constants::{
    notification_read_path, NOTIFICATIONS_MARK_ALL_READ_PATH, NOTIFICATIONS_PATH,
};
use crate::error::Result;

/// Notification endpoints used by the store.
#[async_trait]
pub trait NotificationApi: Send + Sync + std::fmt::Debug {
    /// Fetch the current feed.
    async fn fetch_snapshot(&self) -> Result<Vec<NotificationRecord>>;

    /// Acknowledge one notification as read.
    async fn mark_read(&self, id: i64) -> Result<()>;

    /// Acknowledge every notification as read.
    async fn mark_all_read(&self) -> Result<()>;
}

/// [`NotificationApi`] over the authorized request client.
#[derive(Debug, Clone)]
pub struct RestNotificationApi {
    client: Arc<RequestClient>,
}

impl RestNotificationApi {
    /// Creates the API over `client`.
    pub fn new(client: Arc<RequestClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationApi for RestNotificationApi {
    async fn fetch_snapshot(&self) -> Result<Vec<NotificationRecord>> {
        self.client.get_json(NOTIFICATIONS_PATH).await
    }

    async fn mark_read(&self, id: i64) -> Result<()> {
        self.client.put(&notification_read_path(id)).await
    }

    async fn mark_all_read(&self) -> Result<()> {
        self.client.put(NOTIFICATIONS_MARK_ALL_READ_PATH).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiResponse;
    use crate::test_support::{authenticated_harness, ScriptedTransport};

    #[tokio::test]
    async fn test_rest_api_paths() {
        let transport = ScriptedTransport::new(|request, _| {
            match (request.method.as_str(), request.route()) {
                ("GET", "/notifications/my") => {
                    Ok(ApiResponse::new(200, r#"[{"id":1},{"id":2,"isRead":true}]"#))
                }
                ("PUT", "/notifications/1/read" | "/notifications/mark-all-read") => {
                    Ok(ApiResponse::new(204, ""))
                }
                _ => Ok(ApiResponse::new(404, "")),
            }
        });
        let harness = authenticated_harness(transport);
        let api = RestNotificationApi::new(Arc::new(harness.client.clone()));

        let records = api.fetch_snapshot().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[1].is_read);
        api.mark_read(1).await.unwrap();
        api.mark_all_read().await.unwrap();
        assert_eq!(api.mark_read(9).await.unwrap_err().status(), Some(404));
    }
}
