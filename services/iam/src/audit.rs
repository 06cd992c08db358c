//! Operation log recording
//!
//! Entries are written on a background task so that storing the audit trail
//! never delays or fails the response it describes.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::IamResult;
use crate::models::{LogFilter, NewOperationLog, OperationLog, Page};
use crate::repositories::OperationLogStore;

#[derive(Clone)]
pub struct OperationRecorder {
    store: Arc<dyn OperationLogStore>,
}

impl OperationRecorder {
    pub fn new(store: Arc<dyn OperationLogStore>) -> Self {
        Self { store }
    }

    /// Store `entry` in the background. A failed write is logged and dropped.
    pub fn record_detached(&self, entry: NewOperationLog) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.record(&entry).await {
                warn!(
                    "Failed to record operation {} {} ({}): {}",
                    entry.method, entry.path, entry.status, e
                );
            }
        })
    }

    pub async fn list(&self, filter: &LogFilter) -> IamResult<Page<OperationLog>> {
        self.store.list_logs(filter).await
    }
}
