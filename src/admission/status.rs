//! Long-poll status reads
//!
//! Reads never check the halt flag.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::errors::{IntakeError, IntakeResult};
use crate::notifier::{StatusChangeNotifier, StatusTokenCodec};
use crate::record::{PetitionRecord, RecordStore};

/// Snapshot returned to a polling reader
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub record: PetitionRecord,
    /// Token for the next poll
    pub status_token: String,
    /// Whether the record moved past the caller's token
    pub changed: bool,
}

pub struct StatusService {
    store: Arc<dyn RecordStore>,
    notifier: Arc<StatusChangeNotifier>,
    tokens: Arc<StatusTokenCodec>,
    max_wait: Duration,
}

impl StatusService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Arc<StatusChangeNotifier>,
        tokens: Arc<StatusTokenCodec>,
        max_wait: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            tokens,
            max_wait,
        }
    }

    async fn load(&self, id: Uuid) -> IntakeResult<PetitionRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| IntakeError::petition_not_found(id))
    }

    fn snapshot(&self, record: PetitionRecord, changed: bool) -> StatusSnapshot {
        let status_token = self.tokens.issue(record.id, record.version);
        StatusSnapshot {
            record,
            status_token,
            changed,
        }
    }

    /// Current state without waiting
    pub async fn current(&self, id: Uuid) -> IntakeResult<StatusSnapshot> {
        let record = self.load(id).await?;
        Ok(self.snapshot(record, true))
    }

    /// Wait for `id` to move past the version in `token`.
    ///
    /// The wait is capped at the configured long-poll timeout. Without a
    /// token the current snapshot is returned at once.
    pub async fn poll(
        &self,
        id: Uuid,
        token: Option<&str>,
        timeout: Option<Duration>,
    ) -> IntakeResult<StatusSnapshot> {
        let Some(raw) = token else {
            return self.current(id).await;
        };
        let known = self.tokens.decode(raw, id)?.version;

        let record = self.load(id).await?;
        if record.version != known {
            return Ok(self.snapshot(record, true));
        }

        self.notifier.register_or_get(id, record.version);
        let wait = timeout.map_or(self.max_wait, |t| t.min(self.max_wait));
        self.notifier.wait_for_change(id, known, wait).await;

        let record = self.load(id).await?;
        let changed = record.version != known;
        Ok(self.snapshot(record, changed))
    }
}
