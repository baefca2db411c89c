//! Petition record model

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::FateState;

/// A petition as persisted by the record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetitionRecord {
    /// Opaque identity
    pub id: Uuid,

    /// Lifecycle state
    pub state: FateState,

    /// Hash of the submitted content
    pub content_hash: String,

    /// Who submitted it, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitter_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Why the terminal fate was assigned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fate_reason: Option<String>,

    /// Monotonic per-record counter, bumped by the store on every mutation
    pub version: u64,

    /// Downstream record created by promotion; immutable once set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted_to: Option<String>,

    /// Free-form non-disposition annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl PetitionRecord {
    /// Create a fresh RECEIVED record
    pub fn new(content_hash: impl Into<String>, submitter_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: FateState::Received,
            content_hash: content_hash.into(),
            submitter_id,
            created_at: now,
            updated_at: now,
            fate_reason: None,
            version: 0,
            promoted_to: None,
            annotations: BTreeMap::new(),
        }
    }

    /// Whether the disposition is final
    pub fn is_fated(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Non-disposition field update
///
/// Applies only while the record is not terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    /// Replacement content hash (content amended before disposition)
    #[serde(default)]
    pub content_hash: Option<String>,

    /// Annotations to upsert
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl RecordPatch {
    /// Patch that only sets one annotation
    pub fn annotate(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut annotations = BTreeMap::new();
        annotations.insert(key.into(), value.into());
        Self {
            content_hash: None,
            annotations,
        }
    }

    /// A patch with nothing to apply
    pub fn is_empty(&self) -> bool {
        self.content_hash.is_none() && self.annotations.is_empty()
    }

    /// Apply to a record in place; caller bumps version and timestamps
    pub(crate) fn apply_to(&self, record: &mut PetitionRecord) {
        if let Some(hash) = &self.content_hash {
            record.content_hash = hash.clone();
        }
        for (key, value) in &self.annotations {
            record.annotations.insert(key.clone(), value.clone());
        }
    }
}

/// A compare-and-swap fate request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FateRequest {
    pub id: Uuid,
    /// Caller's last observed state
    pub expected: FateState,
    pub next: FateState,
    pub reason: Option<String>,
}

impl FateRequest {
    pub fn new(id: Uuid, expected: FateState, next: FateState) -> Self {
        Self {
            id,
            expected,
            next,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
