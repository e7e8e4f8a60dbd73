//! Cache bookkeeping wrapper around stored values.

use serde::{Deserialize, Serialize};

/// Wraps a stored value with the timestamps the engine needs for expiry.
///
/// `created_on` is set once at first insert and preserved across updates;
/// `updated_on` is refreshed on every write and drives the expiry sweep.
/// These are cache bookkeeping only, distinct from any business audit trail
/// carried inside the value itself. The engine owns envelopes exclusively;
/// callers only ever see the unwrapped value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub value: T,
    pub created_on: i64,
    pub updated_on: i64,
}

impl<T> Envelope<T> {
    pub fn new(value: T, now: i64) -> Self {
        Self {
            value,
            created_on: now,
            updated_on: now,
        }
    }

    /// Replacement envelope for an update: same `created_on`, fresh value and
    /// `updated_on`.
    pub fn updated(&self, value: T, now: i64) -> Self {
        Self {
            value,
            created_on: self.created_on,
            updated_on: now,
        }
    }
}
