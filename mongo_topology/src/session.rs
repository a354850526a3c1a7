use serde_json::{json, Value};
use uuid::Uuid;

/// Logical session an operation runs under. Carries the transaction number that lets a
/// retried write be recognised by the server as the same write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSession {
    id: Uuid,
    txn_number: i64,
}

impl ClientSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            txn_number: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Last transaction number handed out, 0 if none yet.
    pub fn txn_number(&self) -> i64 {
        self.txn_number
    }

    pub(crate) fn next_txn_number(&mut self) -> i64 {
        self.txn_number += 1;
        self.txn_number
    }

    /// The `lsid` field attached to commands run under this session.
    pub fn lsid(&self) -> Value {
        json!({ "id": self.id })
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}
