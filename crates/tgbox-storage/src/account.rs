//! Account session blobs.
//!
//! The session state stores accounts as opaque strings; for this backend
//! the string is the JSON of an [`AccountSession`].

use opendal::Operator;
use serde::{Deserialize, Serialize};

use tgbox_core::ConnectionStatus;

use crate::error::{BoxError, BoxResult};
use crate::health::check_connection;
use crate::operator::{build_operator, StorageRoot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSession {
    pub name: String,
    #[serde(flatten)]
    pub storage: StorageRoot,
}

impl AccountSession {
    pub fn new(name: impl Into<String>, storage: StorageRoot) -> Self {
        Self {
            name: name.into(),
            storage,
        }
    }

    pub fn to_blob(&self) -> BoxResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_blob(blob: &str) -> BoxResult<Self> {
        serde_json::from_str(blob)
            .map_err(|e| BoxError::Other(anyhow::anyhow!("unreadable account session: {e}")))
    }

    pub fn operator(&self) -> BoxResult<Operator> {
        Ok(build_operator(&self.storage)?)
    }

    /// `Disconnected` when the storage root cannot be built or reached.
    pub async fn status(&self) -> ConnectionStatus {
        match build_operator(&self.storage) {
            Ok(op) => check_connection(&op).await,
            Err(e) => {
                tracing::debug!(account = %self.name, error = %e, "cannot build operator");
                ConnectionStatus::Disconnected
            }
        }
    }
}
