//! Guest session identity.
//!
//! Anonymous visitors are attributed by a locally generated identifier that
//! survives reloads. The identifier is persisted as a small JSON document
//! and regenerated only when the document is missing, unreadable, or older
//! than the configured expiry. No network calls happen here.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::APP_NAME;
use crate::error::WidgetError;

#[derive(Serialize, Deserialize)]
struct StoredSession {
    id: String,
    created_at: DateTime<Utc>,
}

/// Handle to the persisted guest session document.
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    /// Locate the session document for `storage_key` in the platform data
    /// directory:
    /// - Linux:   `~/.local/share/causerie/<storage_key>.json`
    /// - macOS:   `~/Library/Application Support/org.causerie.causerie/<storage_key>.json`
    /// - Windows: `{FOLDERID_RoamingAppData}\causerie\causerie\data\<storage_key>.json`
    pub fn new(storage_key: &str) -> Result<Self, WidgetError> {
        let project_dirs =
            ProjectDirs::from("org", "causerie", APP_NAME).ok_or(WidgetError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Ok(Self {
            path: data_dir.join(format!("{storage_key}.json")),
        })
    }

    /// Use an explicit path. This is useful for tests and for embedding the
    /// session inside custom directory layouts.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Return the stable guest session id, minting a fresh one when the
    /// stored value is absent, corrupt, or has exceeded `expiry`.
    pub fn get_or_create(&self, expiry: Duration) -> Result<String, WidgetError> {
        if let Some(id) = self.read_valid(expiry) {
            return Ok(id);
        }

        let fresh = StoredSession {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        };
        std::fs::write(&self.path, serde_json::to_string(&fresh)?)?;

        tracing::debug!(path = %self.path.display(), "Minted new guest session");
        Ok(fresh.id)
    }

    /// Remove the stored session, forcing a fresh identity on next access.
    pub fn clear(&self) -> Result<(), WidgetError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_valid(&self, expiry: Duration) -> Option<String> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let stored: StoredSession = serde_json::from_str(&raw).ok()?;

        let max_age = chrono::Duration::from_std(expiry).ok()?;
        if Utc::now().signed_duration_since(stored.created_at) > max_age {
            return None;
        }
        Some(stored.id)
    }
}
