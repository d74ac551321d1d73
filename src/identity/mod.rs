//! Stable host identity for startup logging and the health endpoint.
//!
//! Generates a random UUID on first run, stores it in the `settings` table,
//! and returns the same value on every subsequent startup.

use anyhow::Result;
use uuid::Uuid;

use crate::storage::Storage;

const SETTING_KEY: &str = "host_id";

/// Returns the stable host identity string.
///
/// On first call it generates a v4 UUID, stores it in the `settings` table,
/// and returns it. On every subsequent call it reads and returns the stored
/// value.
pub async fn get_or_create(storage: &Storage) -> Result<String> {
    if let Some(id) = storage.get_setting(SETTING_KEY).await? {
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    storage.set_setting(SETTING_KEY, &id).await?;
    Ok(id)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
