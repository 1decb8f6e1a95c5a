//! Session durability: the whole store serializes to one JSON file in the
//! platform data directory, written atomically so a crash mid-save never
//! leaves a truncated state file.

use std::error::Error as StdError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::core::config::default_data_dir;
use crate::core::session::SessionStore;

pub fn default_state_path() -> Result<PathBuf, Box<dyn StdError>> {
    Ok(default_data_dir()?.join("sessions.json"))
}

pub fn load_store(path: &Path) -> Result<SessionStore, Box<dyn StdError>> {
    if !path.exists() {
        return Ok(SessionStore::new());
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read session state at {}: {e}", path.display()))?;
    let store = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse session state at {}: {e}", path.display()))?;
    Ok(store)
}

pub fn save_store(store: &SessionStore, path: &Path) -> Result<(), Box<dyn StdError>> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let contents = serde_json::to_string_pretty(store)?;
    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(contents.as_bytes())?;
    temp_file.flush()?;
    temp_file.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Message;
    use tempfile::TempDir;

    #[test]
    fn missing_state_file_yields_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = load_store(&temp_dir.path().join("sessions.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn store_round_trips_through_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sessions.json");

        let mut store = SessionStore::new();
        let id = store.create_session("default");
        store.append_message(id, Message::user("hi")).unwrap();
        store.append_message(id, Message::assistant("hello")).unwrap();
        save_store(&store, &path).unwrap();

        let loaded = load_store(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        let session = loaded.get(id).unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].content, "hi");

        // Ids allocated after a reload must not collide with persisted ones.
        let mut loaded = loaded;
        let new_id = loaded.create_session("default");
        assert_ne!(new_id, id);
    }

    #[test]
    fn corrupt_state_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sessions.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_store(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse session state"));
    }
}
