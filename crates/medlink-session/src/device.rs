//! Stable per-installation device identifier.

use crate::store::KeyValueStore;
use uuid::Uuid;

pub const DEVICE_ID_KEY: &str = "deviceId";

/// The device id kept in `store`, generated on first use.
///
/// If the store cannot be read or written, a fresh id is returned for this
/// process only.
pub fn device_id(store: &dyn KeyValueStore) -> String {
    match store.get(DEVICE_ID_KEY) {
        Ok(Some(id)) if !id.is_empty() => return id,
        Ok(_) => {}
        Err(e) => tracing::warn!("Failed to read device id: {e}"),
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = store.set(DEVICE_ID_KEY, &id) {
        tracing::warn!("Failed to persist device id: {e}");
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn generated_once_then_stable() {
        let store = MemoryStore::new();
        let first = device_id(&store);
        assert!(Uuid::parse_str(&first).is_ok());
        assert_eq!(device_id(&store), first);
    }

    #[test]
    fn existing_id_is_kept() {
        let store = MemoryStore::new();
        store.set(DEVICE_ID_KEY, "kiosk-7").unwrap();
        assert_eq!(device_id(&store), "kiosk-7");
    }
}
