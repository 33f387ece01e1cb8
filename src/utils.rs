use std::path::Path;

use anyhow::Result;
use log::{error, info};
use tokio::fs;

/// Asynchronously ensures that a directory exists, creating it if it does not.
/// This function is idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !fs::try_exists(path).await? {
        if let Err(e) = fs::create_dir_all(path).await {
            error!("Failed to create directory at {:?}: {}", path, e);
            return Err(e.into());
        }
        info!("Created directory at: {:?}", path);
    }
    Ok(())
}

/// Battery level as shown to the user; above 100 is the sensor's "unknown"
pub fn battery_label(level: u16) -> String {
    if level > crate::core::bluetooth::MAX_BATTERY_LEVEL {
        "N/A".to_string()
    } else {
        format!("{}%", level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_label() {
        assert_eq!(battery_label(87), "87%");
        assert_eq!(battery_label(100), "100%");
        assert_eq!(battery_label(0xFFFF), "N/A");
    }

    #[tokio::test]
    async fn test_ensure_directory_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("oneputt-utils-{}", std::process::id()));
        ensure_directory_exists(&dir).await.unwrap();
        ensure_directory_exists(&dir).await.unwrap();
        assert!(dir.is_dir());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
