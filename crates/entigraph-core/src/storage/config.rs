//! Storage configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Where and how the sled database is opened.
///
/// Every field has a default, so a JSON configuration only needs the keys
/// it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database directory. Ignored for temporary stores.
    pub path: PathBuf,
    /// sled page cache, in bytes.
    pub cache_capacity: u64,
    /// Background flush period in milliseconds; `None` leaves durability to
    /// explicit flushes.
    pub flush_every_ms: Option<u64>,
    pub compression: bool,
    /// Open an anonymous database removed when the engine drops.
    pub temporary: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./entigraph_data"),
            cache_capacity: 64 * 1024 * 1024,
            flush_every_ms: Some(500),
            compression: true,
            temporary: false,
        }
    }
}

impl StorageConfig {
    /// Persistent store in `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Throwaway store, mostly for tests.
    pub fn temporary() -> Self {
        Self {
            temporary: true,
            ..Self::default()
        }
    }

    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(self.compression)
            .flush_every_ms(self.flush_every_ms);
        if self.temporary {
            config.temporary(true)
        } else {
            config.path(&self.path)
        }
    }
}
