//! Configuration for the dataset store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the on-disk dataset store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one Zarr hierarchy per `(source, cycle)`.
    pub root: PathBuf,

    /// Chunk dimension for Zarr arrays (square chunks).
    pub zarr_chunk_size: usize,

    /// Bytes-to-bytes codec applied to every stored chunk.
    pub zarr_compression: ZarrCompression,

    /// Codec level, 1 (fast) to 9 (small).
    pub zarr_compression_level: u8,

    /// Byte-shuffle float lanes before compressing.
    pub zarr_shuffle: bool,

    /// Age after which a cycle lock is considered abandoned.
    pub stale_lock_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/processed"),
            zarr_chunk_size: 512,
            zarr_compression: ZarrCompression::BloscZstd,
            zarr_compression_level: 1,
            zarr_shuffle: true,
            stale_lock_secs: 6 * 3600,
        }
    }
}

impl StoreConfig {
    /// Override fields from environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PIPELINE_STORE_ROOT") {
            self.root = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("ZARR_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                self.zarr_chunk_size = size;
            }
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION") {
            self.zarr_compression = ZarrCompression::from_str(&val);
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                self.zarr_compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("ZARR_SHUFFLE") {
            self.zarr_shuffle = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Ok(val) = std::env::var("PIPELINE_STALE_LOCK_SECS") {
            if let Ok(secs) = val.parse() {
                self.stale_lock_secs = secs;
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.root.as_os_str().is_empty() {
            return Err("store root must not be empty".to_string());
        }

        if self.zarr_chunk_size == 0 {
            return Err("chunk size must be positive".to_string());
        }

        if !(1..=9).contains(&self.zarr_compression_level) {
            return Err(format!("compression level {} outside 1-9", self.zarr_compression_level));
        }

        if self.stale_lock_secs == 0 {
            return Err("stale_lock_secs must be > 0".to_string());
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    None,
    Lz4,
    Zstd,
    BloscLz4,
    #[default]
    BloscZstd,
}

const COMPRESSION_NAMES: [(ZarrCompression, &str); 5] = [
    (ZarrCompression::None, "none"),
    (ZarrCompression::Lz4, "lz4"),
    (ZarrCompression::Zstd, "zstd"),
    (ZarrCompression::BloscLz4, "blosc_lz4"),
    (ZarrCompression::BloscZstd, "blosc_zstd"),
];

impl ZarrCompression {
    /// Case-insensitive lookup; unknown names select the default codec.
    pub fn from_str(s: &str) -> Self {
        COMPRESSION_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s.trim()))
            .map(|(codec, _)| *codec)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        COMPRESSION_NAMES
            .iter()
            .find(|(codec, _)| codec == self)
            .map(|(_, name)| *name)
            .unwrap_or("blosc_zstd")
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(StoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_level() {
        let config = StoreConfig {
            zarr_compression_level: 12,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_matches_documented_values() {
        let config = StoreConfig::default();
        assert_eq!(config.zarr_chunk_size, 512);
        assert_eq!(config.zarr_compression, ZarrCompression::BloscZstd);
        assert_eq!(config.zarr_compression_level, 1);
        assert!(config.zarr_shuffle);
        assert_eq!(config.stale_lock_secs, 6 * 3600);
    }

    #[test]
    fn test_validate_rejects_zero_stale_age() {
        let config = StoreConfig {
            stale_lock_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("ZARR_COMPRESSION", "lz4");
        std::env::set_var("ZARR_SHUFFLE", "false");
        std::env::set_var("PIPELINE_STALE_LOCK_SECS", "90");
        let mut config = StoreConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("ZARR_COMPRESSION");
        std::env::remove_var("ZARR_SHUFFLE");
        std::env::remove_var("PIPELINE_STALE_LOCK_SECS");

        assert_eq!(config.zarr_compression, ZarrCompression::Lz4);
        assert!(!config.zarr_shuffle);
        assert_eq!(config.stale_lock_secs, 90);
    }

    #[test]
    fn test_compression_names() {
        assert_eq!(ZarrCompression::from_str("BLOSC_LZ4"), ZarrCompression::BloscLz4);
        assert_eq!(ZarrCompression::from_str("gzip"), ZarrCompression::BloscZstd);
        assert_eq!(ZarrCompression::None.to_string(), "none");
    }

    #[test]
    fn test_deserialize_snake_case_names() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"root": "/tmp/x", "zarr_compression": "blosc_lz4"}"#).unwrap();
        assert_eq!(config.zarr_compression, ZarrCompression::BloscLz4);
        assert_eq!(config.zarr_chunk_size, 512);
    }
}
