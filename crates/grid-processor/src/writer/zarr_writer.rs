//! Zarr V3 writer for normalized fields and coordinate vectors.

use std::path::Path;
use std::sync::Arc;

use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs_filesystem::FilesystemStore;

use crate::config::{StoreConfig, ZarrCompression};
use crate::error::{GridProcessorError, Result};

/// Attribute map attached to Zarr nodes.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Writer for Zarr V3 arrays and groups on the local filesystem.
#[derive(Debug, Clone)]
pub struct ZarrWriter {
    config: StoreConfig,
}

impl ZarrWriter {
    /// Create a new ZarrWriter with the given configuration.
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn open_store(dir: &Path) -> Result<Arc<FilesystemStore>> {
        std::fs::create_dir_all(dir)?;
        let store = FilesystemStore::new(dir).map_err(|e| GridProcessorError::storage_error(e.to_string()))?;
        Ok(Arc::new(store))
    }

    /// Write a `(lat, lon)` float field as the root array of `dir`.
    ///
    /// Returns the uncompressed size in bytes.
    pub fn write_field(
        &self,
        dir: &Path,
        data: &[f32],
        height: usize,
        width: usize,
        attrs: Attributes,
    ) -> Result<u64> {
        if data.len() != height * width {
            return Err(GridProcessorError::ShapeMismatch {
                what: "field".to_string(),
                expected: height * width,
                actual: data.len(),
            });
        }

        let store = Self::open_store(dir)?;
        let chunk_size = self.config.zarr_chunk_size as u64;

        let chunk_grid: zarrs::array::ChunkGrid = vec![chunk_size, chunk_size]
            .try_into()
            .map_err(|e| GridProcessorError::ConfigError(format!("{:?}", e)))?;

        let mut binding = ArrayBuilder::new(
            vec![height as u64, width as u64], // shape [rows, cols]
            DataType::Float32,
            chunk_grid,
            FillValue::from(f32::NAN),
        );
        let mut builder = binding.attributes(attrs);

        if self.config.zarr_compression != ZarrCompression::None {
            let codec = self.create_compression_codec(4)?;
            builder = builder.bytes_to_bytes_codecs(vec![codec]);
        }

        let array = builder
            .build(store, "/")
            .map_err(|e| GridProcessorError::zarr_error(e.to_string()))?;

        array
            .store_metadata()
            .map_err(|e| GridProcessorError::storage_error(e.to_string()))?;

        let subset = ArraySubset::new_with_start_shape(vec![0, 0], vec![height as u64, width as u64])
            .map_err(|e| GridProcessorError::storage_error(e.to_string()))?;

        array
            .store_array_subset_elements(&subset, data)
            .map_err(|e| GridProcessorError::storage_error(e.to_string()))?;

        Ok((data.len() * std::mem::size_of::<f32>()) as u64)
    }

    /// Write a one-dimensional coordinate vector as the root array of `dir`.
    pub fn write_coordinate(&self, dir: &Path, values: &[f64], attrs: Attributes) -> Result<()> {
        let store = Self::open_store(dir)?;
        let n = values.len() as u64;

        let chunk_grid: zarrs::array::ChunkGrid = vec![n.max(1)]
            .try_into()
            .map_err(|e| GridProcessorError::ConfigError(format!("{:?}", e)))?;

        let mut binding = ArrayBuilder::new(vec![n], DataType::Float64, chunk_grid, FillValue::from(f64::NAN));
        let array = binding
            .attributes(attrs)
            .build(store, "/")
            .map_err(|e| GridProcessorError::zarr_error(e.to_string()))?;

        array
            .store_metadata()
            .map_err(|e| GridProcessorError::storage_error(e.to_string()))?;

        let subset = ArraySubset::new_with_start_shape(vec![0], vec![n])
            .map_err(|e| GridProcessorError::storage_error(e.to_string()))?;
        array
            .store_array_subset_elements(&subset, values)
            .map_err(|e| GridProcessorError::storage_error(e.to_string()))?;

        Ok(())
    }

    /// Write group metadata at `path` inside the hierarchy rooted at `root`.
    pub fn write_group(&self, root: &Path, path: &str, attrs: Attributes) -> Result<()> {
        let store = Self::open_store(root)?;
        let group = GroupBuilder::new()
            .attributes(attrs)
            .build(store, path)
            .map_err(|e| GridProcessorError::zarr_error(e.to_string()))?;
        group
            .store_metadata()
            .map_err(|e| GridProcessorError::storage_error(e.to_string()))
    }

    /// Create the compression codec based on configuration.
    fn create_compression_codec(
        &self,
        element_size: usize,
    ) -> Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(self.config.zarr_compression_level)
            .map_err(|_| GridProcessorError::ConfigError("Invalid compression level".to_string()))?;

        let shuffle = if self.config.zarr_shuffle {
            BloscShuffleMode::Shuffle
        } else {
            BloscShuffleMode::NoShuffle
        };

        // typesize is required when shuffle is enabled
        let typesize = if self.config.zarr_shuffle {
            Some(element_size)
        } else {
            None
        };

        let compressor = match self.config.zarr_compression {
            ZarrCompression::None => {
                return Err(GridProcessorError::ConfigError(
                    "No compression configured".to_string(),
                ))
            }
            ZarrCompression::Lz4 | ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::Zstd | ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| GridProcessorError::ConfigError(e.to_string()))?;

        Ok(Arc::new(codec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zarrs::array::Array;

    fn read_back(dir: &Path) -> (Vec<u64>, Vec<f32>, Attributes) {
        let store = Arc::new(FilesystemStore::new(dir).unwrap());
        let array = Array::open(store, "/").unwrap();
        let shape = array.shape().to_vec();
        let subset = ArraySubset::new_with_start_shape(vec![0, 0], shape.clone()).unwrap();
        let data = array.retrieve_array_subset_elements::<f32>(&subset).unwrap();
        (shape, data, array.attributes().clone())
    }

    #[test]
    fn test_write_field_uncompressed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("f000");
        let writer = ZarrWriter::new(StoreConfig {
            zarr_compression: ZarrCompression::None,
            ..Default::default()
        });

        let data: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let mut attrs = Attributes::new();
        attrs.insert("units".to_string(), serde_json::json!("m s-1"));
        let bytes = writer.write_field(&dir, &data, 3, 4, attrs).unwrap();
        assert_eq!(bytes, 48);

        let (shape, back, attrs) = read_back(&dir);
        assert_eq!(shape, vec![3, 4]);
        assert_eq!(back, data);
        assert_eq!(attrs["units"], "m s-1");
    }

    #[test]
    fn test_write_field_compressed_keeps_nan() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("f003");
        let writer = ZarrWriter::new(StoreConfig {
            zarr_chunk_size: 2,
            ..Default::default()
        });

        let mut data = vec![1.5f32; 15];
        data[7] = f32::NAN;
        writer.write_field(&dir, &data, 3, 5, Attributes::new()).unwrap();

        let (_, back, _) = read_back(&dir);
        assert!(back[7].is_nan());
        assert_eq!(back[0], 1.5);
        assert_eq!(back[14], 1.5);
    }

    #[test]
    fn test_shape_mismatch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = ZarrWriter::new(StoreConfig::default());
        let err = writer
            .write_field(temp_dir.path(), &[0.0; 5], 2, 3, Attributes::new())
            .unwrap_err();
        assert!(matches!(err, GridProcessorError::ShapeMismatch { .. }));
    }
}
