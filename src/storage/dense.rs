//! The built-in dense file adapter.
//!
//! Serves `file://` storage with one flat body file per array: native-endian
//! elements in row-major order, materialized on the first write. Region
//! reads and writes walk the contiguous spans of the request, so a subset
//! touching whole trailing dimensions costs a single seek. Chunk options are
//! validated and recorded but a dense body is its own chunk; compression is
//! not applied by this adapter.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::buffer::TypedBuffer;
use crate::schema::AttributeSchema;
use crate::slicing::Bounds;

use super::{
    write_json_atomic, ArrayMeta, Dataset, DatasetLayout, StorageAdapter, StorageError,
    StorageOptions,
};

/// Elements per block when streaming fill values into a new body.
const FILL_BLOCK_ELEMENTS: usize = 1 << 16;

/// The dense file adapter.
#[derive(Debug, Default)]
pub struct DenseAdapter;

impl StorageAdapter for DenseAdapter {
    fn scheme(&self) -> &'static str {
        "file"
    }

    fn data_extension(&self) -> &'static str {
        "dat"
    }

    fn open(
        &self,
        body_path: &Path,
        options: &StorageOptions,
        layout: &DatasetLayout,
    ) -> Result<Box<dyn Dataset>, StorageError> {
        options.validate(&layout.shape)?;
        Ok(Box::new(DenseDataset {
            path: body_path.to_path_buf(),
            layout: layout.clone(),
        }))
    }

    fn delete(&self, body_path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(body_path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    fn read_meta(
        &self,
        meta_path: &Path,
        attributes: &[AttributeSchema],
    ) -> Result<ArrayMeta, StorageError> {
        let raw = match std::fs::read_to_string(meta_path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::MetaNotFound(meta_path.to_path_buf()))
            }
            Err(error) => return Err(error.into()),
        };
        let corrupt = |reason: String| StorageError::CorruptMeta {
            path: meta_path.to_path_buf(),
            reason,
        };
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|error| corrupt(error.to_string()))?;
        ArrayMeta::from_json(&value, attributes).map_err(corrupt)
    }

    fn write_meta(&self, meta_path: &Path, meta: &ArrayMeta) -> Result<(), StorageError> {
        write_json_atomic(meta_path, &meta.to_json())
    }

    fn delete_meta(&self, meta_path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(meta_path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// One open dense dataset.
struct DenseDataset {
    path: PathBuf,
    layout: DatasetLayout,
}

impl DenseDataset {
    fn element_size(&self) -> u64 {
        self.layout.element_type.size() as u64
    }

    /// Open the body for reading, checking its size against the layout.
    fn open_body(&self) -> Result<File, StorageError> {
        let file = File::open(&self.path)?;
        let expected = self.layout.num_bytes();
        let actual = file.metadata()?.len();
        if actual != expected {
            return Err(StorageError::Integrity(format!(
                "body {} holds {actual} bytes, the layout predicts {expected}",
                self.path.display()
            )));
        }
        Ok(file)
    }

    /// Create the body, streaming fill values over the whole shape.
    fn materialize(&self) -> Result<File, StorageError> {
        debug!(path = %self.path.display(), "materializing dense body");
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let block = TypedBuffer::filled(
            self.layout.fill_value,
            FILL_BLOCK_ELEMENTS.min(self.layout.num_elements() as usize),
        )
        .to_ne_bytes();
        let mut remaining = self.layout.num_bytes() as usize;
        while remaining > 0 {
            let take = remaining.min(block.len());
            file.write_all(&block[..take])?;
            remaining -= take;
        }
        Ok(file)
    }
}

impl Dataset for DenseDataset {
    fn read(&mut self, region: &Bounds) -> Result<TypedBuffer, StorageError> {
        if !self.has_body() {
            return Ok(TypedBuffer::filled(
                self.layout.fill_value,
                region.num_elements() as usize,
            ));
        }
        let mut file = self.open_body()?;
        let element_size = self.element_size();
        let spans = region
            .contiguous_spans(&self.layout.shape)
            .map_err(crate::buffer::BufferError::from)?;
        let mut bytes = Vec::with_capacity((region.num_elements() * element_size) as usize);
        let mut chunk = Vec::new();
        for (offset, len) in spans {
            file.seek(SeekFrom::Start(offset * element_size))?;
            chunk.resize((len * element_size) as usize, 0);
            file.read_exact(&mut chunk)?;
            bytes.extend_from_slice(&chunk);
        }
        TypedBuffer::from_ne_bytes(self.layout.element_type, &bytes).map_err(|_| {
            StorageError::Integrity(format!(
                "body {} does not decode as {}",
                self.path.display(),
                self.layout.element_type
            ))
        })
    }

    fn write(&mut self, region: &Bounds, data: &TypedBuffer) -> Result<(), StorageError> {
        if data.element_type() != self.layout.element_type {
            return Err(crate::buffer::BufferError::DtypeMismatch {
                expected: self.layout.element_type,
                got: data.element_type(),
            }
            .into());
        }
        if data.len() as u64 != region.num_elements() {
            return Err(crate::buffer::BufferError::LengthMismatch {
                expected: region.num_elements() as usize,
                got: data.len(),
            }
            .into());
        }
        let mut file = if self.has_body() {
            self.open_body()?
        } else {
            self.materialize()?
        };
        let element_size = self.element_size();
        let bytes = data.to_ne_bytes();
        let mut cursor = 0_usize;
        let spans = region
            .contiguous_spans(&self.layout.shape)
            .map_err(crate::buffer::BufferError::from)?;
        for (offset, len) in spans {
            let len = (len * element_size) as usize;
            file.seek(SeekFrom::Start(offset * element_size))?;
            file.write_all(&bytes[cursor..cursor + len])?;
            cursor += len;
        }
        file.flush()?;
        Ok(())
    }

    fn truncate(&mut self) -> Result<(), StorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    fn has_body(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::Scalar;
    use crate::schema::ElementType;

    use super::*;

    fn layout() -> DatasetLayout {
        DatasetLayout {
            shape: vec![4, 4],
            element_type: ElementType::F64,
            fill_value: Scalar::F64(f64::NAN),
        }
    }

    #[test]
    fn absent_body_reads_fill() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.dat");
        let adapter = DenseAdapter;
        let mut dataset = adapter
            .open(&path, &StorageOptions::default(), &layout())
            .unwrap();
        assert!(!dataset.has_body());
        let region = Bounds::from_ranges(&[0..2, 0..2]);
        let buffer = dataset.read(&region).unwrap();
        assert!(buffer.is_all(Scalar::F64(f64::NAN)));
        assert!(!path.exists());
    }

    #[test]
    fn write_materializes_and_reads_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.dat");
        let adapter = DenseAdapter;
        let mut dataset = adapter
            .open(&path, &StorageOptions::default(), &layout())
            .unwrap();
        let region = Bounds::from_ranges(&[1..3, 1..3]);
        let block = TypedBuffer::F64(vec![1.0, 2.0, 3.0, 4.0]);
        dataset.write(&region, &block).unwrap();
        assert!(dataset.has_body());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4 * 4 * 8);
        assert_eq!(dataset.read(&region).unwrap(), block);

        // Untouched cells keep the fill value.
        let corner = Bounds::from_ranges(&[0..1, 0..1]);
        assert!(dataset.read(&corner).unwrap().is_all(Scalar::F64(f64::NAN)));

        // Truncation removes the body; reads synthesize fill again.
        dataset.truncate().unwrap();
        assert!(!dataset.has_body());
        assert!(dataset.read(&region).unwrap().is_all(Scalar::F64(f64::NAN)));
    }

    #[test]
    fn wrong_dtype_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.dat");
        let adapter = DenseAdapter;
        let mut dataset = adapter
            .open(&path, &StorageOptions::default(), &layout())
            .unwrap();
        let region = Bounds::from_ranges(&[0..1, 0..1]);
        let wrong = TypedBuffer::F32(vec![1.0]);
        assert!(matches!(
            dataset.write(&region, &wrong),
            Err(StorageError::IncompatibleBuffer(_))
        ));
    }

    #[test]
    fn short_body_is_an_integrity_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.dat");
        std::fs::write(&path, b"short").unwrap();
        let adapter = DenseAdapter;
        let mut dataset = adapter
            .open(&path, &StorageOptions::default(), &layout())
            .unwrap();
        let region = Bounds::from_ranges(&[0..1, 0..1]);
        assert!(matches!(
            dataset.read(&region),
            Err(StorageError::Integrity(_))
        ));
    }
}
