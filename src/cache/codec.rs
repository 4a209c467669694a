//! Tensor block codecs.
//!
//! The fast codec is a bit-exact, metadata-free mapping between a tensor block
//! and its raw element bytes. Neither shape nor element type travels with the
//! bytes; the reader supplies the element type when building a deserializer
//! and reshapes the one-dimensional result itself.
//!
//! The zstd codec applies the same mapping and compresses the result. It is
//! equally metadata-free.

use bytes::Bytes;
use thiserror::Error;
use tracing::trace;

use crate::cache::tensor::{DType, TensorBlock};
use crate::config::{CodecConfig, Compression};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("buffer of {len} bytes is not a multiple of the {dtype} element size ({elem_size})")]
    LengthMismatch {
        len: usize,
        dtype: DType,
        elem_size: usize,
    },

    #[error("shape {shape:?} needs {expected_bytes} bytes but the tensor holds {actual_bytes}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected_bytes: usize,
        actual_bytes: usize,
    },

    #[error("unknown element type: {0}")]
    UnknownDType(String),

    #[error("element type mismatch: tensor holds {expected}, requested {requested}")]
    DTypeMismatch { expected: DType, requested: DType },

    #[error("invalid tensor view: {0}")]
    InvalidView(String),

    #[error("zstd failed: {0}")]
    Zstd(#[from] std::io::Error),
}

/// Converts a tensor block into the bytes stored under a key.
pub trait Serializer: Send + Sync {
    fn to_bytes(&self, tensor: &TensorBlock) -> Result<Bytes, CodecError>;
}

/// Rebuilds a one-dimensional tensor block from stored bytes.
pub trait Deserializer: Send + Sync {
    /// Element type the bytes are interpreted as.
    fn dtype(&self) -> DType;

    fn from_bytes(&self, bytes: Bytes) -> Result<TensorBlock, CodecError>;
}

/// Raw element bytes, nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct FastSerializer;

impl FastSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for FastSerializer {
    fn to_bytes(&self, tensor: &TensorBlock) -> Result<Bytes, CodecError> {
        // Strided views are gathered into a compact host buffer first.
        let buf = tensor.to_bytes();
        trace!(
            dtype = %tensor.dtype(),
            shape = ?tensor.shape(),
            bytes = buf.len(),
            "Serialized tensor block"
        );
        Ok(buf)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FastDeserializer {
    dtype: DType,
}

impl FastDeserializer {
    pub fn new(dtype: DType) -> Self {
        Self { dtype }
    }
}

impl Deserializer for FastDeserializer {
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn from_bytes(&self, bytes: Bytes) -> Result<TensorBlock, CodecError> {
        TensorBlock::from_raw(self.dtype, bytes)
    }
}

/// Fast codec output compressed with zstd.
#[derive(Debug, Clone, Copy)]
pub struct ZstdSerializer {
    level: i32,
}

impl ZstdSerializer {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Serializer for ZstdSerializer {
    fn to_bytes(&self, tensor: &TensorBlock) -> Result<Bytes, CodecError> {
        let raw = tensor.to_bytes();
        let compressed = zstd::encode_all(&raw[..], self.level)?;
        trace!(
            raw = raw.len(),
            compressed = compressed.len(),
            level = self.level,
            "Compressed tensor block"
        );
        Ok(Bytes::from(compressed))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZstdDeserializer {
    dtype: DType,
}

impl ZstdDeserializer {
    pub fn new(dtype: DType) -> Self {
        Self { dtype }
    }
}

impl Deserializer for ZstdDeserializer {
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn from_bytes(&self, bytes: Bytes) -> Result<TensorBlock, CodecError> {
        let raw = zstd::decode_all(&bytes[..])?;
        TensorBlock::from_raw(self.dtype, Bytes::from(raw))
    }
}

/// Build the serializer selected by the codec configuration.
pub fn serializer_for(config: &CodecConfig) -> Box<dyn Serializer> {
    match config.compression {
        Compression::None => Box::new(FastSerializer::new()),
        Compression::Zstd => Box::new(ZstdSerializer::new(config.zstd_level)),
    }
}

/// Build the deserializer matching [`serializer_for`] for the given element type.
pub fn deserializer_for(config: &CodecConfig, dtype: DType) -> Box<dyn Deserializer> {
    match config.compression {
        Compression::None => Box::new(FastDeserializer::new(dtype)),
        Compression::Zstd => Box::new(ZstdDeserializer::new(dtype)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn test_fast_codec_is_raw_bytes() {
        let t = TensorBlock::from_slice(&[0x0201i16, 0x0403], vec![2]).unwrap();
        let bytes = FastSerializer::new().to_bytes(&t).unwrap();

        let mut expected = 0x0201i16.to_ne_bytes().to_vec();
        expected.extend_from_slice(&0x0403i16.to_ne_bytes());
        assert_eq!(bytes.as_ref(), &expected[..]);
    }

    #[test]
    fn test_fast_roundtrip_with_reshape() {
        let values: Vec<f16> = (0..24).map(|i| f16::from_f32(i as f32 * 0.5)).collect();
        let t = TensorBlock::from_slice(&values, vec![2, 3, 4]).unwrap();

        let bytes = FastSerializer::new().to_bytes(&t).unwrap();
        assert_eq!(bytes.len(), 48);

        let flat = FastDeserializer::new(DType::F16).from_bytes(bytes).unwrap();
        assert_eq!(flat.shape(), &[24]);
        assert_eq!(flat.reshape(vec![2, 3, 4]).unwrap(), t);
    }

    #[test]
    fn test_misaligned_length_rejected() {
        let err = FastDeserializer::new(DType::F32)
            .from_bytes(Bytes::from_static(&[1, 2, 3, 4, 5, 6]))
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::LengthMismatch {
                len: 6,
                dtype: DType::F32,
                elem_size: 4
            }
        ));
    }

    #[test]
    fn test_zstd_roundtrip() {
        let t = TensorBlock::from_slice(&[7.0f32; 1024], vec![32, 32]).unwrap();

        let compressed = ZstdSerializer::new(3).to_bytes(&t).unwrap();
        assert!(compressed.len() < t.nbytes()); // should compress well

        let flat = ZstdDeserializer::new(DType::F32).from_bytes(compressed).unwrap();
        assert_eq!(flat.reshape(vec![32, 32]).unwrap(), t);
    }

    #[test]
    fn test_zstd_rejects_garbage() {
        let result = ZstdDeserializer::new(DType::U8).from_bytes(Bytes::from_static(b"not zstd"));
        assert!(matches!(result, Err(CodecError::Zstd(_))));
    }

    #[test]
    fn test_codec_selection_follows_config() {
        let t = TensorBlock::from_slice(&[3u8; 256], vec![256]).unwrap();
        let config = CodecConfig {
            compression: Compression::Zstd,
            zstd_level: 1,
        };
        let bytes = serializer_for(&config).to_bytes(&t).unwrap();
        let back = deserializer_for(&config, DType::U8).from_bytes(bytes).unwrap();
        assert_eq!(back, t);
    }
}
