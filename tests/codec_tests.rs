//! Integration tests for the tensor codecs.

use bytes::Bytes;
use proptest::prelude::*;

use kv_chunk_store::cache::codec::{
    Deserializer, FastDeserializer, FastSerializer, Serializer, ZstdDeserializer, ZstdSerializer,
};
use kv_chunk_store::{CodecError, DType, TensorBlock};

const DTYPES: [DType; 9] = [
    DType::U8,
    DType::I8,
    DType::I16,
    DType::I32,
    DType::I64,
    DType::F16,
    DType::Bf16,
    DType::F32,
    DType::F64,
];

/// Random dtype, shape of up to 4 dims, and matching raw bytes.
fn tensor_strategy() -> impl Strategy<Value = TensorBlock> {
    (0..DTYPES.len(), prop::collection::vec(1usize..5, 1..=4)).prop_flat_map(|(d, shape)| {
        let dtype = DTYPES[d];
        let len = shape.iter().product::<usize>() * dtype.size_in_bytes();
        prop::collection::vec(any::<u8>(), len).prop_map(move |data| {
            TensorBlock::new(dtype, shape.clone(), Bytes::from(data)).unwrap()
        })
    })
}

proptest! {
    #[test]
    fn fast_codec_roundtrip(tensor in tensor_strategy()) {
        let bytes = FastSerializer::new().to_bytes(&tensor).unwrap();
        prop_assert_eq!(bytes.len(), tensor.nbytes());

        let restored = FastDeserializer::new(tensor.dtype())
            .from_bytes(bytes)
            .unwrap()
            .reshape(tensor.shape().to_vec())
            .unwrap();
        prop_assert_eq!(restored.to_bytes(), tensor.to_bytes());
    }

    #[test]
    fn transposed_views_roundtrip(tensor in tensor_strategy()) {
        let ndim = tensor.shape().len();
        let view = tensor.transpose(0, ndim - 1).unwrap();

        let bytes = FastSerializer::new().to_bytes(&view).unwrap();
        let restored = FastDeserializer::new(view.dtype())
            .from_bytes(bytes)
            .unwrap()
            .reshape(view.shape().to_vec())
            .unwrap();
        prop_assert_eq!(restored, view);
    }

    #[test]
    fn misaligned_buffers_rejected(len in 1usize..64) {
        let bytes = Bytes::from(vec![0u8; len * 4 + 1]);
        let result = FastDeserializer::new(DType::F32).from_bytes(bytes);
        let is_length_mismatch = matches!(result, Err(CodecError::LengthMismatch { .. }));
        prop_assert!(is_length_mismatch);
    }
}

#[test]
fn test_fast_codec_has_no_header() {
    let tensor = TensorBlock::from_slice(&[0x01u8, 0x02, 0x03, 0x04], vec![2, 2]).unwrap();
    let bytes = FastSerializer::new().to_bytes(&tensor).unwrap();
    assert_eq!(bytes.as_ref(), &[0x01, 0x02, 0x03, 0x04]);

    // Same bytes, different caller-supplied element type.
    let as_u8 = FastDeserializer::new(DType::U8).from_bytes(bytes.clone()).unwrap();
    assert_eq!(as_u8.shape(), &[4]);
    let as_i16 = FastDeserializer::new(DType::I16).from_bytes(bytes).unwrap();
    assert_eq!(as_i16.shape(), &[2]);
}

#[test]
fn test_reshape_mismatch_rejected() {
    let flat = FastDeserializer::new(DType::F16)
        .from_bytes(Bytes::from(vec![0u8; 24]))
        .unwrap();
    assert!(matches!(
        flat.reshape(vec![3, 5]),
        Err(CodecError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_zstd_codec_matches_fast_codec() {
    let values: Vec<f32> = (0..4096).map(|i| (i % 17) as f32).collect();
    let tensor = TensorBlock::from_slice(&values, vec![8, 512]).unwrap();

    let compressed = ZstdSerializer::new(3).to_bytes(&tensor).unwrap();
    let raw = FastSerializer::new().to_bytes(&tensor).unwrap();
    assert!(compressed.len() < raw.len());

    let restored = ZstdDeserializer::new(DType::F32).from_bytes(compressed).unwrap();
    assert_eq!(restored.to_bytes(), raw);
    assert_eq!(restored.to_vec::<f32>().unwrap(), values);
}
