//! Tensor blocks and element types.
//!
//! A tensor block is one chunk of KV-cache data for a run of tokens, with the
//! batch dimension already stripped by the producer. Blocks may be strided
//! views over a shared host buffer; the codec gathers them into contiguous
//! order before anything is stored.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use crate::cache::codec::CodecError;

/// Element type of a tensor block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    I8,
    I16,
    I32,
    I64,
    F16,
    Bf16,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::I16 | DType::F16 | DType::Bf16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::U8 => "u8",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F16 => "f16",
            DType::Bf16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        f.write_str(name)
    }
}

impl FromStr for DType {
    type Err = CodecError;

    /// Accepts both the short names and the common framework aliases
    /// (`half`, `float`, `bfloat16`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dtype = match s.to_ascii_lowercase().as_str() {
            "u8" | "uint8" => DType::U8,
            "i8" | "int8" => DType::I8,
            "i16" | "int16" | "short" => DType::I16,
            "i32" | "int32" | "int" => DType::I32,
            "i64" | "int64" | "long" => DType::I64,
            "f16" | "float16" | "half" => DType::F16,
            "bf16" | "bfloat16" => DType::Bf16,
            "f32" | "float32" | "float" => DType::F32,
            "f64" | "float64" | "double" => DType::F64,
            _ => return Err(CodecError::UnknownDType(s.to_string())),
        };
        Ok(dtype)
    }
}

/// Rust element types that can back a tensor block.
pub trait Element: bytemuck::Pod {
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(impl Element for $ty {
            const DTYPE: DType = $dtype;
        })*
    };
}

impl_element! {
    u8 => DType::U8,
    i8 => DType::I8,
    i16 => DType::I16,
    i32 => DType::I32,
    i64 => DType::I64,
    f16 => DType::F16,
    bf16 => DType::Bf16,
    f32 => DType::F32,
    f64 => DType::F64,
}

/// Row-major strides (in elements) for a shape.
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Element count of a shape, or `None` if it overflows.
fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Byte size of a shape, saturating at `usize::MAX` on overflow.
fn shape_bytes(shape: &[usize], dtype: DType) -> usize {
    checked_numel(shape)
        .and_then(|n| n.checked_mul(dtype.size_in_bytes()))
        .unwrap_or(usize::MAX)
}

/// A host-resident tensor block: element type, shape, strides and raw storage.
///
/// `strides` and `offset` are expressed in elements, not bytes. Cloning is
/// cheap; the storage buffer is reference counted.
#[derive(Debug, Clone)]
pub struct TensorBlock {
    dtype: DType,
    shape: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
    storage: Bytes,
}

impl TensorBlock {
    /// Wrap a contiguous row-major buffer.
    pub fn new(dtype: DType, shape: Vec<usize>, storage: Bytes) -> Result<Self, CodecError> {
        let expected = shape_bytes(&shape, dtype);
        if storage.len() != expected {
            return Err(CodecError::ShapeMismatch {
                shape,
                expected_bytes: expected,
                actual_bytes: storage.len(),
            });
        }
        let strides = contiguous_strides(&shape);
        Ok(Self {
            dtype,
            shape,
            strides,
            offset: 0,
            storage,
        })
    }

    /// One-dimensional tensor over a raw byte buffer.
    pub fn from_raw(dtype: DType, storage: Bytes) -> Result<Self, CodecError> {
        let elem = dtype.size_in_bytes();
        if storage.len() % elem != 0 {
            return Err(CodecError::LengthMismatch {
                len: storage.len(),
                dtype,
                elem_size: elem,
            });
        }
        let numel = storage.len() / elem;
        Self::new(dtype, vec![numel], storage)
    }

    /// Copy a typed slice into a new contiguous block.
    pub fn from_slice<T: Element>(data: &[T], shape: Vec<usize>) -> Result<Self, CodecError> {
        let storage = Bytes::copy_from_slice(bytemuck::cast_slice(data));
        Self::new(T::DTYPE, shape, storage)
    }

    /// Build a strided view over `self`'s storage.
    ///
    /// Fails if any addressable element would fall outside the buffer.
    pub fn with_strides(
        &self,
        shape: Vec<usize>,
        strides: Vec<usize>,
        offset: usize,
    ) -> Result<Self, CodecError> {
        if shape.len() != strides.len() {
            return Err(CodecError::InvalidView(format!(
                "shape has {} dims but strides has {}",
                shape.len(),
                strides.len()
            )));
        }
        if shape_bytes(&shape, self.dtype) == usize::MAX {
            return Err(CodecError::InvalidView(format!(
                "shape {shape:?} overflows the addressable size"
            )));
        }
        let storage_elems = self.storage.len() / self.dtype.size_in_bytes();
        if offset > storage_elems {
            return Err(CodecError::InvalidView(format!(
                "offset {offset} is past the {storage_elems} stored elements"
            )));
        }
        if shape.iter().all(|&d| d > 0) {
            let last = shape
                .iter()
                .zip(&strides)
                .try_fold(offset, |acc, (&d, &s)| (d - 1).checked_mul(s)?.checked_add(acc));
            match last {
                Some(last) if last < storage_elems => {}
                Some(last) => {
                    return Err(CodecError::InvalidView(format!(
                        "view reaches element {last} but storage holds {storage_elems}"
                    )))
                }
                None => {
                    return Err(CodecError::InvalidView(
                        "view extent overflows the addressable size".to_string(),
                    ))
                }
            }
        }
        Ok(Self {
            dtype: self.dtype,
            shape,
            strides,
            offset,
            storage: self.storage.clone(),
        })
    }

    /// Swap two dimensions without copying.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Self, CodecError> {
        let ndim = self.shape.len();
        if dim0 >= ndim || dim1 >= ndim {
            return Err(CodecError::InvalidView(format!(
                "cannot transpose dims {dim0} and {dim1} of a {ndim}-d tensor"
            )));
        }
        let mut view = self.clone();
        view.shape.swap(dim0, dim1);
        view.strides.swap(dim0, dim1);
        Ok(view)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Logical size in bytes (independent of the backing buffer).
    pub fn nbytes(&self) -> usize {
        self.numel() * self.dtype.size_in_bytes()
    }

    /// Whether the view is laid out row-major without gaps.
    pub fn is_contiguous(&self) -> bool {
        let expected = contiguous_strides(&self.shape);
        self.shape
            .iter()
            .zip(self.strides.iter().zip(&expected))
            .all(|(&d, (s, e))| d <= 1 || s == e)
    }

    /// Return a contiguous, compact copy of this block.
    ///
    /// Contiguous views are sliced without copying; strided views are gathered
    /// element by element into a fresh buffer.
    pub fn contiguous(&self) -> Self {
        let elem = self.dtype.size_in_bytes();
        let storage = if self.numel() == 0 {
            Bytes::new()
        } else if self.is_contiguous() {
            let start = self.offset * elem;
            self.storage.slice(start..start + self.nbytes())
        } else {
            Bytes::from(self.gather(elem))
        };
        Self {
            dtype: self.dtype,
            strides: contiguous_strides(&self.shape),
            shape: self.shape.clone(),
            offset: 0,
            storage,
        }
    }

    fn gather(&self, elem: usize) -> Vec<u8> {
        let numel = self.numel();
        let mut out = Vec::with_capacity(numel * elem);
        let mut index = vec![0usize; self.shape.len()];
        for _ in 0..numel {
            let pos = self.offset
                + index
                    .iter()
                    .zip(&self.strides)
                    .map(|(i, s)| i * s)
                    .sum::<usize>();
            let start = pos * elem;
            out.extend_from_slice(&self.storage[start..start + elem]);

            for d in (0..index.len()).rev() {
                index[d] += 1;
                if index[d] < self.shape[d] {
                    break;
                }
                index[d] = 0;
            }
        }
        out
    }

    /// Contiguous element bytes of this block.
    pub fn to_bytes(&self) -> Bytes {
        self.contiguous().storage
    }

    /// Reinterpret the block under a new shape with the same element count.
    pub fn reshape(&self, shape: Vec<usize>) -> Result<Self, CodecError> {
        if checked_numel(&shape) != Some(self.numel()) {
            return Err(CodecError::ShapeMismatch {
                expected_bytes: shape_bytes(&shape, self.dtype),
                actual_bytes: self.nbytes(),
                shape,
            });
        }
        let base = self.contiguous();
        Ok(Self {
            strides: contiguous_strides(&shape),
            shape,
            ..base
        })
    }

    /// Copy the elements out as a typed vector in row-major order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, CodecError> {
        if T::DTYPE != self.dtype {
            return Err(CodecError::DTypeMismatch {
                expected: self.dtype,
                requested: T::DTYPE,
            });
        }
        Ok(bytemuck::pod_collect_to_vec(&self.to_bytes()[..]))
    }
}

/// Two blocks are equal when they hold the same elements under the same shape,
/// regardless of how either is laid out in memory.
impl PartialEq for TensorBlock {
    fn eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype && self.shape == other.shape && self.to_bytes() == other.to_bytes()
    }
}
