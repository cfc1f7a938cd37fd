//! Array-like frame buffers and their validation contract.
//!
//! An acquisition source hands back a [`SourceObject`] for every read. When
//! it is an array, [`ArrayView`] describes it the way a strided n-dimensional
//! array does: element type, shape, byte strides, and the backing storage.
//! The storage is reference-counted ([`Bytes`]), so accepting a frame never
//! copies pixel data.
//!
//! [`validate_frame`] enforces the camera contract before a frame is exposed:
//!
//! 1. the object is an array at all,
//! 2. it has exactly two dimensions,
//! 3. its elements are 16-bit unsigned integers,
//! 4. it is C-contiguous (row-major, no padding),
//! 5. its width and height equal the configured image geometry.
//!
//! A frame that fails any check is rejected whole; nothing is cropped or
//! padded.

use bytes::Bytes;
use std::fmt;
use std::ops::Deref;
use tokio::sync::MappedMutexGuard;

use crate::error::{AdapterError, AdapterResult};

/// Bit depth of the only supported pixel type.
pub const BIT_DEPTH: u32 = 16;

/// Element type of an array buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// `uint8`
    U8,
    /// `uint16`
    U16,
    /// `int16`
    I16,
    /// `uint32`
    U32,
    /// `int32`
    I32,
    /// `float32`
    F32,
    /// `float64`
    F64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::U32 | ElementType::I32 | ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::U8 => "uint8",
            ElementType::U16 => "uint16",
            ElementType::I16 => "int16",
            ElementType::U32 => "uint32",
            ElementType::I32 => "int32",
            ElementType::F32 => "float32",
            ElementType::F64 => "float64",
        };
        f.write_str(name)
    }
}

/// Strided view over an externally owned n-dimensional buffer.
#[derive(Debug, Clone)]
pub struct ArrayView {
    /// Element type of every value.
    pub dtype: ElementType,
    /// Extent of each dimension, outermost first (rows, then columns).
    pub shape: Vec<usize>,
    /// Byte step between consecutive indices of each dimension.
    pub strides: Vec<isize>,
    /// Backing storage, shared with the source.
    pub data: Bytes,
}

impl ArrayView {
    /// A C-contiguous 2-D `u16` image of `width` × `height` pixels.
    ///
    /// `data` must hold native-endian pixels, row by row.
    pub fn mono16(width: usize, height: usize, data: Bytes) -> Self {
        let item = ElementType::U16.size();
        Self {
            dtype: ElementType::U16,
            shape: vec![height, width],
            strides: vec![(width * item) as isize, item as isize],
            data,
        }
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Whether the strides describe a dense row-major layout.
    pub fn is_c_contiguous(&self) -> bool {
        if self.strides.len() != self.shape.len() {
            return false;
        }
        let mut expected = self.dtype.size() as isize;
        for (extent, stride) in self.shape.iter().zip(&self.strides).rev() {
            // A dimension of extent 1 never steps, so its stride is irrelevant.
            if *extent > 1 && *stride != expected {
                return false;
            }
            expected *= *extent as isize;
        }
        true
    }

    /// Byte length a dense buffer of this shape would need.
    pub fn expected_len(&self) -> usize {
        self.shape.iter().product::<usize>() * self.dtype.size()
    }
}

/// Whatever an acquisition source returned from a read.
#[derive(Debug, Clone)]
pub enum SourceObject {
    /// An n-dimensional array.
    Array(ArrayView),
    /// Anything that is not an array, described by its type name.
    Other(String),
}

/// Image geometry derived from the current configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Pixels per row.
    pub width: usize,
    /// Rows per frame.
    pub height: usize,
}

/// Check a source object against the frame contract.
///
/// On success the array is returned untouched, sharing its storage with
/// the source.
pub fn validate_frame(object: SourceObject, expected: FrameGeometry) -> AdapterResult<ArrayView> {
    let array = match object {
        SourceObject::Array(array) => array,
        SourceObject::Other(type_name) => {
            return Err(AdapterError::Validation(format!(
                "'image' property should return an array, got {type_name}"
            )));
        }
    };

    if array.ndim() != 2 || array.dtype != ElementType::U16 || !array.is_c_contiguous() {
        return Err(AdapterError::Validation(format!(
            "'image' property should be a 2-dimensional array that is c-contiguous in memory \
             and contains 16 bit unsigned integers (got ndim={}, dtype={}, strides={:?})",
            array.ndim(),
            array.dtype,
            array.strides
        )));
    }

    let (height, width) = (array.shape[0], array.shape[1]);
    if width != expected.width || height != expected.height {
        return Err(AdapterError::Validation(format!(
            "'image' dimensions should be ({}, {}) pixels, but were found to be ({}, {}) pixels",
            expected.width, expected.height, width, height
        )));
    }

    if array.data.len() < array.expected_len() {
        return Err(AdapterError::Validation(format!(
            "'image' buffer holds {} bytes, {} expected",
            array.data.len(),
            array.expected_len()
        )));
    }

    Ok(array)
}

/// Borrowed view of the last accepted frame.
///
/// Holding an `ImageBuffer` keeps the frame slot locked: the next fetch and
/// `shutdown` wait until it is dropped, so the bytes can never be replaced
/// underneath the caller.
pub struct ImageBuffer<'a> {
    frame: MappedMutexGuard<'a, ArrayView>,
}

impl<'a> ImageBuffer<'a> {
    pub(crate) fn new(frame: MappedMutexGuard<'a, ArrayView>) -> Self {
        Self { frame }
    }

    /// Frame description (shape, strides, element type).
    pub fn view(&self) -> &ArrayView {
        &self.frame
    }

    /// Pixels per row.
    pub fn width(&self) -> usize {
        self.frame.shape[1]
    }

    /// Rows in the frame.
    pub fn height(&self) -> usize {
        self.frame.shape[0]
    }

    /// Pixel bytes, row-major, native-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.frame.data[..self.frame.expected_len()]
    }
}

impl Deref for ImageBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for ImageBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("len", &self.as_bytes().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: usize, height: usize) -> ArrayView {
        ArrayView::mono16(width, height, Bytes::from(vec![0u8; width * height * 2]))
    }

    #[test]
    fn mono16_is_contiguous() {
        let view = frame(4, 3);
        assert_eq!(view.shape, vec![3, 4]);
        assert_eq!(view.strides, vec![8, 2]);
        assert!(view.is_c_contiguous());
    }

    #[test]
    fn transposed_strides_are_not_contiguous() {
        let mut view = frame(4, 3);
        view.strides = vec![2, 6];
        assert!(!view.is_c_contiguous());
    }

    #[test]
    fn padded_rows_are_not_contiguous() {
        let mut view = frame(4, 3);
        view.strides = vec![10, 2];
        assert!(!view.is_c_contiguous());
    }

    #[test]
    fn accepts_matching_frame_without_copy() {
        let view = frame(4, 3);
        let ptr = view.data.as_ptr();
        let accepted = validate_frame(
            SourceObject::Array(view),
            FrameGeometry { width: 4, height: 3 },
        )
        .unwrap();
        assert_eq!(accepted.data.as_ptr(), ptr);
    }

    #[test]
    fn size_mismatch_reports_both_geometries() {
        let err = validate_frame(
            SourceObject::Array(frame(4, 3)),
            FrameGeometry { width: 8, height: 6 },
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Frame validation error: 'image' dimensions should be (8, 6) pixels, \
             but were found to be (4, 3) pixels"
        );
    }

    #[test]
    fn rejects_non_array() {
        let err = validate_frame(
            SourceObject::Other("NoneType".into()),
            FrameGeometry { width: 1, height: 1 },
        )
        .unwrap_err();
        assert!(matches!(err, AdapterError::Validation(_)));
    }

    #[test]
    fn rejects_short_buffer() {
        let view = ArrayView::mono16(4, 3, Bytes::from(vec![0u8; 10]));
        assert!(validate_frame(
            SourceObject::Array(view),
            FrameGeometry { width: 4, height: 3 }
        )
        .is_err());
    }
}
