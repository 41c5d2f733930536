//! Value capability and the byte-view payload.

use bytes::Bytes;
use std::fmt;

/// Capability a store requires of its payloads: a byte-length accessor used
/// for capacity accounting.
pub trait Value {
    /// Size of the payload in bytes.
    fn byte_len(&self) -> usize;
}

/// An immutable view over cached bytes.
///
/// Cloning is cheap (the backing buffer is reference-counted) and the buffer
/// is never mutated after construction, so a view handed out by a store
/// cannot be altered by either side.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ByteView {
    bytes: Bytes,
}

impl ByteView {
    /// Wrap an owned buffer without copying.
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// Copy a slice into a fresh view.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(data),
        }
    }

    /// Length of the viewed bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow the viewed bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the view, returning the shared buffer.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl Value for ByteView {
    fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

impl From<Bytes> for ByteView {
    fn from(bytes: Bytes) -> Self {
        Self { bytes }
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Bytes::from(bytes),
        }
    }
}

impl From<&[u8]> for ByteView {
    fn from(data: &[u8]) -> Self {
        Self::copy_from_slice(data)
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        Self::copy_from_slice(data.as_bytes())
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteView({} bytes)", self.bytes.len())
    }
}

impl fmt::Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}
