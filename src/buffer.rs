use derivative::*;
use std::path::Path;

/// A non-owning `(offset, length)` window into a [`Buffer`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferView {
    offset: usize,
    length: usize,
}

impl BufferView {
    /// Creates a view, or `None` if `offset + length` would leave a buffer of `size` bytes
    pub fn new(offset: usize, length: usize, size: usize) -> Option<BufferView> {
        match offset.checked_add(length) {
            Some(end) if end <= size => Some(BufferView { offset, length }),
            _ => None,
        }
    }

    /// The empty view at offset zero
    pub fn empty() -> BufferView {
        BufferView::default()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// One past the last byte of the view
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Returns true if `other` lies entirely inside this view
    pub fn contains(&self, other: &BufferView) -> bool {
        other.offset >= self.offset && other.end() <= self.end()
    }

    /// Smallest view covering both `self` and `other`. Empty views are ignored.
    pub fn union(&self, other: &BufferView) -> BufferView {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let offset = self.offset.min(other.offset);
        BufferView {
            offset,
            length: self.end().max(other.end()) - offset,
        }
    }
}

#[derive(Derivative, Default, PartialEq, Eq)]
#[derivative(Debug)]
/// An owned, fixed-size byte buffer
///
/// A buffer without a backing store is the "absent" sentinel, used to signal
/// that no ROM is loaded.
pub struct Buffer {
    #[derivative(Debug = "ignore")]
    data: Vec<u8>,
}

impl Buffer {
    /// Loads an entire file into a newly owned buffer
    pub fn read<P: AsRef<Path>>(path: P) -> std::io::Result<Buffer> {
        let data = std::fs::read(path.as_ref())?;
        log::debug!("Read {} bytes from {}", data.len(), path.as_ref().display());
        Ok(Buffer { data })
    }

    /// Stores the buffer verbatim
    pub fn write<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path.as_ref(), &self.data)?;
        log::debug!("Wrote {} bytes to {}", self.data.len(), path.as_ref().display());
        Ok(())
    }

    /// Allocates a zero-filled buffer
    pub fn zeroed(size: usize) -> Buffer {
        Buffer {
            data: vec![0; size],
        }
    }

    /// Releases the backing store. Safe to call on an absent buffer.
    pub fn dealloc(&mut self) {
        self.data = Vec::new();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for the absent sentinel
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Creates a view over `[offset, offset + length)`, if it fits
    pub fn view(&self, offset: usize, length: usize) -> Option<BufferView> {
        BufferView::new(offset, length, self.data.len())
    }

    /// The bytes behind `view`, or `None` if it no longer fits this buffer
    pub fn get(&self, view: BufferView) -> Option<&[u8]> {
        self.data.get(view.offset..view.end())
    }

    pub fn get_mut(&mut self, view: BufferView) -> Option<&mut [u8]> {
        self.data.get_mut(view.offset..view.end())
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Buffer {
        Buffer { data }
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Buffer {
        Buffer {
            data: data.to_vec(),
        }
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
