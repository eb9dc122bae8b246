//! Byte stream collaborators.
//!
//! The engine reads assets through the [`ByteStream`] trait; anything that
//! satisfies it can back a file object. File and in-memory implementations
//! are provided, plus a sub-range wrapper for playing a chunk out of a
//! larger container.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// A readable, optionally seekable byte source.
pub trait ByteStream: Send + Sync {
    /// Read up to `buf.len()` bytes. Returns the number of bytes read; 0 at
    /// the end of the stream.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write bytes to the stream. Unsupported by default.
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Ok(0)
    }

    /// Current position in bytes.
    fn position(&mut self) -> u64;

    /// Seek to a position. Fails on non-seekable streams.
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64>;

    /// Push one byte back into the stream; it is returned by the next read.
    fn push_back_byte(&mut self, byte: u8) -> std::io::Result<()>;

    /// Total size in bytes, 0 if unknown.
    fn size(&mut self) -> u64;

    /// True if the stream supports seeking.
    fn can_seek(&self) -> bool;

    /// True if the stream is ready for IO.
    fn ready(&self) -> bool {
        true
    }

    /// True once the end of the stream has been reached.
    fn end_of_stream(&mut self) -> bool;
}

/// Identifies a sub-range of a byte source for chunked playback.
/// `{0, 0}` means the whole asset with unknown bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssetDescriptor {
    /// Read offset in bytes.
    pub offset_bytes: u64,
    /// Length of the range in bytes; 0 for the remainder of the asset.
    pub length_bytes: u64,
}

impl AssetDescriptor {
    pub fn new(offset_bytes: u64, length_bytes: u64) -> Self {
        Self {
            offset_bytes,
            length_bytes,
        }
    }

    /// The whole asset, bounds unknown.
    pub fn whole() -> Self {
        Self::default()
    }

    pub fn is_whole(&self) -> bool {
        self.offset_bytes == 0 && self.length_bytes == 0
    }
}

/// A [`ByteStream`] over a file on disk.
pub struct FileByteStream {
    file: File,
    len: u64,
    pushed_back: Option<u8>,
}

impl FileByteStream {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            pushed_back: None,
        })
    }
}

impl ByteStream for FileByteStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        if let Some(byte) = self.pushed_back.take() {
            buf[0] = byte;
            written = 1;
        }
        Ok(written + self.file.read(&mut buf[written..])?)
    }

    fn position(&mut self) -> u64 {
        let pos = self.file.stream_position().unwrap_or(0);
        pos.saturating_sub(self.pushed_back.is_some() as u64)
    }

    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.pushed_back = None;
        self.file.seek(pos)
    }

    fn push_back_byte(&mut self, byte: u8) -> std::io::Result<()> {
        if self.pushed_back.is_some() {
            return Err(std::io::Error::other("push-back buffer full"));
        }
        self.pushed_back = Some(byte);
        Ok(())
    }

    fn size(&mut self) -> u64 {
        self.len
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn end_of_stream(&mut self) -> bool {
        self.position() >= self.len
    }
}

/// A [`ByteStream`] over an in-memory buffer.
pub struct MemoryByteStream {
    data: Vec<u8>,
    position: u64,
    pushed_back: Option<u8>,
}

impl MemoryByteStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            pushed_back: None,
        }
    }
}

impl ByteStream for MemoryByteStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        if let Some(byte) = self.pushed_back.take() {
            buf[0] = byte;
            written = 1;
        }
        let start = (self.position as usize).min(self.data.len());
        let n = (buf.len() - written).min(self.data.len() - start);
        buf[written..written + n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        Ok(written + n)
    }

    fn position(&mut self) -> u64 {
        self.position.saturating_sub(self.pushed_back.is_some() as u64)
    }

    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.pushed_back = None;
        let len = self.data.len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => len + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 {
            return Err(std::io::Error::other("seek before start"));
        }
        self.position = target as u64;
        Ok(self.position)
    }

    fn push_back_byte(&mut self, byte: u8) -> std::io::Result<()> {
        if self.pushed_back.is_some() {
            return Err(std::io::Error::other("push-back buffer full"));
        }
        self.pushed_back = Some(byte);
        Ok(())
    }

    fn size(&mut self) -> u64 {
        self.data.len() as u64
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn end_of_stream(&mut self) -> bool {
        self.pushed_back.is_none() && self.position as usize >= self.data.len()
    }
}

/// Restricts an inner stream to the sub-range named by an
/// [`AssetDescriptor`].
pub struct SubrangeStream {
    inner: Box<dyn ByteStream>,
    offset: u64,
    length: u64,
}

impl SubrangeStream {
    pub fn new(mut inner: Box<dyn ByteStream>, descriptor: AssetDescriptor) -> std::io::Result<Self> {
        let total = inner.size();
        let offset = descriptor.offset_bytes.min(total);
        let length = if descriptor.length_bytes == 0 {
            total - offset
        } else {
            descriptor.length_bytes.min(total - offset)
        };
        inner.seek(SeekFrom::Start(offset))?;
        Ok(Self {
            inner,
            offset,
            length,
        })
    }

    fn local_position(&mut self) -> u64 {
        self.inner.position().saturating_sub(self.offset)
    }
}

impl ByteStream for SubrangeStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.length.saturating_sub(self.local_position());
        let n = (buf.len() as u64).min(remaining) as usize;
        self.inner.read(&mut buf[..n])
    }

    fn position(&mut self) -> u64 {
        self.local_position()
    }

    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.length as i64 + offset,
            SeekFrom::Current(offset) => self.local_position() as i64 + offset,
        };
        if target < 0 {
            return Err(std::io::Error::other("seek before start"));
        }
        let target = (target as u64).min(self.length);
        self.inner.seek(SeekFrom::Start(self.offset + target))?;
        Ok(target)
    }

    fn push_back_byte(&mut self, byte: u8) -> std::io::Result<()> {
        self.inner.push_back_byte(byte)
    }

    fn size(&mut self) -> u64 {
        self.length
    }

    fn can_seek(&self) -> bool {
        self.inner.can_seek()
    }

    fn ready(&self) -> bool {
        self.inner.ready()
    }

    fn end_of_stream(&mut self) -> bool {
        self.local_position() >= self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_stream_read_and_seek() {
        let mut stream = MemoryByteStream::new((0..10).collect());
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(stream.position(), 4);

        stream.seek(SeekFrom::Start(8)).unwrap();
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[8, 9]);
        assert!(stream.end_of_stream());
    }

    #[test]
    fn test_memory_stream_push_back() {
        let mut stream = MemoryByteStream::new(vec![10, 20]);
        let mut buf = [0u8; 1];
        stream.read(&mut buf).unwrap();
        stream.push_back_byte(99).unwrap();
        assert!(stream.push_back_byte(1).is_err());
        stream.read(&mut buf).unwrap();
        assert_eq!(buf[0], 99);
        stream.read(&mut buf).unwrap();
        assert_eq!(buf[0], 20);
    }

    #[test]
    fn test_subrange_stream_bounds() {
        let inner = Box::new(MemoryByteStream::new((0..100).collect()));
        let mut stream =
            SubrangeStream::new(inner, AssetDescriptor::new(10, 20)).unwrap();
        assert_eq!(stream.size(), 20);
        assert_eq!(stream.position(), 0);

        let mut buf = [0u8; 30];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(n, 20);
        assert_eq!(buf[0], 10);
        assert_eq!(buf[19], 29);
        assert!(stream.end_of_stream());

        stream.seek(SeekFrom::Start(5)).unwrap();
        let n = stream.read(&mut buf[..2]).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], &[15, 16]);
    }

    #[test]
    fn test_whole_descriptor() {
        assert!(AssetDescriptor::whole().is_whole());
        assert!(!AssetDescriptor::new(0, 10).is_whole());

        let inner = Box::new(MemoryByteStream::new((0..10).collect()));
        let mut stream = SubrangeStream::new(inner, AssetDescriptor::whole()).unwrap();
        assert_eq!(stream.size(), 10);
    }
}
