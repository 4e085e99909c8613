//! The single in-memory file currently handed out to the host process

use std::os::raw::c_int;
use std::path::{Path, PathBuf};

/// What the host process holds for a virtual file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHandle {
    /// A synthetic descriptor returned from `open`
    Descriptor(c_int),
    /// An in-memory stream returned from `fopen`, stored as its address
    Stream(usize),
}

/// Cached content served in place of a real file
#[derive(Debug)]
pub struct VirtualFile {
    handle: SessionHandle,
    path: PathBuf,
    content: Vec<u8>,
    cursor: usize,
}

impl VirtualFile {
    pub fn new(handle: SessionHandle, path: PathBuf, content: Vec<u8>) -> Self {
        Self {
            handle,
            path,
            content,
            cursor: 0,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn is_descriptor(&self, fd: c_int) -> bool {
        self.handle == SessionHandle::Descriptor(fd)
    }

    pub fn is_stream(&self, stream: usize) -> bool {
        self.handle == SessionHandle::Stream(stream)
    }

    /// Copy up to `buf.len()` bytes from the cursor; 0 means end of file
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let remaining = &self.content[self.cursor.min(self.content.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(content: &[u8]) -> VirtualFile {
        VirtualFile::new(
            SessionHandle::Descriptor(4321),
            PathBuf::from("/info/a.list"),
            content.to_vec(),
        )
    }

    #[test]
    fn chunked_reads_reassemble_content() {
        let content = b"/.\n/usr\n/usr/bin\n/usr/bin/true\n";
        let mut vf = file(content);

        let mut out = Vec::new();
        let mut buf = [0u8; 5];
        loop {
            let n = vf.read(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, content);
        assert_eq!(vf.position(), content.len());
    }

    #[test]
    fn read_past_end_returns_zero() {
        let mut vf = file(b"abc");
        let mut buf = [0u8; 10];
        assert_eq!(vf.read(&mut buf), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(vf.read(&mut buf), 0);
        assert_eq!(vf.read(&mut buf), 0);
    }

    #[test]
    fn zero_length_buffer_reads_nothing() {
        let mut vf = file(b"abc");
        assert_eq!(vf.read(&mut []), 0);
        assert_eq!(vf.position(), 0);
    }

    #[test]
    fn empty_file_is_immediately_at_eof() {
        let mut vf = file(b"");
        assert!(vf.is_empty());
        assert_eq!(vf.read(&mut [0u8; 4]), 0);
    }

    #[test]
    fn handle_matching() {
        let vf = file(b"x");
        assert!(vf.is_descriptor(4321));
        assert!(!vf.is_descriptor(3));
        assert!(!vf.is_stream(4321));

        let stream = VirtualFile::new(SessionHandle::Stream(0xdead), PathBuf::from("/x"), vec![]);
        assert!(stream.is_stream(0xdead));
        assert!(!stream.is_descriptor(4321));
    }
}
