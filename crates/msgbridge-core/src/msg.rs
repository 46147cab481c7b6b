//! Message buffer
//!
//! A [`Msg`] is two growable byte segments, a header and a body, plus the
//! id of the pipe it arrived on. Protocols keep routing data (request ids,
//! survey ids) in the header; applications normally only touch the body.
//!
//! All `*_u32` helpers use network byte order. Trimming or chopping more
//! bytes than a segment holds fails with [`Errno::Inval`] and leaves the
//! segment untouched.

use crate::errno::Errno;
use crate::id::PipeId;
use core::fmt;

/// A message: header segment, body segment and originating pipe.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Msg {
    header: Vec<u8>,
    body: Vec<u8>,
    pipe: Option<PipeId>,
}

impl Msg {
    /// Empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Message whose body is `len` zero bytes.
    pub fn with_len(len: usize) -> Self {
        Msg {
            body: vec![0; len],
            ..Self::default()
        }
    }

    /// Message owning `body` as its body.
    pub fn from_body(body: impl Into<Vec<u8>>) -> Self {
        Msg {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Independent copy of this message.
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Resize the body to `len`, zero-filling any new bytes.
    pub fn realloc(&mut self, len: usize) {
        self.body.resize(len, 0);
    }

    /// Body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Mutable body bytes.
    pub fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    /// Header bytes.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Mutable header bytes.
    pub fn header_mut(&mut self) -> &mut Vec<u8> {
        &mut self.header
    }

    /// Body length.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Header length.
    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    /// Consume the message, keeping only the body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Pipe the message was received on, if any.
    pub fn pipe(&self) -> Option<PipeId> {
        self.pipe
    }

    /// Set the pipe used to route a reply.
    pub fn set_pipe(&mut self, pipe: Option<PipeId>) {
        self.pipe = pipe;
    }

    // -- body -----------------------------------------------------------

    /// Append bytes to the body.
    pub fn append(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    /// Prepend bytes to the body.
    pub fn insert(&mut self, data: &[u8]) {
        seg::insert(&mut self.body, data);
    }

    /// Remove `n` bytes from the front of the body.
    pub fn trim(&mut self, n: usize) -> Result<(), Errno> {
        seg::trim(&mut self.body, n)
    }

    /// Remove `n` bytes from the end of the body.
    pub fn chop(&mut self, n: usize) -> Result<(), Errno> {
        seg::chop(&mut self.body, n)
    }

    /// Append a big-endian `u32` to the body.
    pub fn append_u32(&mut self, v: u32) {
        self.body.extend_from_slice(&v.to_be_bytes());
    }

    /// Prepend a big-endian `u32` to the body.
    pub fn insert_u32(&mut self, v: u32) {
        seg::insert(&mut self.body, &v.to_be_bytes());
    }

    /// Remove and return a big-endian `u32` from the front of the body.
    pub fn trim_u32(&mut self) -> Result<u32, Errno> {
        seg::trim_u32(&mut self.body)
    }

    /// Remove and return a big-endian `u32` from the end of the body.
    pub fn chop_u32(&mut self) -> Result<u32, Errno> {
        seg::chop_u32(&mut self.body)
    }

    /// Empty the body.
    pub fn clear(&mut self) {
        self.body.clear();
    }

    // -- header ---------------------------------------------------------

    /// Append bytes to the header.
    pub fn header_append(&mut self, data: &[u8]) {
        self.header.extend_from_slice(data);
    }

    /// Prepend bytes to the header.
    pub fn header_insert(&mut self, data: &[u8]) {
        seg::insert(&mut self.header, data);
    }

    /// Remove `n` bytes from the front of the header.
    pub fn header_trim(&mut self, n: usize) -> Result<(), Errno> {
        seg::trim(&mut self.header, n)
    }

    /// Remove `n` bytes from the end of the header.
    pub fn header_chop(&mut self, n: usize) -> Result<(), Errno> {
        seg::chop(&mut self.header, n)
    }

    /// Append a big-endian `u32` to the header.
    pub fn header_append_u32(&mut self, v: u32) {
        self.header.extend_from_slice(&v.to_be_bytes());
    }

    /// Prepend a big-endian `u32` to the header.
    pub fn header_insert_u32(&mut self, v: u32) {
        seg::insert(&mut self.header, &v.to_be_bytes());
    }

    /// Remove and return a big-endian `u32` from the front of the header.
    pub fn header_trim_u32(&mut self) -> Result<u32, Errno> {
        seg::trim_u32(&mut self.header)
    }

    /// Remove and return a big-endian `u32` from the end of the header.
    pub fn header_chop_u32(&mut self) -> Result<u32, Errno> {
        seg::chop_u32(&mut self.header)
    }

    /// Empty the header.
    pub fn header_clear(&mut self) {
        self.header.clear();
    }
}

impl From<Vec<u8>> for Msg {
    fn from(body: Vec<u8>) -> Self {
        Msg::from_body(body)
    }
}

impl From<&[u8]> for Msg {
    fn from(body: &[u8]) -> Self {
        Msg::from_body(body.to_vec())
    }
}

impl fmt::Debug for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Msg")
            .field("header_len", &self.header.len())
            .field("body_len", &self.body.len())
            .field("pipe", &self.pipe)
            .finish()
    }
}

/// Segment primitives shared by header and body.
mod seg {
    use crate::errno::Errno;

    pub(super) fn insert(seg: &mut Vec<u8>, data: &[u8]) {
        seg.splice(0..0, data.iter().copied());
    }

    pub(super) fn trim(seg: &mut Vec<u8>, n: usize) -> Result<(), Errno> {
        if n > seg.len() {
            return Err(Errno::Inval);
        }
        seg.drain(..n);
        Ok(())
    }

    pub(super) fn chop(seg: &mut Vec<u8>, n: usize) -> Result<(), Errno> {
        if n > seg.len() {
            return Err(Errno::Inval);
        }
        seg.truncate(seg.len() - n);
        Ok(())
    }

    pub(super) fn trim_u32(seg: &mut Vec<u8>) -> Result<u32, Errno> {
        let head: [u8; 4] = seg
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(Errno::Inval)?;
        seg.drain(..4);
        Ok(u32::from_be_bytes(head))
    }

    pub(super) fn chop_u32(seg: &mut Vec<u8>) -> Result<u32, Errno> {
        let at = seg.len().checked_sub(4).ok_or(Errno::Inval)?;
        let mut tail = [0u8; 4];
        tail.copy_from_slice(&seg[at..]);
        seg.truncate(at);
        Ok(u32::from_be_bytes(tail))
    }
}

// ============================================================================
// Tests
// ============================================================================
