//! Packet Buffers
//! 
//! Reference-counted payload storage and packet views that prepend owned header
//! bytes to it without copying the payload.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::InterfaceError;

type CompletionHook = Box<dyn FnOnce() + Send + Sync>;

struct PayloadInner {
    data: Bytes,
    on_release: Option<CompletionHook>,
}

impl Drop for PayloadInner {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

/// Caller-owned IQ storage shared by every packet that references it
///
/// The completion hook runs once, when the last handle (including the ones held by
/// in-flight [`PacketView`]s) is dropped, i.e. after egress completion.
#[derive(Clone)]
pub struct SharedPayload {
    inner: Arc<PayloadInner>,
}

impl SharedPayload {
    /// Wrap bytes without a completion hook
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            inner: Arc::new(PayloadInner { data: data.into(), on_release: None }),
        }
    }

    /// Wrap bytes and run `hook` once the storage is no longer referenced
    pub fn with_completion<F>(data: impl Into<Bytes>, hook: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PayloadInner { data: data.into(), on_release: Some(Box::new(hook)) }),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Borrow the whole payload
    pub fn as_slice(&self) -> &[u8] {
        &self.inner.data
    }

    /// Zero-copy sub-slice, checked against the payload bounds
    pub fn slice(&self, range: Range<usize>) -> Result<Bytes, InterfaceError> {
        self.check_range(&range)?;
        Ok(self.inner.data.slice(range))
    }

    /// Number of live handles to this payload
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    fn check_range(&self, range: &Range<usize>) -> Result<(), InterfaceError> {
        if range.start > range.end || range.end > self.len() {
            return Err(InterfaceError::PayloadRange {
                start: range.start,
                end: range.end,
                len: self.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for SharedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPayload")
            .field("len", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Owned(Bytes),
    Shared { payload: SharedPayload, range: Range<usize> },
}

impl Segment {
    fn as_slice(&self) -> &[u8] {
        match self {
            Segment::Owned(bytes) => bytes,
            Segment::Shared { payload, range } => &payload.as_slice()[range.clone()],
        }
    }
}

/// One outgoing packet: owned header bytes interleaved with attached payload ranges
#[derive(Debug, Clone, Default)]
pub struct PacketView {
    segments: Vec<Segment>,
    len: usize,
}

impl PacketView {
    /// Create an empty packet
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a packet from fully owned bytes
    pub fn from_bytes(bytes: Bytes) -> Self {
        let mut view = Self::new();
        view.push_owned(bytes);
        view
    }

    /// Append owned bytes (headers, or copied IQ)
    pub fn push_owned(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.segments.push(Segment::Owned(bytes));
    }

    /// Attach a range of shared payload without copying it
    pub fn attach(&mut self, payload: &SharedPayload, range: Range<usize>) -> Result<(), InterfaceError> {
        payload.check_range(&range)?;
        if range.is_empty() {
            return Ok(());
        }
        self.len += range.len();
        self.segments.push(Segment::Shared { payload: payload.clone(), range });
        Ok(())
    }

    /// Total packet length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the packet carries no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether any segment references shared storage
    pub fn is_zero_copy(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Shared { .. }))
    }

    /// Iterate over the packet's byte segments in wire order
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.segments.iter().map(Segment::as_slice)
    }

    /// Linearize into one contiguous buffer, as a NIC would put it on the wire
    pub fn to_bytes(&self) -> Bytes {
        if let [Segment::Owned(bytes)] = self.segments.as_slice() {
            return bytes.clone();
        }
        let mut out = BytesMut::with_capacity(self.len);
        for segment in self.segments() {
            out.extend_from_slice(segment);
        }
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_completion_fires_after_last_view() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let payload = SharedPayload::with_completion(vec![1u8, 2, 3, 4], move || {
            flag.store(true, Ordering::SeqCst);
        });

        let mut first = PacketView::from_bytes(Bytes::from_static(&[0xAA]));
        first.attach(&payload, 0..2).unwrap();
        let mut second = PacketView::from_bytes(Bytes::from_static(&[0xBB]));
        second.attach(&payload, 2..4).unwrap();
        drop(payload);

        assert_eq!(first.to_bytes().as_ref(), &[0xAA, 1, 2]);
        drop(first);
        assert!(!released.load(Ordering::SeqCst));
        assert_eq!(second.to_bytes().as_ref(), &[0xBB, 3, 4]);
        drop(second);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_attach_out_of_range() {
        let payload = SharedPayload::new(vec![0u8; 8]);
        let mut view = PacketView::new();
        assert_eq!(
            view.attach(&payload, 4..9),
            Err(InterfaceError::PayloadRange { start: 4, end: 9, len: 8 })
        );
        assert!(view.is_empty());
        assert!(payload.slice(2..6).is_ok());
    }

    #[test]
    fn test_segments_and_length() {
        let payload = SharedPayload::new(vec![9u8; 16]);
        let mut view = PacketView::new();
        view.push_owned(Bytes::from_static(&[1, 2, 3]));
        view.attach(&payload, 0..10).unwrap();
        view.push_owned(Bytes::from_static(&[4]));
        assert_eq!(view.len(), 14);
        assert!(view.is_zero_copy());
        assert_eq!(view.segments().count(), 3);
        assert_eq!(view.to_bytes().len(), 14);
        assert_eq!(payload.ref_count(), 2);
    }
}
