//! The serialized state of an external scanner.
//!
//! Every time an external token is created, the scanner's serialized state
//! is captured onto the token so the scanner can be restored before that
//! token is revisited during incremental reparsing or error recovery.

use std::fmt;

/// Buffers up to this many bytes live inline in the capsule; longer ones
/// are allocated separately. The threshold is a wire-level contract for
/// consumers that persist scanner state.
pub const MAX_INLINE_STATE_LEN: usize = 24;

/// An opaque byte capsule holding serialized external-scanner state.
///
/// Equality is byte-wise, never identity: two capsules with the same
/// contents compare equal regardless of where the bytes are stored.
#[derive(Clone)]
pub struct ScannerState {
    repr: ScannerRepr,
}

#[derive(Clone)]
enum ScannerRepr {
    Inline { len: u8, bytes: [u8; MAX_INLINE_STATE_LEN] },
    Heap(Box<[u8]>),
}

impl ScannerState {
    pub const EMPTY: ScannerState =
        ScannerState { repr: ScannerRepr::Inline { len: 0, bytes: [0; MAX_INLINE_STATE_LEN] } };

    pub fn new(data: &[u8]) -> ScannerState {
        if data.len() <= MAX_INLINE_STATE_LEN {
            let mut bytes = [0; MAX_INLINE_STATE_LEN];
            bytes[..data.len()].copy_from_slice(data);
            ScannerState { repr: ScannerRepr::Inline { len: data.len() as u8, bytes } }
        } else {
            ScannerState { repr: ScannerRepr::Heap(data.into()) }
        }
    }

    /// The serialized bytes, wherever they are stored.
    #[inline]
    pub fn data(&self) -> &[u8] {
        match &self.repr {
            ScannerRepr::Inline { len, bytes } => &bytes[..*len as usize],
            ScannerRepr::Heap(bytes) => bytes,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte-wise comparison against a raw buffer.
    #[inline]
    pub fn matches(&self, data: &[u8]) -> bool {
        self.data() == data
    }
}

impl Default for ScannerState {
    fn default() -> ScannerState {
        ScannerState::EMPTY
    }
}

impl PartialEq for ScannerState {
    fn eq(&self, other: &ScannerState) -> bool {
        self.data() == other.data()
    }
}

impl Eq for ScannerState {}

impl fmt::Debug for ScannerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScannerState")
            .field("len", &self.len())
            .field("inline", &matches!(self.repr, ScannerRepr::Inline { .. }))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_inline_up_to_threshold() {
        let state = ScannerState::new(&[7; MAX_INLINE_STATE_LEN]);
        assert!(matches!(state.repr, ScannerRepr::Inline { .. }));
        assert_eq!(state.data(), &[7; MAX_INLINE_STATE_LEN]);
    }

    #[test]
    fn spills_to_heap_past_threshold() {
        let state = ScannerState::new(&[7; MAX_INLINE_STATE_LEN + 1]);
        assert!(matches!(state.repr, ScannerRepr::Heap(_)));
        assert_eq!(state.len(), MAX_INLINE_STATE_LEN + 1);
    }

    #[test]
    fn equality_ignores_storage_mode() {
        // Same bytes must compare equal even if one copy was built from a
        // longer buffer that got truncated down by the scanner.
        let inline = ScannerState::new(b"abc");
        let other = ScannerState::new(b"abc");
        assert_eq!(inline, other);
        assert!(inline.matches(b"abc"));
        assert!(!inline.matches(b"abd"));

        let long_a = ScannerState::new(&[1; 40]);
        let long_b = ScannerState::new(&[1; 40]);
        assert_eq!(long_a, long_b);
        assert_ne!(long_a, ScannerState::new(&[1; 39]));
    }

    #[test]
    fn empty_state() {
        assert!(ScannerState::EMPTY.is_empty());
        assert_eq!(ScannerState::new(&[]), ScannerState::EMPTY);
    }
}
