//! Secure byte container with guaranteed zeroization on drop.
//!
//! The wipe path must survive optimization: the default wipe function goes
//! through `zeroize`, whose volatile writes and compiler fence cannot be
//! elided. The wipe function is injectable so tests can observe that every
//! buffer is actually wiped.

use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// A wipe function applied to the underlying buffer on drop and on manual
/// zeroization.
pub type WipeFn = fn(&mut [u8]);

/// Default wipe: volatile zero writes plus a fence, via `zeroize`.
pub fn default_wipe(buf: &mut [u8]) {
    buf.zeroize();
}

/// Heap-allocated byte buffer that is zero-written before the memory is
/// released.
///
/// Zero-length buffers still hold a one-byte allocation so the wipe path is
/// uniform. Exporting with [`SecureBytes::to_vec`] produces an ordinary
/// vector that does not inherit wipe semantics.
pub struct SecureBytes {
    buf: Box<[u8]>,
    len: usize,
    wipe: WipeFn,
}

impl SecureBytes {
    /// Takes ownership of the given bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_wipe_fn(data, default_wipe)
    }

    /// Takes ownership of the given bytes with a custom wipe function.
    pub fn with_wipe_fn(data: Vec<u8>, wipe: WipeFn) -> Self {
        let len = data.len();
        let buf = if data.is_empty() {
            // One-byte allocation keeps the wipe invariant for empty buffers.
            vec![0u8; 1].into_boxed_slice()
        } else {
            data.into_boxed_slice()
        };
        Self { buf, len, wipe }
    }

    /// Copies the given slice into a new secure buffer.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }

    /// Allocates a zero-initialized buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is logically empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the contents out into an ordinary vector. The copy does not
    /// inherit wipe semantics.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_ref().to_vec()
    }

    /// Zero-writes the buffer in place. Idempotent; the buffer remains
    /// usable (as zeros) afterwards.
    pub fn zeroize(&mut self) {
        (self.wipe)(&mut self.buf);
    }
}

impl Drop for SecureBytes {
    fn drop(&mut self) {
        (self.wipe)(&mut self.buf);
    }
}

impl Clone for SecureBytes {
    fn clone(&self) -> Self {
        Self::with_wipe_fn(self.to_vec(), self.wipe)
    }
}

impl AsRef<[u8]> for SecureBytes {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl AsMut<[u8]> for SecureBytes {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

impl From<Vec<u8>> for SecureBytes {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl fmt::Debug for SecureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureBytes")
            .field("len", &self.len)
            .field("data", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for SecureBytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref().ct_eq(other.as_ref()).into()
    }
}

impl Eq for SecureBytes {}

/// Wipe-counting instrumentation for debug builds and tests.
#[cfg(any(test, debug_assertions))]
pub mod wipe_tracker {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zeroize::Zeroize;

    static WIPES: AtomicUsize = AtomicUsize::new(0);

    /// Wipe function that zeroizes and counts each invocation.
    pub fn counting_wipe(buf: &mut [u8]) {
        buf.zeroize();
        WIPES.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of wipes observed since the last reset.
    pub fn count() -> usize {
        WIPES.load(Ordering::SeqCst)
    }

    /// Resets the counter.
    pub fn reset() {
        WIPES.store(0, Ordering::SeqCst);
    }
}
