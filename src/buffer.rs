use std::fmt::Debug;
use std::ptr::{self, NonNull};

/// A fixed-capacity byte region shared by the sender and the receiver.
///
/// The region holds at most one in-flight chunk and carries **no occupancy
/// flag**: which side may touch it is decided entirely by the control
/// channel handshake.
///
/// # Ownership protocol
///
/// - The sender owns the region from the moment it receives an ack (or
///   from the start of the transfer) until it sends the next chunk
///   announcement.
/// - The receiver owns the region from the moment it receives a non-zero
///   announcement until it sends the matching ack.
///
/// [`SharedBuffer::write`] and [`SharedBuffer::read`] are raw, non-atomic
/// copies. Calling them outside of the owning phase is a data race, which is
/// why both are `unsafe`.
pub trait SharedBuffer {
    /// Returns the capacity of the region in bytes.
    fn capacity(&self) -> usize;

    /// Returns a pointer to the first byte of the region.
    ///
    /// The pointer is valid for `capacity()` bytes for as long as the buffer
    /// is attached.
    fn base(&self) -> NonNull<u8>;

    /// Copies `bytes` into the start of the region.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is longer than [`SharedBuffer::capacity`].
    ///
    /// # Safety
    ///
    /// The caller must currently own the region per the handshake: no other
    /// party may read or write it during the copy.
    #[inline(always)]
    unsafe fn write(&self, bytes: &[u8]) {
        assert!(
            bytes.len() <= self.capacity(),
            "chunk of {} bytes does not fit a {}-byte buffer",
            bytes.len(),
            self.capacity()
        );
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.base().as_ptr(), bytes.len()) }
    }

    /// Copies the first `out.len()` bytes of the region into `out`.
    ///
    /// # Panics
    ///
    /// Panics if `out` is longer than [`SharedBuffer::capacity`].
    ///
    /// # Safety
    ///
    /// The caller must currently own the region per the handshake: the
    /// writer must not modify it during the copy.
    #[inline(always)]
    unsafe fn read(&self, out: &mut [u8]) {
        assert!(
            out.len() <= self.capacity(),
            "read of {} bytes exceeds a {}-byte buffer",
            out.len(),
            self.capacity()
        );
        unsafe { ptr::copy_nonoverlapping(self.base().as_ptr(), out.as_mut_ptr(), out.len()) }
    }
}

/// A heap-allocated shared buffer for in-process transfers.
///
/// `HeapBuffer` plays the role of the shared memory segment when both ends
/// of a transfer run as threads of the same process. Share it between the
/// threads through an `Arc`.
///
/// The region is allocated once, zero-filled, and released when the buffer
/// is dropped.
#[derive(Debug)]
pub struct HeapBuffer {
    /// Raw pointer to the boxed slice owning the region.
    /// Reconstituted into a `Box` on drop.
    ptr: NonNull<[u8]>,
}

unsafe impl Send for HeapBuffer {}
unsafe impl Sync for HeapBuffer {}

impl HeapBuffer {
    /// Creates a zero-filled region of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; capacity].into_boxed_slice();
        let ptr = NonNull::from(Box::leak(boxed));
        Self { ptr }
    }
}

impl SharedBuffer for HeapBuffer {
    #[inline(always)]
    fn capacity(&self) -> usize {
        self.ptr.len()
    }

    #[inline(always)]
    fn base(&self) -> NonNull<u8> {
        self.ptr.cast()
    }
}

impl Drop for HeapBuffer {
    fn drop(&mut self) {
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }
}
