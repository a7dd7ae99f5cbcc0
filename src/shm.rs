use crate::buffer::SharedBuffer;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::{self, NonNull};

/// Permission bits used for both the segment and the message queue.
pub(crate) const IPC_MODE: libc::c_int = 0o666;

/// Derives a System V IPC key from an existing file and a project id.
///
/// The file must exist: `ftok(3)` hashes its inode and device numbers, so
/// both processes must name the same file to meet.
pub fn key_from_file(path: &Path, project_id: u8) -> std::io::Result<libc::key_t> {
    let path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let key = unsafe { libc::ftok(path.as_ptr(), project_id as libc::c_int) };
    if key == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(key)
}

/// Creates (or looks up) the segment for `key` and returns its id.
pub(crate) fn create_segment(key: libc::key_t, size: usize) -> std::io::Result<libc::c_int> {
    let shmid = unsafe { libc::shmget(key, size, libc::IPC_CREAT | IPC_MODE) };
    if shmid == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(shmid)
}

/// Attaches the segment into this process's address space.
pub(crate) fn attach_segment(shmid: libc::c_int) -> std::io::Result<NonNull<u8>> {
    let addr = unsafe { libc::shmat(shmid, ptr::null(), 0) };
    if addr as isize == -1 {
        return Err(std::io::Error::last_os_error());
    }
    NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "shmat returned a null address")
    })
}

/// Detaches a segment previously attached with [`attach_segment`].
///
/// Only issues `shmdt(2)`; safe to call from a signal handler.
///
/// # Safety
///
/// `addr` must come from [`attach_segment`] and must not be used afterwards.
pub(crate) unsafe fn detach_segment(addr: *mut u8) -> std::io::Result<()> {
    if unsafe { libc::shmdt(addr.cast::<libc::c_void>().cast_const()) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Marks the segment for destruction.
///
/// The segment disappears once every process has detached. Fails with
/// `EINVAL` if it was already removed. Safe to call from a signal handler.
pub(crate) fn remove_segment(shmid: libc::c_int) -> std::io::Result<()> {
    if unsafe { libc::shmctl(shmid, libc::IPC_RMID, ptr::null_mut()) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// A shared buffer backed by a System V shared memory segment.
///
/// `ShmBuffer` only maps the segment; it never detaches or removes it on
/// drop. Both belong to the session teardown, which must run exactly once
/// per process.
#[derive(Debug)]
pub struct ShmBuffer {
    shmid: libc::c_int,
    ptr: NonNull<u8>,
    capacity: usize,
}

unsafe impl Send for ShmBuffer {}
unsafe impl Sync for ShmBuffer {}

impl ShmBuffer {
    /// Creates or opens the segment for `key` and attaches it.
    ///
    /// If a segment for `key` already exists it must be at least `capacity`
    /// bytes, otherwise `shmget(2)` fails with `EINVAL`.
    pub fn attach(key: libc::key_t, capacity: usize) -> std::io::Result<Self> {
        let shmid = create_segment(key, capacity)?;
        let ptr = attach_segment(shmid)?;
        Ok(Self {
            shmid,
            ptr,
            capacity,
        })
    }

    pub fn id(&self) -> libc::c_int {
        self.shmid
    }

    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl SharedBuffer for ShmBuffer {
    #[inline(always)]
    fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline(always)]
    fn base(&self) -> NonNull<u8> {
        self.ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ftok_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(key_from_file(&missing, b'a').is_err());
    }

    #[test]
    fn ftok_is_stable_for_same_file_and_differs_by_project() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, b"").unwrap();

        let k1 = key_from_file(&path, b'a').unwrap();
        let k2 = key_from_file(&path, b'a').unwrap();
        let k3 = key_from_file(&path, b'b').unwrap();
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn two_attachments_see_the_same_bytes() {
        let a = ShmBuffer::attach(libc::IPC_PRIVATE, 64).unwrap();
        let addr = attach_segment(a.id()).unwrap();
        let b = ShmBuffer {
            shmid: a.id(),
            ptr: addr,
            capacity: 64,
        };

        unsafe { a.write(b"shared bytes") };
        let mut out = [0u8; 12];
        unsafe { b.read(&mut out) };
        assert_eq!(&out, b"shared bytes");

        unsafe {
            detach_segment(b.base().as_ptr()).unwrap();
            detach_segment(a.base().as_ptr()).unwrap();
        }
        remove_segment(a.id()).unwrap();
        assert!(remove_segment(a.id()).is_err());
    }
}
