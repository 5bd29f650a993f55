//! POSIX shared memory segments
//!
//! A segment is created (or attached, if it already exists with the same
//! size) with `shm_open`, sized with `ftruncate`, and mapped `MAP_SHARED`
//! so every process that opens the same name sees the same bytes.
//!
//! The mapping that created the segment owns its name: dropping it unmaps
//! and unlinks. Mappings that attached to an existing segment only unmap,
//! so a worker that detaches never takes the name away from the owner.
//!
//! Within one process a segment name is mapped at most once through
//! [`SharedSegment::open`], so two buffers can never hand out overlapping
//! slices. Writes from other processes are outside the borrow checker's
//! reach; peers read the segment only after the owner publishes a step.

use crate::error::{Result, StateError};
use num_complex::Complex64;
#[cfg(unix)]
use parking_lot::Mutex;
#[cfg(unix)]
use std::collections::BTreeSet;
use std::ffi::CString;
use std::fmt;
use std::ptr::NonNull;

/// Segment names currently mapped by [`SharedSegment::open`] in this process
#[cfg(unix)]
static MAPPED_SEGMENTS: Mutex<BTreeSet<String>> = parking_lot::const_mutex(BTreeSet::new());

/// A mapped, named shared memory segment holding `len` complex elements
pub struct SharedSegment {
    name: String,
    path: CString,
    data: NonNull<Complex64>,
    len: usize,
    byte_len: usize,
    /// This mapping created the segment and unlinks the name on drop
    created: bool,
    /// The name is held in `MAPPED_SEGMENTS`
    registered: bool,
}

impl SharedSegment {
    /// Segment name as given (without the leading `/` POSIX requires)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of complex elements in the segment
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the mapping in bytes
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Whether this mapping created the segment (and so owns its name)
    pub fn is_creator(&self) -> bool {
        self.created
    }

    #[inline]
    pub(crate) fn as_non_null(&self) -> NonNull<Complex64> {
        self.data
    }

    /// Claim this mapping's name for the process
    #[cfg(unix)]
    fn register(&mut self) -> Result<()> {
        if !MAPPED_SEGMENTS.lock().insert(self.name.clone()) {
            return Err(StateError::SegmentInUse {
                name: self.name.clone(),
            });
        }
        self.registered = true;
        Ok(())
    }

    #[cfg(unix)]
    fn unregister(&mut self) {
        if self.registered {
            MAPPED_SEGMENTS.lock().remove(&self.name);
            self.registered = false;
        }
    }
}

impl fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSegment")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("byte_len", &self.byte_len)
            .field("created", &self.created)
            .finish()
    }
}

/// Normalize a segment name to the `/name` form `shm_open` expects
fn segment_path(name: &str) -> Result<(String, CString)> {
    let trimmed = name.strip_prefix('/').unwrap_or(name);
    if trimmed.is_empty() || trimmed.contains('/') {
        return Err(StateError::InvalidSegmentName {
            name: name.to_string(),
        });
    }
    let path = CString::new(format!("/{trimmed}")).map_err(|_| StateError::InvalidSegmentName {
        name: name.to_string(),
    })?;
    Ok((trimmed.to_string(), path))
}

#[cfg(unix)]
mod posix {
    use super::*;
    use crate::allocation::ELEMENT_BYTES;
    use std::io;
    use tracing::{debug, warn};

    fn os_error(name: &str, operation: &'static str) -> StateError {
        StateError::SharedMemory {
            name: name.to_string(),
            operation,
            reason: io::Error::last_os_error().to_string(),
        }
    }

    impl SharedSegment {
        /// Create or attach to the segment `name` sized for `len` elements
        ///
        /// A newly created segment is zero-filled. Attaching to an existing
        /// segment of a different size fails with `AllocationSizeMismatch`.
        /// A name already mapped through `open` in this process fails with
        /// `SegmentInUse` until that mapping is dropped.
        pub fn open(name: &str, len: usize, mode: u32) -> Result<Self> {
            // SAFETY: the mapping is registered before it is returned, so no
            // other `open` mapping of this name exists in the process.
            let mut segment = unsafe { Self::open_unchecked(name, len, mode)? };
            segment.register()?;
            Ok(segment)
        }

        /// Map the segment `name` without claiming it for the process
        ///
        /// This is how a second view of a segment is obtained in the same
        /// process, e.g. to stand in for a worker process in tests.
        ///
        /// # Safety
        /// Other mappings of the same segment in this process may exist. The
        /// caller must not hold a reference into this mapping (or a buffer
        /// built from it) while any other mapping of the segment is
        /// accessed mutably, nor access it mutably while a reference into
        /// another mapping is live.
        pub unsafe fn open_unchecked(name: &str, len: usize, mode: u32) -> Result<Self> {
            let (name, path) = segment_path(name)?;
            let byte_len = len
                .checked_mul(ELEMENT_BYTES)
                .ok_or(StateError::AllocationError { size: usize::MAX })?;
            if byte_len == 0 {
                return Err(StateError::MalformedState {
                    length: 0,
                    reason: "cannot map an empty shared segment",
                });
            }

            let (fd, created) = open_descriptor(&name, &path, mode)?;
            let mapped = map_descriptor(fd, &name, &path, len, byte_len, created);
            // The mapping keeps the segment alive; the descriptor is no longer needed.
            libc::close(fd);
            let data = mapped?;

            debug!(segment = %name, len, byte_len, created, "mapped shared memory segment");
            Ok(Self {
                name,
                path,
                data,
                len,
                byte_len,
                created,
                registered: false,
            })
        }
    }

    /// Open `path`, creating it exclusively if it does not exist yet
    ///
    /// Returns the descriptor and whether this call created the segment.
    unsafe fn open_descriptor(
        name: &str,
        path: &CString,
        mode: u32,
    ) -> Result<(libc::c_int, bool)> {
        let fd = libc::shm_open(
            path.as_ptr(),
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            mode as libc::c_uint,
        );
        if fd >= 0 {
            return Ok((fd, true));
        }
        if io::Error::last_os_error().raw_os_error() != Some(libc::EEXIST) {
            return Err(os_error(name, "shm_open"));
        }

        let fd = libc::shm_open(path.as_ptr(), libc::O_RDWR, mode as libc::c_uint);
        if fd < 0 {
            return Err(os_error(name, "shm_open"));
        }
        Ok((fd, false))
    }

    /// Size (if still empty) and map the open segment behind `fd`
    ///
    /// Unlinks the name again if this call created the segment and then failed.
    unsafe fn map_descriptor(
        fd: libc::c_int,
        name: &str,
        path: &CString,
        len: usize,
        byte_len: usize,
        created: bool,
    ) -> Result<NonNull<Complex64>> {
        let mut stat: libc::stat = std::mem::zeroed();
        if libc::fstat(fd, &mut stat) != 0 {
            let err = os_error(name, "fstat");
            if created {
                libc::shm_unlink(path.as_ptr());
            }
            return Err(err);
        }

        // An existing segment can still be empty if its creator has not sized it yet.
        let existing = stat.st_size as usize;
        if existing == 0 {
            if libc::ftruncate(fd, byte_len as libc::off_t) != 0 {
                let err = os_error(name, "ftruncate");
                if created {
                    libc::shm_unlink(path.as_ptr());
                }
                return Err(err);
            }
        } else if existing != byte_len {
            return Err(StateError::AllocationSizeMismatch {
                expected: len,
                actual: existing / ELEMENT_BYTES,
            });
        }

        let addr = libc::mmap(
            std::ptr::null_mut(),
            byte_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        );
        if addr == libc::MAP_FAILED {
            let err = os_error(name, "mmap");
            if created {
                libc::shm_unlink(path.as_ptr());
            }
            return Err(err);
        }

        match NonNull::new(addr as *mut Complex64) {
            Some(data) => Ok(data),
            None => Err(StateError::SharedMemory {
                name: name.to_string(),
                operation: "mmap",
                reason: "mapping returned a null address".to_string(),
            }),
        }
    }

    impl Drop for SharedSegment {
        fn drop(&mut self) {
            self.unregister();
            unsafe {
                if libc::munmap(self.data.as_ptr() as *mut libc::c_void, self.byte_len) != 0 {
                    warn!(
                        segment = %self.name,
                        error = %io::Error::last_os_error(),
                        "failed to unmap shared memory segment"
                    );
                }

                if !self.created {
                    debug!(segment = %self.name, "detached from shared memory segment");
                    return;
                }

                if libc::shm_unlink(self.path.as_ptr()) != 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() == Some(libc::ENOENT) {
                        debug!(segment = %self.name, "shared memory segment already unlinked");
                    } else {
                        warn!(segment = %self.name, error = %err, "failed to unlink shared memory segment");
                    }
                } else {
                    debug!(segment = %self.name, "released shared memory segment");
                }
            }
        }
    }
}

#[cfg(not(unix))]
impl SharedSegment {
    /// Shared memory segments require a POSIX platform
    pub fn open(name: &str, _len: usize, _mode: u32) -> Result<Self> {
        segment_path(name)?;
        Err(StateError::Unsupported {
            operation: "shared memory allocation",
        })
    }

    /// Shared memory segments require a POSIX platform
    ///
    /// # Safety
    /// Always fails; carries the same contract as on POSIX platforms.
    pub unsafe fn open_unchecked(name: &str, len: usize, mode: u32) -> Result<Self> {
        Self::open(name, len, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_path() {
        let (name, path) = segment_path("simq-worker").unwrap();
        assert_eq!(name, "simq-worker");
        assert_eq!(path.to_str().unwrap(), "/simq-worker");

        let (name, path) = segment_path("/simq-worker").unwrap();
        assert_eq!(name, "simq-worker");
        assert_eq!(path.to_str().unwrap(), "/simq-worker");
    }

    #[test]
    fn test_invalid_segment_names() {
        for bad in ["", "/", "a/b", "/a/b", "nul\0byte"] {
            assert_eq!(
                segment_path(bad).unwrap_err(),
                StateError::InvalidSegmentName {
                    name: bad.to_string()
                }
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_open_maps_zeroed_memory() {
        let name = format!("simq-seg-{}-open", std::process::id());
        let segment = SharedSegment::open(&name, 8, 0o600).unwrap();
        assert_eq!(segment.len(), 8);
        assert_eq!(segment.byte_len(), 128);
        assert_eq!(segment.name(), name);
        assert!(segment.is_creator());

        let data = unsafe { std::slice::from_raw_parts(segment.as_non_null().as_ptr(), 8) };
        assert!(data.iter().all(|&z| z == Complex64::new(0.0, 0.0)));
    }

    #[cfg(unix)]
    #[test]
    fn test_attach_with_wrong_size_fails() {
        let name = format!("simq-seg-{}-size", std::process::id());
        let _segment = SharedSegment::open(&name, 8, 0o600).unwrap();
        assert_eq!(
            SharedSegment::open(&name, 4, 0o600).unwrap_err(),
            StateError::AllocationSizeMismatch {
                expected: 4,
                actual: 8
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_name_is_mapped_once_per_process() {
        let name = format!("simq-seg-{}-once", std::process::id());
        let segment = SharedSegment::open(&name, 4, 0o600).unwrap();
        assert_eq!(
            SharedSegment::open(&name, 4, 0o600).unwrap_err(),
            StateError::SegmentInUse { name: name.clone() }
        );

        drop(segment);
        let reopened = SharedSegment::open(&name, 4, 0o600).unwrap();
        assert!(reopened.is_creator());
    }

    #[cfg(unix)]
    #[test]
    fn test_attacher_does_not_own_the_name() {
        let name = format!("simq-seg-{}-attach", std::process::id());
        let owner = SharedSegment::open(&name, 4, 0o600).unwrap();
        let peer = unsafe { SharedSegment::open_unchecked(&name, 4, 0o600).unwrap() };
        assert!(owner.is_creator());
        assert!(!peer.is_creator());
        drop(peer);

        // The owner still holds the name, so an attach finds the same segment
        let again = unsafe { SharedSegment::open_unchecked(&name, 4, 0o600).unwrap() };
        assert!(!again.is_creator());
    }
}
