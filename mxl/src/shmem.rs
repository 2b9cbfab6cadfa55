// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Shared-memory mappings with advisory locking.
//!
//! Every piece of flow state lives in a memory-mapped file on the domain
//! (typically tmpfs): the 2048-byte flow header, each grain slot, the audio
//! channel store. This module owns the (file, mapping, advisory lock) triple
//! with RAII release.
//!
//! Design points carried over from the original architecture:
//!
//! - Regular files instead of `shm_open`, so flows organize hierarchically
//!   and garbage collection is plain directory removal.
//! - Advisory locks as *liveness indicators only*: the kernel drops them when
//!   a process dies, so "exclusive lock obtainable" means "no live user".
//!   They are never used for data synchronization (the futex word is).
//! - All mappings are `MAP_SHARED`; readers map `PROT_READ` and can still
//!   park on the futex word inside the mapping.
//! - Files are sized with `ftruncate`, so pages allocate lazily on first
//!   touch and inactive flows stay cheap.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::Path;

use memmap2::{Mmap, MmapMut};

use crate::error::{Error, Result};

/// How to open the backing file and protect the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccessMode {
    /// Open an existing file, map `PROT_READ`.
    ReadOnly,
    /// Open an existing file, map read-write.
    ReadWrite,
    /// Create the file exclusively (fail if it exists), map read-write.
    CreateReadWrite,
}

/// Advisory lock taken on the backing file for lifecycle coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    None,
    Shared,
    Exclusive,
}

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

/// A shared memory segment: open file, mapping, and advisory lock.
///
/// Not thread-safe; each handle is used from one thread at a time. Multiple
/// processes may map the same file concurrently.
pub(crate) struct SharedMemorySegment {
    file: File,
    // Kept alive for the mapping; never accessed through the enum after
    // construction. The raw base pointer below is the single access path so
    // that `&self` methods can hand out data pointers.
    _mapping: Mapping,
    base: *mut u8,
    len: usize,
    created: bool,
    lock: LockMode,
}

// Safety: the segment owns its file descriptor and mapping; the raw pointer
// refers to process-private virtual memory backed by a shared file. Handles
// are used by one thread at a time (no Sync).
unsafe impl Send for SharedMemorySegment {}

impl SharedMemorySegment {
    /// Opens or creates a shared memory file of at least `size` bytes and
    /// maps it with the protection matching `mode`.
    ///
    /// The advisory lock is taken non-blocking; a conflicting holder yields
    /// [`Error::Conflict`]. Creation uses `O_EXCL`, so a concurrent creator
    /// loses with [`Error::Conflict`] as well and should fall back to opening.
    pub(crate) fn open(
        path: &Path,
        mode: AccessMode,
        size: usize,
        lock: LockMode,
    ) -> Result<Self> {
        let mut options = OpenOptions::new();
        match mode {
            AccessMode::ReadOnly => {
                options.read(true);
            }
            AccessMode::ReadWrite => {
                options.read(true).write(true);
            }
            AccessMode::CreateReadWrite => {
                options.read(true).write(true).create_new(true);
            }
        }
        let file = options.open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FlowNotFound,
            std::io::ErrorKind::AlreadyExists => Error::Conflict,
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied,
            _ => Error::io(format!("open {}", path.display()), e),
        })?;

        let created = mode == AccessMode::CreateReadWrite;
        if created {
            file.set_len(size as u64)
                .map_err(|e| Error::io(format!("truncate {}", path.display()), e))?;
        }

        take_lock(&file, lock, path)?;

        let (mapping, base, len) = match mode {
            AccessMode::ReadOnly => {
                let map = unsafe { Mmap::map(&file) }
                    .map_err(|e| Error::io(format!("mmap {}", path.display()), e))?;
                let base = map.as_ptr() as *mut u8;
                let len = map.len();
                (Mapping::ReadOnly(map), base, len)
            }
            AccessMode::ReadWrite | AccessMode::CreateReadWrite => {
                let mut map = unsafe { MmapMut::map_mut(&file) }
                    .map_err(|e| Error::io(format!("mmap {}", path.display()), e))?;
                let base = map.as_mut_ptr();
                let len = map.len();
                (Mapping::ReadWrite(map), base, len)
            }
        };

        if len < size {
            return Err(Error::Unknown(format!(
                "mapped {len} bytes of {}, need {size}",
                path.display()
            )));
        }

        Ok(Self {
            file,
            _mapping: mapping,
            base,
            len,
            created,
            lock,
        })
    }

    /// Base pointer of the mapping. Writes through it are only permitted for
    /// read-write mappings; callers uphold this.
    pub(crate) fn base(&self) -> *mut u8 {
        self.base
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// `true` if this instance created the underlying file, in which case the
    /// caller is responsible for initializing the structures inside.
    pub(crate) fn created(&self) -> bool {
        self.created
    }

    /// Inode of the backing file, recorded in flow headers for stale-mapping
    /// detection.
    pub(crate) fn inode(&self) -> Result<u64> {
        use std::os::unix::fs::MetadataExt;
        let meta = self
            .file
            .metadata()
            .map_err(|e| Error::io("stat shared memory file", e))?;
        Ok(meta.ino())
    }

    /// Attempts to convert a shared advisory lock to exclusive, without
    /// blocking. Returns `false` if another holder exists.
    pub(crate) fn make_exclusive(&mut self) -> Result<bool> {
        match self.lock {
            LockMode::Exclusive => Ok(true),
            LockMode::None => Err(Error::InvalidArg(
                "cannot upgrade a lockless mapping".into(),
            )),
            LockMode::Shared => {
                let rc = unsafe {
                    libc::flock(self.file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB)
                };
                if rc == 0 {
                    self.lock = LockMode::Exclusive;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Drops an exclusive advisory lock back to shared. Used after flow
    /// creation so other writers and readers can attach.
    pub(crate) fn make_shared(&mut self) -> Result<()> {
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB) };
        if rc != 0 {
            return Err(Error::io(
                "downgrade advisory lock",
                std::io::Error::last_os_error(),
            ));
        }
        self.lock = LockMode::Shared;
        Ok(())
    }

    pub(crate) fn is_exclusive(&self) -> bool {
        self.lock == LockMode::Exclusive
    }
}

fn take_lock(file: &File, lock: LockMode, path: &Path) -> Result<()> {
    let op = match lock {
        LockMode::None => return Ok(()),
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    };
    let rc = unsafe { libc::flock(file.as_raw_fd(), op | libc::LOCK_NB) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::EWOULDBLOCK) => Err(Error::Conflict),
            _ => Err(Error::io(format!("lock {}", path.display()), err)),
        };
    }
    Ok(())
}

/// Updates a file's access time to now, leaving mtime untouched. Failures are
/// ignored by callers on read-only volumes.
pub(crate) fn touch_fd(fd: libc::c_int) -> bool {
    let times = [
        libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_NOW,
        },
        libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
    ];
    unsafe { libc::futimens(fd, times.as_ptr()) == 0 }
}

/// A shared memory segment with a typed structure at offset 0.
///
/// On creation the file is zero-filled by `ftruncate`, which is the valid
/// default state for every mapped structure; the creator then fills in the
/// config fields explicitly. This replaces the placement-new step of the
/// original design with plain zero initialization plus an explicit init pass.
pub(crate) struct SharedMemoryInstance<T> {
    segment: SharedMemorySegment,
    _marker: std::marker::PhantomData<T>,
}

impl<T> SharedMemoryInstance<T> {
    /// Opens or creates a file holding a `T` followed by `extra` payload
    /// bytes.
    pub(crate) fn open(
        path: &Path,
        mode: AccessMode,
        extra: usize,
        lock: LockMode,
    ) -> Result<Self> {
        let segment =
            SharedMemorySegment::open(path, mode, std::mem::size_of::<T>() + extra, lock)?;
        Ok(Self {
            segment,
            _marker: std::marker::PhantomData,
        })
    }

    pub(crate) fn get(&self) -> *mut T {
        self.segment.base() as *mut T
    }

    pub(crate) fn segment(&self) -> &SharedMemorySegment {
        &self.segment
    }

    pub(crate) fn segment_mut(&mut self) -> &mut SharedMemorySegment {
        &mut self.segment
    }

    pub(crate) fn created(&self) -> bool {
        self.segment.created()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        {
            let seg =
                SharedMemorySegment::open(&path, AccessMode::CreateReadWrite, 4096, LockMode::None)
                    .unwrap();
            assert!(seg.created());
            unsafe {
                *seg.base() = 0xAB;
                *seg.base().add(4095) = 0xCD;
            }
        }
        let seg =
            SharedMemorySegment::open(&path, AccessMode::ReadOnly, 4096, LockMode::None).unwrap();
        assert!(!seg.created());
        unsafe {
            assert_eq!(*seg.base(), 0xAB);
            assert_eq!(*seg.base().add(4095), 0xCD);
        }
    }

    #[test]
    fn create_twice_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        let _first =
            SharedMemorySegment::open(&path, AccessMode::CreateReadWrite, 64, LockMode::None)
                .unwrap();
        let second =
            SharedMemorySegment::open(&path, AccessMode::CreateReadWrite, 64, LockMode::None);
        assert!(matches!(second, Err(Error::Conflict)));
    }

    #[test]
    fn shared_locks_coexist_but_block_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        let mut first =
            SharedMemorySegment::open(&path, AccessMode::CreateReadWrite, 64, LockMode::Exclusive)
                .unwrap();
        first.make_shared().unwrap();

        let _second =
            SharedMemorySegment::open(&path, AccessMode::ReadOnly, 64, LockMode::Shared).unwrap();

        // Upgrade fails while the reader holds its shared lock.
        assert!(!first.make_exclusive().unwrap());
        drop(_second);
        assert!(first.make_exclusive().unwrap());
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        let res = SharedMemorySegment::open(&path, AccessMode::ReadOnly, 64, LockMode::None);
        assert!(matches!(res, Err(Error::FlowNotFound)));
    }
}
