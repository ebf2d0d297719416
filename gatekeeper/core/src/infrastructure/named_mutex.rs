// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Named Cross-Process Mutex
//!
//! A `pthread_mutex_t` living in a POSIX shared-memory segment, so that
//! independent proxy worker processes can serialize access to a shared file.
//!
//! ## Lifecycle
//!
//! - **Creation race:** the segment is created with `O_CREAT | O_EXCL`. The
//!   winner sizes it, initializes the mutex and publishes a ready flag; every
//!   other process opens the existing segment and waits (bounded) for that
//!   flag. Losing the race is not an error.
//! - **Crashed owner:** the mutex is robust. When its owner dies while
//!   holding it, the next `lock` observes `EOWNERDEAD`, marks the mutex
//!   consistent and proceeds. Should the creator die before publishing the
//!   ready flag, the segment stays unusable until it is removed with
//!   [`NamedMutex::unlink`].
//! - **Teardown:** dropping a handle unmaps the segment but never unlinks it;
//!   sibling processes may still be using it.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** OS-native named lock for the credential store

use crate::domain::error::StorageError;
use std::ffi::CString;
use std::io;
use std::mem::{size_of, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const SEGMENT_READY: u32 = 0x6b65_6570;
const SHM_MODE: libc::mode_t = 0o666;
const INIT_WAIT: Duration = Duration::from_secs(2);
const INIT_POLL: Duration = Duration::from_millis(1);
const OPEN_ATTEMPTS: usize = 3;

#[repr(C)]
struct SharedSegment {
    ready: AtomicU32,
    mutex: libc::pthread_mutex_t,
}

pub struct NamedMutex {
    name: String,
    fd: libc::c_int,
    segment: NonNull<SharedSegment>,
}

// The segment only holds a process-shared pthread mutex and an atomic flag,
// both safe to use from any thread.
unsafe impl Send for NamedMutex {}
unsafe impl Sync for NamedMutex {}

impl NamedMutex {
    /// Create or attach to the mutex called `name` (e.g. "/gatekeeper-credentials").
    pub fn open(name: &str) -> Result<Self, StorageError> {
        let c_name = CString::new(name).map_err(|_| lock_error(name, "name contains a NUL byte"))?;

        let (fd, created) = open_segment(&c_name).map_err(|e| lock_error(name, e))?;

        match Self::attach(name, fd, created) {
            Ok(mutex) => {
                debug!(name, created, "Attached named mutex");
                Ok(mutex)
            }
            Err(e) => {
                unsafe {
                    libc::close(fd);
                    if created {
                        libc::shm_unlink(c_name.as_ptr());
                    }
                }
                Err(lock_error(name, e))
            }
        }
    }

    fn attach(name: &str, fd: libc::c_int, created: bool) -> io::Result<Self> {
        let size = size_of::<SharedSegment>();

        if created {
            // Workers commonly run under a different uid than the process
            // that first creates the segment.
            check_os(unsafe { libc::fchmod(fd, SHM_MODE) })?;
            check_os(unsafe { libc::ftruncate(fd, size as libc::off_t) })?;
        } else {
            wait_for_size(fd, size)?;
        }

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let segment = NonNull::new(addr.cast::<SharedSegment>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;

        let mutex = Self {
            name: name.to_string(),
            fd,
            segment,
        };

        let ready = if created {
            unsafe { init_mutex(mutex.mutex_ptr()) }.map(|()| {
                mutex.ready_flag().store(SEGMENT_READY, Ordering::Release);
            })
        } else {
            mutex.wait_until_ready()
        };

        match ready {
            Ok(()) => Ok(mutex),
            Err(e) => {
                // Drop would close the fd that `open` closes on error.
                unsafe { libc::munmap(addr, size) };
                std::mem::forget(mutex);
                Err(e)
            }
        }
    }

    /// Block until the mutex is held by the calling thread.
    pub fn lock(&self) -> Result<NamedMutexGuard<'_>, StorageError> {
        match unsafe { libc::pthread_mutex_lock(self.mutex_ptr()) } {
            0 => {}
            libc::EOWNERDEAD => {
                warn!(name = %self.name, "Previous owner died holding the named mutex; recovering");
                let rc = unsafe { libc::pthread_mutex_consistent(self.mutex_ptr()) };
                if rc != 0 {
                    unsafe { libc::pthread_mutex_unlock(self.mutex_ptr()) };
                    return Err(lock_error(&self.name, io::Error::from_raw_os_error(rc)));
                }
            }
            rc => return Err(lock_error(&self.name, io::Error::from_raw_os_error(rc))),
        }

        Ok(NamedMutexGuard { mutex: self })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the named segment. Processes already attached keep working;
    /// the next `open` creates a fresh mutex.
    pub fn unlink(name: &str) -> Result<(), StorageError> {
        let c_name = CString::new(name).map_err(|_| lock_error(name, "name contains a NUL byte"))?;
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(lock_error(name, err));
            }
        }
        Ok(())
    }

    fn wait_until_ready(&self) -> io::Result<()> {
        let deadline = Instant::now() + INIT_WAIT;
        while self.ready_flag().load(Ordering::Acquire) != SEGMENT_READY {
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "mutex was never initialized by its creator",
                ));
            }
            std::thread::sleep(INIT_POLL);
        }
        Ok(())
    }

    fn ready_flag(&self) -> &AtomicU32 {
        unsafe { &(*self.segment.as_ptr()).ready }
    }

    fn mutex_ptr(&self) -> *mut libc::pthread_mutex_t {
        unsafe { ptr::addr_of_mut!((*self.segment.as_ptr()).mutex) }
    }
}

impl Drop for NamedMutex {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.segment.as_ptr().cast(), size_of::<SharedSegment>());
            libc::close(self.fd);
        }
    }
}

/// Releases the named mutex when dropped
pub struct NamedMutexGuard<'a> {
    mutex: &'a NamedMutex,
}

impl Drop for NamedMutexGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.mutex_ptr());
        }
    }
}

fn open_segment(name: &CString) -> io::Result<(libc::c_int, bool)> {
    let mut last_error = io::Error::from_raw_os_error(libc::ENOENT);

    for _ in 0..OPEN_ATTEMPTS {
        let fd = unsafe {
            libc::shm_open(
                name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                SHM_MODE,
            )
        };
        if fd >= 0 {
            return Ok((fd, true));
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(err);
        }

        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, SHM_MODE) };
        if fd >= 0 {
            return Ok((fd, false));
        }

        // Unlinked between the two calls; try creating again.
        last_error = io::Error::last_os_error();
        if last_error.raw_os_error() != Some(libc::ENOENT) {
            return Err(last_error);
        }
    }

    Err(last_error)
}

fn wait_for_size(fd: libc::c_int, size: usize) -> io::Result<()> {
    let deadline = Instant::now() + INIT_WAIT;
    loop {
        let mut stat = MaybeUninit::<libc::stat>::uninit();
        check_os(unsafe { libc::fstat(fd, stat.as_mut_ptr()) })?;
        let stat = unsafe { stat.assume_init() };
        if stat.st_size as usize >= size {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "shared segment was never sized by its creator",
            ));
        }
        std::thread::sleep(INIT_POLL);
    }
}

unsafe fn init_mutex(mutex: *mut libc::pthread_mutex_t) -> io::Result<()> {
    let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
    check_rc(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;

    let mut result = check_rc(libc::pthread_mutexattr_setpshared(
        attr.as_mut_ptr(),
        libc::PTHREAD_PROCESS_SHARED,
    ));
    if result.is_ok() {
        result = check_rc(libc::pthread_mutexattr_setrobust(
            attr.as_mut_ptr(),
            libc::PTHREAD_MUTEX_ROBUST,
        ));
    }
    if result.is_ok() {
        result = check_rc(libc::pthread_mutex_init(mutex, attr.as_ptr()));
    }

    libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
    result
}

fn check_os(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn check_rc(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

fn lock_error(name: &str, reason: impl ToString) -> StorageError {
    StorageError::Lock {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
