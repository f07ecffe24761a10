//! Scoped native memory arena.
//!
//! The NAC entry points allocate transient Objective-C objects that are
//! reclaimed only when an autorelease pool drains. The guard pushes a pool
//! on creation and pops it when dropped, on every exit path. It is `!Send`:
//! pools are thread-affine in the Objective-C runtime and must drain on the
//! thread that pushed them, and Rust threads map 1:1 onto OS threads, so
//! keeping the guard on its creating thread is enough.

use std::ffi::c_void;
use std::marker::PhantomData;

#[cfg(target_os = "macos")]
#[link(name = "objc")]
unsafe extern "C" {
    fn objc_autoreleasePoolPush() -> *mut c_void;
    fn objc_autoreleasePoolPop(pool: *mut c_void);
}

pub struct ArenaGuard {
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    pool: *mut c_void,
    // Raw pointer member makes the guard !Send and !Sync.
    _thread_bound: PhantomData<*mut c_void>,
}

impl ArenaGuard {
    pub fn enter() -> Self {
        #[cfg(target_os = "macos")]
        let pool = unsafe { objc_autoreleasePoolPush() };
        #[cfg(not(target_os = "macos"))]
        let pool = std::ptr::null_mut();

        Self {
            pool,
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for ArenaGuard {
    fn drop(&mut self) {
        #[cfg(target_os = "macos")]
        unsafe {
            objc_autoreleasePoolPop(self.pool)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_scopes_nest() {
        let outer = ArenaGuard::enter();
        {
            let _inner = ArenaGuard::enter();
        }
        drop(outer);
    }
}
