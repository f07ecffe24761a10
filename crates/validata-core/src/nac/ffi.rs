//! Raw foreign bindings: the three NAC entry-point shapes and the platform
//! dynamic loader. Nothing outside `nac` handles raw addresses.

#[cfg(unix)]
use std::ffi::CString;
use std::ffi::{c_int, c_void};

use crate::error::{Error, Result};

/// `int nac_init(cert, cert_len, &ctx, &request, &request_len)`
pub type InitFn = unsafe extern "C" fn(
    *const c_void,
    c_int,
    *mut *mut c_void,
    *mut *mut c_void,
    *mut c_int,
) -> c_int;

/// `int nac_key_establishment(ctx, response, response_len)`
pub type KeyEstablishmentFn = unsafe extern "C" fn(*mut c_void, *const c_void, c_int) -> c_int;

/// `int nac_sign(ctx, unused, unused_len, &data, &data_len)`
pub type SignFn = unsafe extern "C" fn(
    *mut c_void,
    *const c_void,
    c_int,
    *mut *mut c_void,
    *mut c_int,
) -> c_int;

/// A binary mapped into the process through the dynamic loader. The handle
/// is never closed; resolved addresses must stay valid for the process
/// lifetime.
#[derive(Debug)]
pub struct Image {
    #[cfg_attr(not(unix), allow(dead_code))]
    handle: *mut c_void,
}

// The loader handle is process-global state and dlsym on it is
// thread-safe.
unsafe impl Send for Image {}
unsafe impl Sync for Image {}

#[cfg(unix)]
impl Image {
    pub fn open(path: &str) -> Result<Self> {
        let c_path = CString::new(path).map_err(|_| Error::ImageLoad {
            path: path.to_string(),
            reason: "path contains an interior NUL".to_string(),
        })?;
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY) };
        if handle.is_null() {
            return Err(Error::ImageLoad {
                path: path.to_string(),
                reason: last_dl_error(),
            });
        }
        Ok(Self { handle })
    }

    /// Resolve an exported symbol to its absolute in-process address.
    pub fn symbol(&self, name: &str) -> Result<*mut c_void> {
        let c_name = CString::new(name).map_err(|_| Error::SymbolNotFound {
            symbol: name.to_string(),
            reason: "symbol contains an interior NUL".to_string(),
        })?;
        let addr = unsafe { libc::dlsym(self.handle, c_name.as_ptr()) };
        if addr.is_null() {
            return Err(Error::SymbolNotFound {
                symbol: name.to_string(),
                reason: last_dl_error(),
            });
        }
        Ok(addr)
    }
}

#[cfg(unix)]
fn last_dl_error() -> String {
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        return "unknown loader error".to_string();
    }
    unsafe { std::ffi::CStr::from_ptr(err) }
        .to_string_lossy()
        .into_owned()
}

#[cfg(not(unix))]
impl Image {
    pub fn open(path: &str) -> Result<Self> {
        Err(Error::ImageLoad {
            path: path.to_string(),
            reason: "dynamic loading is only supported on unix hosts".to_string(),
        })
    }

    pub fn symbol(&self, name: &str) -> Result<*mut c_void> {
        Err(Error::SymbolNotFound {
            symbol: name.to_string(),
            reason: "dynamic loading is only supported on unix hosts".to_string(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_binary_is_image_load_error() {
        let err = Image::open("/nonexistent/image-for-tests").unwrap_err();
        assert!(matches!(err, Error::ImageLoad { .. }));
    }

    #[test]
    fn test_interior_nul_is_rejected() {
        let err = Image::open("bad\0path").unwrap_err();
        assert!(matches!(err, Error::ImageLoad { .. }));
    }
}
