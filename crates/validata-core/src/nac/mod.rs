//! Resolution and invocation of the NAC entry points.
//!
//! The entry points are not exported, so their absolute addresses are
//! recovered indirectly: dlopen the binary, dlsym one symbol that *is*
//! stably exported, subtract that symbol's catalogued relative address to
//! get the image base, and add the catalogued relative address of each
//! entry point. A sentinel probe call then proves the arithmetic landed on
//! the real function before anything trusts it.

mod arena;
mod ffi;

use std::ffi::{c_int, c_void};
use std::marker::PhantomData;
use std::path::Path;
use std::ptr;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::device::DeviceInfo;
use crate::error::{Error, NacCall, NoOffsetsReport, Result};
use crate::macho::host_arch_name;
use crate::offsets::catalogue::Catalogue;
use crate::offsets::{self, OffsetRecord};

pub use arena::ArenaGuard;
pub use ffi::{Image, InitFn, KeyEstablishmentFn, SignFn};

/// Binary that carries the NAC implementation on every macOS release.
pub const IDENTITY_SERVICES_PATH: &str = "/System/Library/PrivateFrameworks/IDS.framework/identityservicesd.app/Contents/MacOS/identityservicesd";

/// NACInit returns exactly this code when called with no certificate. The
/// probe treats any other return, success included, as a mis-resolved
/// address.
pub const SANITY_SENTINEL: c_int = -44023;

/// Absolute entry-point addresses, fixed for the process lifetime and
/// freely shareable across threads once resolved.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedAddresses {
    init: InitFn,
    key_establishment: KeyEstablishmentFn,
    sign: SignFn,
}

impl ResolvedAddresses {
    /// Bind raw in-process addresses.
    ///
    /// # Safety
    /// Every address must point at a function with the corresponding NAC
    /// shape and stay valid for the process lifetime.
    pub unsafe fn from_raw(init: usize, key_establishment: usize, sign: usize) -> Self {
        unsafe {
            Self {
                init: std::mem::transmute::<usize, InitFn>(init),
                key_establishment: std::mem::transmute::<usize, KeyEstablishmentFn>(
                    key_establishment,
                ),
                sign: std::mem::transmute::<usize, SignFn>(sign),
            }
        }
    }
}

/// Opaque native session produced by [`Nac::init`]. Owned by a single
/// validation attempt and a single thread (`!Send`); dropped on any error
/// and never reused across attempts. The native library manages the
/// allocation itself, so there is nothing to release here.
#[derive(Debug)]
pub struct ValidationSession {
    ctx: *mut c_void,
    _thread_bound: PhantomData<*mut c_void>,
}

impl ValidationSession {
    fn new(ctx: *mut c_void) -> Self {
        Self {
            ctx,
            _thread_bound: PhantomData,
        }
    }
}

/// The narrow invocation surface over the resolved entry points.
#[derive(Debug)]
pub struct Nac {
    addrs: ResolvedAddresses,
}

// Serializes first-time loads; concurrent callers would otherwise race the
// loader and the probe.
static LOAD_LOCK: Mutex<()> = Mutex::new(());

impl Nac {
    /// Load the system binary and resolve the entry points for this host.
    pub fn load(device: &DeviceInfo) -> Result<Self> {
        Self::load_from(Path::new(IDENTITY_SERVICES_PATH), device)
    }

    /// As [`Nac::load`], for an explicit binary path. Runs the sanity probe
    /// before returning; a `SanityCheck` error here means the process must
    /// not continue.
    pub fn load_from(path: &Path, device: &DeviceInfo) -> Result<Self> {
        Self::load_with_catalogue(path, device, Catalogue::builtin())
    }

    pub(crate) fn load_with_catalogue(
        path: &Path,
        device: &DeviceInfo,
        table: &Catalogue,
    ) -> Result<Self> {
        let _guard = LOAD_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let data = std::fs::read(path)?;
        let hash = offsets::sha256(&data);
        let arch = host_arch_name();
        let record = offsets::resolve_record(&data, &hash, arch, table)?.ok_or_else(|| {
            Error::NoOffsets(NoOffsetsReport {
                hash: offsets::hex_digest(&hash),
                os_version: device.software_version.clone(),
                build_id: device.software_build_id.clone(),
                arch: arch.to_string(),
            })
        })?;
        drop(data);

        info!("reference symbol: {}", record.reference_symbol);
        debug!(
            "reference: {:#x}, init: {:#x}, key establishment: {:#x}, sign: {:#x}",
            record.reference_addr,
            record.init_addr,
            record.key_establishment_addr,
            record.sign_addr
        );

        let nac = Self::bind(path, &record)?;
        nac.sanity_check()?;
        Ok(nac)
    }

    fn bind(path: &Path, record: &OffsetRecord) -> Result<Self> {
        let image = Image::open(&path.to_string_lossy())?;
        let reference = image.symbol(&record.reference_symbol)?;
        let base = (reference as usize).wrapping_sub(record.reference_addr as usize);
        let addrs = unsafe {
            ResolvedAddresses::from_raw(
                base.wrapping_add(record.init_addr as usize),
                base.wrapping_add(record.key_establishment_addr as usize),
                base.wrapping_add(record.sign_addr as usize),
            )
        };
        Ok(Self::from_addresses(addrs))
    }

    /// Wrap already-resolved addresses, e.g. test doubles.
    pub fn from_addresses(addrs: ResolvedAddresses) -> Self {
        Self { addrs }
    }

    /// Probe NACInit with no inputs. Only the exact missing-input sentinel
    /// proves the resolved address behaves like the real function; any
    /// other outcome means the arithmetic cannot be trusted.
    pub fn sanity_check(&self) -> Result<()> {
        let _arena = ArenaGuard::enter();
        let code = unsafe {
            (self.addrs.init)(
                ptr::null(),
                0,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if code != SANITY_SENTINEL {
            return Err(Error::SanityCheck { code });
        }
        Ok(())
    }

    /// Start a validation attempt: returns the session and the outbound
    /// session-info request payload.
    pub fn init(&self, cert: &[u8]) -> Result<(ValidationSession, Vec<u8>)> {
        let _arena = ArenaGuard::enter();
        let cert_ptr = if cert.is_empty() {
            ptr::null()
        } else {
            cert.as_ptr().cast()
        };
        let mut ctx: *mut c_void = ptr::null_mut();
        let mut out_ptr: *mut c_void = ptr::null_mut();
        let mut out_len: c_int = 0;
        let code = unsafe {
            (self.addrs.init)(cert_ptr, cert.len() as c_int, &mut ctx, &mut out_ptr, &mut out_len)
        };
        if code != 0 {
            return Err(Error::NativeCall {
                call: NacCall::Init,
                code,
            });
        }
        // Copied out before the arena drains the native buffer.
        let request = unsafe { copy_native_buffer(out_ptr, out_len) };
        Ok((ValidationSession::new(ctx), request))
    }

    /// Feed the service's session-info response into the session.
    pub fn key_establishment(&self, session: &ValidationSession, response: &[u8]) -> Result<()> {
        let _arena = ArenaGuard::enter();
        let code = unsafe {
            (self.addrs.key_establishment)(
                session.ctx,
                response.as_ptr().cast(),
                response.len() as c_int,
            )
        };
        if code != 0 {
            return Err(Error::NativeCall {
                call: NacCall::KeyEstablishment,
                code,
            });
        }
        Ok(())
    }

    /// Finish the attempt and return the signed validation data. Consumes
    /// the session; a fresh attempt starts over at [`Nac::init`].
    pub fn sign(&self, session: ValidationSession) -> Result<Vec<u8>> {
        let _arena = ArenaGuard::enter();
        let mut out_ptr: *mut c_void = ptr::null_mut();
        let mut out_len: c_int = 0;
        let code = unsafe {
            (self.addrs.sign)(session.ctx, ptr::null(), 0, &mut out_ptr, &mut out_len)
        };
        if code != 0 {
            return Err(Error::NativeCall {
                call: NacCall::Sign,
                code,
            });
        }
        Ok(unsafe { copy_native_buffer(out_ptr, out_len) })
    }
}

/// Copy a native output buffer into owned memory. Must run while the arena
/// that the producing call opened is still alive.
unsafe fn copy_native_buffer(ptr: *const c_void, len: c_int) -> Vec<u8> {
    if ptr.is_null() || len <= 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize) }.to_vec()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    static REQUEST_PAYLOAD: &[u8] = b"session-info-request-bytes";
    static VALIDATION_PAYLOAD: &[u8] = b"signed-validation-data";
    const FAKE_CTX: usize = 0x5EED;

    unsafe extern "C" fn stub_init(
        cert: *const c_void,
        cert_len: c_int,
        out_ctx: *mut *mut c_void,
        out_request: *mut *mut c_void,
        out_request_len: *mut c_int,
    ) -> c_int {
        if cert.is_null() || cert_len == 0 {
            return SANITY_SENTINEL;
        }
        unsafe {
            *out_ctx = FAKE_CTX as *mut c_void;
            *out_request = REQUEST_PAYLOAD.as_ptr() as *mut c_void;
            *out_request_len = REQUEST_PAYLOAD.len() as c_int;
        }
        0
    }

    unsafe extern "C" fn stub_init_wrong_sentinel(
        _cert: *const c_void,
        _cert_len: c_int,
        _out_ctx: *mut *mut c_void,
        _out_request: *mut *mut c_void,
        _out_request_len: *mut c_int,
    ) -> c_int {
        0
    }

    unsafe extern "C" fn stub_init_failing(
        cert: *const c_void,
        _cert_len: c_int,
        _out_ctx: *mut *mut c_void,
        _out_request: *mut *mut c_void,
        _out_request_len: *mut c_int,
    ) -> c_int {
        if cert.is_null() { SANITY_SENTINEL } else { -6001 }
    }

    unsafe extern "C" fn stub_key_establishment(
        ctx: *mut c_void,
        response: *const c_void,
        response_len: c_int,
    ) -> c_int {
        if ctx as usize != FAKE_CTX || response.is_null() || response_len == 0 {
            return -7001;
        }
        0
    }

    unsafe extern "C" fn stub_sign(
        ctx: *mut c_void,
        _unused: *const c_void,
        _unused_len: c_int,
        out_data: *mut *mut c_void,
        out_data_len: *mut c_int,
    ) -> c_int {
        if ctx as usize != FAKE_CTX {
            return -8001;
        }
        unsafe {
            *out_data = VALIDATION_PAYLOAD.as_ptr() as *mut c_void;
            *out_data_len = VALIDATION_PAYLOAD.len() as c_int;
        }
        0
    }

    fn stub_nac(init: InitFn) -> Nac {
        let addrs = unsafe {
            ResolvedAddresses::from_raw(
                init as usize,
                stub_key_establishment as usize,
                stub_sign as usize,
            )
        };
        Nac::from_addresses(addrs)
    }

    #[test]
    fn test_sanity_check_accepts_sentinel() {
        assert!(stub_nac(stub_init).sanity_check().is_ok());
    }

    #[test]
    fn test_sanity_check_rejects_success_code() {
        // A call that "succeeds" with null inputs is not the real NACInit.
        let err = stub_nac(stub_init_wrong_sentinel).sanity_check().unwrap_err();
        assert!(matches!(err, Error::SanityCheck { code: 0 }));
    }

    #[test]
    fn test_full_pipeline_round_trips_payloads() {
        let nac = stub_nac(stub_init);
        let (session, request) = nac.init(b"certificate").unwrap();
        assert_eq!(request, REQUEST_PAYLOAD);

        nac.key_establishment(&session, b"session-info").unwrap();
        let validation_data = nac.sign(session).unwrap();
        assert_eq!(validation_data, VALIDATION_PAYLOAD);
    }

    #[test]
    fn test_init_failure_carries_call_and_code() {
        let err = stub_nac(stub_init_failing).init(b"certificate").unwrap_err();
        assert!(matches!(
            err,
            Error::NativeCall {
                call: NacCall::Init,
                code: -6001
            }
        ));
    }

    #[test]
    fn test_key_establishment_rejects_empty_response() {
        let nac = stub_nac(stub_init);
        let (session, _) = nac.init(b"certificate").unwrap();
        let err = nac.key_establishment(&session, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::NativeCall {
                call: NacCall::KeyEstablishment,
                code: -7001
            }
        ));
    }

    #[test]
    fn test_load_of_uncatalogued_binary_reports_no_offsets() {
        // A file with no recognizable patterns and an unknown hash must
        // fail before any loader interaction, carrying hash and arch.
        let mut file = NamedTempFile::new().unwrap();
        let mut content = vec![0u8; 256];
        content[0..4].copy_from_slice(&crate::macho::MACHO_MAGIC_64.to_le_bytes());
        file.write_all(&content).unwrap();

        let device = DeviceInfo::unknown();
        let err = Nac::load_from(file.path(), &device).unwrap_err();
        let Error::NoOffsets(report) = err else {
            panic!("expected NoOffsets, got {err:?}");
        };
        assert_eq!(report.hash, offsets::hex_digest(&offsets::sha256(&content)));
        assert_eq!(report.arch, host_arch_name());
        assert_eq!(report.os_version, "unknown");
    }
}
