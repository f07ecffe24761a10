//! # validata-core
//!
//! Core library for the validata validation-data provider.
//!
//! This crate provides:
//! - Universal (fat) Mach-O container reading
//! - Wildcard signature scanning for the NAC entry points
//! - A per-revision offset catalogue with live-scan fallback
//! - Resolution and invocation of the native NAC functions
//! - Device metadata probing and the validation-service HTTP clients
//!
//! The invocation surface is deliberately narrow: callers get
//! [`Nac::init`], [`Nac::key_establishment`] and [`Nac::sign`], and never
//! see a raw address.

pub mod device;
pub mod error;
pub mod macho;
pub mod nac;
pub mod net;
pub mod offsets;
pub mod scan;

pub use device::DeviceInfo;
pub use error::{Error, NacCall, NoOffsetsReport, Result};
pub use macho::{ArchSlice, host_arch_name, read_architectures};
pub use nac::{
    IDENTITY_SERVICES_PATH, Nac, ResolvedAddresses, SANITY_SENTINEL, ValidationSession,
};
pub use net::{SubmitClient, ValidationClient};
pub use offsets::{OffsetRecord, OffsetRecordSet, find_offsets, find_offsets_in, sha256_file};
pub use scan::{Signature, scan};
