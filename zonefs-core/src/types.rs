// vim: tw=80
//! Common type definitions used throughout zonefs-core

use nix::errno::Errno;
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};
use thiserror::Error;

/// Sectors are always 512 bytes, regardless of the device's logical block
/// size.
pub const SECTOR_SHIFT: u32 = 9;
pub const BYTES_PER_SECTOR: u64 = 1 << SECTOR_SHIFT;

/// Broad category of an [`Error`].
///
/// Everything up to and including `Safety` is detected before any
/// destructive operation is issued to the device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// Bad options from the caller
    Usage,
    /// The device can't be formatted at all
    Precondition,
    /// The device's zones are inconsistent or unusable
    Geometry,
    /// The device appears to hold something worth keeping
    Safety,
    /// A destructive operation failed.  The device may be half-formatted.
    DeviceOperation,
    /// An on-disk super block could not be decoded
    Format,
}

/// zonefs-core's error type.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Label too long ({len} bytes, {max} allowed)")]
    InvalidLabel { len: usize, max: usize },

    #[error("Invalid feature string \"{0}\"")]
    InvalidFeature(String),

    #[error("{dev}: open failed: {errno}")]
    Open { dev: String, errno: Errno },

    #[error("{dev} is not a block device")]
    NotABlockDevice { dev: String },

    #[error("{dev}: not a zoned block device")]
    NotZoned { dev: String },

    #[error("{path}: read failed: {errno}")]
    Sysfs { path: String, errno: Errno },

    #[error("{path}: invalid attribute value \"{value}\"")]
    InvalidSysfsAttribute { path: String, value: String },

    #[error("{dev}: get capacity failed: {errno}")]
    Capacity { dev: String, errno: Errno },

    #[error("{dev}: invalid zone size")]
    InvalidZoneSize { dev: String },

    #[error("{dev} is mounted")]
    DeviceMounted { dev: String },

    #[error("{dev} is in use")]
    DeviceBusy { dev: String },

    #[error("{dev}: get zone information failed: {errno}")]
    ZoneReport { dev: String, errno: Errno },

    #[error("{dev}: invalid zone {zone} size (sector {start}, {len} sectors)")]
    InvalidZoneGeometry { dev: String, zone: u64, start: u64, len: u64 },

    #[error("{dev}: invalid zones (last sector reported is {sector}, \
             expected {capacity})")]
    IncompleteZoneReport { dev: String, sector: u64, capacity: u64 },

    #[error("{dev}: invalid number of zones (expected {expected}, got {actual})")]
    ZoneCountMismatch { dev: String, expected: u64, actual: u64 },

    #[error("{dev}: no usable zones")]
    NoUsableZones { dev: String },

    #[error("{dev} appears to contain {found}; use the option '-f' to \
             overwrite")]
    OverwriteRefused { dev: String, found: String },

    #[error("{dev}: probe failed, cannot detect existing filesystem")]
    ProbeError { dev: String },

    #[error("{dev}: reset zone {zone} failed: {errno}")]
    ZoneResetFailed { dev: String, zone: u64, errno: Errno },

    #[error("{dev}: finish zone {zone} failed: {errno}")]
    ZoneFinishFailed { dev: String, zone: u64, errno: Errno },

    #[error("{dev}: write super block failed: {errno}")]
    SuperblockWriteFailed { dev: String, errno: Errno },

    #[error("{dev}: fsync failed: {errno}")]
    SyncFailed { dev: String, errno: Errno },

    #[error("Bad super block magic {0:#010x}")]
    BadMagic(u32),

    #[error("Super block checksum mismatch (stored {stored:#010x}, computed \
             {computed:#010x})")]
    ChecksumMismatch { stored: u32, computed: u32 },
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InvalidLabel{..} | Error::InvalidFeature(_) =>
                ErrorClass::Usage,
            Error::Open{..} |
            Error::NotABlockDevice{..} |
            Error::NotZoned{..} |
            Error::Sysfs{..} |
            Error::InvalidSysfsAttribute{..} |
            Error::Capacity{..} |
            Error::InvalidZoneSize{..} |
            Error::DeviceMounted{..} |
            Error::DeviceBusy{..} => ErrorClass::Precondition,
            Error::ZoneReport{..} |
            Error::InvalidZoneGeometry{..} |
            Error::IncompleteZoneReport{..} |
            Error::ZoneCountMismatch{..} |
            Error::NoUsableZones{..} => ErrorClass::Geometry,
            Error::OverwriteRefused{..} | Error::ProbeError{..} =>
                ErrorClass::Safety,
            Error::ZoneResetFailed{..} |
            Error::ZoneFinishFailed{..} |
            Error::SuperblockWriteFailed{..} |
            Error::SyncFailed{..} => ErrorClass::DeviceOperation,
            Error::BadMagic(_) | Error::ChecksumMismatch{..} =>
                ErrorClass::Format,
        }
    }

    /// The underlying OS error, if a system call failed.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Open{errno, ..} |
            Error::Sysfs{errno, ..} |
            Error::Capacity{errno, ..} |
            Error::ZoneReport{errno, ..} |
            Error::ZoneResetFailed{errno, ..} |
            Error::ZoneFinishFailed{errno, ..} |
            Error::SuperblockWriteFailed{errno, ..} |
            Error::SyncFailed{errno, ..} => Some(*errno),
            _ => None
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Zoned block device models, as reported by sysfs
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ZoneModel {
    /// Writes must land on the write pointer.
    HostManaged,
    /// Random writes are tolerated, but discouraged.
    HostAware,
}

impl Display for ZoneModel {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ZoneModel::HostManaged => f.write_str("Host-managed"),
            ZoneModel::HostAware => f.write_str("Host-aware"),
        }
    }
}

impl FromStr for ZoneModel {
    type Err = ();

    /// Parse the contents of the `queue/zoned` sysfs attribute.  Anything
    /// other than the two zoned models, including "none", is an error.
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "host-managed" => Ok(ZoneModel::HostManaged),
            "host-aware" => Ok(ZoneModel::HostAware),
            _ => Err(())
        }
    }
}

// LCOV_EXCL_STOP
