// vim: tw=80
//! Kernel interface to zoned block devices

use byteorder::{ByteOrder, NativeEndian};
#[cfg(test)] use mockall::automock;
use nix::errno::Errno;
use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::{
        fs::{FileExt, OpenOptionsExt},
        io::AsRawFd,
    },
    path::Path,
};

use crate::{
    util::*,
    zone::{Zone, ZoneCond, ZoneType},
};

/// Size of the buffer used for each zone report
pub const REPORT_BUFSZ: usize = 524_288;
/// Size of `struct blk_zone_report`, excluding the trailing zone array
pub const REPORT_HDR_LEN: usize = 16;
/// Size of `struct blk_zone`
pub const ZONE_REC_LEN: usize = 64;
/// Most zones that fit into one report buffer
pub const REPORT_MAX_ZONES: u32 =
    ((REPORT_BUFSZ - REPORT_HDR_LEN) / ZONE_REC_LEN) as u32;

/// FFI definitions for the Linux zoned block device ioctls.  They live here
/// rather than in libc because they're built with Nix's macros.
#[doc(hidden)]
mod ffi {
    use cfg_if::cfg_if;

    /// `struct blk_zone_report` header.  The kernel appends `nr_zones`
    /// `struct blk_zone` records after it.
    #[repr(C)]
    #[doc(hidden)]
    pub struct blk_zone_report {
        pub sector: u64,
        pub nr_zones: u32,
        pub flags: u32,
    }

    /// `struct blk_zone_range`
    #[repr(C)]
    #[doc(hidden)]
    pub struct blk_zone_range {
        pub sector: u64,
        pub nr_sectors: u64,
    }

    cfg_if! {
        if #[cfg(target_os = "linux")] {
            use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr};

            ioctl_read! {
                /// Device size in bytes
                #[doc(hidden)]
                blkgetsize64, 0x12, 114, u64
            }

            ioctl_readwrite! {
                #[doc(hidden)]
                blkreportzone, 0x12, 130, blk_zone_report
            }

            ioctl_write_ptr! {
                #[doc(hidden)]
                blkresetzone, 0x12, 131, blk_zone_range
            }

            ioctl_write_ptr! {
                /// Added in Linux 5.5
                #[doc(hidden)]
                blkfinishzone, 0x12, 136, blk_zone_range
            }

            pub const OPEN_FLAGS: libc::c_int = libc::O_DIRECT;
        } else {
            // Zoned block devices are a Linux-only interface.

            pub unsafe fn blkgetsize64(_fd: libc::c_int, _data: *mut u64)
                -> nix::Result<libc::c_int>
            {
                Err(nix::errno::Errno::ENOTTY)
            }

            pub unsafe fn blkreportzone(_fd: libc::c_int,
                                        _data: *mut blk_zone_report)
                -> nix::Result<libc::c_int>
            {
                Err(nix::errno::Errno::ENOTTY)
            }

            pub unsafe fn blkresetzone(_fd: libc::c_int,
                                       _data: *const blk_zone_range)
                -> nix::Result<libc::c_int>
            {
                Err(nix::errno::Errno::ENOTTY)
            }

            pub unsafe fn blkfinishzone(_fd: libc::c_int,
                                        _data: *const blk_zone_range)
                -> nix::Result<libc::c_int>
            {
                Err(nix::errno::Errno::ENOTTY)
            }

            pub const OPEN_FLAGS: libc::c_int = 0;
        }
    }
}

use ffi::{
    blk_zone_range,
    blk_zone_report,
    blkfinishzone,
    blkgetsize64,
    blkreportzone,
    blkresetzone,
};

/// Operations a zoned block device must support in order to be formatted.
///
/// All positions and lengths are in 512-byte sectors, except for the byte
/// offsets of `write_at`.
#[cfg_attr(test, automock)]
pub trait ZonedDev {
    /// Device capacity in bytes
    fn capacity(&self) -> nix::Result<u64>;

    /// Transition the zone(s) covering the given range to the Full
    /// condition.
    ///
    /// Returns `ENOTTY` if the kernel doesn't know how.
    fn finish_zones(&self, sector: u64, nr_sectors: u64) -> nix::Result<()>;

    /// Report up to `nr_zones` zones, beginning with the one containing
    /// `sector`.
    fn report_zones(&self, sector: u64, nr_zones: u32)
        -> nix::Result<Vec<Zone>>;

    /// Reset the write pointers of every zone in the given range.
    fn reset_zones(&self, sector: u64, nr_sectors: u64) -> nix::Result<()>;

    /// Flush all written data to stable storage.
    fn sync_all(&self) -> nix::Result<()>;

    /// Positioned write.  Returns the number of bytes written.
    fn write_at(&self, buf: &[u8], offset: u64) -> nix::Result<usize>;
}

/// Decode a raw `BLKREPORTZONE` result into `Zone`s.
///
/// The buffer holds a `struct blk_zone_report` header followed by
/// `nr_zones` native-endian `struct blk_zone` records.
pub fn parse_report(buf: &[u8]) -> nix::Result<Vec<Zone>> {
    if buf.len() < REPORT_HDR_LEN {
        return Err(Errno::EINVAL);
    }
    let nr_zones = NativeEndian::read_u32(&buf[8..12]) as usize;
    let room = (buf.len() - REPORT_HDR_LEN) / ZONE_REC_LEN;
    if nr_zones > room {
        tracing::error!(nr_zones, room, "zone report overflows its buffer");
        return Err(Errno::EIO);
    }
    buf[REPORT_HDR_LEN..]
        .chunks_exact(ZONE_REC_LEN)
        .take(nr_zones)
        .map(parse_zone)
        .collect()
}

/// Decode a single `struct blk_zone`
fn parse_zone(rec: &[u8]) -> nix::Result<Zone> {
    let start = NativeEndian::read_u64(&rec[0..8]);
    let len = NativeEndian::read_u64(&rec[8..16]);
    let wp = NativeEndian::read_u64(&rec[16..24]);
    let ztype = ZoneType::try_from(rec[24]).map_err(|_| {
        tracing::error!(start, ztype = rec[24], "Unknown zone type");
        Errno::EIO
    })?;
    let cond = ZoneCond::try_from(rec[25]).map_err(|_| {
        tracing::error!(start, cond = rec[25], "Unknown zone condition");
        Errno::EIO
    })?;
    Ok(Zone { start, len, wp, ztype, cond })
}

/// A zoned block device node, opened for direct I/O.
#[derive(Debug)]
pub struct BlockDev {
    file: File,
}

impl BlockDev {
    /// Open the device read-write, bypassing the page cache.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(ffi::OPEN_FLAGS)
            .open(path)
            .map(|file| BlockDev { file })
    }

    fn zone_range(sector: u64, nr_sectors: u64) -> blk_zone_range {
        blk_zone_range { sector, nr_sectors }
    }
}

impl ZonedDev for BlockDev {
    fn capacity(&self) -> nix::Result<u64> {
        let mut bytes = 0u64;
        // Safe because bytes outlives the call
        unsafe { blkgetsize64(self.file.as_raw_fd(), &mut bytes) }?;
        Ok(bytes)
    }

    fn finish_zones(&self, sector: u64, nr_sectors: u64) -> nix::Result<()> {
        let range = Self::zone_range(sector, nr_sectors);
        // Safe because range outlives the call
        unsafe { blkfinishzone(self.file.as_raw_fd(), &range) }.map(drop)
    }

    fn report_zones(&self, sector: u64, nr_zones: u32)
        -> nix::Result<Vec<Zone>>
    {
        let nr_zones = nr_zones.min(REPORT_MAX_ZONES);
        let len = REPORT_HDR_LEN + nr_zones as usize * ZONE_REC_LEN;
        let mut buf = vec![0u8; len];
        NativeEndian::write_u64(&mut buf[0..8], sector);
        NativeEndian::write_u32(&mut buf[8..12], nr_zones);
        // Safe because the buffer begins with a blk_zone_report header and
        // has room for the nr_zones records that the header advertises.  The
        // kernel copies in and out byte-wise, so alignment doesn't matter.
        unsafe {
            blkreportzone(self.file.as_raw_fd(),
                          buf.as_mut_ptr().cast::<blk_zone_report>())
        }?;
        parse_report(&buf)
    }

    fn reset_zones(&self, sector: u64, nr_sectors: u64) -> nix::Result<()> {
        let range = Self::zone_range(sector, nr_sectors);
        // Safe because range outlives the call
        unsafe { blkresetzone(self.file.as_raw_fd(), &range) }.map(drop)
    }

    fn sync_all(&self) -> nix::Result<()> {
        self.file.sync_all().map_err(|e| errno_of(&e))
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> nix::Result<usize> {
        self.file.write_at(buf, offset).map_err(|e| errno_of(&e))
    }
}

// LCOV_EXCL_STOP
