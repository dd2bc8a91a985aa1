// vim: tw=80
//! Opening and interrogating a zoned block device
//!
//! Most of what we need to know about a device comes from sysfs rather than
//! from the device itself.

use nix::errno::Errno;
use std::{
    fs,
    io,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
};

use crate::{
    types::*,
    util::*,
    zone::ZoneTable,
    zoned_dev::{BlockDev, ZonedDev},
};

/// Where to find the kernel's view of the system's block devices.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SysPaths {
    /// Root of the sysfs tree
    pub sysfs: PathBuf,
    /// The live mount table
    pub mounts: PathBuf,
}

impl Default for SysPaths {
    fn default() -> Self {
        SysPaths {
            sysfs: PathBuf::from("/sys"),
            mounts: PathBuf::from("/proc/mounts"),
        }
    }
}

impl SysPaths {
    fn block_attr(&self, name: &str, attr: &str) -> PathBuf {
        self.sysfs.join("block").join(name).join(attr)
    }

    /// Is any other kernel object (device-mapper, md, ...) stacked on top of
    /// this device?
    fn is_busy(&self, name: &str) -> Result<bool> {
        let holders = self.block_attr(name, "holders");
        let mut entries = fs::read_dir(&holders)
            .map_err(|e| sysfs_err(&holders, &e))?;
        Ok(entries.next().is_some())
    }

    /// Is `dev` the source of any mounted filesystem?
    ///
    /// An unreadable mount table is treated as "not mounted".
    fn is_mounted(&self, dev: &Path) -> bool {
        let table = match fs::read_to_string(&self.mounts) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!("Cannot read mount table {}: {}",
                    self.mounts.display(), e);
                return false;
            }
        };
        table.lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(unescape_mount_field)
            .any(|source| {
                let source = Path::new(&source);
                // Pseudo filesystems have sources like "proc" or "none"
                source == dev ||
                    (source.is_absolute() &&
                     fs::canonicalize(source).is_ok_and(|p| p == dev))
            })
    }

    /// Tell udev and friends that the device's contents have changed, so any
    /// cached signatures get reprobed.
    fn notify_change(&self, name: &str) -> io::Result<()> {
        let uevent = self.sysfs.join("class/block").join(name).join("uevent");
        fs::write(uevent, "change")
    }

    /// Read the device's zone size, in sectors.
    fn zone_sectors(&self, name: &str) -> Result<u64> {
        let path = self.block_attr(name, "queue/chunk_sectors");
        let value = read_attr(&path)?;
        value.parse::<u64>()
            .map_err(|_| Error::InvalidSysfsAttribute {
                path: path.display().to_string(),
                value
            })
    }

    /// Read the device's zone model.  `None` means the device isn't zoned,
    /// or isn't a whole disk.
    fn zone_model(&self, name: &str) -> Result<Option<ZoneModel>> {
        let path = self.block_attr(name, "queue/zoned");
        match read_attr(&path) {
            Ok(value) => Ok(value.parse().ok()),
            Err(Error::Sysfs{errno: Errno::ENOENT, ..}) => Ok(None),
            Err(e) => Err(e)
        }
    }
}

fn read_attr(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_owned())
        .map_err(|e| sysfs_err(path, &e))
}

fn sysfs_err(path: &Path, e: &io::Error) -> Error {
    Error::Sysfs{path: path.display().to_string(), errno: errno_of(e)}
}

/// Decode the octal escapes that the kernel uses for whitespace and
/// backslashes in `/proc/mounts`.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() &&
            bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let v = bytes[i + 1..i + 4].iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(b) = u8::try_from(v) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// An opened zoned block device, together with its validated zone table.
#[derive(Debug)]
pub struct Device<D: ZonedDev = BlockDev> {
    pub(crate) dev: D,
    /// Canonical path to the device node
    path: PathBuf,
    /// Kernel name, like "sdb" or "nullb0"
    name: String,
    model: ZoneModel,
    pub(crate) zones: ZoneTable,
    sys: SysPaths,
}

impl Device<BlockDev> {
    /// Open a zoned block device for formatting.
    ///
    /// Fails if the device isn't a zoned block device, is mounted, or is held
    /// open by another block device driver.  Nothing is written to the
    /// device.
    #[tracing::instrument(skip(sys))]
    pub fn open(path: &Path, sys: &SysPaths) -> Result<Self> {
        let given = path.display().to_string();
        let path = fs::canonicalize(path)
            .map_err(|e| Error::Open{dev: given.clone(), errno: errno_of(&e)})?;
        let dev = path.display().to_string();
        let md = fs::metadata(&path)
            .map_err(|e| Error::Open{dev: dev.clone(), errno: errno_of(&e)})?;
        if !md.file_type().is_block_device() {
            return Err(Error::NotABlockDevice{dev});
        }
        let name = path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::NotABlockDevice{dev: dev.clone()})?;

        let model = sys.zone_model(&name)?
            .ok_or_else(|| Error::NotZoned{dev: dev.clone()})?;
        if sys.is_mounted(&path) {
            return Err(Error::DeviceMounted{dev});
        }
        if sys.is_busy(&name)? {
            return Err(Error::DeviceBusy{dev});
        }
        let bdev = BlockDev::open(&path)
            .map_err(|e| Error::Open{dev: dev.clone(), errno: errno_of(&e)})?;
        let zone_sectors = sys.zone_sectors(&name)?;
        Device::new(bdev, path, name, model, zone_sectors, sys.clone())
    }
}

impl<D: ZonedDev> Device<D> {
    /// Wrap an already-opened device, reading its capacity and zone table.
    ///
    /// * `dev`:            The device itself
    /// * `path`:           Canonical path to the device node
    /// * `name`:           Kernel device name, the basename of `path`
    /// * `model`:          Zone model reported by sysfs
    /// * `zone_sectors`:   Zone size reported by sysfs
    /// * `sys`:            Where the device's sysfs entries live
    pub fn new(dev: D, path: PathBuf, name: String, model: ZoneModel,
               zone_sectors: u64, sys: SysPaths) -> Result<Self>
    {
        let devname = path.display().to_string();
        if zone_sectors == 0 {
            return Err(Error::InvalidZoneSize{dev: devname});
        }
        let capacity = dev.capacity()
            .map_err(|errno| Error::Capacity{dev: devname.clone(), errno})?
            >> SECTOR_SHIFT;
        let zones = ZoneTable::enumerate(&dev, &devname, capacity,
                                         zone_sectors)?;
        Ok(Device { dev, path, name, model, zones, sys })
    }

    /// Device capacity in sectors
    pub fn capacity(&self) -> u64 {
        self.zones.capacity()
    }

    pub fn dev(&self) -> &D {
        &self.dev
    }

    /// Device name used in error messages
    pub(crate) fn errname(&self) -> String {
        self.path.display().to_string()
    }

    pub fn model(&self) -> ZoneModel {
        self.model
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Best-effort notification that the device has a new filesystem on it.
    pub(crate) fn notify_change(&self) {
        if let Err(e) = self.sys.notify_change(&self.name) {
            tracing::warn!("{}: failed to notify change: {}", self.name, e);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn zone_sectors(&self) -> u64 {
        self.zones.zone_sectors()
    }

    pub fn zones(&self) -> &ZoneTable {
        &self.zones
    }
}

// LCOV_EXCL_STOP
