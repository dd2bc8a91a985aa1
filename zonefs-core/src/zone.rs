// vim: tw=80
//! Zone descriptors and the device's zone table

use crate::{
    types::*,
    util::*,
    zoned_dev::{REPORT_MAX_ZONES, ZonedDev},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::{
    fmt::{self, Display, Formatter},
    ops::Index,
    slice,
};

/// Zone types, using the kernel's `BLK_ZONE_TYPE_*` codes.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ZoneType {
    Conventional = 0x1,
    SequentialRequired = 0x2,
    SequentialPreferred = 0x3,
}

impl Display for ZoneType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ZoneType::Conventional => f.write_str("Conventional"),
            ZoneType::SequentialRequired =>
                f.write_str("Sequential-write-required"),
            ZoneType::SequentialPreferred =>
                f.write_str("Sequential-write-preferred"),
        }
    }
}

/// Zone conditions, using the kernel's `BLK_ZONE_COND_*` codes.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ZoneCond {
    NotWp = 0x0,
    Empty = 0x1,
    ImplicitOpen = 0x2,
    ExplicitOpen = 0x3,
    Closed = 0x4,
    ReadOnly = 0xd,
    Full = 0xe,
    Offline = 0xf,
}

impl Display for ZoneCond {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self {
            ZoneCond::NotWp => "Not-write-pointer",
            ZoneCond::Empty => "Empty",
            ZoneCond::ImplicitOpen => "Implicit-open",
            ZoneCond::ExplicitOpen => "Explicit-open",
            ZoneCond::Closed => "Closed",
            ZoneCond::ReadOnly => "Read-only",
            ZoneCond::Full => "Full",
            ZoneCond::Offline => "Offline",
        };
        f.write_str(s)
    }
}

/// A single zone, as reported by the device.
///
/// All positions are in 512-byte sectors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Zone {
    pub start: u64,
    pub len: u64,
    /// Write pointer.  Meaningless for conventional zones.
    pub wp: u64,
    pub ztype: ZoneType,
    pub cond: ZoneCond,
}

impl Zone {
    pub fn new(start: u64, len: u64, wp: u64, ztype: ZoneType, cond: ZoneCond)
        -> Self
    {
        Zone { start, len, wp, ztype, cond }
    }

    /// Can this zone's write pointer be reset?
    pub fn can_reset(&self) -> bool {
        self.is_sequential() &&
            !matches!(self.cond, ZoneCond::ReadOnly | ZoneCond::Offline)
    }

    /// First sector past the end of the zone
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    pub fn is_conventional(&self) -> bool {
        self.ztype == ZoneType::Conventional
    }

    pub fn is_sequential(&self) -> bool {
        !self.is_conventional()
    }

    /// Record that the device has reset this zone.
    pub(crate) fn mark_empty(&mut self) {
        self.wp = self.start;
        self.cond = ZoneCond::Empty;
    }

    /// Record that the device has finished this zone.
    pub(crate) fn mark_full(&mut self) {
        self.wp = self.end();
        self.cond = ZoneCond::Full;
    }
}

/// Every zone of a device, in LBA order.
///
/// A `ZoneTable` can only be built by [`ZoneTable::enumerate`], which
/// guarantees that the zones are contiguous, cover the whole device, and all
/// have the same size except possibly the last one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ZoneTable {
    zones: Vec<Zone>,
    /// Uniform zone size in sectors
    zone_sectors: u64,
    /// Device capacity in sectors
    capacity: u64,
    nr_conv: u32,
    nr_seq: u32,
    nr_ro: u32,
    nr_offline: u32,
}

impl ZoneTable {
    /// Device capacity in sectors
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Read the complete zone table from the device and validate it.
    ///
    /// Zones are requested [`REPORT_MAX_ZONES`] at a time, each report starting
    /// where the previous one left off.
    ///
    /// * `dev`:            The device to query
    /// * `name`:           Device name, for error messages
    /// * `capacity`:       Device capacity in sectors
    /// * `zone_sectors`:   The device's declared zone size in sectors
    #[tracing::instrument(skip(dev))]
    pub fn enumerate<D>(dev: &D, name: &str, capacity: u64, zone_sectors: u64)
        -> Result<Self>
        where D: ZonedDev + ?Sized
    {
        if zone_sectors == 0 {
            return Err(Error::InvalidZoneSize{dev: name.to_owned()});
        }
        // The expected count comes from sysfs, so don't trust it too far.
        let expected = div_roundup(capacity, zone_sectors)
            .min(u64::from(REPORT_MAX_ZONES));
        let mut table = ZoneTable {
            zones: Vec::with_capacity(expected as usize),
            zone_sectors,
            capacity,
            nr_conv: 0,
            nr_seq: 0,
            nr_ro: 0,
            nr_offline: 0,
        };

        let mut sector = 0;
        while sector < capacity {
            let report = dev.report_zones(sector, REPORT_MAX_ZONES)
                .map_err(|errno| Error::ZoneReport {
                    dev: name.to_owned(),
                    errno
                })?;
            if report.is_empty() {
                break;
            }
            for zone in report {
                if sector >= capacity {
                    break;
                }
                tracing::trace!(?zone);
                let id = zone.start / zone_sectors;
                let runt = zone.end() == capacity;
                if zone.start != sector || (zone.len != zone_sectors && !runt)
                {
                    return Err(Error::InvalidZoneGeometry {
                        dev: name.to_owned(),
                        zone: id,
                        start: zone.start,
                        len: zone.len
                    });
                }
                table.push(zone);
                sector = zone.end();
            }
        }

        if sector != capacity {
            return Err(Error::IncompleteZoneReport {
                dev: name.to_owned(),
                sector,
                capacity
            });
        }
        if table.len() as u64 != expected {
            return Err(Error::ZoneCountMismatch {
                dev: name.to_owned(),
                expected,
                actual: table.len() as u64
            });
        }
        // Zone 0 holds the super block, so at least one other zone must be
        // online.
        if u64::from(table.nr_offline) + 1 >= table.len() as u64 {
            return Err(Error::NoUsableZones{dev: name.to_owned()});
        }
        tracing::debug!(nr_zones = table.len(), nr_conv = table.nr_conv,
            nr_seq = table.nr_seq, nr_ro = table.nr_ro,
            nr_offline = table.nr_offline, "zone table complete");
        Ok(table)
    }

    pub fn get(&self, i: usize) -> Option<&Zone> {
        self.zones.get(i)
    }

    pub(crate) fn get_mut(&mut self, i: usize) -> Option<&mut Zone> {
        self.zones.get_mut(i)
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, Zone> {
        self.zones.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> slice::IterMut<'_, Zone> {
        self.zones.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Number of conventional zones
    pub fn nr_conv(&self) -> u32 {
        self.nr_conv
    }

    /// Number of zones of the full, uniform size
    pub fn nr_full_size(&self) -> u64 {
        self.capacity / self.zone_sectors
    }

    /// Number of offline zones
    pub fn nr_offline(&self) -> u32 {
        self.nr_offline
    }

    /// Number of read-only zones
    pub fn nr_ro(&self) -> u32 {
        self.nr_ro
    }

    /// Number of sequential zones, of either kind
    pub fn nr_seq(&self) -> u32 {
        self.nr_seq
    }

    fn push(&mut self, zone: Zone) {
        match zone.cond {
            ZoneCond::ReadOnly => self.nr_ro += 1,
            ZoneCond::Offline => self.nr_offline += 1,
            _ => ()
        }
        if zone.is_conventional() {
            self.nr_conv += 1;
        } else {
            self.nr_seq += 1;
        }
        self.zones.push(zone);
    }

    /// The trailing zone, if it is smaller than the others.
    pub fn runt(&self) -> Option<&Zone> {
        self.zones.last().filter(|z| z.len != self.zone_sectors)
    }

    /// Number of zones available for files.
    ///
    /// Excludes offline zones and zone 0, which holds the super block.
    pub fn usable_zones(&self) -> u64 {
        (self.len() as u64).saturating_sub(u64::from(self.nr_offline) + 1)
    }

    /// Index of the zone containing `sector`
    pub fn zone_id(&self, sector: u64) -> u64 {
        sector / self.zone_sectors
    }

    /// Uniform zone size in sectors
    pub fn zone_sectors(&self) -> u64 {
        self.zone_sectors
    }
}

/// Print the table one zone per line, in the same format used by the
/// verbose option.
impl Display for ZoneTable {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for z in self.zones.iter() {
            let id = self.zone_id(z.start);
            match z.cond {
                ZoneCond::ReadOnly =>
                    writeln!(f, "Zone {id:05}: readonly {} zone", z.ztype)?,
                ZoneCond::Offline =>
                    writeln!(f, "Zone {id:05}: offline {} zone", z.ztype)?,
                _ if z.is_conventional() =>
                    writeln!(f, "Zone {id:05}: Conventional, sector {}, {} \
                             sectors", z.start, z.len)?,
                _ => writeln!(f, "Zone {id:05}: type {:#x} ({}), cond {:#x} \
                              ({}), sector {}, {} sectors, wp sector {}",
                              u8::from(z.ztype), z.ztype,
                              u8::from(z.cond), z.cond,
                              z.start, z.len, z.wp)?
            }
        }
        Ok(())
    }
}

impl Index<usize> for ZoneTable {
    type Output = Zone;

    fn index(&self, i: usize) -> &Zone {
        &self.zones[i]
    }
}

impl<'a> IntoIterator for &'a ZoneTable {
    type Item = &'a Zone;
    type IntoIter = slice::Iter<'a, Zone>;

    fn into_iter(self) -> Self::IntoIter {
        self.zones.iter()
    }
}

// LCOV_EXCL_STOP
