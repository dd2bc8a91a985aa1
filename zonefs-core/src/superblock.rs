// vim: tw=80
//! The zonefs on-disk super block
//!
//! The super block occupies the first 4096 bytes of zone 0.  All fields are
//! little-endian.
//!
//! | Offset | Field       | Size |
//! |--------|-------------|------|
//! | 0      | magic       | 4    |
//! | 4      | crc         | 4    |
//! | 8      | label       | 64   |
//! | 72     | uuid        | 16   |
//! | 88     | features    | 8    |
//! | 96     | uid         | 4    |
//! | 100    | gid         | 4    |
//! | 104    | perm        | 4    |
//! | 108    | reserved    | 3988 |

use byteorder::{ByteOrder, LittleEndian};
use crc::{CRC_32_JAMCRC, Crc};
use std::{
    fmt::{self, Display, Formatter},
    ops::{BitOr, BitOrAssign},
};
use uuid::Uuid;

use crate::{
    device::Device,
    format::FormatOptions,
    types::*,
    zone::ZoneCond,
    zoned_dev::ZonedDev,
};

/// "ZOFS"
pub const MAGIC: u32 = 0x5a4f_4653;
/// Size of the super block on disk
pub const SUPER_SIZE: usize = 4096;
/// Maximum label length in bytes, not including any terminator
pub const LABEL_LEN: usize = 64;

const MAGIC_OFS: usize = 0;
const CRC_OFS: usize = 4;
const LABEL_OFS: usize = 8;
const UUID_OFS: usize = 72;
const FEATURES_OFS: usize = 88;
const UID_OFS: usize = 96;
const GID_OFS: usize = 100;
const PERM_OFS: usize = 104;

/// File permissions used when none are requested
pub const DEFAULT_PERM: u32 = 0o640;

/// The kernel's `crc32_le(~0, ..)`: reflected, no final inversion
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_JAMCRC);

/// Staging buffer for one super block, aligned for `O_DIRECT`
#[repr(C, align(4096))]
struct SuperBuf([u8; SUPER_SIZE]);

/// Set of optional features, as stored on disk.
///
/// Bits that this version doesn't know about are preserved.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Features(u64);

impl Features {
    /// Aggregate all conventional zones into a single file
    pub const AGGR_CNV: Features = Features(1 << 0);
    /// Use `uid` for file ownership
    pub const UID: Features = Features(1 << 1);
    /// Use `gid` for file ownership
    pub const GID: Features = Features(1 << 2);
    /// Use `perm` for file permissions
    pub const PERM: Features = Features(1 << 3);

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn contains(&self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn empty() -> Self {
        Features(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Features(bits)
    }

    pub fn insert(&mut self, other: Features) {
        self.0 |= other.0;
    }
}

impl BitOr for Features {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Features(self.0 | rhs.0)
    }
}

impl BitOrAssign for Features {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs)
    }
}

/// A single feature option, as given on the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Feature {
    AggrCnv,
    Uid(u32),
    Gid(u32),
    Perm(u32),
}

impl Feature {
    /// The feature bit that this option sets
    pub fn flag(&self) -> Features {
        match self {
            Feature::AggrCnv => Features::AGGR_CNV,
            Feature::Uid(_) => Features::UID,
            Feature::Gid(_) => Features::GID,
            Feature::Perm(_) => Features::PERM,
        }
    }
}

impl TryFrom<&str> for Feature {
    type Error = Error;

    /// Parse a feature like `aggr_cnv`, `uid=1000`, or `perm=0644`.
    ///
    /// UIDs and GIDs are decimal; permissions are octal.
    fn try_from(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidFeature(s.to_owned());
        let mut words = s.splitn(2, '=');
        let name = words.next().ok_or_else(invalid)?;
        match (name, words.next()) {
            ("aggr_cnv", None) => Ok(Feature::AggrCnv),
            ("uid", Some(v)) => v.parse::<u32>()
                .map(Feature::Uid)
                .map_err(|_| invalid()),
            ("gid", Some(v)) => v.parse::<u32>()
                .map(Feature::Gid)
                .map_err(|_| invalid()),
            ("perm", Some(v)) => match u32::from_str_radix(v, 8) {
                Ok(perm) if perm <= 0o7777 => Ok(Feature::Perm(perm)),
                _ => Err(invalid())
            },
            _ => Err(invalid())
        }
    }
}

/// In-memory form of the super block
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Superblock {
    label: Vec<u8>,
    uuid: Uuid,
    features: Features,
    uid: u32,
    gid: u32,
    perm: u32,
}

impl Superblock {
    /// Compute the checksum of an encoded super block.
    ///
    /// The checksum covers all [`SUPER_SIZE`] bytes with the crc field taken
    /// as zero.
    pub fn checksum(buf: &[u8]) -> u32 {
        let mut digest = CRC32.digest();
        digest.update(&buf[..CRC_OFS]);
        digest.update(&[0u8; 4]);
        digest.update(&buf[CRC_OFS + 4..SUPER_SIZE]);
        digest.finalize()
    }

    /// Serialize into the first [`SUPER_SIZE`] bytes of `buf`.
    ///
    /// # Panics
    ///
    /// If `buf` is too small.
    pub fn encode(&self, buf: &mut [u8]) {
        let buf = &mut buf[..SUPER_SIZE];
        buf.fill(0);
        LittleEndian::write_u32(&mut buf[MAGIC_OFS..], MAGIC);
        buf[LABEL_OFS..LABEL_OFS + self.label.len()]
            .copy_from_slice(&self.label);
        buf[UUID_OFS..UUID_OFS + 16].copy_from_slice(self.uuid.as_bytes());
        LittleEndian::write_u64(&mut buf[FEATURES_OFS..], self.features.bits());
        LittleEndian::write_u32(&mut buf[UID_OFS..], self.uid);
        LittleEndian::write_u32(&mut buf[GID_OFS..], self.gid);
        LittleEndian::write_u32(&mut buf[PERM_OFS..], self.perm);
        let crc = Self::checksum(buf);
        LittleEndian::write_u32(&mut buf[CRC_OFS..], crc);
    }

    pub fn features(&self) -> Features {
        self.features
    }

    /// Decode and verify a super block.
    ///
    /// # Panics
    ///
    /// If `buf` is shorter than [`SUPER_SIZE`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let buf = &buf[..SUPER_SIZE];
        let magic = LittleEndian::read_u32(&buf[MAGIC_OFS..]);
        if magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }
        let stored = LittleEndian::read_u32(&buf[CRC_OFS..]);
        let computed = Self::checksum(buf);
        if stored != computed {
            return Err(Error::ChecksumMismatch{stored, computed});
        }
        let raw_label = &buf[LABEL_OFS..LABEL_OFS + LABEL_LEN];
        let label_len = raw_label.iter()
            .position(|b| *b == 0)
            .unwrap_or(LABEL_LEN);
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[UUID_OFS..UUID_OFS + 16]);
        Ok(Superblock {
            label: raw_label[..label_len].to_vec(),
            uuid: Uuid::from_bytes(uuid),
            features: Features::from_bits(
                LittleEndian::read_u64(&buf[FEATURES_OFS..])),
            uid: LittleEndian::read_u32(&buf[UID_OFS..]),
            gid: LittleEndian::read_u32(&buf[GID_OFS..]),
            perm: LittleEndian::read_u32(&buf[PERM_OFS..]),
        })
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// The volume label, lossily decoded.
    pub fn label(&self) -> String {
        String::from_utf8_lossy(&self.label).into_owned()
    }

    /// Build a super block with a freshly generated UUID.
    pub fn new(opts: &FormatOptions) -> Self {
        Superblock {
            label: opts.label().as_bytes().to_vec(),
            uuid: Uuid::new_v4(),
            features: opts.features(),
            uid: opts.uid(),
            gid: opts.gid(),
            perm: opts.perm(),
        }
    }

    pub fn perm(&self) -> u32 {
        self.perm
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }
}

impl Display for Features {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl<D: ZonedDev> Device<D> {
    /// Write the super block to the start of zone 0, then finish zone 0 so
    /// that nothing else can be appended to it.
    #[tracing::instrument(skip_all)]
    pub fn write_super(&mut self, sb: &Superblock) -> Result<()> {
        let mut buf = SuperBuf([0u8; SUPER_SIZE]);
        sb.encode(&mut buf.0);
        match self.dev.write_at(&buf.0, 0) {
            Ok(n) if n == SUPER_SIZE => (),
            Ok(n) => {
                tracing::error!(n, "short super block write");
                return Err(Error::SuperblockWriteFailed {
                    dev: self.errname(),
                    errno: nix::errno::Errno::EIO
                });
            }
            Err(errno) => {
                return Err(Error::SuperblockWriteFailed {
                    dev: self.errname(),
                    errno
                });
            }
        }
        if let Some(z) = self.zones.get_mut(0) {
            if z.is_sequential() {
                z.wp = z.start + (SUPER_SIZE as u64 >> SECTOR_SHIFT);
                z.cond = ZoneCond::ImplicitOpen;
            }
        }
        self.finish_zone(0)
    }
}

// LCOV_EXCL_STOP
