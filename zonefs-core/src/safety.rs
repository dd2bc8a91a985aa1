// vim: tw=80
//! Guard against overwriting a device that already holds something

use byteorder::{BigEndian, ByteOrder, LittleEndian};
#[cfg(test)] use mockall::automock;
use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};

use crate::{
    superblock::MAGIC,
    types::*,
};

/// How much of the device [`SignatureProbe`] reads
pub const PROBE_LEN: usize = 69_632;

/// What a [`ContentProbe`] found on a device
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProbeResult {
    /// Nothing recognizable; safe to format
    Clean,
    ExistingFilesystem(String),
    ExistingPartitionTable(String),
    /// The device holds data, but we don't know what kind
    Unknown,
    /// The device couldn't be probed
    ProbeFailed,
}

/// Inspects a device's existing contents.
#[cfg_attr(test, automock)]
pub trait ContentProbe {
    fn probe(&self, path: &Path) -> ProbeResult;
}

/// Refuse to format a device that appears to be in use, unless forced.
///
/// When `force` is set, the oracle is not even consulted.
pub fn check_overwrite(oracle: &dyn ContentProbe, path: &Path, force: bool)
    -> Result<()>
{
    if force {
        return Ok(());
    }
    let dev = path.display().to_string();
    let found = match oracle.probe(path) {
        ProbeResult::Clean => return Ok(()),
        ProbeResult::ProbeFailed => return Err(Error::ProbeError{dev}),
        ProbeResult::ExistingFilesystem(fs) =>
            format!("an existing filesystem ({fs})"),
        ProbeResult::ExistingPartitionTable(pt) =>
            format!("a partition table ({pt})"),
        ProbeResult::Unknown => String::from("existing data"),
    };
    tracing::debug!(%dev, %found, "refusing to overwrite");
    Err(Error::OverwriteRefused{dev, found})
}

/// A magic number at a fixed byte offset
struct Signature {
    name: &'static str,
    offset: usize,
    magic: &'static [u8],
}

const ZONEFS_MAGIC: [u8; 4] = MAGIC.to_le_bytes();
const F2FS_MAGIC: [u8; 4] = 0xf2f5_2010u32.to_le_bytes();
const EXT_MAGIC: [u8; 2] = 0xef53u16.to_le_bytes();

const FILESYSTEMS: &[Signature] = &[
    Signature { name: "zonefs", offset: 0, magic: &ZONEFS_MAGIC },
    Signature { name: "xfs", offset: 0, magic: b"XFSB" },
    Signature { name: "f2fs", offset: 1024, magic: &F2FS_MAGIC },
    Signature { name: "ext4", offset: 1080, magic: &EXT_MAGIC },
    Signature { name: "swap", offset: 4086, magic: b"SWAPSPACE2" },
    Signature { name: "swap", offset: 4086, magic: b"SWAP-SPACE" },
    Signature { name: "btrfs", offset: 65_600, magic: b"_BHRfS_M" },
];

/// Offset of the first DOS partition table entry
const DOS_PTABLE: usize = 446;
const DOS_PENTRY_LEN: usize = 16;

/// Recognizes common filesystems and partition tables by their magic numbers.
///
/// Reads the beginning of the device with ordinary buffered I/O, which is
/// fine for sequential zones because reads are never restricted to the write
/// pointer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignatureProbe;

impl SignatureProbe {
    /// Classify a window read from the start of a device.  It may be shorter
    /// than [`PROBE_LEN`] if the device is tiny.
    pub fn classify(buf: &[u8]) -> ProbeResult {
        for sig in FILESYSTEMS {
            let end = sig.offset + sig.magic.len();
            if buf.len() >= end && &buf[sig.offset..end] == sig.magic {
                return ProbeResult::ExistingFilesystem(sig.name.to_owned());
            }
        }
        if buf.len() >= 520 && &buf[512..520] == b"EFI PART" {
            return ProbeResult::ExistingPartitionTable("gpt".to_owned());
        }
        if buf.len() >= 512 && BigEndian::read_u16(&buf[510..512]) == 0x55aa {
            let has_entries = buf[DOS_PTABLE..510]
                .chunks_exact(DOS_PENTRY_LEN)
                .any(|e| {
                    // Partition type and size in sectors
                    e[4] != 0 && LittleEndian::read_u32(&e[12..16]) != 0
                });
            return if has_entries {
                ProbeResult::ExistingPartitionTable("dos".to_owned())
            } else {
                ProbeResult::Unknown
            };
        }
        // Data that matches no known signature isn't worth protecting
        ProbeResult::Clean
    }

    fn read_window(path: &Path) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(PROBE_LEN);
        File::open(path)?
            .take(PROBE_LEN as u64)
            .read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl ContentProbe for SignatureProbe {
    fn probe(&self, path: &Path) -> ProbeResult {
        match Self::read_window(path) {
            Ok(buf) => Self::classify(&buf),
            Err(e) => {
                tracing::warn!("{}: probe read failed: {}", path.display(), e);
                ProbeResult::ProbeFailed
            }
        }
    }
}

// LCOV_EXCL_STOP
