// vim: tw=80
//! Formatting engine for zonefs, a filesystem that exposes each zone of a
//! zoned block device as a file.

// I just don't like the look of e.g. "Blk_zone_report" as opposed to
// "blk_zone_report" for structures that mirror the kernel's.
#![allow(non_camel_case_types)]

pub mod device;
pub mod format;
pub mod lifecycle;
pub mod safety;
pub mod superblock;
pub mod types;
pub mod util;
pub mod zone;
pub mod zoned_dev;

pub use crate::types::*;
pub use crate::util::*;
