// vim: tw=80
//! Common utility functions used throughout zonefs-core

use nix::errno::Errno;
use std::io;

/// Divide two unsigned numbers (usually integers), rounding up.
pub fn div_roundup(dividend: u64, divisor: u64) -> u64 {
    dividend.div_ceil(divisor)
}

/// Extract an `Errno` from an `io::Error`.
///
/// Errors that didn't originate from the OS become `EIO`.
pub fn errno_of(e: &io::Error) -> Errno {
    Errno::from_raw(e.raw_os_error().unwrap_or(libc::EIO))
}

// LCOV_EXCL_STOP
