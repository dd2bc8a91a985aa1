// vim: tw=80
//! Zone state transitions: reset and finish

use nix::errno::Errno;

use crate::{
    device::Device,
    types::*,
    zoned_dev::ZonedDev,
};

/// Progress of [`Device::reset_zones`]
#[derive(Debug)]
enum ResetState {
    /// Reset the whole device with a single command
    TryBulk,
    /// The bulk reset failed.  Reset one zone at a time.
    PerZoneFallback,
    Done,
    Aborted(Error),
}

impl<D: ZonedDev> Device<D> {
    /// Transition a single zone to the Full condition.
    ///
    /// Conventional zones have no condition to change.  Kernels too old to
    /// finish zones are tolerated; the zone is simply left as it is.
    #[tracing::instrument(skip(self))]
    pub fn finish_zone(&mut self, idx: usize) -> Result<()> {
        let dev = self.errname();
        let zone = match self.zones.get_mut(idx) {
            Some(z) if z.is_sequential() => z,
            _ => return Ok(())
        };
        match self.dev.finish_zones(zone.start, zone.len) {
            Ok(()) => {
                zone.mark_full();
                Ok(())
            },
            Err(Errno::ENOTTY) | Err(Errno::EOPNOTSUPP) => {
                tracing::debug!("zone finish not supported");
                Ok(())
            },
            Err(errno) => Err(Error::ZoneFinishFailed {
                dev,
                zone: idx as u64,
                errno
            })
        }
    }

    /// Reset the write pointer of every sequential zone on the device.
    ///
    /// First try to reset the whole device at once.  If that fails, reset
    /// each zone individually, stopping at the first failure.  On failure,
    /// zones that were already reset stay reset.
    #[tracing::instrument(skip(self))]
    pub fn reset_zones(&mut self) -> Result<()> {
        let mut state = ResetState::TryBulk;
        loop {
            state = match state {
                ResetState::TryBulk => self.reset_bulk(),
                ResetState::PerZoneFallback => self.reset_each(),
                ResetState::Done => return Ok(()),
                ResetState::Aborted(e) => return Err(e),
            };
        }
    }

    fn reset_bulk(&mut self) -> ResetState {
        match self.dev.reset_zones(0, self.capacity()) {
            Ok(()) => {
                self.zones.iter_mut()
                    .filter(|z| z.can_reset())
                    .for_each(|z| z.mark_empty());
                ResetState::Done
            },
            Err(errno) => {
                tracing::warn!("{}: bulk zone reset failed: {}; resetting \
                               zones individually", self.name(), errno);
                ResetState::PerZoneFallback
            }
        }
    }

    fn reset_each(&mut self) -> ResetState {
        let dev = self.errname();
        for (i, zone) in self.zones.iter_mut().enumerate() {
            if !zone.can_reset() {
                continue;
            }
            tracing::trace!(zone = i, "reset");
            if let Err(errno) = self.dev.reset_zones(zone.start, zone.len) {
                return ResetState::Aborted(Error::ZoneResetFailed {
                    dev,
                    zone: i as u64,
                    errno
                });
            }
            zone.mark_empty();
        }
        ResetState::Done
    }
}

// LCOV_EXCL_STOP
