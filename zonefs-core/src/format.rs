// vim: tw=80
//! Putting it all together: formatting a device for zonefs

use std::fmt::{self, Display, Formatter};

use crate::{
    device::Device,
    safety::{ContentProbe, check_overwrite},
    superblock::{DEFAULT_PERM, Feature, Features, LABEL_LEN, Superblock},
    types::*,
    zoned_dev::ZonedDev,
};

/// User-selectable formatting options.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormatOptions {
    /// Overwrite the device even if it appears to be in use
    pub force: bool,
    label: String,
    features: Features,
    uid: u32,
    gid: u32,
    perm: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions {
            force: false,
            label: String::new(),
            features: Features::empty(),
            uid: 0,
            gid: 0,
            perm: DEFAULT_PERM,
        }
    }
}

impl FormatOptions {
    /// Enable a feature, recording any value that comes with it.
    pub fn apply(&mut self, feature: Feature) {
        match feature {
            Feature::AggrCnv => (),
            Feature::Uid(uid) => self.uid = uid,
            Feature::Gid(gid) => self.gid = gid,
            Feature::Perm(perm) => self.perm = perm,
        }
        self.features |= feature.flag();
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn perm(&self) -> u32 {
        self.perm
    }

    /// Set the volume label.  It may be at most [`LABEL_LEN`] bytes long.
    pub fn set_label(&mut self, label: &str) -> Result<()> {
        if label.len() > LABEL_LEN {
            return Err(Error::InvalidLabel{len: label.len(), max: LABEL_LEN});
        }
        self.label = label.to_owned();
        Ok(())
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }
}

/// Externally visible milestones of [`format`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    CheckingContents,
    ResettingZones,
    WritingSuperblock,
    Syncing,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self {
            Stage::CheckingContents => "Checking existing contents",
            Stage::ResettingZones => "Resetting sequential zones",
            Stage::WritingSuperblock => "Writing super block",
            Stage::Syncing => "Syncing",
        };
        f.write_str(s)
    }
}

/// Format an opened device.
///
/// Checks for existing contents unless `force` is set, resets every
/// sequential zone, writes `sb` to zone 0 and finishes zone 0, then syncs.
/// `progress` is called as each stage begins.
///
/// Any failure after the reset begins may leave the device half-formatted.
pub fn format<D, F>(device: &mut Device<D>, sb: &Superblock, force: bool,
                    oracle: &dyn ContentProbe, mut progress: F) -> Result<()>
    where D: ZonedDev,
          F: FnMut(Stage)
{
    if !force {
        progress(Stage::CheckingContents);
    }
    check_overwrite(oracle, device.path(), force)?;

    progress(Stage::ResettingZones);
    device.reset_zones()?;

    progress(Stage::WritingSuperblock);
    device.write_super(sb)?;

    progress(Stage::Syncing);
    device.dev.sync_all()
        .map_err(|errno| Error::SyncFailed{dev: device.errname(), errno})?;
    device.notify_change();
    tracing::info!(uuid = %sb.uuid(), "formatted {}", device.path().display());
    Ok(())
}

// LCOV_EXCL_STOP
