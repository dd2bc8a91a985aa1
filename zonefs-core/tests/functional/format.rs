// vim: tw=80
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::fs;
use zonefs_core::{
    Error,
    format::{FormatOptions, Stage, format},
    safety::ProbeResult,
    superblock::{Feature, Features, SUPER_SIZE, Superblock},
    zone::{ZoneCond, ZoneTable},
};

use super::*;

const ZS: u64 = 262_144;

/// Format with the given options, returning the formatted device.
fn format_sim(sim: SimDev, opts: &FormatOptions, sys: &SysPaths)
    -> (Device<SimDev>, Superblock, zonefs_core::Result<()>)
{
    let mut device = open(sim, ZS, sys).unwrap();
    let sb = Superblock::new(opts);
    let r = format(&mut device, &sb, opts.force, &StaticProbe(ProbeResult::Clean),
                   |_| ());
    (device, sb, r)
}

fn read_super(device: &Device<SimDev>) -> Superblock {
    let data = device.dev().data();
    Superblock::from_bytes(&data[..SUPER_SIZE]).unwrap()
}

#[test]
fn basic() {
    let (_tempdir, sys) = sysfs();
    let sim = SimDevBuilder::new().build();
    let mut opts = FormatOptions::default();
    opts.set_label("data").unwrap();
    opts.apply(Feature::try_from("uid=1000").unwrap());
    opts.apply(Feature::try_from("perm=600").unwrap());
    let (device, sb, r) = format_sim(sim, &opts, &sys);
    r.unwrap();

    let ondisk = read_super(&device);
    assert_eq!(ondisk, sb);
    assert_eq!(ondisk.label(), "data");
    assert_eq!(ondisk.features(), Features::UID | Features::PERM);
    assert_eq!(ondisk.uid(), 1000);
    assert_eq!(ondisk.gid(), 0);
    assert_eq!(ondisk.perm(), 0o600);

    let zones = device.dev().zones();
    assert_eq!(zones[0].cond, ZoneCond::Full);
    for z in &zones[1..] {
        assert_eq!(z.cond, ZoneCond::Empty);
        assert_eq!(z.wp, z.start);
    }
    assert_eq!(device.dev().ops().last(), Some(&Op::Sync));
}

/// The on-disk zone state matches what the device table claims
#[test]
fn consistent_table() {
    let (_tempdir, sys) = sysfs();
    let sim = SimDevBuilder::new().conventional(1).dirty().build();
    let (device, _sb, r) = format_sim(sim, &FormatOptions::default(), &sys);
    r.unwrap();
    assert_eq!(device.zones().iter().cloned().collect::<Vec<_>>(),
               device.dev().zones());
}

/// A device whose first zone is conventional gets its super block there
#[test]
fn conventional_zone0() {
    let (_tempdir, sys) = sysfs();
    let sim = SimDevBuilder::new().conventional(2).dirty().build();
    let (device, sb, r) = format_sim(sim, &FormatOptions::default(), &sys);
    r.unwrap();
    assert_eq!(read_super(&device), sb);
    let zones = device.dev().zones();
    assert_eq!(zones[0].cond, ZoneCond::NotWp);
    assert_eq!(zones[1].cond, ZoneCond::NotWp);
    assert_eq!(zones[2].cond, ZoneCond::Empty);
    assert!(!device.dev().ops().iter()
            .any(|op| matches!(op, Op::Finish(..))));
}

/// Kernels without BLKFINISHZONE leave zone 0 open
#[test]
fn finish_unsupported() {
    let (_tempdir, sys) = sysfs();
    let sim = SimDevBuilder::new().no_finish().build();
    let (device, sb, r) = format_sim(sim, &FormatOptions::default(), &sys);
    r.unwrap();
    assert_eq!(read_super(&device), sb);
    let z0 = device.dev().zones()[0];
    assert_eq!(z0.cond, ZoneCond::ImplicitOpen);
    assert_eq!(z0.wp, 8);
}

/// Reformatting gets a new UUID but the same layout, and zone 0 ends up full
/// each time.
#[test]
fn format_twice() {
    let (_tempdir, sys) = sysfs();
    let mut opts = FormatOptions::default();
    opts.force = true;
    let sim = SimDevBuilder::new().build();

    let (device, sb1, r) = format_sim(sim, &opts, &sys);
    r.unwrap();
    let table1 = device.zones().clone();
    assert_eq!(device.dev().zones()[0].cond, ZoneCond::Full);

    // Reopen the same simulated device
    let sim = SimDev {
        capacity: device.dev().capacity,
        bulk_reset_fails: false,
        finish_supported: true,
        fail_reset_zone: None,
        report_max: u32::MAX,
        state: RefCell::new(SimState {
            zones: device.dev().zones(),
            data: device.dev().data(),
            ops: Vec::new()
        }),
    };
    let (device, sb2, r) = format_sim(sim, &opts, &sys);
    r.unwrap();

    assert_ne!(sb1.uuid(), sb2.uuid());
    assert_eq!(read_super(&device).uuid(), sb2.uuid());
    assert_eq!(device.dev().zones()[0].cond, ZoneCond::Full);
    let table2 = device.zones();
    assert_eq!(table1.len(), table2.len());
    for (z1, z2) in table1.iter().zip(table2.iter()) {
        assert_eq!((z1.start, z1.len, z1.ztype), (z2.start, z2.len, z2.ztype));
    }
}

/// Refusing to overwrite must happen before anything destructive
#[rstest]
#[case(ProbeResult::ExistingFilesystem("ext4".into()))]
#[case(ProbeResult::ExistingPartitionTable("gpt".into()))]
#[case(ProbeResult::Unknown)]
#[case(ProbeResult::ProbeFailed)]
fn refused(#[case] found: ProbeResult) {
    let (_tempdir, sys) = sysfs();
    let sim = SimDevBuilder::new().dirty().build();
    let mut device = open(sim, ZS, &sys).unwrap();
    let sb = Superblock::new(&FormatOptions::default());
    let e = format(&mut device, &sb, false, &StaticProbe(found), |_| ())
        .unwrap_err();
    assert!(matches!(e, Error::OverwriteRefused{..} | Error::ProbeError{..}),
            "{e:?}");
    assert!(device.dev().ops().iter()
            .all(|op| matches!(op, Op::Report(_))));
    assert!(device.dev().zones().iter().all(|z| z.cond == ZoneCond::Closed));
}

#[test]
fn forced() {
    let (_tempdir, sys) = sysfs();
    let sim = SimDevBuilder::new().dirty().build();
    let mut device = open(sim, ZS, &sys).unwrap();
    let sb = Superblock::new(&FormatOptions::default());
    let found = ProbeResult::ExistingFilesystem("ext4".into());
    let mut stages = Vec::new();
    format(&mut device, &sb, true, &StaticProbe(found), |s| stages.push(s))
        .unwrap();
    assert_eq!(stages, vec![Stage::ResettingZones, Stage::WritingSuperblock,
                            Stage::Syncing]);
}

/// If the bulk reset fails, zones are reset one at a time.  The first
/// failure aborts the format, leaving later zones as they were.
#[test_log::test]
fn reset_fallback_error() {
    let (_tempdir, sys) = sysfs();
    let sim = SimDevBuilder::new()
        .dirty()
        .bulk_reset_fails()
        .fail_reset_zone(2)
        .build();
    let mut device = open(sim, ZS, &sys).unwrap();
    let sb = Superblock::new(&FormatOptions::default());
    let e = format(&mut device, &sb, true, &StaticProbe(ProbeResult::Clean),
                   |_| ())
        .unwrap_err();
    assert!(matches!(e, Error::ZoneResetFailed{zone: 2, ..}), "{e:?}");

    let resets = device.dev().ops().into_iter()
        .filter(|op| matches!(op, Op::Reset(..)))
        .collect::<Vec<_>>();
    assert_eq!(resets, vec![
        Op::Reset(0, 4 * ZS),
        Op::Reset(0, ZS),
        Op::Reset(ZS, ZS),
        Op::Reset(2 * ZS, ZS),
    ]);
    let zones = device.dev().zones();
    assert_eq!(zones[0].cond, ZoneCond::Empty);
    assert_eq!(zones[1].cond, ZoneCond::Empty);
    assert_eq!(zones[2].cond, ZoneCond::Closed);
    assert_eq!(zones[3].cond, ZoneCond::Closed);
    assert!(device.dev().data().is_empty());
}

#[test_log::test]
fn reset_fallback_ok() {
    let (_tempdir, sys) = sysfs();
    let sim = SimDevBuilder::new()
        .conventional(1)
        .readonly(3)
        .dirty()
        .bulk_reset_fails()
        .build();
    let (device, _sb, r) = format_sim(sim, &FormatOptions::default(), &sys);
    // Not forced, but the probe is clean
    r.unwrap();
    let zones = device.dev().zones();
    assert_eq!(zones[2].cond, ZoneCond::Empty);
    assert_eq!(zones[3].cond, ZoneCond::ReadOnly);
}

/// After a reset, every sequential zone's write pointer is back at its start
/// and conventional zones are untouched.
#[test]
fn reset_then_enumerate() {
    let (_tempdir, sys) = sysfs();
    let sim = SimDevBuilder::new()
        .capacity(10 * ZS)
        .conventional(3)
        .dirty()
        .build();
    let mut device = open(sim, ZS, &sys).unwrap();
    let before = device.dev().zones();
    device.reset_zones().unwrap();

    let table = ZoneTable::enumerate(device.dev(), "simz", 10 * ZS, ZS)
        .unwrap();
    for (z, old) in table.iter().zip(before.iter()) {
        if z.is_conventional() {
            assert_eq!(z, old);
        } else {
            assert_eq!(z.wp, z.start);
            assert_eq!(z.cond, ZoneCond::Empty);
        }
    }
}

/// udev is told to reprobe the device
#[test]
fn uevent() {
    let (_tempdir, sys) = sysfs();
    let sim = SimDevBuilder::new().build();
    let (_device, _sb, r) = format_sim(sim, &FormatOptions::default(), &sys);
    r.unwrap();
    let uevent = sys.sysfs.join("class/block/simz/uevent");
    assert_eq!(fs::read_to_string(uevent).unwrap(), "change");
}

/// Failing to notify udev is not fatal
#[test_log::test]
fn uevent_missing() {
    let (tempdir, sys) = sysfs();
    fs::remove_dir_all(tempdir.path().join("sys/class")).unwrap();
    let sim = SimDevBuilder::new().build();
    let (_device, _sb, r) = format_sim(sim, &FormatOptions::default(), &sys);
    r.unwrap();
}
