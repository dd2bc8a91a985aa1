// vim: tw=80
//! Opening real device nodes, and probing existing contents

use pretty_assertions::assert_eq;
use std::fs;
use zonefs_core::{
    Error,
    format::FormatOptions,
    safety::{SignatureProbe, check_overwrite},
    superblock::{SUPER_SIZE, Superblock},
};

use super::*;

#[test]
fn open_char_device() {
    let (_tempdir, sys) = sysfs();
    let e = Device::open(Path::new("/dev/null"), &sys).unwrap_err();
    assert_eq!(e, Error::NotABlockDevice{dev: "/dev/null".to_owned()});
}

#[test]
fn open_regular_file() {
    let (tempdir, sys) = sysfs();
    let path = tempdir.path().join("img");
    fs::File::create(&path).unwrap().set_len(1 << 20).unwrap();
    let e = Device::open(&path, &sys).unwrap_err();
    assert!(matches!(e, Error::NotABlockDevice{..}), "{e:?}");
    assert!(e.to_string().ends_with("is not a block device"));
}

/// A freshly formatted image is recognized as zonefs, and won't be
/// overwritten without force.
#[test]
fn reformat_zonefs() {
    let (tempdir, _sys) = sysfs();
    let path = tempdir.path().join("img");
    let mut buf = vec![0u8; 1 << 20];
    Superblock::new(&FormatOptions::default()).encode(&mut buf[..SUPER_SIZE]);
    fs::write(&path, &buf).unwrap();

    assert_eq!(SignatureProbe.probe(&path),
               ProbeResult::ExistingFilesystem("zonefs".to_owned()));
    let e = check_overwrite(&SignatureProbe, &path, false).unwrap_err();
    assert!(matches!(e, Error::OverwriteRefused{..}), "{e:?}");
    check_overwrite(&SignatureProbe, &path, true).unwrap();
}

#[test]
fn blank_image() {
    let (tempdir, _sys) = sysfs();
    let path = tempdir.path().join("img");
    fs::write(&path, vec![0u8; 1 << 20]).unwrap();
    check_overwrite(&SignatureProbe, &path, false).unwrap();
}

/// Leftover data with no recognizable signature doesn't need -f
#[test]
fn unrecognized_image() {
    let (tempdir, _sys) = sysfs();
    let path = tempdir.path().join("img");
    let buf: Vec<u8> = (0..1u32 << 20).map(|i| (i % 251) as u8 | 1).collect();
    fs::write(&path, &buf).unwrap();
    assert_eq!(SignatureProbe.probe(&path), ProbeResult::Clean);
    check_overwrite(&SignatureProbe, &path, false).unwrap();
}

/// An image smaller than the probe window
#[test]
fn tiny_ext4_image() {
    let (tempdir, _sys) = sysfs();
    let path = tempdir.path().join("img");
    let mut buf = vec![0u8; 2048];
    buf[1080..1082].copy_from_slice(&[0x53, 0xef]);
    fs::write(&path, &buf).unwrap();
    assert_eq!(SignatureProbe.probe(&path),
               ProbeResult::ExistingFilesystem("ext4".to_owned()));
}
