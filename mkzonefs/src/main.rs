// vim: tw=80
use std::{
    fmt,
    path::PathBuf,
    process::exit,
};

use clap::{crate_version, Parser};
use tracing_subscriber::EnvFilter;
use zonefs_core::{
    Result,
    device::{Device, SysPaths},
    format::{FormatOptions, Stage, format},
    safety::SignatureProbe,
    superblock::{Feature, Features, Superblock},
    zoned_dev::ZonedDev,
};

#[derive(Parser, Clone, Debug)]
#[clap(version = crate_version!())]
/// Format a zoned block device for zonefs
struct Cli {
    /// Overwrite the device even if it already holds a filesystem or
    /// partition table
    #[clap(short, long)]
    force:    bool,
    /// Print every zone
    #[clap(short, long)]
    verbose:  bool,
    /// File system label, at most 64 bytes
    #[clap(short = 'L', long)]
    label:    Option<String>,
    /// File system features, comma delimited: aggr_cnv, uid=<uid>,
    /// gid=<gid>, perm=<octal mode>
    #[clap(
        short = 'o',
        long,
        value_delimiter(',')
    )]
    features: Vec<String>,
    /// Zoned block device to format
    device:   PathBuf,
}

impl Cli {
    /// Validate the options.  Exits on failure, like a parse error would.
    fn options(&self) -> FormatOptions {
        let mut opts = FormatOptions::default();
        opts.force = self.force;
        if let Some(label) = &self.label {
            opts.set_label(label).unwrap_or_else(|e| {
                eprintln!("{e}");
                exit(2);
            });
        }
        for fs in self.features.iter() {
            let feature = Feature::try_from(fs.as_str()).unwrap_or_else(|e| {
                eprintln!("{e}");
                exit(2);
            });
            opts.apply(feature);
        }
        opts
    }
}

/// What's about to be done to the device
struct Summary<'a, D: ZonedDev> {
    device: &'a Device<D>,
    sb: &'a Superblock,
}

impl<D: ZonedDev> fmt::Display for Summary<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dev = self.device;
        let zones = dev.zones();
        let zs = dev.zone_sectors();
        writeln!(f, "{}: {} 512-byte sectors ({} GiB)", dev.path().display(),
                 dev.capacity(), (dev.capacity() << 9) >> 30)?;
        writeln!(f, "  {} device", dev.model())?;
        writeln!(f, "  {} zones of {} 512-byte sectors ({} MiB)",
                 zones.nr_full_size(), zs, (zs << 9) >> 20)?;
        if let Some(runt) = zones.runt() {
            writeln!(f, "  1 runt zone of {} 512-byte sectors ({} MiB)",
                     runt.len, (runt.len << 9) >> 20)?;
        }
        writeln!(f, "  {} conventional zones, {} sequential zones",
                 zones.nr_conv(), zones.nr_seq())?;
        writeln!(f, "  {} read-only zones, {} offline zones",
                 zones.nr_ro(), zones.nr_offline())?;
        writeln!(f, "Format:")?;
        writeln!(f, "  {} usable zones", zones.usable_zones())?;
        let aggr = if self.sb.features().contains(Features::AGGR_CNV) {
            "enabled"
        } else {
            "disabled"
        };
        writeln!(f, "  Aggregate conventional zones: {aggr}")?;
        writeln!(f, "  File UID: {}", self.sb.uid())?;
        writeln!(f, "  File GID: {}", self.sb.gid())?;
        writeln!(f, "  File access permissions: {:o}", self.sb.perm())?;
        let label = self.sb.label();
        if !label.is_empty() {
            writeln!(f, "  FS label: {label}")?;
        }
        writeln!(f, "  FS UUID: {}", self.sb.uuid())
    }
}

fn run(cli: &Cli, opts: &FormatOptions) -> Result<()> {
    let mut device = Device::open(&cli.device, &SysPaths::default())?;
    if cli.verbose {
        print!("{}", device.zones());
    }
    let sb = Superblock::new(opts);
    print!("{}", Summary{device: &device, sb: &sb});
    format(&mut device, &sb, opts.force, &SignatureProbe, |stage| {
        match stage {
            Stage::ResettingZones | Stage::WritingSuperblock =>
                println!("{stage}"),
            _ => tracing::debug!("{}", stage)
        }
    })
}

fn main() {
    let cli: Cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .pretty()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
    let opts = cli.options();
    if let Err(e) = run(&cli, &opts) {
        eprintln!("{e}");
        exit(1);
    }
}
