use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use fatvol_core::{AsciiCodepage, FatType, FormatOptions, LongNameUnits, VolumeConfig};
use fatvol_filesystems::fat::timestamps::to_naive;
use fatvol_filesystems::{check_volume, format, Entry, EntryKind, FileSystem, SystemClock};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

mod image;

use image::FileDevice;

/// Every FAT width with long names, stamped with the local time
struct CliConfig;

impl VolumeConfig for CliConfig {
    const MAX_TYPE: FatType = FatType::Fat32;
    const LONG_NAMES: bool = true;
    const MAX_NAME_LEN: usize = 255;
    type Codepage = AsciiCodepage;
    type Clock = SystemClock;
    type NameBuffer = LongNameUnits;
}

type Volume = FileSystem<FileDevice, CliConfig>;

#[derive(Parser)]
#[command(name = "fatvol")]
#[command(about = "Inspect and modify FAT12/16/32 disk images", long_about = None)]
struct Cli {
    /// Log driver activity (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Width {
    #[value(name = "12")]
    Fat12,
    #[value(name = "16")]
    Fat16,
    #[value(name = "32")]
    Fat32,
}

impl From<Width> for FatType {
    fn from(width: Width) -> Self {
        match width {
            Width::Fat12 => FatType::Fat12,
            Width::Fat16 => FatType::Fat16,
            Width::Fat32 => FatType::Fat32,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a fresh filesystem to an image
    Format {
        image: PathBuf,
        /// Create or resize the image to this many MiB first
        #[arg(long)]
        size_mb: Option<u64>,
        /// FAT width (chosen from the size when omitted)
        #[arg(short = 't', long)]
        fat_type: Option<Width>,
        /// Volume label, up to 11 characters
        #[arg(short, long)]
        label: Option<String>,
        /// Sectors per cluster
        #[arg(long)]
        cluster_sectors: Option<u8>,
        /// Volume serial number in hex (derived from the clock when omitted)
        #[arg(long, value_parser = parse_hex)]
        volume_id: Option<u32>,
    },
    /// Show volume geometry and usage
    Info {
        image: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List a directory
    Ls {
        image: PathBuf,
        #[arg(default_value = "/")]
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Print a file to stdout
    Cat { image: PathBuf, path: String },
    /// Copy a local file into the image
    Put {
        image: PathBuf,
        source: PathBuf,
        path: String,
    },
    /// Create a directory
    Mkdir { image: PathBuf, path: String },
    /// Remove a file or an empty directory
    Rm { image: PathBuf, path: String },
    /// Move or rename an entry
    Mv {
        image: PathBuf,
        from: String,
        to: String,
    },
    /// Check chains and directories for damage
    Check {
        image: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct Listing {
    name: String,
    short_name: String,
    directory: bool,
    size: u32,
    modified: Option<String>,
}

impl From<&Entry> for Listing {
    fn from(entry: &Entry) -> Self {
        Self {
            name: entry.name().to_string(),
            short_name: entry.short_name().to_string(),
            directory: entry.is_dir(),
            size: entry.size(),
            modified: to_naive(entry.modified()).map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

fn parse_hex(value: &str) -> Result<u32, String> {
    u32::from_str_radix(value.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn parse_label(label: &str) -> anyhow::Result<[u8; 11]> {
    if label.len() > 11 || !label.is_ascii() {
        bail!("label must be at most 11 ASCII characters: '{}'", label);
    }
    let mut out = [b' '; 11];
    for (slot, byte) in out.iter_mut().zip(label.bytes()) {
        *slot = byte.to_ascii_uppercase();
    }
    Ok(out)
}

fn clock_volume_id() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32 ^ d.subsec_nanos())
        .unwrap_or(0)
}

fn mount(image: &Path) -> anyhow::Result<Volume> {
    let device = FileDevice::open(image).with_context(|| format!("cannot open {}", image.display()))?;
    Volume::mount(device).with_context(|| format!("cannot mount {}", image.display()))
}

fn finish(fs: Volume) -> anyhow::Result<()> {
    let mut device = fs.unmount(true)?;
    device.sync()?;
    Ok(())
}

fn resolve(fs: &mut Volume, path: &str) -> anyhow::Result<Entry> {
    fs.open_path(path)
        .with_context(|| format!("cannot resolve '{}'", path))?
        .ok_or_else(|| anyhow!("'{}' is the root directory", path))
}

fn run(cli: Cli, out: &mut impl Write) -> anyhow::Result<()> {
    match cli.command {
        Commands::Format {
            image,
            size_mb,
            fat_type,
            label,
            cluster_sectors,
            volume_id,
        } => {
            let mut device = match size_mb {
                Some(mb) => FileDevice::create(&image, mb * 1024 * 1024)?,
                None => FileDevice::open(&image)?,
            };
            let mut options = FormatOptions::new(volume_id.unwrap_or_else(clock_volume_id).to_le_bytes());
            options.fat_type = fat_type.map(FatType::from);
            options.label = label.as_deref().map(parse_label).transpose()?;
            options.sectors_per_cluster = cluster_sectors;

            let bpb = format::<CliConfig, _>(&mut device, &options)
                .with_context(|| format!("cannot format {}", image.display()))?;
            device.sync()?;
            writeln!(
                out,
                "Formatted {} as {}: {} sectors of {} bytes, {} per cluster",
                image.display(),
                bpb.fat_type,
                bpb.total_sectors,
                bpb.bytes_per_sector,
                bpb.sectors_per_cluster
            )?;
        }
        Commands::Info { image, json } => {
            let fs = mount(&image)?;
            let info = fs.info();
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
            } else {
                writeln!(out, "Type:          {}", info.fat_type)?;
                writeln!(out, "Label:         {}", info.label)?;
                writeln!(out, "Volume ID:     {:08X}", info.volume_id)?;
                writeln!(out, "Sector size:   {}", info.bytes_per_sector)?;
                writeln!(out, "Cluster size:  {}", info.bytes_per_cluster)?;
                writeln!(out, "Clusters:      {} ({} free)", info.cluster_count, info.free_clusters)?;
                writeln!(
                    out,
                    "FAT copies:    {}{}",
                    info.fat_count,
                    if info.mirrored { "" } else { " (not mirrored)" }
                )?;
                if info.was_dirty {
                    writeln!(out, "Volume was not cleanly unmounted")?;
                }
            }
            finish(fs)?;
        }
        Commands::Ls { image, path, json } => {
            let mut fs = mount(&image)?;
            let dir = fs.open_path(&path)?;
            let mut listing = Vec::new();
            for entry in fs.iter_dir(dir.as_ref())? {
                match entry {
                    Ok(entry) => listing.push(Listing::from(&entry)),
                    Err(e) => log::warn!("skipping entry: {}", e),
                }
            }
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&listing)?)?;
            } else {
                for item in &listing {
                    writeln!(
                        out,
                        "{:>10}  {:19}  {:12}  {}",
                        if item.directory { "<DIR>".to_string() } else { item.size.to_string() },
                        item.modified.as_deref().unwrap_or("-"),
                        item.short_name,
                        item.name
                    )?;
                }
            }
            finish(fs)?;
        }
        Commands::Cat { image, path } => {
            let mut fs = mount(&image)?;
            let file = resolve(&mut fs, &path)?;
            let mut data = vec![0u8; file.size() as usize];
            let n = fs.read_all(&file, &mut data)?;
            out.write_all(&data[..n])?;
            finish(fs)?;
        }
        Commands::Put { image, source, path } => {
            let data = std::fs::read(&source).with_context(|| format!("cannot read {}", source.display()))?;
            let mut fs = mount(&image)?;
            let (parent, name) = fs.open_parent(&path)?;
            let mut file = match fs.lookup(parent.as_ref(), name) {
                Ok(existing) => existing,
                Err(fatvol_core::FatError::NotFound) => {
                    fs.create_entry(parent.as_ref(), name, EntryKind::File { size: 0 })?
                }
                Err(e) => return Err(e.into()),
            };
            fs.write_all(&mut file, &data)?;
            writeln!(out, "Wrote {} bytes to {}", data.len(), path)?;
            finish(fs)?;
        }
        Commands::Mkdir { image, path } => {
            let mut fs = mount(&image)?;
            let (parent, name) = fs.open_parent(&path)?;
            fs.create_entry(parent.as_ref(), name, EntryKind::Directory)?;
            finish(fs)?;
        }
        Commands::Rm { image, path } => {
            let mut fs = mount(&image)?;
            let entry = resolve(&mut fs, &path)?;
            fs.delete(entry).with_context(|| format!("cannot remove '{}'", path))?;
            finish(fs)?;
        }
        Commands::Mv { image, from, to } => {
            let mut fs = mount(&image)?;
            let entry = resolve(&mut fs, &from)?;
            // moving onto an existing directory keeps the name
            let target = match fs.open_path(&to) {
                Ok(Some(dir)) if dir.is_dir() => Some((Some(dir), entry.name().to_string())),
                Ok(None) => Some((None, entry.name().to_string())),
                _ => None,
            };
            let (parent, name) = match target {
                Some(target) => target,
                None => {
                    let (parent, name) = fs.open_parent(&to)?;
                    (parent, name.to_string())
                }
            };
            fs.rename(entry, parent.as_ref(), &name)
                .with_context(|| format!("cannot move '{}' to '{}'", from, to))?;
            finish(fs)?;
        }
        Commands::Check { image, json } => {
            let mut fs = mount(&image)?;
            let report = check_volume(&mut fs)?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
            } else {
                writeln!(
                    out,
                    "{} files, {} directories, {} clusters in use",
                    report.files, report.directories, report.used_clusters
                )?;
                for issue in &report.issues {
                    writeln!(out, "  {:?}", issue)?;
                }
                writeln!(out, "{}", if report.is_clean() { "No problems found" } else { "Volume has problems" })?;
            }
            // a read-only pass; the volume was not modified
            fs.unmount(true)?;
            if !report.is_clean() {
                bail!("{} problems found", report.issues.len());
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let stdout = std::io::stdout();
    run(cli, &mut stdout.lock())
}
