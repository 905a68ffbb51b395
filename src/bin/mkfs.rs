//! Command-line front-end (A3): turns a pack-file and/or a host directory
//! into a SquashFS image. Argument shape mirrors a production `mksquashfs`,
//! but scoped to what the writer actually supports.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use squashfs_mkfs::compressor::{CompressionOptions, Compressor, Gzip, Lz4, Lzo, Xz, XzFilter, Zstd};
use squashfs_mkfs::filesystem::writer::{CompressionExtra, ExtraXz};
use squashfs_mkfs::scan::ScanOptions;
use squashfs_mkfs::squashfs::{DEFAULT_BLOCK_SIZE, DEFAULT_PAD_LEN};
use squashfs_mkfs::{pack, scan, FilesystemCompressor, FilesystemWriter, NodeHeader};

#[derive(Parser)]
#[command(author, version, about = "Build a SquashFS filesystem image")]
struct Args {
    /// Output image path
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Pack-file describing the image contents
    #[arg(long = "pack-file")]
    pack_file: Option<PathBuf>,

    /// Directory to scan, or the base directory `file` entries in --pack-file
    /// resolve relative locations against
    #[arg(long = "pack-dir")]
    pack_dir: Option<PathBuf>,

    /// Compressor: none, gzip, lzma, lzo, xz, lz4, zstd
    #[arg(long = "compressor", default_value = "xz", value_parser = parse_compressor)]
    compressor: Compressor,

    /// Codec-specific options as a comma-separated key=value list, e.g. level=9
    #[arg(long = "comp-extra")]
    comp_extra: Option<String>,

    /// Size of compressed data blocks. Supports an optional K or M suffix
    #[arg(long = "block-size", default_value_t = DEFAULT_BLOCK_SIZE, value_parser = parse_size)]
    block_size: u32,

    /// Pad the final image to a multiple of this many bytes
    #[arg(long = "dev-block-size", default_value_t = DEFAULT_PAD_LEN, value_parser = parse_size)]
    dev_block_size: u32,

    /// Number of compression worker threads; defaults to the available parallelism
    #[arg(long = "num-jobs")]
    num_jobs: Option<usize>,

    /// Maximum number of in-flight blocks; defaults to 10x --num-jobs
    #[arg(long = "queue-backlog")]
    queue_backlog: Option<usize>,

    /// Attributes for implicit directories: uid=…,gid=…,mode=…,mtime=…
    #[arg(long = "defaults")]
    defaults: Option<String>,

    /// Preserve source mtimes instead of zeroing them
    #[arg(long = "keep-time")]
    keep_time: bool,

    /// Copy extended attributes from the source tree
    #[arg(long = "keep-xattr")]
    keep_xattr: bool,

    /// Do not cross device boundaries while scanning --pack-dir
    #[arg(long = "one-file-system")]
    one_file_system: bool,

    /// Skip a scanned entry whose lstat fails instead of aborting
    #[arg(long = "ignore-lstat-errors")]
    ignore_lstat_errors: bool,

    /// Emit the export table (NFS inode_ref lookup)
    #[arg(long = "exportable")]
    exportable: bool,

    /// Overwrite the output path if it already exists
    #[arg(long = "force")]
    force: bool,

    /// Raise the log verbosity; repeatable
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Parse a uid, accepting either an integer or (on Unix) a username.
fn parse_uid(arg: &str) -> Result<u32, String> {
    if let Ok(uid) = arg.parse::<u32>() {
        return Ok(uid);
    }
    #[cfg(target_family = "unix")]
    {
        let name = CString::new(arg).map_err(|_| format!("invalid uid or username {arg:?}"))?;
        let passwd = unsafe { libc::getpwnam(name.as_ptr()) };
        if passwd.is_null() {
            return Err(format!("invalid uid or username {arg:?}"));
        }
        Ok(unsafe { (*passwd).pw_uid })
    }
    #[cfg(not(target_family = "unix"))]
    Err(format!("invalid uid {arg:?}"))
}

/// Parse a gid, accepting either an integer or (on Unix) a group name.
fn parse_gid(arg: &str) -> Result<u32, String> {
    if let Ok(gid) = arg.parse::<u32>() {
        return Ok(gid);
    }
    #[cfg(target_family = "unix")]
    {
        let name = CString::new(arg).map_err(|_| format!("invalid gid or group name {arg:?}"))?;
        let group = unsafe { libc::getgrnam(name.as_ptr()) };
        if group.is_null() {
            return Err(format!("invalid gid or group name {arg:?}"));
        }
        Ok(unsafe { (*group).gr_gid })
    }
    #[cfg(not(target_family = "unix"))]
    Err(format!("invalid gid {arg:?}"))
}

fn parse_compressor(s: &str) -> Result<Compressor, String> {
    match s {
        "none" => Ok(Compressor::None),
        "gzip" => Ok(Compressor::Gzip),
        "lzma" => Ok(Compressor::Lzma),
        "lzo" => Ok(Compressor::Lzo),
        "xz" => Ok(Compressor::Xz),
        "lz4" => Ok(Compressor::Lz4),
        "zstd" => Ok(Compressor::Zstd),
        other => Err(format!("unknown compressor {other:?}")),
    }
}

/// Parse a byte size with an optional `K`/`M` suffix (case-insensitive).
fn parse_size(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let (digits, mul) = match s.chars().last() {
        Some('K') | Some('k') => (&s[..s.len() - 1], 1024),
        Some('M') | Some('m') => (&s[..s.len() - 1], 1024 * 1024),
        _ => (s, 1),
    };
    let value: u32 = digits.parse().map_err(|_| format!("invalid size {s:?}"))?;
    value.checked_mul(mul).ok_or_else(|| format!("size {s:?} overflows"))
}

#[derive(Debug, Default)]
struct Defaults {
    uid: Option<u32>,
    gid: Option<u32>,
    mode: Option<u16>,
    mtime: Option<u32>,
}

fn parse_defaults(s: &str) -> Result<Defaults, String> {
    let mut d = Defaults::default();
    for field in s.split(',') {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let (key, value) = field
            .split_once('=')
            .ok_or_else(|| format!("expected key=value in --defaults, got {field:?}"))?;
        match key {
            "uid" => d.uid = Some(parse_uid(value)?),
            "gid" => d.gid = Some(parse_gid(value)?),
            "mode" => {
                d.mode = Some(u16::from_str_radix(value, 8).map_err(|_| format!("invalid mode {value:?}"))?)
            },
            "mtime" => {
                d.mtime = Some(value.parse().map_err(|_| format!("invalid mtime {value:?}"))?)
            },
            other => return Err(format!("unknown --defaults key {other:?}")),
        }
    }
    Ok(d)
}

fn compression_options(compressor: Compressor, block_size: u32) -> Option<CompressionOptions> {
    match compressor {
        Compressor::Gzip => Some(CompressionOptions::Gzip(Gzip {
            compression_level: 9,
            window_size: 15,
            strategies: 0,
        })),
        Compressor::Lzo => Some(CompressionOptions::Lzo(Lzo { algorithm: 0, compression_level: 0 })),
        Compressor::Xz => Some(CompressionOptions::Xz(Xz {
            dictionary_size: block_size,
            filters: XzFilter::X86,
        })),
        Compressor::Lz4 => Some(CompressionOptions::Lz4(Lz4 { version: 0, flags: 0 })),
        Compressor::Zstd => Some(CompressionOptions::Zstd(Zstd { compression_level: 15 })),
        Compressor::None | Compressor::Lzma => None,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    if let Err(e) = run(args) {
        eprintln!("mkfs: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(args: Args) -> Result<(), squashfs_mkfs::MkfsError> {
    let defaults = args
        .defaults
        .as_deref()
        .map(parse_defaults)
        .transpose()
        .map_err(squashfs_mkfs::MkfsError::ConfigInvalid)?
        .unwrap_or_default();

    let root_header = NodeHeader::new(
        defaults.mode.unwrap_or(0o755),
        defaults.uid.unwrap_or(0),
        defaults.gid.unwrap_or(0),
        defaults.mtime.unwrap_or(0),
    );
    let mut writer = FilesystemWriter::new(root_header);

    let options = compression_options(args.compressor, args.block_size);
    let mut compressor = FilesystemCompressor::new(args.compressor, options)?;
    if let Some(comp_extra) = &args.comp_extra {
        for field in comp_extra.split(',') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let (key, value) = field.split_once('=').ok_or_else(|| {
                squashfs_mkfs::MkfsError::ConfigInvalid(format!("expected key=value in --comp-extra, got {field:?}"))
            })?;
            if key == "level" {
                let level: u32 = value.parse().map_err(|_| {
                    squashfs_mkfs::MkfsError::ConfigInvalid(format!("invalid compression level {value:?}"))
                })?;
                let mut extra = ExtraXz::default();
                extra.level(level)?;
                compressor.extra(CompressionExtra::Xz(extra))?;
            }
        }
    }
    writer.set_compressor(compressor);
    writer.set_block_size(args.block_size)?;
    writer.set_pad_len(args.dev_block_size);
    if let Some(mtime) = defaults.mtime {
        writer.set_mod_time(mtime);
    }
    let num_jobs = args.num_jobs.unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
    writer.set_num_jobs(num_jobs);
    writer.set_queue_backlog(args.queue_backlog.unwrap_or(num_jobs * 10));
    writer.set_exportable(args.exportable);

    match (&args.pack_file, &args.pack_dir) {
        (Some(pack_file), pack_dir) => {
            let pack_dir = pack_dir
                .clone()
                .or_else(|| pack_file.parent().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("."));
            pack::load_into(&mut writer, pack_file, &pack_dir)?;
        },
        (None, Some(pack_dir)) => {
            let opts = ScanOptions {
                keep_time: args.keep_time,
                keep_xattr: args.keep_xattr,
                one_file_system: args.one_file_system,
                ignore_lstat_errors: args.ignore_lstat_errors,
            };
            scan::scan_into(&mut writer, pack_dir, opts)?;
        },
        (None, None) => {
            return Err(squashfs_mkfs::MkfsError::ConfigInvalid(
                "one of --pack-file or --pack-dir is required".into(),
            ));
        },
    }

    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .create_new(!args.force)
        .truncate(args.force)
        .open(&args.output)?;
    writer.write(&mut output)?;

    Ok(())
}
