//! Pack-file parser (A4): the line-oriented grammar documented in the CLI
//! surface, turned into [`PackEntry`] records the core tree (C8) can consume.
//!
//! This is deliberately a thin front-end: the core writer never parses text,
//! it only ever sees `push_*` calls built from already-validated fields.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::MkfsError;
use crate::filesystem::node::NodeHeader;
use crate::filesystem::writer::FilesystemWriter;

/// The kind-specific trailing fields of one pack-file line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackKind {
    /// `file <path> <mode> <uid> <gid> [location]`
    File {
        /// Path to the data on the host, relative to the pack-file's
        /// directory (or `--pack-dir`) unless absolute. Defaults to the
        /// image path itself when omitted.
        location: Option<PathBuf>,
    },
    /// `dir <path> <mode> <uid> <gid>`
    Dir,
    /// `nod <path> <mode> <uid> <gid> <b|c> <major> <minor>`
    Nod { block: bool, major: u32, minor: u32 },
    /// `slink <path> <mode> <uid> <gid> <target>`
    Slink { target: PathBuf },
    /// `pipe <path> <mode> <uid> <gid>`
    Pipe,
    /// `sock <path> <mode> <uid> <gid>`
    Sock,
}

/// One parsed, validated line of a pack-file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    pub path: PathBuf,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub kind: PackKind,
}

/// Pack the (major, minor) pair the classic way: low byte of major in bits
/// 8-15, minor in bits 0-7. Sufficient for the single-digit majors/minors
/// that show up in practice (console, null, zero, loop, …); anything larger
/// is an explicit [`MkfsError::Overflow`] rather than silent truncation.
pub fn pack_device_number(major: u32, minor: u32) -> Result<u32, MkfsError> {
    if major > 0xff || minor > 0xff {
        return Err(MkfsError::Overflow(format!(
            "device number {major}:{minor} does not fit the packed 8+8 form"
        )));
    }
    Ok((major << 8) | minor)
}

/// Split a pack-file line into whitespace-separated fields, honoring
/// double-quoted paths (which may contain spaces) with backslash escapes.
fn tokenize(line: &str) -> Result<Vec<String>, MkfsError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '"' {
            chars.next();
            let mut tok = String::new();
            loop {
                match chars.next() {
                    None => return Err(MkfsError::PackFileInvalid { line: 0, reason: "unterminated quoted string".into() }),
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(next) => tok.push(next),
                        None => {
                            return Err(MkfsError::PackFileInvalid {
                                line: 0,
                                reason: "dangling escape at end of line".into(),
                            })
                        },
                    },
                    Some(other) => tok.push(other),
                }
            }
            tokens.push(tok);
        } else {
            let mut tok = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                tok.push(c);
                chars.next();
            }
            tokens.push(tok);
        }
    }

    Ok(tokens)
}

fn field_error(line_no: usize, reason: impl Into<String>) -> MkfsError {
    MkfsError::PackFileInvalid { line: line_no, reason: reason.into() }
}

fn parse_u32(line_no: usize, field: &str, name: &str) -> Result<u32, MkfsError> {
    field.parse().map_err(|_| field_error(line_no, format!("invalid {name}: {field:?}")))
}

fn parse_mode(line_no: usize, field: &str) -> Result<u16, MkfsError> {
    let value = u16::from_str_radix(field, 8).map_err(|_| field_error(line_no, format!("invalid octal mode: {field:?}")))?;
    if value > 0o7777 {
        return Err(field_error(line_no, format!("mode {field} out of range")));
    }
    Ok(value)
}

/// Parse one non-comment, non-blank pack-file line.
pub fn parse_line(line_no: usize, line: &str) -> Result<PackEntry, MkfsError> {
    let mut tokens = tokenize(line).map_err(|e| match e {
        MkfsError::PackFileInvalid { reason, .. } => field_error(line_no, reason),
        other => other,
    })?;

    if tokens.is_empty() {
        return Err(field_error(line_no, "empty entry"));
    }

    let kind_word = tokens.remove(0);
    if tokens.len() < 4 {
        return Err(field_error(line_no, "expected at least <path> <mode> <uid> <gid>"));
    }
    let path = PathBuf::from(tokens.remove(0));
    let mode = parse_mode(line_no, &tokens.remove(0))?;
    let uid = parse_u32(line_no, &tokens.remove(0), "uid")?;
    let gid = parse_u32(line_no, &tokens.remove(0), "gid")?;

    let kind = match kind_word.as_str() {
        "file" => PackKind::File { location: tokens.pop().map(PathBuf::from) },
        "dir" => PackKind::Dir,
        "nod" => {
            if tokens.len() != 3 {
                return Err(field_error(line_no, "nod requires <b|c> <major> <minor>"));
            }
            let block = match tokens[0].as_str() {
                "b" => true,
                "c" => false,
                other => return Err(field_error(line_no, format!("nod type must be b or c, got {other:?}"))),
            };
            let major = parse_u32(line_no, &tokens[1], "major")?;
            let minor = parse_u32(line_no, &tokens[2], "minor")?;
            PackKind::Nod { block, major, minor }
        },
        "slink" => {
            if tokens.len() != 1 {
                return Err(field_error(line_no, "slink requires exactly one <target>"));
            }
            PackKind::Slink { target: PathBuf::from(tokens.remove(0)) }
        },
        "pipe" => PackKind::Pipe,
        "sock" => PackKind::Sock,
        other => return Err(field_error(line_no, format!("unknown entry kind {other:?}"))),
    };

    Ok(PackEntry { path, mode, uid, gid, kind })
}

/// Parse a whole pack-file, skipping blank lines and `#`-led comments.
pub fn parse(reader: impl BufRead) -> Result<Vec<PackEntry>, MkfsError> {
    let mut entries = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line_no = i + 1;
        let line = line.map_err(MkfsError::StdIo)?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        entries.push(parse_line(line_no, trimmed)?);
    }
    Ok(entries)
}

/// Apply a parsed pack-file to a writer, opening `file` entries' source data
/// relative to `pack_dir`.
pub fn load_into(writer: &mut FilesystemWriter, pack_file: &Path, pack_dir: &Path) -> Result<(), MkfsError> {
    let reader = BufReader::new(File::open(pack_file)?);
    let entries = parse(reader)?;
    apply(writer, &entries, pack_dir)
}

/// Apply already-parsed entries (used directly by tests and by
/// [`load_into`]); `pack_dir` resolves a `file` entry's relative `location`.
pub fn apply(writer: &mut FilesystemWriter, entries: &[PackEntry], pack_dir: &Path) -> Result<(), MkfsError> {
    for entry in entries {
        let header = NodeHeader::new(entry.mode, entry.uid, entry.gid, 0);
        match &entry.kind {
            PackKind::Dir => writer.push_dir(&entry.path, header)?,
            PackKind::File { location } => {
                let location = match location {
                    Some(loc) if loc.is_absolute() => loc.clone(),
                    Some(loc) => pack_dir.join(loc),
                    None => pack_dir.join(entry.path.strip_prefix("/").unwrap_or(&entry.path)),
                };
                let file: Box<dyn Read + Send> = Box::new(File::open(&location)?);
                writer.push_file(&entry.path, header, file)?;
            },
            PackKind::Slink { target } => writer.push_symlink(&entry.path, header, target.clone())?,
            PackKind::Nod { block, major, minor } => {
                let dev = pack_device_number(*major, *minor)?;
                if *block {
                    writer.push_block_device(&entry.path, header, dev)?;
                } else {
                    writer.push_char_device(&entry.path, header, dev)?;
                }
            },
            PackKind::Pipe => writer.push_fifo(&entry.path, header)?,
            PackKind::Sock => writer.push_socket(&entry.path, header)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dir_line() {
        let e = parse_line(1, "dir / 0755 0 0").unwrap();
        assert_eq!(e.mode, 0o755);
        assert_eq!(e.kind, PackKind::Dir);
    }

    #[test]
    fn test_parse_file_with_location() {
        let e = parse_line(1, "file /a 0644 0 0 data/a.bin").unwrap();
        assert_eq!(e.path, Path::new("/a"));
        assert_eq!(e.kind, PackKind::File { location: Some(PathBuf::from("data/a.bin")) });
    }

    #[test]
    fn test_parse_quoted_path_with_spaces() {
        let e = parse_line(1, r#"dir "/a dir" 0755 0 0"#).unwrap();
        assert_eq!(e.path, Path::new("/a dir"));
    }

    #[test]
    fn test_parse_slink() {
        let e = parse_line(1, "slink /l 0777 0 0 /target").unwrap();
        assert_eq!(e.kind, PackKind::Slink { target: PathBuf::from("/target") });
    }

    #[test]
    fn test_parse_nod() {
        let e = parse_line(1, "nod /dev/null 0666 0 0 c 1 3").unwrap();
        assert_eq!(e.kind, PackKind::Nod { block: false, major: 1, minor: 3 });
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let text = "# a comment\n\ndir / 0755 0 0\n";
        let entries = parse(std::io::Cursor::new(text)).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(parse_line(1, "bogus / 0755 0 0").is_err());
    }

    #[test]
    fn test_malformed_mode_rejected() {
        assert!(parse_line(1, "dir / notoctal 0 0").is_err());
    }
}
