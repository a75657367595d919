//! Archive inspection.
//!
//! A cached artifact is a ZIP archive produced by vcpkg, carrying a
//! `CONTROL` entry (`Key: Value` records) and a
//! `share/<package>/vcpkg_abi_info.txt` entry (`Key Value` records).
//! Inspection derives everything the server knows about an archive
//! without trusting the uploader.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{ServerError, ServerResult};

/// Name of the control entry inside an archive.
const CONTROL_ENTRY: &str = "CONTROL";

/// Suffix of the ABI description entry inside an archive.
const ABI_SUFFIX: &str = "vcpkg_abi_info.txt";

/// A 64-character lowercase-hex build fingerprint.
///
/// This is the primary key of both the blob store and the cache
/// table. It is treated as opaque and never recomputed server-side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha(String);

impl Sha {
    pub fn new(s: &str) -> Option<Self> {
        let valid = s.len() == 64
            && s.bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two-character prefix used for the on-disk fan-out.
    pub fn prefix(&self) -> &str {
        &self.0[0..2]
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything we know about one cached archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub package: String,
    pub version: String,
    pub architecture: String,
    pub sha: Sha,
    pub ctrl: BTreeMap<String, String>,
    pub abi: BTreeMap<String, String>,
    pub mtime: DateTime<Utc>,
    pub size: u64,
}

impl Info {
    /// Placeholder installed while an upload is in flight.
    pub(crate) fn placeholder(sha: Sha) -> Self {
        Self {
            package: "?".to_owned(),
            version: "?".to_owned(),
            architecture: "?".to_owned(),
            sha,
            ctrl: BTreeMap::new(),
            abi: BTreeMap::new(),
            mtime: DateTime::<Utc>::UNIX_EPOCH,
            size: 0,
        }
    }
}

/// Splits newline-delimited records into a map, separating each record
/// at the first occurrence of `sep` and trimming both sides. Blank
/// records are dropped; duplicate keys resolve to the last writer.
pub fn parse_records(text: &str, sep: char) -> BTreeMap<String, String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let (key, value) = match line.split_once(sep) {
                Some((key, value)) => (key, value),
                None => (line, ""),
            };
            (key.trim().to_owned(), value.trim().to_owned())
        })
        .collect()
}

fn read_entry(zf: &mut ZipArchive<File>, name: &str) -> ServerResult<Option<String>> {
    let mut entry = match zf.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ServerError::MalformedArchive(e.into())),
    };

    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| ServerError::MalformedArchive(e.into()))?;
    Ok(Some(text))
}

/// Inspects the archive at `path`.
///
/// The fingerprint is taken from the file stem; the control and ABI
/// maps are parsed out of the archive; size and mtime come from the
/// filesystem.
pub fn inspect(path: &Path) -> ServerResult<Info> {
    let stem = path.file_stem().and_then(OsStr::to_str).unwrap_or_default();
    let sha = Sha::new(stem).ok_or_else(|| {
        ServerError::MalformedArchive(anyhow!("file stem {stem:?} is not a build fingerprint"))
    })?;

    let file = File::open(path).map_err(|e| ServerError::MalformedArchive(e.into()))?;
    let mut zf = ZipArchive::new(file).map_err(|e| ServerError::MalformedArchive(e.into()))?;

    let ctrl_text = read_entry(&mut zf, CONTROL_ENTRY)?.ok_or(ServerError::MissingControl)?;
    let ctrl = parse_records(&ctrl_text, ':');

    let package = ctrl.get("Package").cloned().unwrap_or_else(|| "?".to_owned());

    let abi_text = match read_entry(&mut zf, &format!("share/{package}/{ABI_SUFFIX}"))? {
        Some(text) => text,
        None => {
            // Not at the conventional location; take any entry with
            // the right suffix.
            let alternate = zf
                .file_names()
                .find(|name| name.ends_with(ABI_SUFFIX))
                .map(str::to_owned);
            match alternate {
                Some(name) => read_entry(&mut zf, &name)?.ok_or(ServerError::MissingAbi)?,
                None => return Err(ServerError::MissingAbi),
            }
        }
    };
    let abi = parse_records(&abi_text, ' ');

    let metadata = std::fs::metadata(path).map_err(ServerError::storage_error)?;
    let mtime = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .map_err(ServerError::storage_error)?;

    Ok(Info {
        version: ctrl.get("Version").cloned().unwrap_or_else(|| "?".to_owned()),
        architecture: ctrl
            .get("Architecture")
            .cloned()
            .unwrap_or_else(|| "?".to_owned()),
        package,
        sha,
        ctrl,
        abi,
        mtime,
        size: metadata.len(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn write_archive(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(format!("{name}.zip"));
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (entry, content) in entries {
            writer.start_file(*entry, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn parse_colon_records() {
        let map = parse_records("Package: foo\nVersion:1.2 \n\n  \nBad\n", ':');
        assert_eq!(map.get("Package").unwrap(), "foo");
        assert_eq!(map.get("Version").unwrap(), "1.2");
        assert_eq!(map.get("Bad").unwrap(), "");
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn parse_splits_on_first_separator_only() {
        let map = parse_records("url: https://example.org:443/x", ':');
        assert_eq!(map.get("url").unwrap(), "https://example.org:443/x");
    }

    #[test]
    fn parse_last_writer_wins() {
        let map = parse_records("k a\nk b", ' ');
        assert_eq!(map.get("k").unwrap(), "b");
    }

    #[test]
    fn sha_validation() {
        assert!(Sha::new(SHA_A).is_some());
        assert!(Sha::new("aaaa").is_none());
        assert!(Sha::new(&SHA_A.to_uppercase()).is_none());
        assert!(Sha::new(&format!("{}g", &SHA_A[..63])).is_none());
    }

    #[test]
    fn inspect_reads_control_and_abi() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            SHA_A,
            &[
                (
                    "CONTROL",
                    "Package: zlib\nVersion: 1.3.1\nArchitecture: x64-linux\n",
                ),
                (
                    "share/zlib/vcpkg_abi_info.txt",
                    "compiler abc123\ncmake 3.29\n",
                ),
            ],
        );

        let info = inspect(&path).unwrap();
        assert_eq!(info.package, "zlib");
        assert_eq!(info.version, "1.3.1");
        assert_eq!(info.architecture, "x64-linux");
        assert_eq!(info.sha.as_str(), SHA_A);
        assert_eq!(info.abi.get("compiler").unwrap(), "abc123");
        assert!(info.size > 0);
    }

    #[test]
    fn inspect_falls_back_to_any_abi_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            SHA_A,
            &[
                ("CONTROL", "Package: zlib\n"),
                ("unusual/location/vcpkg_abi_info.txt", "flag value\n"),
            ],
        );

        let info = inspect(&path).unwrap();
        assert_eq!(info.abi.get("flag").unwrap(), "value");
        assert_eq!(info.version, "?");
    }

    #[test]
    fn inspect_rejects_missing_control() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(dir.path(), SHA_A, &[("other", "x")]);
        assert!(matches!(
            inspect(&path),
            Err(ServerError::MissingControl)
        ));
    }

    #[test]
    fn inspect_rejects_missing_abi() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(dir.path(), SHA_A, &[("CONTROL", "Package: zlib\n")]);
        assert!(matches!(inspect(&path), Err(ServerError::MissingAbi)));
    }

    #[test]
    fn inspect_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("{SHA_A}.zip"));
        std::fs::write(&path, b"this is not a zip archive").unwrap();
        assert!(matches!(
            inspect(&path),
            Err(ServerError::MalformedArchive(_))
        ));
    }
}
