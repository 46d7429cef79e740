//! Directory archiving
//!
//! # Supported Formats
//!
//! - **Zip** (.zip): deflate, zip64 enabled for large members
//! - **Tar.gz** (.tar.gz): tar + flate2
//! - **Tar.xz** (.tar.xz): tar + xz2
//! - **Tar.bz2** (.tar.bz2): tar + bzip2
//!
//! Archives are written to `<destination>.partial` and renamed once complete,
//! so an interrupted run never leaves a truncated archive that a rerun would
//! mistake for a finished one.
//!
//! Every finished archive has a member manifest next to it
//! (`<destination>.members`, JSON) listing the name, size and modification
//! time of each file it contains. An archive is only reusable while its
//! manifest equals the listing of the source directory.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use ckool_common::CompressionFormat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::error::Result;
use crate::planner::{relative_display, PathFilter};
use crate::progress::ProgressSink;

/// All regular files below `dir` accepted by `filter`, in file-name order.
///
/// Paths are filtered relative to the directory's parent, the package root.
pub fn collect_files(dir: &Path, filter: &PathFilter) -> Result<Vec<PathBuf>> {
    let package_root = dir.parent().unwrap_or(dir);
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if filter.is_included(&relative_display(package_root, entry.path())) {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// One file as it was when it went into an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMember {
    pub name: String,
    pub size: u64,
    /// Nanoseconds since the Unix epoch
    pub modified: Option<u64>,
}

/// Describe `files` (all below `root_dir`) as archive members
pub fn archive_members(root_dir: &Path, files: &[PathBuf]) -> Result<Vec<ArchiveMember>> {
    let base = root_dir.parent().unwrap_or(root_dir);
    files
        .iter()
        .map(|file| -> Result<ArchiveMember> {
            let metadata = std::fs::metadata(file)?;
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .and_then(|d| u64::try_from(d.as_nanos()).ok());
            Ok(ArchiveMember {
                name: relative_display(base, file),
                size: metadata.len(),
                modified,
            })
        })
        .collect()
}

/// Location of the member manifest of the archive at `destination`
pub fn manifest_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".members");
    PathBuf::from(name)
}

/// Members recorded for the archive at `destination`.
///
/// `None` when the archive or its manifest is missing, or the manifest
/// cannot be read back.
pub fn read_manifest(destination: &Path) -> Result<Option<Vec<ArchiveMember>>> {
    if !destination.is_file() {
        return Ok(None);
    }
    let manifest = manifest_path(destination);
    let text = match std::fs::read_to_string(&manifest) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&text) {
        Ok(members) => Ok(Some(members)),
        Err(e) => {
            debug!(manifest = %manifest.display(), error = %e, "unreadable member manifest");
            Ok(None)
        }
    }
}

/// Archive path for `dir` inside `tmp_dir`
pub fn archive_path(tmp_dir: &Path, dir: &Path, format: CompressionFormat) -> PathBuf {
    let stem = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "package".to_string());
    tmp_dir.join(format.archive_name(&stem))
}

/// Stream `files` (all below `root_dir`) into one archive at `destination`.
///
/// Members are named `<root_dir name>/<path relative to root_dir>`.
pub fn compress(
    root_dir: &Path,
    destination: &Path,
    files: &[PathBuf],
    format: CompressionFormat,
    progress: &dyn ProgressSink,
) -> Result<PathBuf> {
    let base = root_dir.parent().unwrap_or(root_dir);
    if let Some(dir) = destination.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let manifest = manifest_path(destination);
    match std::fs::remove_file(&manifest) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listing = archive_members(root_dir, files)?;
    let total: u64 = listing.iter().map(|m| m.size).sum();
    progress.begin("compress", root_dir, total);

    let partial = partial_path(destination);
    let out = BufWriter::new(File::create(&partial)?);
    let members = files.iter().map(|f| (relative_display(base, f), f.as_path()));

    match format {
        CompressionFormat::Zip => write_zip(out, members, progress)?,
        CompressionFormat::TarGz => {
            let encoder = flate2::write::GzEncoder::new(out, flate2::Compression::default());
            write_tar(encoder, members, progress)?.finish()?.flush()?;
        }
        CompressionFormat::TarXz => {
            let encoder = xz2::write::XzEncoder::new(out, 6);
            write_tar(encoder, members, progress)?.finish()?.flush()?;
        }
        CompressionFormat::TarBz2 => {
            let encoder = bzip2::write::BzEncoder::new(out, bzip2::Compression::default());
            write_tar(encoder, members, progress)?.finish()?.flush()?;
        }
    }

    std::fs::rename(&partial, destination)?;
    let json = serde_json::to_string_pretty(&listing).map_err(ckool_common::CkoolError::from)?;
    std::fs::write(&manifest, json)?;
    progress.finish(root_dir);
    info!(
        archive = %destination.display(),
        files = files.len(),
        bytes = total,
        format = %format,
        "archive written"
    );
    Ok(destination.to_path_buf())
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

fn write_zip<'a, W>(
    out: W,
    members: impl Iterator<Item = (String, &'a Path)>,
    progress: &dyn ProgressSink,
) -> Result<()>
where
    W: Write + io::Seek,
{
    let mut zip = zip::ZipWriter::new(out);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .large_file(true);

    for (name, path) in members {
        debug!(member = %name, "adding to zip");
        zip.start_file(name, options)?;
        let mut reader = ProgressReader::new(File::open(path)?, progress);
        io::copy(&mut reader, &mut zip)?;
    }

    zip.finish()?.flush()?;
    Ok(())
}

fn write_tar<'a, W: Write>(
    out: W,
    members: impl Iterator<Item = (String, &'a Path)>,
    progress: &dyn ProgressSink,
) -> Result<W> {
    let mut builder = tar::Builder::new(out);

    for (name, path) in members {
        debug!(member = %name, "adding to tar");
        let file = File::open(path)?;
        let mut header = tar::Header::new_gnu();
        header.set_metadata(&file.metadata()?);
        builder.append_data(&mut header, &name, ProgressReader::new(file, progress))?;
    }

    Ok(builder.into_inner()?)
}

/// Forwards reads and reports every chunk to a progress sink
struct ProgressReader<'a, R> {
    inner: R,
    progress: &'a dyn ProgressSink,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    fn new(inner: R, progress: &'a dyn ProgressSink) -> Self {
        Self { inner, progress }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.progress.advance(n as u64);
        Ok(n)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::progress::{testing::CountingProgress, NoProgress};
    use std::collections::BTreeSet;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn package() -> TempDir {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir_all(sub.join("nested")).unwrap();
        std::fs::write(sub.join("a.txt"), b"alpha").unwrap();
        std::fs::write(sub.join("b.log"), b"beta").unwrap();
        std::fs::write(sub.join("nested/c.txt"), vec![b'c'; 10_000]).unwrap();
        dir
    }

    fn tar_members<R: Read>(reader: R) -> BTreeSet<String> {
        tar::Archive::new(reader)
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_collect_files_applies_filter() {
        let dir = package();
        let sub = dir.path().join("sub");

        let all = collect_files(&sub, &PathFilter::default()).unwrap();
        assert_eq!(all.len(), 3);

        let filter = PathFilter::new(None, Some(r"\.log$")).unwrap();
        let kept = collect_files(&sub, &filter).unwrap();
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|p| p.extension().unwrap() == "txt"));
    }

    #[test]
    fn test_zip_member_names() {
        let dir = package();
        let sub = dir.path().join("sub");
        let files = collect_files(&sub, &PathFilter::default()).unwrap();
        let dest = archive_path(&dir.path().join(".ckool"), &sub, CompressionFormat::Zip);

        let progress = CountingProgress::default();
        compress(&sub, &dest, &files, CompressionFormat::Zip, &progress).unwrap();

        assert!(dest.ends_with(".ckool/sub.zip"));
        assert!(!partial_path(&dest).exists());

        let archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let names: BTreeSet<_> = archive.file_names().map(str::to_string).collect();
        assert_eq!(
            names,
            BTreeSet::from([
                "sub/a.txt".to_string(),
                "sub/b.log".to_string(),
                "sub/nested/c.txt".to_string(),
            ])
        );

        let expected = progress.expected.load(Ordering::SeqCst);
        assert_eq!(expected, 5 + 4 + 10_000);
        assert_eq!(progress.seen.load(Ordering::SeqCst), expected);
    }

    #[test]
    fn test_tar_formats_round_trip_member_names() {
        let dir = package();
        let sub = dir.path().join("sub");
        let files = collect_files(&sub, &PathFilter::default()).unwrap();
        let tmp = dir.path().join(".ckool");

        for format in [
            CompressionFormat::TarGz,
            CompressionFormat::TarXz,
            CompressionFormat::TarBz2,
        ] {
            let dest = archive_path(&tmp, &sub, format);
            compress(&sub, &dest, &files, format, &NoProgress).unwrap();

            let file = File::open(&dest).unwrap();
            let names = match format {
                CompressionFormat::TarGz => tar_members(flate2::read::GzDecoder::new(file)),
                CompressionFormat::TarXz => tar_members(xz2::read::XzDecoder::new(file)),
                CompressionFormat::TarBz2 => tar_members(bzip2::read::BzDecoder::new(file)),
                CompressionFormat::Zip => unreachable!(),
            };
            assert!(names.contains("sub/nested/c.txt"), "{}: {:?}", format, names);
            assert_eq!(names.len(), 3);
        }
    }

    #[test]
    fn test_manifest_lists_archived_members() {
        let dir = package();
        let sub = dir.path().join("sub");
        let files = collect_files(&sub, &PathFilter::default()).unwrap();
        let dest = archive_path(&dir.path().join(".ckool"), &sub, CompressionFormat::Zip);

        assert!(read_manifest(&dest).unwrap().is_none());
        compress(&sub, &dest, &files, CompressionFormat::Zip, &NoProgress).unwrap();

        let manifest = read_manifest(&dest).unwrap().unwrap();
        let names: Vec<_> = manifest.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["sub/a.txt", "sub/b.log", "sub/nested/c.txt"]);
        assert_eq!(manifest, archive_members(&sub, &files).unwrap());
        assert_eq!(manifest[2].size, 10_000);
    }

    #[test]
    fn test_corrupt_manifest_reads_as_missing() {
        let dir = package();
        let sub = dir.path().join("sub");
        let files = collect_files(&sub, &PathFilter::default()).unwrap();
        let dest = archive_path(&dir.path().join(".ckool"), &sub, CompressionFormat::TarGz);
        compress(&sub, &dest, &files, CompressionFormat::TarGz, &NoProgress).unwrap();

        std::fs::write(manifest_path(&dest), "{ not json").unwrap();
        assert!(read_manifest(&dest).unwrap().is_none());
    }

    #[test]
    fn test_empty_directory_produces_archive() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        let dest = archive_path(&dir.path().join(".ckool"), &empty, CompressionFormat::TarGz);

        compress(&empty, &dest, &[], CompressionFormat::TarGz, &NoProgress).unwrap();
        assert!(dest.exists());
    }
}
