//! Archive codec
//!
//! Packs a build directory into a single uploadable file (tar.gz or zip) and
//! unpacks downloaded archives. Extraction prefers the platform's own tools
//! and falls back to the in-process decoders.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::LOG_TARGET;

/// Errors from packing, unpacking or searching archives.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed zip archive.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Only directories can be compressed.
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The file name has no known archive extension.
    #[error("Unsupported archive format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// Neither the native tool nor the in-process decoder could extract.
    #[error("Failed to extract {}: {reason}", .path.display())]
    ExtractFailed {
        /// Archive (or entry) that failed.
        path: PathBuf,
        /// Last failure.
        reason: String,
    },

    /// No `.app`/`.apk` under the searched directory.
    #[error("Did not find any installable .{extension} inside {}", .dir.display())]
    AppNotFound {
        /// Directory searched.
        dir: PathBuf,
        /// Extension looked for.
        extension: String,
    },
}

/// Container format used for directory artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ArchiveFormat {
    /// Gzip-compressed tar archive (`.tar.gz`).
    #[default]
    #[serde(rename = "tar.gz", alias = "tar")]
    TarGz,
    /// Zip archive (`.zip`).
    #[serde(rename = "zip")]
    Zip,
}

impl ArchiveFormat {
    /// File extension, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }

    /// Detect the format from a file or asset name.
    pub fn detect(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    fn detect_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(Self::detect)
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tar" | "tar.gz" | "tgz" => Ok(Self::TarGz),
            "zip" => Ok(Self::Zip),
            other => Err(format!("Unknown archive format '{other}': expected tar or zip")),
        }
    }
}

/// Compress `source_dir` into a new archive under `scratch_dir`.
///
/// Entries are rooted at the basename of `source_dir`, so extracting
/// `MyApp.app` yields a `MyApp.app/` directory rather than its contents.
/// Symlinks are stored as links.
pub async fn compress(
    source_dir: &Path,
    format: ArchiveFormat,
    scratch_dir: &Path,
) -> Result<PathBuf, ArchiveError> {
    let meta = tokio::fs::metadata(source_dir).await?;
    if !meta.is_dir() {
        return Err(ArchiveError::NotADirectory(source_dir.to_path_buf()));
    }
    tokio::fs::create_dir_all(scratch_dir).await?;

    let (file, archive_path) = tempfile::Builder::new()
        .prefix("archive-")
        .suffix(&format!(".{}", format.extension()))
        .tempfile_in(scratch_dir)?
        .keep()
        .map_err(|e| e.error)?;

    let source = source_dir.to_path_buf();
    let result = tokio::task::spawn_blocking(move || match format {
        ArchiveFormat::TarGz => write_tar_gz(file, &source),
        ArchiveFormat::Zip => write_zip(file, &source),
    })
    .await
    .map_err(io::Error::other)?;

    if let Err(e) = result {
        tokio::fs::remove_file(&archive_path).await.ok();
        return Err(e);
    }

    tracing::debug!(
        target: LOG_TARGET,
        "Compressed {} into {}",
        source_dir.display(),
        archive_path.display()
    );
    Ok(archive_path)
}

fn root_name(source: &Path) -> Result<&std::ffi::OsStr, ArchiveError> {
    source
        .file_name()
        .ok_or_else(|| ArchiveError::NotADirectory(source.to_path_buf()))
}

fn write_tar_gz(file: File, source: &Path) -> Result<(), ArchiveError> {
    let root = root_name(source)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    // App bundles carry framework symlinks (Versions/Current etc.) that must
    // stay links.
    builder.follow_symlinks(false);
    builder.append_dir_all(root, source)?;

    builder.into_inner()?.finish()?.flush()?;
    Ok(())
}

fn write_zip(file: File, source: &Path) -> Result<(), ArchiveError> {
    let root = root_name(source)?.to_string_lossy().into_owned();
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;

        let mut name = root.clone();
        for component in relative.components() {
            name.push('/');
            name.push_str(&component.as_os_str().to_string_lossy());
        }

        let meta = entry.path().symlink_metadata()?;
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(unix_mode(&meta));

        if meta.file_type().is_symlink() {
            let target = fs::read_link(entry.path())?;
            zip.add_symlink(name, target.to_string_lossy(), options)?;
        } else if meta.is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
        } else {
            zip.start_file(name, options)?;
            let mut input = File::open(entry.path())?;
            io::copy(&mut input, &mut zip)?;
        }
    }

    zip.finish()?.flush()?;
    Ok(())
}

#[cfg(unix)]
fn unix_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn unix_mode(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

/// Extract `archive_path` into `output_dir`, auto-detecting the format from
/// the file name.
///
/// Tries the native `tar` / `unzip` first; on any failure falls back to the
/// in-process decoder. Errors only if both fail.
pub async fn extract(archive_path: &Path, output_dir: &Path) -> Result<(), ArchiveError> {
    let format = ArchiveFormat::detect_path(archive_path)
        .ok_or_else(|| ArchiveError::UnsupportedFormat(archive_path.to_path_buf()))?;
    tokio::fs::create_dir_all(output_dir).await?;

    match extract_native(archive_path, output_dir, format).await {
        Ok(()) => return Ok(()),
        Err(reason) => tracing::warn!(
            target: LOG_TARGET,
            "Failed to extract using native tools, falling back on in-process decoder. {reason}"
        ),
    }

    tracing::info!(
        target: LOG_TARGET,
        "Extracting {} to {} using in-process decoder",
        archive_path.display(),
        output_dir.display()
    );

    let archive = archive_path.to_path_buf();
    let output = output_dir.to_path_buf();
    tokio::task::spawn_blocking(move || extract_in_process(&archive, &output, format))
        .await
        .map_err(io::Error::other)?
        .map_err(|e| ArchiveError::ExtractFailed {
            path: archive_path.to_path_buf(),
            reason: e.to_string(),
        })
}

async fn extract_native(
    archive_path: &Path,
    output_dir: &Path,
    format: ArchiveFormat,
) -> Result<(), String> {
    if cfg!(windows) {
        return Err("native extraction is not used on Windows".to_string());
    }

    let tool = match format {
        ArchiveFormat::TarGz => "tar",
        ArchiveFormat::Zip => "unzip",
    };
    let program = which::which(tool).map_err(|e| format!("{tool} not found: {e}"))?;

    let mut cmd = tokio::process::Command::new(program);
    match format {
        ArchiveFormat::TarGz => {
            cmd.arg("-xzf").arg(archive_path).arg("-C").arg(output_dir);
        }
        ArchiveFormat::Zip => {
            cmd.arg("-q").arg("-o").arg(archive_path).arg("-d").arg(output_dir);
        }
    }

    let status = cmd
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .status()
        .await
        .map_err(|e| format!("failed to spawn {tool}: {e}"))?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("{tool} exited with {status}"))
    }
}

fn extract_in_process(
    archive_path: &Path,
    output_dir: &Path,
    format: ArchiveFormat,
) -> Result<(), ArchiveError> {
    fs::create_dir_all(output_dir)?;
    let file = File::open(archive_path)?;

    match format {
        ArchiveFormat::TarGz => {
            let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
            archive.set_preserve_permissions(true);
            archive.set_overwrite(true);
            archive.unpack(output_dir)?;
        }
        ArchiveFormat::Zip => extract_zip(file, output_dir)?,
    }
    Ok(())
}

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

fn extract_zip(file: File, output_dir: &Path) -> Result<(), ArchiveError> {
    let mut archive = ZipArchive::new(file)?;
    let root = fs::canonicalize(output_dir)?;
    // Links are created last, so no entry is ever written through one.
    let mut links = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ArchiveError::ExtractFailed {
                path: output_dir.to_path_buf(),
                reason: format!("invalid path in archive: {}", entry.name()),
            });
        };
        let target = output_dir.join(relative);

        if entry.is_dir() {
            ensure_inside(&root, &target)?;
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            ensure_inside(&root, parent)?;
            fs::create_dir_all(parent)?;
        }

        let mode = entry.unix_mode();
        if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            let mut link = String::new();
            io::Read::read_to_string(&mut entry, &mut link)?;
            links.push((target, link));
            continue;
        }

        let mut outfile = File::create(&target)?;
        io::copy(&mut entry, &mut outfile)?;

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }

    for (target, link) in links {
        if let Some(parent) = target.parent() {
            ensure_inside(&root, parent)?;
            fs::create_dir_all(parent)?;
        }
        if target
            .symlink_metadata()
            .is_ok_and(|meta| !meta.file_type().is_symlink())
        {
            return Err(ArchiveError::ExtractFailed {
                path: target,
                reason: "symlink entry collides with an extracted path".to_string(),
            });
        }
        create_symlink(&link, &target)?;
    }
    Ok(())
}

/// Fail unless the closest existing ancestor of `path` resolves under `root`.
fn ensure_inside(root: &Path, path: &Path) -> Result<(), ArchiveError> {
    let Some(existing) = path.ancestors().find(|p| p.exists()) else {
        return Ok(());
    };
    if fs::canonicalize(existing)?.starts_with(root) {
        Ok(())
    } else {
        Err(ArchiveError::ExtractFailed {
            path: path.to_path_buf(),
            reason: "entry resolves outside the output directory".to_string(),
        })
    }
}

#[cfg(unix)]
fn create_symlink(link: &str, target: &Path) -> io::Result<()> {
    if target.symlink_metadata().is_ok() {
        fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn create_symlink(link: &str, target: &Path) -> io::Result<()> {
    fs::write(target, link)
}

/// Find the first entry under `dir` whose name ends in `.<extension>`.
///
/// Entries are visited parents-first in name order, so an `.app` bundle is
/// returned before anything nested inside it.
pub fn find_app(dir: &Path, extension: &str) -> Result<PathBuf, ArchiveError> {
    let suffix = format!(".{extension}");
    WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|e| e.file_name().to_string_lossy().ends_with(&suffix))
        .map(walkdir::DirEntry::into_path)
        .ok_or_else(|| ArchiveError::AppNotFound {
            dir: dir.to_path_buf(),
            extension: extension.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Eq)]
    enum Node {
        Dir,
        File(Vec<u8>),
        Link(PathBuf),
    }

    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Node> {
        WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .map(|e| e.unwrap())
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
                let ft = e.path().symlink_metadata().unwrap().file_type();
                let node = if ft.is_symlink() {
                    Node::Link(fs::read_link(e.path()).unwrap())
                } else if ft.is_dir() {
                    Node::Dir
                } else {
                    Node::File(fs::read(e.path()).unwrap())
                };
                (rel, node)
            })
            .collect()
    }

    fn make_app_bundle(parent: &Path) -> PathBuf {
        let app = parent.join("Demo.app");
        fs::create_dir_all(app.join("Contents/MacOS")).unwrap();
        fs::create_dir_all(app.join("Contents/Resources/empty")).unwrap();
        fs::write(app.join("Contents/Info.plist"), b"<plist/>").unwrap();
        fs::write(app.join("Contents/MacOS/Demo"), vec![0u8, 1, 2, 255]).unwrap();
        fs::write(app.join("Contents/Resources/main.jsbundle"), "x".repeat(10_000)).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("MacOS/Demo", app.join("Contents/current")).unwrap();
        app
    }

    async fn round_trip(format: ArchiveFormat) {
        let src = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let app = make_app_bundle(src.path());

        let archive = compress(&app, format, scratch.path()).await.unwrap();
        assert!(archive.to_string_lossy().ends_with(format.extension()));
        assert!(app.exists(), "source must not be consumed");

        extract(&archive, out.path()).await.unwrap();
        assert_eq!(snapshot(src.path()), snapshot(out.path()));
    }

    #[tokio::test]
    async fn test_tar_gz_round_trip() {
        round_trip(ArchiveFormat::TarGz).await;
    }

    #[tokio::test]
    async fn test_zip_round_trip() {
        round_trip(ArchiveFormat::Zip).await;
    }

    #[tokio::test]
    async fn test_in_process_matches_native() {
        for format in [ArchiveFormat::TarGz, ArchiveFormat::Zip] {
            let src = TempDir::new().unwrap();
            let scratch = TempDir::new().unwrap();
            let app = make_app_bundle(src.path());
            let archive = compress(&app, format, scratch.path()).await.unwrap();

            let in_process = TempDir::new().unwrap();
            extract_in_process(&archive, in_process.path(), format).unwrap();
            assert_eq!(snapshot(src.path()), snapshot(in_process.path()));

            let native = TempDir::new().unwrap();
            if extract_native(&archive, native.path(), format).await.is_ok() {
                assert_eq!(snapshot(in_process.path()), snapshot(native.path()));
            }
        }
    }

    #[tokio::test]
    async fn test_compress_rejects_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.apk");
        fs::write(&file, b"apk").unwrap();
        let err = compress(&file, ArchiveFormat::TarGz, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn test_extract_corrupt_archive_names_path() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("broken.tar.gz");
        fs::write(&bogus, b"definitely not gzip").unwrap();

        let err = extract(&bogus, &dir.path().join("out")).await.unwrap_err();
        match err {
            ArchiveError::ExtractFailed { path, .. } => assert_eq!(path, bogus),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_extract_unknown_extension() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("build.rar");
        fs::write(&file, b"").unwrap();
        assert!(matches!(
            extract(&file, dir.path()).await,
            Err(ArchiveError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(ArchiveFormat::detect("Demo.app.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("Demo.app.TGZ"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("Demo.app.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect("app-release.apk"), None);
        assert_eq!("tar".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::TarGz);
    }

    #[test]
    fn test_find_app_returns_outermost_bundle() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Build/Demo.app/Contents/PlugIns/Ext.app")).unwrap();
        let found = find_app(dir.path(), "app").unwrap();
        assert_eq!(found, dir.path().join("Build/Demo.app"));

        assert!(matches!(
            find_app(dir.path(), "apk"),
            Err(ArchiveError::AppNotFound { .. })
        ));
    }

    #[cfg(unix)]
    fn write_zip(path: &Path, build: impl FnOnce(&mut ZipWriter<File>, SimpleFileOptions)) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        build(&mut zip, SimpleFileOptions::default());
        zip.finish().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_zip_entry_cannot_write_through_symlink() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let archive = dir.path().join("Demo.app.zip");
        let link_target = outside.path().to_string_lossy().to_string();
        write_zip(&archive, |zip, options| {
            zip.add_symlink("Demo.app/link", link_target, options).unwrap();
            zip.start_file("Demo.app/link/evil.txt", options).unwrap();
            zip.write_all(b"evil").unwrap();
        });

        let out = dir.path().join("out");
        let result = extract_in_process(&archive, &out, ArchiveFormat::Zip);

        assert!(matches!(result, Err(ArchiveError::ExtractFailed { .. })));
        assert!(!outside.path().join("evil.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_zip_symlink_cannot_nest_under_outside_symlink() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let archive = dir.path().join("Demo.app.zip");
        let link_target = outside.path().to_string_lossy().to_string();
        write_zip(&archive, |zip, options| {
            zip.add_symlink("Demo.app/link", link_target, options).unwrap();
            zip.add_symlink("Demo.app/link/planted", "/etc", options).unwrap();
        });

        let out = dir.path().join("out");
        let result = extract_in_process(&archive, &out, ArchiveFormat::Zip);

        assert!(matches!(result, Err(ArchiveError::ExtractFailed { .. })));
        assert!(fs::symlink_metadata(outside.path().join("planted")).is_err());
    }
}
