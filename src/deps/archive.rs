//! Archive download and traversal-safe extraction.
//!
//! Every entry must land inside the extraction root. Entries with absolute
//! paths, `..` escapes, or symlink/hardlink targets resolving outside the
//! root are skipped and listed in the [`ExtractionReport`]. Paths are
//! resolved against the tree already on disk, so links written by earlier
//! entries are followed before anything is checked.

use crate::error::{BuildError, IoContext, Result};
use colored::*;
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub trait ArchiveFetcher {
    fn download(&self, url: &str, destination: &Path) -> Result<()>;
}

pub struct HttpDownloader;

impl ArchiveFetcher for HttpDownloader {
    fn download(&self, url: &str, destination: &Path) -> Result<()> {
        println!("   {} Downloading {}", "⬇".blue(), url);
        let response = ureq::get(url)
            .call()
            .map_err(|e| BuildError::fetch(url, e))?;

        let total_size = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let pb = ProgressBar::new(total_size);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.blue} [{bar:40.green/black}] {bytes}/{total_bytes} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("━━╸"),
        );

        // Write to a sibling file first so an interrupted download is never
        // mistaken for a cached archive.
        let partial = destination.with_extension("partial");
        let mut file = File::create(&partial).with_path(&partial)?;
        let mut reader = response.into_body().into_reader();
        let mut buffer = [0u8; 8192];
        loop {
            let n = reader
                .read(&mut buffer)
                .map_err(|e| BuildError::fetch(url, e))?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n]).with_path(&partial)?;
            pb.inc(n as u64);
        }
        drop(file);
        fs::rename(&partial, destination).with_path(destination)?;

        pb.finish_and_clear();
        println!("   {} Downloaded {}", "✓".green(), destination.display());
        Ok(())
    }
}

/// File name an archive URL is cached under: the last path segment, without
/// query string or fragment.
pub fn archive_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("archive")
        .to_string()
}

/// Verify a file's SHA256 hash against an expected value.
/// Returns Ok(true) when it matches or nothing is expected.
pub fn verify_sha256(path: &Path, expected: Option<&str>) -> Result<bool> {
    let Some(expected) = expected else {
        return Ok(true);
    };

    let mut file = File::open(path).with_path(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer).with_path(path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    let actual = format!("{:x}", hasher.finalize());

    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        Err(BuildError::fetch(
            path.display().to_string(),
            format!("SHA256 mismatch: expected {}, got {}", expected, actual),
        ))
    }
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub extracted: usize,
    /// `(entry, reason)` for every skipped entry.
    pub blocked: Vec<(String, String)>,
}

impl ExtractionReport {
    fn block(&mut self, entry: impl Into<String>, reason: impl Into<String>) {
        self.blocked.push((entry.into(), reason.into()));
    }
}

enum ArchiveFormat {
    Tar,
    TarGz,
    Zip,
}

fn detect_format(path: &Path) -> Option<ArchiveFormat> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveFormat::TarGz)
    } else if name.ends_with(".tar") {
        Some(ArchiveFormat::Tar)
    } else if name.ends_with(".zip") {
        Some(ArchiveFormat::Zip)
    } else {
        None
    }
}

pub fn extract_archive(archive: &Path, root: &Path) -> Result<ExtractionReport> {
    let format = detect_format(archive).ok_or_else(|| {
        BuildError::fetch(archive.display().to_string(), "unsupported archive format")
    })?;
    fs::create_dir_all(root).with_path(root)?;
    let root = fs::canonicalize(root).with_path(root)?;

    let file = File::open(archive).with_path(archive)?;
    let mut report = match format {
        ArchiveFormat::Tar => extract_tar(tar::Archive::new(BufReader::new(file)), archive, &root),
        ArchiveFormat::TarGz => extract_tar(
            tar::Archive::new(GzDecoder::new(BufReader::new(file))),
            archive,
            &root,
        ),
        ArchiveFormat::Zip => extract_zip(file, archive, &root),
    }?;
    remove_escaping_links(&root, &mut report)?;
    Ok(report)
}

/// Lexically resolve `candidate` against `base` (both relative to the
/// extraction root). `None` when the result would leave the root.
fn resolve_inside(base: &Path, candidate: &Path) -> Option<PathBuf> {
    let mut resolved = base.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

/// Walk `relative` from `start` through the tree on disk, following any
/// symlink met on the way. `None` as soon as a step leaves `root`.
///
/// `root` must be canonical and `start` a real directory under it.
fn confine(root: &Path, start: &Path, relative: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                current.push(part);
                let is_link = fs::symlink_metadata(&current)
                    .is_ok_and(|meta| meta.file_type().is_symlink());
                if is_link {
                    current = fs::canonicalize(&current).ok()?;
                }
            }
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
        if !current.starts_with(root) {
            return None;
        }
    }
    Some(current)
}

/// Real directory an entry at `relative` would be written into.
fn entry_parent(root: &Path, relative: &Path) -> Option<PathBuf> {
    confine(root, root, relative.parent().unwrap_or(Path::new("")))
}

/// Symlinks resolve from the entry's real directory, hardlinks from the root.
fn link_stays_inside(root: &Path, parent: &Path, target: &Path, symbolic: bool) -> bool {
    let base = if symbolic { parent } else { root };
    confine(root, base, target).is_some()
}

/// A link accepted early can be redirected by later entries. Once the whole
/// tree is on disk, drop every link that no longer resolves under `root`.
fn remove_escaping_links(root: &Path, report: &mut ExtractionReport) -> Result<()> {
    let links: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path_is_symlink())
        .map(|e| e.into_path())
        .collect();

    for link in links {
        let parent = link.parent().unwrap_or(root);
        let inside = fs::read_link(&link)
            .is_ok_and(|target| link_stays_inside(root, parent, &target, true));
        if inside {
            continue;
        }
        fs::remove_file(&link).with_path(&link)?;
        report.extracted = report.extracted.saturating_sub(1);
        let entry = link.strip_prefix(root).unwrap_or(&link);
        report.block(
            entry.display().to_string(),
            "link target escapes the extraction root",
        );
    }
    Ok(())
}

fn extract_tar<R: Read>(
    mut archive: tar::Archive<R>,
    archive_path: &Path,
    root: &Path,
) -> Result<ExtractionReport> {
    let mut report = ExtractionReport::default();
    let entries = archive
        .entries()
        .map_err(|e| BuildError::fetch(archive_path.display().to_string(), e))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| BuildError::fetch(archive_path.display().to_string(), e))?;
        let raw = match entry.path() {
            Ok(p) => p.into_owned(),
            Err(e) => {
                report.block("<unreadable>", e.to_string());
                continue;
            }
        };
        let display = raw.display().to_string();

        let Some(relative) = resolve_inside(Path::new(""), &raw) else {
            report.block(display, "path escapes the extraction root");
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let Some(parent) = entry_parent(root, &relative) else {
            report.block(display, "parent directory escapes the extraction root");
            continue;
        };

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            let target = entry.link_name().ok().flatten().map(|l| l.into_owned());
            let inside = target
                .as_deref()
                .is_some_and(|t| link_stays_inside(root, &parent, t, kind.is_symlink()));
            if !inside {
                report.block(display, "link target escapes the extraction root");
                continue;
            }
        }

        match entry.unpack_in(root) {
            Ok(true) => report.extracted += 1,
            Ok(false) => report.block(display, "rejected by extractor"),
            Err(e) => report.block(display, e.to_string()),
        }
    }
    Ok(report)
}

fn extract_zip(file: File, archive_path: &Path, root: &Path) -> Result<ExtractionReport> {
    let mut report = ExtractionReport::default();
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| BuildError::fetch(archive_path.display().to_string(), e))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| BuildError::fetch(archive_path.display().to_string(), e))?;
        let display = entry.name().to_string();

        let Some(relative) = entry
            .enclosed_name()
            .and_then(|p| resolve_inside(Path::new(""), &p))
        else {
            report.block(display, "path escapes the extraction root");
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let (Some(parent), Some(name)) = (entry_parent(root, &relative), relative.file_name())
        else {
            report.block(display, "parent directory escapes the extraction root");
            continue;
        };
        let destination = parent.join(name);
        if fs::symlink_metadata(&destination).is_ok_and(|meta| meta.file_type().is_symlink()) {
            report.block(display, "refusing to write through an existing link");
            continue;
        }

        let is_symlink = entry
            .unix_mode()
            .is_some_and(|mode| mode & 0o170000 == 0o120000);
        if is_symlink {
            let mut target = String::new();
            if entry.read_to_string(&mut target).is_err()
                || !link_stays_inside(root, &parent, Path::new(&target), true)
            {
                report.block(display, "link target escapes the extraction root");
                continue;
            }
            #[cfg(unix)]
            {
                fs::create_dir_all(&parent).with_path(&parent)?;
                match std::os::unix::fs::symlink(&target, &destination) {
                    Ok(()) => report.extracted += 1,
                    Err(e) => report.block(display, e.to_string()),
                }
            }
            #[cfg(not(unix))]
            report.block(display, "symlinks are not supported on this platform");
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&destination).with_path(&destination)?;
            continue;
        }
        fs::create_dir_all(&parent).with_path(&parent)?;
        let mut out = File::create(&destination).with_path(&destination)?;
        std::io::copy(&mut entry, &mut out).with_path(&destination)?;
        report.extracted += 1;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&destination, fs::Permissions::from_mode(mode & 0o777))
                    .with_path(&destination)?;
            }
        }
    }
    Ok(report)
}
