//! Dependency resolution.
//!
//! Turns a dependency origin into the canonical local directory of the
//! project it names:
//!
//! - **path**: joined onto the requesting project's directory
//! - **repository**: cloned into the requester's library cache (`build/.deps`)
//! - **archive**: downloaded into the library cache and extracted next to it
//! - **package**: a synthetic directory in the library cache, backed by a
//!   generated descriptor that forwards the package to the backend's lookup

mod archive;
mod fetch;

pub use archive::{
    ArchiveFetcher, ExtractionReport, HttpDownloader, archive_file_name, extract_archive,
    verify_sha256,
};
pub use fetch::{GitFetcher, SourceFetcher, repository_name};

use crate::descriptor::Descriptor;
use crate::error::{BuildError, IoContext, Result, Warning};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Path(PathBuf),
    Repository {
        url: String,
        branch: Option<String>,
        commit: Option<String>,
    },
    Archive {
        url: String,
        subpath: Option<PathBuf>,
        file_name: Option<String>,
        sha256: Option<String>,
    },
    Package {
        name: String,
        search_path: Option<PathBuf>,
    },
}

impl Origin {
    pub fn kind(&self) -> &'static str {
        match self {
            Origin::Path(_) => "path",
            Origin::Repository { .. } => "repository",
            Origin::Archive { .. } => "archive",
            Origin::Package { .. } => "package",
        }
    }
}

/// The project asking for a dependency.
#[derive(Debug, Clone, Copy)]
pub struct Requester<'a> {
    pub directory: &'a Path,
    pub libs_dir: &'a Path,
}

/// Outcome of resolving an origin.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Canonical directory; the dedup key for contexts.
    pub directory: PathBuf,
    /// Descriptor to use instead of loading one from `directory`.
    pub synthetic: Option<Descriptor>,
}

/// External fetch collaborators.
pub struct Fetchers {
    pub source: Box<dyn SourceFetcher>,
    pub archive: Box<dyn ArchiveFetcher>,
}

impl Default for Fetchers {
    fn default() -> Self {
        Self {
            source: Box::new(GitFetcher),
            archive: Box::new(HttpDownloader),
        }
    }
}

pub struct Resolver<'a> {
    pub fetchers: &'a Fetchers,
    pub update_dependencies: bool,
}

impl Resolver<'_> {
    /// Resolve `origin` on behalf of `requester` (`None` for the root project).
    /// `target` names the target selected in the resolved project and is only
    /// used to name the synthetic target of a package origin.
    pub fn resolve(
        &self,
        origin: &Origin,
        requester: Option<Requester<'_>>,
        target: Option<&str>,
        warnings: &mut Vec<Warning>,
    ) -> Result<Resolved> {
        let Some(requester) = requester else {
            return match origin {
                Origin::Path(path) => Ok(Resolved {
                    directory: canonical(path)?,
                    synthetic: None,
                }),
                other => Err(BuildError::OriginConflict {
                    origin: other.kind(),
                }),
            };
        };

        match origin {
            Origin::Path(path) => Ok(Resolved {
                directory: canonical(&requester.directory.join(path))?,
                synthetic: None,
            }),
            Origin::Repository {
                url,
                branch,
                commit,
            } => self.resolve_repository(url, branch.as_deref(), commit.as_deref(), requester),
            Origin::Archive {
                url,
                subpath,
                file_name,
                sha256,
            } => self.resolve_archive(
                url,
                subpath.as_deref(),
                file_name.as_deref(),
                sha256.as_deref(),
                requester,
                warnings,
            ),
            Origin::Package { name, search_path } => {
                let directory = requester.libs_dir.join(format!("__package_{}", name));
                fs::create_dir_all(&directory).with_path(&directory)?;
                let search_path = search_path.as_ref().map(|p| requester.directory.join(p));
                Ok(Resolved {
                    directory: canonical(&directory)?,
                    synthetic: Some(Descriptor::for_package(
                        target.unwrap_or(name.as_str()),
                        name,
                        search_path.as_deref(),
                    )),
                })
            }
        }
    }

    fn resolve_repository(
        &self,
        url: &str,
        branch: Option<&str>,
        commit: Option<&str>,
        requester: Requester<'_>,
    ) -> Result<Resolved> {
        let destination = requester.libs_dir.join(repository_name(url));

        if destination.exists() {
            if !destination.is_dir() {
                return Err(BuildError::fetch(
                    url,
                    format!("{} exists but is not a directory", destination.display()),
                ));
            }
            if self.update_dependencies {
                self.fetchers.source.status(&destination)?;
                self.fetchers.source.pull(&destination)?;
            } else {
                println!("   {} Using cached: {}", "⚡".green(), repository_name(url));
            }
        } else {
            fs::create_dir_all(requester.libs_dir).with_path(requester.libs_dir)?;
            self.fetchers
                .source
                .clone_repo(url, branch, commit, &destination)?;
        }

        Ok(Resolved {
            directory: canonical(&destination)?,
            synthetic: None,
        })
    }

    fn resolve_archive(
        &self,
        url: &str,
        subpath: Option<&Path>,
        file_name: Option<&str>,
        sha256: Option<&str>,
        requester: Requester<'_>,
        warnings: &mut Vec<Warning>,
    ) -> Result<Resolved> {
        let file_name = file_name
            .map(str::to_string)
            .unwrap_or_else(|| archive_file_name(url));
        let archive_path = requester.libs_dir.join(&file_name);
        let extracted = requester.libs_dir.join(format!("{}_extracted", file_name));

        if !archive_path.is_file() {
            fs::create_dir_all(requester.libs_dir).with_path(requester.libs_dir)?;
            self.fetchers.archive.download(url, &archive_path)?;
        }

        if sha256.is_some() {
            verify_sha256(&archive_path, sha256).map_err(|e| {
                let _ = fs::remove_file(&archive_path);
                e
            })?;
        }

        if !extracted.is_dir() {
            // Only a complete extraction is moved into place.
            let staging = requester
                .libs_dir
                .join(format!("{}_extracted.partial", file_name));
            if staging.exists() {
                fs::remove_dir_all(&staging).with_path(&staging)?;
            }
            let report = extract_archive(&archive_path, &staging).map_err(|e| {
                let _ = fs::remove_dir_all(&staging);
                e
            })?;
            fs::rename(&staging, &extracted).with_path(&extracted)?;
            for (entry, reason) in report.blocked {
                let warning = Warning::ExtractionBlocked {
                    archive: archive_path.clone(),
                    entry,
                    reason,
                };
                warning.print();
                warnings.push(warning);
            }
        }

        let directory = match subpath {
            Some(sub) => extracted.join(sub),
            None => extracted,
        };
        Ok(Resolved {
            directory: canonical(&directory)?,
            synthetic: None,
        })
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|e| {
        BuildError::io(path, std::io::Error::new(e.kind(), "dependency directory not found"))
    })
}
