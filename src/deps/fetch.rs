//! Git-backed source fetching.
//!
//! Branch and commit pins are applied when a repository is first cloned.
//! Later updates fast-forward whatever branch is checked out; a detached,
//! commit-pinned checkout is left where it is.

use crate::error::{BuildError, Result};
use colored::*;
use git2::Repository;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

pub trait SourceFetcher {
    fn clone_repo(
        &self,
        url: &str,
        branch: Option<&str>,
        commit: Option<&str>,
        destination: &Path,
    ) -> Result<()>;

    fn status(&self, path: &Path) -> Result<()>;

    fn pull(&self, path: &Path) -> Result<()>;
}

/// Directory name for a repository URL: the last path segment without `.git`.
pub fn repository_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

pub struct GitFetcher;

impl SourceFetcher for GitFetcher {
    fn clone_repo(
        &self,
        url: &str,
        branch: Option<&str>,
        commit: Option<&str>,
        destination: &Path,
    ) -> Result<()> {
        let name = repository_name(url);
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.blue} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Cloning {}...", name));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        let mut builder = git2::build::RepoBuilder::new();
        if let Some(branch) = branch {
            builder.branch(branch);
        }

        let repo = match builder.clone(url, destination) {
            Ok(repo) => {
                pb.finish_with_message(format!("{} Cloned {}", "✓".green(), name));
                repo
            }
            Err(e) => {
                pb.finish_with_message(format!("{} Failed {}", "x".red(), name));
                return Err(BuildError::fetch(url, e));
            }
        };

        if let Some(commit) = commit {
            checkout_commit(&repo, commit).map_err(|e| BuildError::fetch(url, e))?;
            println!("   {} Pinned {} to {}", "📌".blue(), name, short_hash(commit));
        }
        Ok(())
    }

    fn status(&self, path: &Path) -> Result<()> {
        let locator = path.display().to_string();
        let repo = Repository::open(path).map_err(|e| BuildError::fetch(&locator, e))?;
        let mut options = git2::StatusOptions::new();
        options.include_untracked(false);
        let statuses = repo
            .statuses(Some(&mut options))
            .map_err(|e| BuildError::fetch(&locator, e))?;
        if !statuses.is_empty() {
            println!(
                "{} Warning: {} has {} local modification(s)",
                "!".yellow(),
                locator,
                statuses.len()
            );
        }
        Ok(())
    }

    fn pull(&self, path: &Path) -> Result<()> {
        let locator = path.display().to_string();
        fast_forward(path).map_err(|e| BuildError::fetch(&locator, e))
    }
}

fn checkout_commit(repo: &Repository, commit: &str) -> std::result::Result<(), git2::Error> {
    let object = repo.revparse_single(commit)?;
    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.force();
    repo.checkout_tree(&object, Some(&mut checkout))?;
    repo.set_head_detached(object.id())
}

fn fast_forward(path: &Path) -> std::result::Result<(), git2::Error> {
    let repo = Repository::open(path)?;
    let head = repo.head()?;
    if !head.is_branch() {
        println!(
            "   {} {} is pinned, not updating",
            "📌".blue(),
            path.display()
        );
        return Ok(());
    }
    let Some(refname) = head.name().map(str::to_string) else {
        return Ok(());
    };
    let branch = head.shorthand().unwrap_or("HEAD").to_string();

    let mut remote = repo.find_remote("origin")?;
    remote.fetch(&[branch.as_str()], None, None)?;

    let fetch_head = repo.find_reference("FETCH_HEAD")?;
    let incoming = repo.reference_to_annotated_commit(&fetch_head)?;
    let (analysis, _) = repo.merge_analysis(&[&incoming])?;

    if analysis.is_up_to_date() {
        println!("   {} {} is up to date", "✓".green(), branch);
        return Ok(());
    }
    if !analysis.is_fast_forward() {
        return Err(git2::Error::from_str(&format!(
            "branch '{}' has diverged from origin and cannot be fast-forwarded",
            branch
        )));
    }

    let mut reference = repo.find_reference(&refname)?;
    reference.set_target(incoming.id(), "nest: fast-forward")?;
    repo.set_head(&refname)?;
    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.force();
    repo.checkout_head(Some(&mut checkout))?;
    println!("   {} Updated {}", "✓".green(), branch);
    Ok(())
}

fn short_hash(rev: &str) -> &str {
    rev.get(..7).unwrap_or(rev)
}
