//! External command steps.
//!
//! Steps run strictly one after another. Stdout is discarded, stderr is
//! captured and attached to the error when a command exits non-zero.

use crate::descriptor::StepSpec;
use crate::error::{BuildError, IoContext, Result};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub command: String,
    pub params: Vec<String>,
    /// Absolute working directory.
    pub directory: PathBuf,
}

impl BuildStep {
    pub fn new(command: impl Into<String>, params: Vec<String>, directory: PathBuf) -> Self {
        Self {
            command: command.into(),
            params,
            directory,
        }
    }

    /// `command param1 param2 ...`
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.params.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The program to spawn. A relative command with a separator
    /// (`./configure`, `tools/gen`) is taken relative to the working directory.
    fn program(&self) -> PathBuf {
        let command = Path::new(&self.command);
        if command.is_relative() && self.command.contains('/') {
            self.directory.join(command)
        } else {
            command.to_path_buf()
        }
    }
}

/// Runs nested steps only when a dependency is newer than the oldest target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalStep {
    pub dependencies: Vec<PathBuf>,
    pub targets: Vec<PathBuf>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Command(BuildStep),
    Conditional(ConditionalStep),
}

impl Step {
    /// Build a step from its descriptor entry, resolving directories and
    /// conditional paths against `base`.
    pub fn from_spec(spec: &StepSpec, base: &Path, descriptor: &Path) -> Result<Step> {
        if spec.command.is_none() && !spec.steps.is_empty() {
            let steps = spec
                .steps
                .iter()
                .map(|s| Step::from_spec(s, base, descriptor))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Step::Conditional(ConditionalStep {
                dependencies: spec.dependencies.iter().map(|p| base.join(p)).collect(),
                targets: spec.targets.iter().map(|p| base.join(p)).collect(),
                steps,
            }));
        }

        let Some(command) = &spec.command else {
            return Err(BuildError::config(
                descriptor,
                "a build step requires a 'command' attribute",
            ));
        };
        let directory = match &spec.directory {
            Some(dir) => base.join(dir),
            None => base.to_path_buf(),
        };
        Ok(Step::Command(BuildStep::new(
            command.clone(),
            spec.params.clone(),
            directory,
        )))
    }

    pub fn from_specs(specs: &[StepSpec], base: &Path, descriptor: &Path) -> Result<Vec<Step>> {
        specs
            .iter()
            .map(|s| Step::from_spec(s, base, descriptor))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StepRunner {
    pub verbose: bool,
}

impl StepRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn run_all(&self, steps: &[Step]) -> Result<()> {
        for step in steps {
            self.run(step)?;
        }
        Ok(())
    }

    pub fn run(&self, step: &Step) -> Result<()> {
        match step {
            Step::Command(command) => self.run_command(command).map(|_| ()),
            Step::Conditional(conditional) => {
                if needs_update(&conditional.dependencies, &conditional.targets) {
                    self.run_all(&conditional.steps)
                } else {
                    if self.verbose {
                        println!("   {} Up to date, skipping conditional step", "⚡".green());
                    }
                    Ok(())
                }
            }
        }
    }

    /// Run one command and return its captured stdout. Used by backends that
    /// read values back from the tool they drive.
    pub fn capture(&self, step: &BuildStep) -> Result<String> {
        self.execute(step, true)
    }

    fn run_command(&self, step: &BuildStep) -> Result<String> {
        self.execute(step, false)
    }

    fn execute(&self, step: &BuildStep, keep_stdout: bool) -> Result<String> {
        if self.verbose {
            println!(
                "   {} {} {}",
                "$".dimmed(),
                step.command_line(),
                format!("({})", step.directory.display()).dimmed()
            );
        }

        let output = Command::new(step.program())
            .args(&step.params)
            .current_dir(&step.directory)
            .stdin(Stdio::null())
            .stdout(if keep_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| BuildError::CommandFailed {
                command: step.command_line(),
                directory: step.directory.clone(),
                status: "failed to start".to_string(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(BuildError::CommandFailed {
                command: step.command_line(),
                directory: step.directory.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// True when a dependency is newer than the oldest target, or a target is
/// missing.
pub fn needs_update(dependencies: &[PathBuf], targets: &[PathBuf]) -> bool {
    let mut oldest_target: Option<SystemTime> = None;
    for target in targets {
        let Some(mtime) = modified(target) else {
            return true;
        };
        oldest_target = Some(oldest_target.map_or(mtime, |t| t.min(mtime)));
    }
    let Some(oldest_target) = oldest_target else {
        return true;
    };

    dependencies
        .iter()
        .filter_map(|d| modified(d))
        .max()
        .is_some_and(|newest| newest > oldest_target)
}

pub(crate) fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Create `path` if missing and set its modification time to now.
pub fn touch(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_path(path)?;
    filetime::set_file_mtime(path, filetime::FileTime::now()).with_path(path)
}
