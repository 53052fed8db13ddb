//! The build graph: an arena of contexts and targets addressed by index.
//!
//! Contexts are deduplicated by canonical directory ([`ContextCache`]) and
//! project names are tracked in a [`GlobalRegistry`]. Both live on the graph
//! and are only touched through `&mut BuildGraph`.

mod context;
mod registry;

pub use context::{Context, OUTPUT_DIR};
pub use registry::{ContextCache, GlobalRegistry, Registration};

use crate::config::Settings;
use crate::descriptor::{self, Descriptor};
use crate::error::{BuildError, Result, Warning};
use crate::target::Target;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub usize);

#[derive(Debug, Default)]
pub struct BuildGraph {
    contexts: Vec<Context>,
    targets: Vec<Target>,
    cache: ContextCache,
    registry: GlobalRegistry,
    pub warnings: Vec<Warning>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self, id: ContextId) -> &Context {
        &self.contexts[id.0]
    }

    pub fn target(&self, id: TargetId) -> &Target {
        &self.targets[id.0]
    }

    pub fn target_mut(&mut self, id: TargetId) -> &mut Target {
        &mut self.targets[id.0]
    }

    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn registry(&self) -> &GlobalRegistry {
        &self.registry
    }

    /// The context of a target.
    pub fn owner(&self, id: TargetId) -> &Context {
        self.context(self.target(id).context)
    }

    /// `project:target`, used in logs and cycle reports.
    pub fn label(&self, id: TargetId) -> String {
        format!("{}:{}", self.owner(id).project_name, self.target(id).name)
    }

    /// Context for a canonical directory, created on first use.
    ///
    /// `hint` replaces the on-disk descriptor (synthetic package projects).
    pub fn get_or_create_context(
        &mut self,
        directory: PathBuf,
        hint: Option<Descriptor>,
        parent: Option<ContextId>,
        settings: &Settings,
    ) -> Result<ContextId> {
        if let Some(existing) = self.cache.get(&directory) {
            return Ok(existing);
        }

        let synthetic = hint.is_some();
        let (descriptor, descriptor_path) = match hint {
            Some(descriptor) => (descriptor, None),
            None => {
                let loaded = descriptor::load(&directory, settings)?;
                (loaded.descriptor, loaded.path)
            }
        };
        let project_name = descriptor.project_name(&directory);
        let id = ContextId(self.contexts.len());

        // Synthetic package projects share the lookup, not an identity.
        if !synthetic {
            match self.registry.register(&project_name, &directory) {
                Registration::New | Registration::SameDirectory => {}
                Registration::Conflict { kept } => {
                    let warning = Warning::NameConflict {
                        name: project_name.clone(),
                        kept,
                        ignored: directory.clone(),
                    };
                    warning.print();
                    self.warnings.push(warning);
                }
            }
        }

        let descriptor_file = descriptor_path
            .clone()
            .unwrap_or_else(|| directory.join(descriptor::DESCRIPTOR_FILES[0]));
        let mut targets = Vec::with_capacity(descriptor.targets.len());
        for spec in &descriptor.targets {
            let resolved = spec.for_platform(std::env::consts::OS);
            let target_id = TargetId(self.targets.len() + targets.len());
            targets.push(Target::from_spec(
                target_id,
                id,
                &resolved,
                &directory,
                &descriptor,
                &descriptor_file,
                settings,
            )?);
        }

        let depth = parent.map_or(0, |p| self.context(p).depth + 1);
        let target_ids = targets.iter().map(|t| t.id).collect();
        self.targets.extend(targets);
        self.contexts.push(Context {
            id,
            directory: directory.clone(),
            parent,
            depth,
            project_name,
            descriptor,
            descriptor_path,
            targets: target_ids,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.contexts[parent.0].children.push(id);
        }
        self.cache.get_or_insert(directory, id);
        Ok(id)
    }

    /// Select a target inside a context. Without a name, the context must
    /// have exactly one target.
    pub fn find_target(&self, context: ContextId, name: Option<&str>) -> Result<TargetId> {
        let ctx = self.context(context);
        match name {
            Some(name) => ctx
                .targets
                .iter()
                .copied()
                .find(|t| self.target(*t).name == name)
                .ok_or_else(|| {
                    BuildError::config(
                        ctx.descriptor_hint(),
                        format!(
                            "project '{}' has no target named '{}'",
                            ctx.project_name, name
                        ),
                    )
                }),
            None => match ctx.targets.as_slice() {
                [only] => Ok(*only),
                [] => Err(BuildError::config(
                    ctx.descriptor_hint(),
                    format!("project '{}' declares no targets", ctx.project_name),
                )),
                _ => Err(BuildError::config(
                    ctx.descriptor_hint(),
                    format!(
                        "project '{}' has several targets; the dependency must name one",
                        ctx.project_name
                    ),
                )),
            },
        }
    }

    /// The descriptor governing a context: its own, or the nearest ancestor's.
    pub fn descriptor_path_for(&self, context: ContextId) -> Option<&Path> {
        let mut current = Some(context);
        while let Some(id) = current {
            let ctx = self.context(id);
            if let Some(path) = &ctx.descriptor_path {
                return Some(path);
            }
            current = ctx.parent;
        }
        None
    }
}
