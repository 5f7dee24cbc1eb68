//! Isolated load contexts.
//!
//! A [`Sandbox`] owns named [`LoadContext`]s. Each context is an independent
//! type universe: its modules, and the lookups between them, never see a
//! module of another context, so two versions of the same assembly can be
//! introspected side by side. Contexts are released as a unit, either
//! explicitly through [`Sandbox::unload`] or when the sandbox is dropped.

mod filter;
mod resolver;

pub use filter::{FilterType, TypeFilter};
pub use resolver::{DependencyResolver, Resolution, ResolverConfig};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::metadata::signature::{decode_type_spec, TypeSig};
use crate::metadata::{Metadata, TypeDefOrRef};

/// Shared flag used to stop a run between module loads.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A module image decoded into a context.
#[derive(Debug)]
pub struct LoadedModule {
    path: PathBuf,
    metadata: Metadata,
    is_dependency: bool,
    types_by_name: HashMap<String, usize>,
}

impl LoadedModule {
    fn new(path: PathBuf, metadata: Metadata, is_dependency: bool) -> Self {
        let mut types_by_name = HashMap::with_capacity(metadata.type_defs.len());
        for index in 0..metadata.type_defs.len() {
            if let Some(name) = metadata.type_def_full_name(index) {
                types_by_name.entry(name).or_insert(index);
            }
        }
        Self {
            path,
            metadata,
            is_dependency,
            types_by_name,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Loaded to satisfy a reference rather than requested directly.
    pub fn is_dependency(&self) -> bool {
        self.is_dependency
    }

    pub fn assembly_name(&self) -> &str {
        self.metadata.assembly_name()
    }

    pub fn find_type(&self, full_name: &str) -> Option<usize> {
        self.types_by_name.get(full_name).copied()
    }
}

/// A TypeDef inside a context: module position and zero-based row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHandle {
    pub module: usize,
    pub index: usize,
}

/// Context-independent identity of a type: assembly name (case-insensitive)
/// plus full name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeIdentity {
    assembly: String,
    full_name: String,
}

impl TypeIdentity {
    pub fn new(assembly: &str, full_name: impl Into<String>) -> Self {
        Self {
            assembly: assembly.to_lowercase(),
            full_name: full_name.into(),
        }
    }

    pub fn assembly(&self) -> &str {
        &self.assembly
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

/// A type token after resolution against a context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedType {
    /// Defined by a module of the context.
    Def(TypeHandle),
    /// Defined outside the context (platform or unresolved assembly).
    External(TypeIdentity),
}

/// The base type of a TypeDef, with the rendered arguments of a generic base.
#[derive(Clone, Debug)]
pub struct BaseType {
    pub ty: ResolvedType,
    pub generic_args: Vec<Option<String>>,
}

/// One isolated set of modules.
#[derive(Debug)]
pub struct LoadContext {
    id: String,
    filter: Option<String>,
    modules: Vec<Arc<LoadedModule>>,
}

impl LoadContext {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            filter: None,
            modules: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Filter string given when modules were loaded.
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn modules(&self) -> &[Arc<LoadedModule>] {
        &self.modules
    }

    pub fn module(&self, index: usize) -> Option<&LoadedModule> {
        self.modules.get(index).map(Arc::as_ref)
    }

    /// Position of the module defining `assembly` (case-insensitive).
    pub fn module_by_assembly(&self, assembly: &str) -> Option<usize> {
        self.modules
            .iter()
            .position(|m| m.assembly_name().eq_ignore_ascii_case(assembly))
    }

    fn contains_path(&self, path: &Path) -> bool {
        self.modules.iter().any(|m| m.path == path)
    }

    fn is_shared(&self) -> bool {
        self.modules.iter().any(|m| Arc::strong_count(m) > 1)
    }

    /// Every type of every module, `<Module>` excluded.
    pub fn types(&self) -> impl Iterator<Item = TypeHandle> + '_ {
        self.modules.iter().enumerate().flat_map(|(module, loaded)| {
            (0..loaded.metadata.type_defs.len())
                .filter(move |index| !loaded.metadata.is_module_type(*index))
                .map(move |index| TypeHandle { module, index })
        })
    }

    pub fn full_name(&self, handle: TypeHandle) -> Option<String> {
        self.module(handle.module)?
            .metadata
            .type_def_full_name(handle.index)
    }

    /// Simple name of a TypeDef (the innermost name for nested types).
    pub fn short_name(&self, handle: TypeHandle) -> Option<&str> {
        self.module(handle.module)?
            .metadata
            .type_defs
            .get(handle.index)
            .map(|row| row.name.as_str())
    }

    pub fn identity(&self, handle: TypeHandle) -> Option<TypeIdentity> {
        let module = self.module(handle.module)?;
        Some(TypeIdentity::new(
            module.assembly_name(),
            module.metadata.type_def_full_name(handle.index)?,
        ))
    }

    pub fn identity_of(&self, ty: &ResolvedType) -> Option<TypeIdentity> {
        match ty {
            ResolvedType::Def(handle) => self.identity(*handle),
            ResolvedType::External(identity) => Some(identity.clone()),
        }
    }

    /// Resolve a token of module `module` against the whole context.
    /// Generic instantiations resolve to their generic definition.
    pub fn resolve(&self, module: usize, token: TypeDefOrRef) -> Option<ResolvedType> {
        let loaded = self.module(module)?;
        let metadata = &loaded.metadata;
        match token {
            TypeDefOrRef::TypeDef(index) => {
                (index < metadata.type_defs.len()).then_some(ResolvedType::Def(TypeHandle { module, index }))
            }
            TypeDefOrRef::TypeRef(index) => {
                let full_name = metadata.type_ref_full_name(index)?;
                let assembly = metadata.type_ref_assembly(index).unwrap_or_default();
                let owner = if assembly.eq_ignore_ascii_case(loaded.assembly_name()) {
                    Some(module)
                } else {
                    self.module_by_assembly(assembly)
                };
                let found = owner.and_then(|owner| {
                    let index = self.modules[owner].find_type(&full_name)?;
                    Some(TypeHandle {
                        module: owner,
                        index,
                    })
                });
                Some(match found {
                    Some(handle) => ResolvedType::Def(handle),
                    None => ResolvedType::External(TypeIdentity::new(assembly, full_name)),
                })
            }
            TypeDefOrRef::TypeSpec(index) => match decode_type_spec(metadata.type_specs.get(index)?)? {
                TypeSig::GenericInst { base, .. } => self.resolve(module, base),
                _ => None,
            },
        }
    }

    /// Base type of `handle`. `generic_args` are the arguments `handle`
    /// itself was instantiated with, used to render the base's arguments.
    pub fn base_type(&self, handle: TypeHandle, generic_args: &[Option<String>]) -> Option<BaseType> {
        let metadata = &self.module(handle.module)?.metadata;
        let extends = metadata.type_defs.get(handle.index)?.extends?;
        if let TypeDefOrRef::TypeSpec(index) = extends {
            if let TypeSig::GenericInst { base, args } = decode_type_spec(metadata.type_specs.get(index)?)? {
                let rendered = args
                    .iter()
                    .map(|arg| arg.render(metadata, generic_args))
                    .collect();
                return Some(BaseType {
                    ty: self.resolve(handle.module, base)?,
                    generic_args: rendered,
                });
            }
            return None;
        }
        Some(BaseType {
            ty: self.resolve(handle.module, extends)?,
            generic_args: Vec::new(),
        })
    }

    /// Interfaces declared directly on `handle`.
    pub fn interfaces(&self, handle: TypeHandle) -> Vec<ResolvedType> {
        let Some(module) = self.module(handle.module) else {
            return Vec::new();
        };
        module
            .metadata
            .type_defs
            .get(handle.index)
            .map(|row| {
                row.interfaces
                    .iter()
                    .filter_map(|token| self.resolve(handle.module, *token))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The module currently visited by [`Sandbox::run`].
pub struct ModuleView<'a> {
    context: &'a LoadContext,
    module: usize,
}

impl<'a> ModuleView<'a> {
    pub fn context(&self) -> &'a LoadContext {
        self.context
    }

    pub fn module(&self) -> &'a LoadedModule {
        &self.context.modules[self.module]
    }

    pub fn path(&self) -> &'a Path {
        self.module().path()
    }

    /// Types defined by this module, `<Module>` excluded.
    pub fn types(&self) -> impl Iterator<Item = TypeHandle> + 'a {
        let module = self.module;
        let metadata = &self.context.modules[module].metadata;
        (0..metadata.type_defs.len())
            .filter(move |index| !metadata.is_module_type(*index))
            .map(move |index| TypeHandle { module, index })
    }
}

/// Modules of a context handed to another session. While one exists the
/// context cannot be unloaded.
#[derive(Debug, Clone)]
pub struct SharedContext {
    id: String,
    modules: Vec<Arc<LoadedModule>>,
}

impl SharedContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn modules(&self) -> &[Arc<LoadedModule>] {
        &self.modules
    }
}

/// Outcome of visiting one requested module in [`Sandbox::run`].
#[derive(Debug)]
pub struct ModuleRun {
    pub path: PathBuf,
    pub result: Result<(), LoadError>,
}

/// Owner of a set of isolated load contexts.
#[derive(Debug)]
pub struct Sandbox {
    name: String,
    contexts: BTreeMap<String, LoadContext>,
    resolver: DependencyResolver,
}

impl Sandbox {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_resolver(name, DependencyResolver::default())
    }

    pub fn with_resolver(name: impl Into<String>, resolver: DependencyResolver) -> Self {
        Self {
            name: name.into(),
            contexts: BTreeMap::new(),
            resolver,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self, id: &str) -> Option<&LoadContext> {
        self.contexts.get(id)
    }

    /// Load one module into `context_id`, creating the context on first use.
    pub fn load(
        &mut self,
        path: &Path,
        context_id: &str,
        filter: Option<&str>,
    ) -> Result<(), LoadError> {
        if !path.is_file() {
            return Err(LoadError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let canonical = canonical_path(path);
        self.ensure_not_loaded(&canonical)?;
        let metadata = read_module(path)?;
        self.register(context_id, canonical, metadata, false, filter);
        Ok(())
    }

    /// Load several modules into `context_id`. Images are decoded in
    /// parallel and registered in input order; one result per path.
    pub fn load_all(
        &mut self,
        paths: &[PathBuf],
        context_id: &str,
        filter: Option<&str>,
        cancel: &CancellationToken,
    ) -> Vec<Result<(), LoadError>> {
        let decoded: Vec<Result<Metadata, LoadError>> = paths
            .par_iter()
            .map(|path| {
                if cancel.is_cancelled() {
                    return Err(LoadError::Cancelled { path: path.clone() });
                }
                read_module(path)
            })
            .collect();

        paths
            .iter()
            .zip(decoded)
            .map(|(path, decoded)| {
                if cancel.is_cancelled() {
                    return Err(LoadError::Cancelled { path: path.clone() });
                }
                let metadata = decoded?;
                let canonical = canonical_path(path);
                self.ensure_not_loaded(&canonical)?;
                self.register(context_id, canonical, metadata, false, filter);
                Ok(())
            })
            .collect()
    }

    /// Call `f` once per requested module of `context_id`, after resolving
    /// that module's assembly references. Modules whose references cannot
    /// be resolved are reported and skipped.
    pub fn run<F>(&mut self, context_id: &str, mut f: F) -> Vec<ModuleRun>
    where
        F: FnMut(&ModuleView<'_>, &TypeFilter<'_>),
    {
        let mut runs = Vec::new();
        let mut next = 0;
        loop {
            let Some(context) = self.contexts.get(context_id) else {
                break;
            };
            let Some(module) = context.modules.get(next) else {
                break;
            };
            let current = next;
            next += 1;
            if module.is_dependency {
                continue;
            }
            let path = module.path.clone();

            if let Err(err) = self.resolve_dependencies(context_id, current) {
                tracing::warn!("Skipping {}: {}", path.display(), err);
                runs.push(ModuleRun {
                    path,
                    result: Err(err),
                });
                continue;
            }

            let Some(context) = self.contexts.get(context_id) else {
                break;
            };
            let filter = TypeFilter::new(context, context.filter());
            let view = ModuleView {
                context,
                module: current,
            };
            f(&view, &filter);
            runs.push(ModuleRun { path, result: Ok(()) });
        }
        runs
    }

    /// Release a context and all of its modules. Returns `true` when the
    /// context no longer exists afterwards, `false` when it is still shared.
    pub fn unload(&mut self, context_id: &str) -> bool {
        let Some(context) = self.contexts.get(context_id) else {
            return true;
        };
        if context.is_shared() {
            tracing::warn!(
                "Context '{}' in sandbox '{}' is still shared; not unloading",
                context_id,
                self.name
            );
            return false;
        }
        if let Some(context) = self.contexts.remove(context_id) {
            tracing::debug!(
                "Unloaded context '{}' from sandbox '{}' ({} modules)",
                context_id,
                self.name,
                context.modules.len()
            );
        }
        true
    }

    /// Unload the context holding exactly this one module.
    pub fn unload_module(&mut self, path: &Path) -> bool {
        let canonical = canonical_path(path);
        let Some(context) = self.contexts.values().find(|c| c.contains_path(&canonical)) else {
            return true;
        };
        if context.modules.len() > 1 {
            tracing::warn!(
                "Context '{}' holds {} modules; unload the context instead",
                context.id,
                context.modules.len()
            );
            return false;
        }
        let id = context.id.clone();
        self.unload(&id)
    }

    /// Hand out the modules of a context to another session.
    pub fn share(&self, context_id: &str) -> Option<SharedContext> {
        self.contexts.get(context_id).map(|context| SharedContext {
            id: context.id.clone(),
            modules: context.modules.clone(),
        })
    }

    fn ensure_not_loaded(&self, canonical: &Path) -> Result<(), LoadError> {
        match self.contexts.values().find(|c| c.contains_path(canonical)) {
            Some(context) => Err(LoadError::AlreadyLoaded {
                path: canonical.to_path_buf(),
                context: context.id.clone(),
            }),
            None => Ok(()),
        }
    }

    fn register(
        &mut self,
        context_id: &str,
        path: PathBuf,
        metadata: Metadata,
        is_dependency: bool,
        filter: Option<&str>,
    ) {
        let context = self
            .contexts
            .entry(context_id.to_string())
            .or_insert_with(|| LoadContext::new(context_id));
        if let Some(filter) = filter {
            context.filter = Some(filter.to_string());
        }
        tracing::debug!(
            "Loaded {} into '{}'{}",
            path.display(),
            context_id,
            if is_dependency { " as dependency" } else { "" }
        );
        context
            .modules
            .push(Arc::new(LoadedModule::new(path, metadata, is_dependency)));
    }

    /// Resolve the references of module `index` and, transitively, of every
    /// module those references lead to. Any unresolved reference in the
    /// chain fails the requested module.
    fn resolve_dependencies(&mut self, context_id: &str, index: usize) -> Result<(), LoadError> {
        let Some(requested) = self.contexts.get(context_id).and_then(|c| c.modules.get(index)) else {
            return Ok(());
        };
        let requested_path = requested.path.clone();

        let mut pending = vec![index];
        let mut visited = HashSet::new();
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(module) = self.contexts.get(context_id).and_then(|c| c.modules.get(current)) else {
                continue;
            };
            let module_path = module.path.clone();
            let references: Vec<String> = module
                .metadata
                .assembly_refs
                .iter()
                .map(|r| r.name.clone())
                .collect();

            for dependency in references {
                let present = self
                    .contexts
                    .get(context_id)
                    .and_then(|c| c.module_by_assembly(&dependency));
                if let Some(present) = present {
                    pending.push(present);
                    continue;
                }

                let not_found = || LoadError::DependencyNotFound {
                    module: requested_path.clone(),
                    dependency: dependency.clone(),
                };
                let resolution = self.resolver.probe(&module_path, &dependency).ok_or_else(not_found)?;
                let Some(file) = resolution.path() else {
                    continue;
                };
                match read_module(file) {
                    Ok(metadata) => {
                        let file = canonical_path(file);
                        self.register(context_id, file, metadata, true, None);
                        if let Some(context) = self.contexts.get(context_id) {
                            pending.push(context.modules.len() - 1);
                        }
                    }
                    Err(err) => {
                        tracing::warn!("Dependency {} is unreadable: {}", dependency, err);
                        return Err(not_found());
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        for (id, context) in std::mem::take(&mut self.contexts) {
            tracing::debug!(
                "Releasing context '{}' of sandbox '{}' ({} modules)",
                id,
                self.name,
                context.modules.len()
            );
        }
    }
}

fn canonical_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn read_module(path: &Path) -> Result<Metadata, LoadError> {
    if !path.is_file() {
        return Err(LoadError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Metadata::parse(&bytes).map_err(|source| LoadError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}
