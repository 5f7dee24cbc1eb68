//! Type filter: name matching plus an is-a check against a context.
//!
//! Is-a queries run against a supertype graph holding one node per type
//! identity and an edge from each type to its base type and to every
//! interface it declares. External types are leaf nodes.

use std::collections::HashMap;

use once_cell::unsync::OnceCell;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};

use super::{LoadContext, TypeHandle, TypeIdentity};

/// The filter string resolved to a type of the context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterType {
    pub handle: TypeHandle,
    pub short_name: String,
    pub identity: TypeIdentity,
}

/// Decides which types of a context are extracted.
pub struct TypeFilter<'a> {
    context: &'a LoadContext,
    raw: Option<String>,
    resolved: Option<FilterType>,
    needle: Option<String>,
    supertypes: OnceCell<SupertypeIndex>,
}

impl<'a> TypeFilter<'a> {
    pub fn new(context: &'a LoadContext, raw: Option<&str>) -> Self {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        let resolved = raw.as_deref().and_then(|raw| Self::resolve(context, raw));
        let needle = match (&resolved, &raw) {
            (Some(filter), _) => Some(filter.short_name.to_lowercase()),
            (None, Some(raw)) => Some(raw.to_lowercase()),
            (None, None) => None,
        };
        if let (Some(raw), None) = (&raw, &resolved) {
            tracing::debug!(
                "Filter '{}' does not name a type in '{}'; matching by name only",
                raw,
                context.id()
            );
        }
        Self {
            context,
            raw,
            resolved,
            needle,
            supertypes: OnceCell::new(),
        }
    }

    /// Resolve by exact full name, else by a unique case-insensitive short
    /// name.
    pub fn resolve(context: &LoadContext, raw: &str) -> Option<FilterType> {
        let exact = context
            .types()
            .find(|handle| context.full_name(*handle).as_deref() == Some(raw));
        let handle = match exact {
            Some(handle) => handle,
            None => {
                let mut matches = context.types().filter(|handle| {
                    context
                        .short_name(*handle)
                        .is_some_and(|name| name.eq_ignore_ascii_case(raw))
                });
                let first = matches.next()?;
                if matches.next().is_some() {
                    tracing::debug!("Filter '{}' is ambiguous in '{}'", raw, context.id());
                    return None;
                }
                first
            }
        };
        Some(FilterType {
            handle,
            short_name: context.short_name(handle)?.to_string(),
            identity: context.identity(handle)?,
        })
    }

    /// The resolved filter type, if the filter named one.
    pub fn filter_type(&self) -> Option<&FilterType> {
        self.resolved.as_ref()
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    pub fn includes(&self, handle: TypeHandle) -> bool {
        let Some(needle) = &self.needle else {
            return true;
        };
        let short = self.context.short_name(handle).unwrap_or_default();
        if short.to_lowercase().contains(needle.as_str()) {
            return true;
        }
        if let Some(full) = self.context.full_name(handle) {
            if full.to_lowercase().contains(needle.as_str()) {
                return true;
            }
        }
        match &self.resolved {
            Some(filter) => self.is_a(handle, &filter.identity),
            None => false,
        }
    }

    /// `handle` is `target`, derives from it, or implements it, directly or
    /// through base types and base interfaces.
    pub fn is_a(&self, handle: TypeHandle, target: &TypeIdentity) -> bool {
        let Some(identity) = self.context.identity(handle) else {
            return false;
        };
        &identity == target
            || self
                .supertypes
                .get_or_init(|| SupertypeIndex::build(self.context))
                .reaches(&identity, target)
    }
}

/// Base-type and interface edges of every type in a context.
struct SupertypeIndex {
    graph: DiGraph<TypeIdentity, ()>,
    nodes: HashMap<TypeIdentity, NodeIndex>,
}

impl SupertypeIndex {
    fn build(context: &LoadContext) -> Self {
        let mut index = Self {
            graph: DiGraph::new(),
            nodes: HashMap::new(),
        };
        for handle in context.types() {
            let Some(identity) = context.identity(handle) else {
                continue;
            };
            let from = index.node(identity);
            let supertypes = context
                .base_type(handle, &[])
                .map(|base| base.ty)
                .into_iter()
                .chain(context.interfaces(handle));
            for ty in supertypes {
                if let Some(identity) = context.identity_of(&ty) {
                    let to = index.node(identity);
                    index.graph.update_edge(from, to, ());
                }
            }
        }
        tracing::debug!(
            "Supertype index for '{}': {} types, {} edges",
            context.id(),
            index.graph.node_count(),
            index.graph.edge_count()
        );
        index
    }

    fn node(&mut self, identity: TypeIdentity) -> NodeIndex {
        if let Some(&node) = self.nodes.get(&identity) {
            return node;
        }
        let node = self.graph.add_node(identity.clone());
        self.nodes.insert(identity, node);
        node
    }

    fn reaches(&self, from: &TypeIdentity, to: &TypeIdentity) -> bool {
        match (self.nodes.get(from), self.nodes.get(to)) {
            (Some(&from), Some(&to)) => has_path_connecting(&self.graph, from, to, None),
            _ => false,
        }
    }
}
