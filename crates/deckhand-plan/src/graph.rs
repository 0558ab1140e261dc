//! Resource graph of the synthesized deployment plan.
//!
//! A resource can only be added once everything it references already
//! exists, and every reference becomes an ordering edge. The graph is
//! therefore acyclic by construction, and no resource can read another's
//! output without waiting for it.

use std::collections::{BTreeMap, BTreeSet};

use deckhand_core::ResourceId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{PlanError, PlanResult};
use crate::props::{ResourceKind, ResourceProps};

/// A planned resource and its prerequisites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: ResourceId,
    pub props: ResourceProps,
    /// Resources that must converge before this one.
    pub depends_on: BTreeSet<ResourceId>,
}

impl ResourceNode {
    pub fn kind(&self) -> ResourceKind {
        self.props.kind()
    }

    pub fn stack(&self) -> &str {
        self.id.stack()
    }

    /// Digest of the properties, used to detect updates between applies.
    pub fn props_digest(&self) -> String {
        digest_json(&self.props)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGraph {
    nodes: BTreeMap<ResourceId, ResourceNode>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource. Its ordering edges are the explicit ones plus every
    /// resource its properties reference.
    pub fn add(
        &mut self,
        id: ResourceId,
        props: ResourceProps,
        explicit: impl IntoIterator<Item = ResourceId>,
    ) -> PlanResult<ResourceId> {
        if self.nodes.contains_key(&id) {
            return Err(PlanError::DuplicateResource(id));
        }

        let mut depends_on: BTreeSet<ResourceId> = explicit.into_iter().collect();
        depends_on.extend(props.references());

        for dep in &depends_on {
            if !self.nodes.contains_key(dep) {
                return Err(PlanError::UnknownDependency {
                    resource: id,
                    dependency: dep.clone(),
                });
            }
        }

        debug!(resource = %id, kind = %props.kind(), deps = depends_on.len(), "resource planned");
        self.nodes.insert(
            id.clone(),
            ResourceNode {
                id: id.clone(),
                props,
                depends_on,
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn of_kind(&self, kind: ResourceKind) -> Vec<&ResourceNode> {
        self.nodes.values().filter(|n| n.kind() == kind).collect()
    }

    /// Stack names, in sorted order.
    pub fn stacks(&self) -> BTreeSet<String> {
        self.nodes.keys().map(|id| id.stack().to_string()).collect()
    }

    /// Resources belonging to one stack.
    pub fn stack_nodes(&self, stack: &str) -> Vec<&ResourceNode> {
        self.nodes.values().filter(|n| n.stack() == stack).collect()
    }

    /// Convergence waves: every resource sits in the wave after its latest
    /// prerequisite. Resources within a wave are independent.
    pub fn waves(&self) -> Vec<Vec<ResourceId>> {
        let mut level: BTreeMap<&ResourceId, usize> = BTreeMap::new();
        let mut remaining: BTreeMap<&ResourceId, usize> = self
            .nodes
            .values()
            .map(|n| (&n.id, n.depends_on.len()))
            .collect();
        let dependents = self.dependents_index();

        let mut ready: Vec<&ResourceId> = remaining
            .iter()
            .filter(|(_, deps)| **deps == 0)
            .map(|(id, _)| *id)
            .collect();

        while let Some(id) = ready.pop() {
            let node = &self.nodes[id];
            let lvl = node
                .depends_on
                .iter()
                .map(|d| level[d] + 1)
                .max()
                .unwrap_or(0);
            level.insert(id, lvl);
            if let Some(children) = dependents.get(id) {
                for child in children {
                    if let Some(count) = remaining.get_mut(child) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(*child);
                        }
                    }
                }
            }
        }

        let depth = level.values().copied().max().map_or(0, |m| m + 1);
        let mut waves = vec![Vec::new(); depth];
        for (id, lvl) in level {
            waves[lvl].push(id.clone());
        }
        waves
    }

    /// Every resource ordered so that prerequisites come first.
    pub fn topological_order(&self) -> Vec<ResourceId> {
        self.waves().into_iter().flatten().collect()
    }

    /// Every resource that transitively depends on `id`.
    pub fn dependents_closure(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        let dependents = self.dependents_index();
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(children) = dependents.get(current) {
                for child in children {
                    if seen.insert((*child).clone()) {
                        stack.push(*child);
                    }
                }
            }
        }
        seen
    }

    /// Digest of the whole graph. Identical configuration yields an
    /// identical fingerprint.
    pub fn fingerprint(&self) -> String {
        digest_json(self)
    }

    fn dependents_index(&self) -> BTreeMap<&ResourceId, Vec<&ResourceId>> {
        let mut index: BTreeMap<&ResourceId, Vec<&ResourceId>> = BTreeMap::new();
        for node in self.nodes.values() {
            for dep in &node.depends_on {
                index.entry(dep).or_default().push(&node.id);
            }
        }
        index
    }
}

/// Hex sha256 over the canonical JSON encoding of a value.
pub(crate) fn digest_json<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Stack-scoped view of a graph used by provisioners.
///
/// Edges passed to [`StackBuilder::after`] apply to every resource the
/// stack adds, the way one stack can be made to wait for another.
pub struct StackBuilder<'g> {
    graph: &'g mut ResourceGraph,
    stack: String,
    after: Vec<ResourceId>,
}

impl<'g> StackBuilder<'g> {
    pub fn new(graph: &'g mut ResourceGraph, stack: &str) -> Self {
        Self {
            graph,
            stack: stack.to_string(),
            after: Vec::new(),
        }
    }

    /// Make every resource of this stack wait for `ids`.
    pub fn after(mut self, ids: impl IntoIterator<Item = ResourceId>) -> Self {
        self.after.extend(ids);
        self
    }

    pub fn name(&self) -> &str {
        &self.stack
    }

    pub fn add(&mut self, logical: &str, props: ResourceProps) -> PlanResult<ResourceId> {
        self.add_after(logical, props, [])
    }

    pub fn add_after(
        &mut self,
        logical: &str,
        props: ResourceProps,
        explicit: impl IntoIterator<Item = ResourceId>,
    ) -> PlanResult<ResourceId> {
        let id = ResourceId::new(&self.stack, logical);
        let edges = self.after.iter().cloned().chain(explicit);
        self.graph.add(id, props, edges)
    }
}
