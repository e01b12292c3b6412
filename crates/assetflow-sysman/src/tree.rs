//! Dependent state tree
//!
//! Before a state change is propagated we pull exactly the part of the
//! asset graph it can affect out of storage. Starting from one version the
//! builder works breadth first:
//!
//! ```text
//!   round 0:  start                       (in tree, with connections)
//!   round 1:  its dependents              (in tree, with connections)
//!             its children and inputs     (for recomputation only)
//!             its parents and listeners   (with connections, may recompute)
//!   round n:  whatever round n-1 discovered, until nothing new turns up
//! ```
//!
//! Edges point from an asset to what its state depends on, so a post-order
//! walk visits children and inputs before the parents and listeners that
//! are computed from them.

use crate::version::AssetVersion;
use assetflow_common::{AssetKey, AssetState};
use assetflow_storage::AssetStorage;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{DfsPostOrder, EdgeRef, VisitMap};
use std::collections::{BTreeSet, HashMap};
use std::ops::{Index, IndexMut};
use tracing::{debug, warn};

/// Relationship an edge stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyType {
    /// Source lists target as an input
    Input,
    /// Source lists target as a child
    Child,
    /// Target mirrors explicit state changes of source
    Dependent,
    /// Both a child and a dependent
    DependentAndChild,
}

impl DependencyType {
    pub const fn is_dependent(self) -> bool {
        matches!(self, Self::Dependent | Self::DependentAndChild)
    }

    /// Whether the target counts as a child when computing state
    pub const fn is_child(self) -> bool {
        matches!(self, Self::Child | Self::DependentAndChild)
    }

    /// Combine with a second relationship between the same pair
    pub const fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Dependent, Self::Child) | (Self::Child, Self::Dependent) => {
                Self::DependentAndChild
            }
            _ => self,
        }
    }
}

/// One asset version in the tree
#[derive(Debug, Clone)]
pub struct TreeVertex {
    pub name: AssetKey,
    /// State at load time, then as updated by propagation
    pub state: AssetState,
    /// Whether the requested state change applies to this vertex itself
    pub in_dep_tree: bool,
    /// Insertion order
    pub index: usize,
    /// Set once propagation changes this vertex's state
    pub state_changed: bool,
}

/// Which relationships the builder expands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeScope {
    /// Pull in dependent children of in-tree versions
    pub include_dependent_children: bool,
    /// Pull in children and inputs of versions that may be recomputed
    pub include_all_children_and_inputs: bool,
}

impl TreeScope {
    pub const FULL: Self = Self {
        include_dependent_children: true,
        include_all_children_and_inputs: true,
    };

    /// Scope needed to propagate an explicit change to `state`
    pub const fn for_state(state: AssetState) -> Self {
        match state {
            // Only needs to travel upwards
            AssetState::Failed => Self {
                include_dependent_children: false,
                include_all_children_and_inputs: false,
            },
            AssetState::Canceled => Self {
                include_dependent_children: true,
                include_all_children_and_inputs: false,
            },
            _ => Self::FULL,
        }
    }
}

/// Subgraph of versions affected by a state change
#[derive(Debug, Default)]
pub struct DependentStateTree {
    graph: DiGraph<TreeVertex, DependencyType>,
    lookup: HashMap<AssetKey, NodeIndex>,
}

impl DependentStateTree {
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, key: &AssetKey) -> Option<NodeIndex> {
        self.lookup.get(key).copied()
    }

    pub fn vertex(&self, key: &AssetKey) -> Option<&TreeVertex> {
        self.node(key).map(|node| &self.graph[node])
    }

    /// Relationship recorded from `from` to `to`, if any
    pub fn edge(&self, from: &AssetKey, to: &AssetKey) -> Option<DependencyType> {
        let edge = self.graph.find_edge(self.node(from)?, self.node(to)?)?;
        Some(self.graph[edge])
    }

    /// Vertices in insertion order
    pub fn vertices(&self) -> impl Iterator<Item = &TreeVertex> + '_ {
        self.graph.node_weights()
    }

    /// What `node` depends on
    pub fn dependencies(
        &self,
        node: NodeIndex,
    ) -> impl Iterator<Item = (NodeIndex, DependencyType)> + '_ {
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| (edge.target(), *edge.weight()))
    }

    /// What depends on `node`
    pub fn dependers(
        &self,
        node: NodeIndex,
    ) -> impl Iterator<Item = (NodeIndex, DependencyType)> + '_ {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .map(|edge| (edge.source(), *edge.weight()))
    }

    /// Every vertex, dependencies first.
    ///
    /// Roots are taken in insertion order so the walk is deterministic.
    /// Cycles are broken wherever the walk first closes them.
    pub fn post_order(&self) -> Vec<NodeIndex> {
        let mut dfs = DfsPostOrder::empty(&self.graph);
        let mut order = Vec::with_capacity(self.graph.node_count());
        for start in self.graph.node_indices() {
            if dfs.discovered.is_visited(&start) {
                continue;
            }
            dfs.move_to(start);
            while let Some(node) = dfs.next(&self.graph) {
                order.push(node);
            }
        }
        order
    }
}

impl Index<NodeIndex> for DependentStateTree {
    type Output = TreeVertex;

    fn index(&self, node: NodeIndex) -> &TreeVertex {
        &self.graph[node]
    }
}

impl IndexMut<NodeIndex> for DependentStateTree {
    fn index_mut(&mut self, node: NodeIndex) -> &mut TreeVertex {
        &mut self.graph[node]
    }
}

/// Build the tree of versions affected by changing the state of `key`.
///
/// `include` decides, from a version's current state, whether the change
/// applies to it; versions it rejects stay in the tree for recomputation
/// only. Versions that cannot be loaded are recorded as `Blocked`.
pub fn build_dependent_state_tree<P>(
    key: &AssetKey,
    include: P,
    scope: TreeScope,
    storage: &dyn AssetStorage<AssetVersion>,
) -> DependentStateTree
where
    P: Fn(AssetState) -> bool,
{
    let mut builder = TreeBuilder {
        include,
        scope,
        storage,
        tree: DependentStateTree::default(),
        include_connections: Vec::new(),
        to_fill_in_next: BTreeSet::new(),
    };
    builder.add_or_update_vertex(key, true, true);
    while !builder.to_fill_in_next.is_empty() {
        let to_fill_in = std::mem::take(&mut builder.to_fill_in_next);
        for node in to_fill_in {
            builder.fill_in_vertex(node);
        }
    }
    debug!(
        "Built state tree for {}: {} versions, {} edges",
        key,
        builder.tree.len(),
        builder.tree.edge_count()
    );
    builder.tree
}

struct TreeBuilder<'a, P> {
    include: P,
    scope: TreeScope,
    storage: &'a dyn AssetStorage<AssetVersion>,
    tree: DependentStateTree,
    /// Per node: whether its parents and listeners are needed
    include_connections: Vec<bool>,
    to_fill_in_next: BTreeSet<NodeIndex>,
}

impl<P> TreeBuilder<'_, P>
where
    P: Fn(AssetState) -> bool,
{
    fn add_or_update_vertex(
        &mut self,
        key: &AssetKey,
        in_dep_tree: bool,
        include_connections: bool,
    ) -> NodeIndex {
        if let Some(node) = self.tree.node(key) {
            // Revisit only if we learned something new
            if in_dep_tree && !self.tree[node].in_dep_tree {
                self.tree[node].in_dep_tree = true;
                self.to_fill_in_next.insert(node);
            }
            if include_connections && !self.include_connections[node.index()] {
                self.include_connections[node.index()] = true;
                self.to_fill_in_next.insert(node);
            }
            return node;
        }

        let node = self.tree.graph.add_node(TreeVertex {
            name: key.clone(),
            state: AssetState::New,
            in_dep_tree,
            index: self.tree.graph.node_count(),
            state_changed: false,
        });
        self.tree.lookup.insert(key.clone(), node);
        self.include_connections.push(include_connections);
        self.to_fill_in_next.insert(node);
        node
    }

    fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, kind: DependencyType) {
        match self.tree.graph.find_edge(from, to) {
            Some(edge) => {
                let merged = self.tree.graph[edge].merge(kind);
                self.tree.graph[edge] = merged;
            }
            None => {
                self.tree.graph.add_edge(from, to, kind);
            }
        }
    }

    fn fill_in_vertex(&mut self, node: NodeIndex) {
        let name = self.tree[node].name.clone();
        debug!("Loading '{}' for state update", name);
        let handle = match self.storage.get(&name) {
            Ok(Some(handle)) if handle.is_valid() => handle,
            Ok(_) => {
                warn!("Could not load asset '{}' which is referenced by another asset", name);
                self.tree[node].state = AssetState::Blocked;
                return;
            }
            Err(e) => {
                warn!("Could not load asset '{}': {}", name, e);
                self.tree[node].state = AssetState::Blocked;
                return;
            }
        };
        let version = handle.read();

        self.tree[node].state = version.state;
        if self.tree[node].in_dep_tree && !(self.include)(version.state) {
            // Keep the vertex for recomputation but leave its neighbours out
            self.tree[node].in_dep_tree = false;
            self.include_connections[node.index()] = false;
        }

        if self.tree[node].in_dep_tree && self.scope.include_dependent_children {
            for dependent in version.dependent_children() {
                let dep = self.add_or_update_vertex(&dependent, true, true);
                self.add_edge(node, dep, DependencyType::Dependent);
            }
        }

        if !self.include_connections[node.index()] {
            return;
        }
        if self.scope.include_all_children_and_inputs {
            for child in &version.children {
                let child = self.add_or_update_vertex(child, false, false);
                self.add_edge(node, child, DependencyType::Child);
            }
            for input in &version.inputs {
                let input = self.add_or_update_vertex(input, false, false);
                self.add_edge(node, input, DependencyType::Input);
            }
        }
        for parent in &version.parents {
            let parent = self.add_or_update_vertex(parent, false, true);
            self.add_edge(parent, node, DependencyType::Child);
        }
        for listener in &version.listeners {
            let listener = self.add_or_update_vertex(listener, false, true);
            self.add_edge(listener, node, DependencyType::Input);
        }
    }
}
