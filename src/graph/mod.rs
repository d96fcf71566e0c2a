//! Dependency graph of resources.
//!
//! Nodes are resources, edges are directives: an edge `a → b` means document
//! `a` contains a directive whose output comes from `b`. Edges carry the
//! directive's marker, options and source position so failures can be
//! reported against the exact line that caused them.
//!
//! The graph is an arena ([`petgraph::graph::DiGraph`]) indexed by
//! [`ResourceId`]; a resource reached from several documents is a single node
//! with several incoming edges. Graphs are built by [`GraphBuilder`] and are
//! acyclic by construction for every root that built successfully.

mod builder;
mod state;

pub use builder::{BuildOutcome, BuildStats, GraphBuilder};
pub use state::{NodeInputs, resolve_inputs};

use crate::core::{
    ComposeError, DirectiveKind, RequiredMarker, ResourceKind, SourcePosition, UnavailableKind,
};
use crate::identity::{ContentHash, ResourceId};
use crate::markdown::DirectiveOptions;
use crate::store::{EdgeRecord, InvalidReference};
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A resource in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub id: ResourceId,
    pub kind: ResourceKind,
    /// Content hash observed while building, for documents.
    pub hash: Option<ContentHash>,
    pub frontmatter: Option<serde_json::Map<String, serde_json::Value>>,
    /// Set when the document could not be read while building; it is kept
    /// as a leaf.
    pub unavailable: Option<UnavailableKind>,
    /// Directives of this document whose targets are not valid references.
    pub invalid_references: Vec<InvalidReference>,
}

impl ResourceNode {
    fn new(id: ResourceId, kind: ResourceKind) -> Self {
        Self {
            id,
            kind,
            hash: None,
            frontmatter: None,
            unavailable: None,
            invalid_references: Vec::new(),
        }
    }
}

/// A directive linking a document to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectiveEdge {
    pub kind: ResourceKind,
    pub directive_kind: DirectiveKind,
    /// Index of the directive in the source document; for derived nodes,
    /// the index of the source.
    pub directive: usize,
    pub marker: RequiredMarker,
    pub options: DirectiveOptions,
    pub position: SourcePosition,
}

impl From<&EdgeRecord> for DirectiveEdge {
    fn from(record: &EdgeRecord) -> Self {
        Self {
            kind: record.kind,
            directive_kind: record.directive_kind,
            directive: record.directive,
            marker: record.marker,
            options: record.options.clone(),
            position: record.position,
        }
    }
}

/// Resource dependency graph.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<ResourceNode, DirectiveEdge>,
    index: HashMap<ResourceId, NodeIndex>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the node for `id`, creating it with `kind` if absent.
    pub fn ensure_node(&mut self, id: &ResourceId, kind: ResourceKind) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(ResourceNode::new(id.clone(), kind));
        self.index.insert(id.clone(), idx);
        idx
    }

    pub fn add_edge(&mut self, from: &ResourceId, to: &ResourceId, edge: DirectiveEdge) {
        let target_kind = edge.kind;
        let Some(&from_idx) = self.index.get(from) else {
            return;
        };
        let to_idx = self.ensure_node(to, target_kind);
        self.graph.add_edge(from_idx, to_idx, edge);
    }

    /// Drops every outgoing edge of `id`.
    pub fn clear_edges(&mut self, id: &ResourceId) {
        let Some(&idx) = self.index.get(id) else {
            return;
        };
        let mut edges: Vec<_> = self.graph.edges(idx).map(|e| e.id()).collect();
        // Removing shifts the last edge into the hole, so remove from the back.
        edges.sort_unstable();
        for edge in edges.into_iter().rev() {
            self.graph.remove_edge(edge);
        }
    }

    /// Drops every edge from `from` to `to`.
    pub fn remove_edges_between(&mut self, from: &ResourceId, to: &ResourceId) {
        let (Some(&a), Some(&b)) = (self.index.get(from), self.index.get(to)) else {
            return;
        };
        while let Some(edge) = self.graph.find_edge(a, b) {
            self.graph.remove_edge(edge);
        }
    }

    #[must_use]
    pub fn node(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn node_mut(&mut self, id: &ResourceId) -> Option<&mut ResourceNode> {
        self.index.get(id).map(|&idx| &mut self.graph[idx])
    }

    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Outgoing edges of `id`, in directive order.
    #[must_use]
    pub fn dependencies(&self, id: &ResourceId) -> Vec<(&ResourceId, &DirectiveEdge)> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut deps: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.id(), &self.graph[e.target()].id, e.weight()))
            .collect();
        deps.sort_by_key(|(edge_id, _, edge)| (edge.directive, *edge_id));
        deps.into_iter().map(|(_, id, edge)| (id, edge)).collect()
    }

    /// Incoming edges of `id`: the documents that reference it.
    #[must_use]
    pub fn dependents(&self, id: &ResourceId) -> Vec<(&ResourceId, &DirectiveEdge)> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (&self.graph[e.source()].id, e.weight()))
            .collect()
    }

    /// Number of distinct documents referencing `id`.
    #[must_use]
    pub fn in_degree(&self, id: &ResourceId) -> usize {
        let Some(&idx) = self.index.get(id) else {
            return 0;
        };
        self.graph.neighbors_directed(idx, Direction::Incoming).collect::<HashSet<_>>().len()
    }

    /// Strongest marker over all incoming edges, `Default` for roots.
    #[must_use]
    pub fn strongest_marker(&self, id: &ResourceId) -> RequiredMarker {
        self.dependents(id).iter().map(|(_, e)| e.marker).max().unwrap_or_default()
    }

    /// Every node reachable from `roots`, roots included, in depth-first
    /// preorder.
    #[must_use]
    pub fn reachable_from(&self, roots: &[ResourceId]) -> Vec<ResourceId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<NodeIndex> =
            roots.iter().rev().filter_map(|r| self.index.get(r).copied()).collect();

        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            order.push(self.graph[idx].id.clone());
            let children: Vec<NodeIndex> = self
                .dependencies(&self.graph[idx].id)
                .into_iter()
                .filter_map(|(child, _)| self.index.get(child).copied())
                .collect();
            stack.extend(children.into_iter().rev());
        }
        order
    }

    /// Nodes among `subset` ordered so every node comes after all of its
    /// dependencies.
    pub fn dependency_order(&self, subset: &[ResourceId]) -> Result<Vec<ResourceId>, ComposeError> {
        let members: HashSet<&ResourceId> = subset.iter().collect();
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .rev()
                .map(|idx| &self.graph[idx].id)
                .filter(|id| members.contains(id))
                .cloned()
                .collect()),
            Err(cycle) => Err(self.cycle_error(cycle.node_id())),
        }
    }

    fn cycle_error(&self, start: NodeIndex) -> ComposeError {
        let component = tarjan_scc(&self.graph)
            .into_iter()
            .find(|scc| scc.contains(&start))
            .unwrap_or_else(|| vec![start]);
        let mut cycle: Vec<ResourceId> =
            component.iter().rev().map(|&idx| self.graph[idx].id.clone()).collect();
        if let Some(first) = cycle.first().cloned() {
            cycle.push(first);
        }
        ComposeError::CyclicDependency {
            root: self.graph[start].id.clone(),
            cycle,
        }
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.graph.node_weights()
    }

    /// Renders the graph below `root` as an indented tree.
    #[must_use]
    pub fn to_tree_string(&self, root: &ResourceId) -> String {
        let mut out = String::new();
        let Some(node) = self.node(root) else {
            return out;
        };
        out.push_str(&format!("{} [{}]\n", node.id, node.kind));

        let mut expanded = HashSet::from([root.clone()]);
        // (node, prefix, is_last, marker)
        let mut stack: Vec<(ResourceId, String, bool, RequiredMarker)> = Vec::new();
        let push_children = |stack: &mut Vec<_>, id: &ResourceId, prefix: &str| {
            let deps = self.dependencies(id);
            let count = deps.len();
            for (i, (child, edge)) in deps.into_iter().enumerate().rev() {
                stack.push((child.clone(), prefix.to_string(), i + 1 == count, edge.marker));
            }
        };
        push_children(&mut stack, root, "");

        while let Some((id, prefix, is_last, marker)) = stack.pop() {
            let connector = if is_last { "└── " } else { "├── " };
            let kind = self.node(&id).map_or_else(String::new, |n| n.kind.to_string());
            let marker = match marker {
                RequiredMarker::Required => " !",
                RequiredMarker::Optional => " ?",
                RequiredMarker::Default => "",
            };
            out.push_str(&format!("{prefix}{connector}{id} [{kind}]{marker}\n"));

            let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
            if expanded.insert(id.clone()) {
                push_children(&mut stack, &id, &child_prefix);
            } else if !self.dependencies(&id).is_empty() {
                out.push_str(&format!("{child_prefix}└── (shown above)\n"));
            }
        }
        out
    }

    /// Serializable view of the nodes and edges reachable from `roots`.
    #[must_use]
    pub fn export(&self, roots: &[ResourceId]) -> GraphExport {
        let reachable = self.reachable_from(roots);
        let nodes = reachable
            .iter()
            .filter_map(|id| self.node(id))
            .map(|n| ExportedNode {
                id: n.id.to_string(),
                kind: n.kind,
                hash: n.hash.map(|h| h.to_string()),
                unavailable: n.unavailable.as_ref().map(ToString::to_string),
            })
            .collect();
        let edges = reachable
            .iter()
            .flat_map(|from| {
                self.dependencies(from).into_iter().map(move |(to, edge)| ExportedEdge {
                    from: from.to_string(),
                    to: to.to_string(),
                    edge: edge.clone(),
                })
            })
            .collect();
        GraphExport {
            roots: roots.iter().map(ToString::to_string).collect(),
            nodes,
            edges,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedNode {
    pub id: String,
    pub kind: ResourceKind,
    pub hash: Option<String>,
    pub unavailable: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedEdge {
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub edge: DirectiveEdge,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphExport {
    pub roots: Vec<String>,
    pub nodes: Vec<ExportedNode>,
    pub edges: Vec<ExportedEdge>,
}
