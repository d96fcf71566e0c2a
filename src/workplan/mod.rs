//! Workplan generation.
//!
//! A [`Workplan`] says which nodes must be rendered and in which order.
//! Every node reachable from the requested roots is checked against the
//! cache; nodes whose cached artifact can be served are left out, the rest
//! are grouped into layers:
//!
//! - a dirty node with no dirty dependencies is in layer 0
//! - otherwise its layer is one more than the highest layer among its dirty
//!   dependencies
//!
//! Nodes in the same layer never depend on each other, so a layer can be
//! rendered concurrently once every earlier layer is done. Within a layer,
//! nodes with more dependents come first (they unblock the most work), ties
//! broken by identifier so plans are reproducible.

use crate::cache::{CacheStore, Freshness};
use crate::core::{ComposeError, ResourceKind};
use crate::graph::{DependencyGraph, NodeInputs, resolve_inputs};
use crate::identity::{ContentHash, ContentSnapshot, ResourceId};
use futures::{StreamExt, stream};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Plan entry for one reachable node.
#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub freshness: Freshness,
    /// Hash of the node's own content; the source fingerprint for derived
    /// nodes.
    pub content_hash: Option<ContentHash>,
    /// Hash over the node's content and everything below it.
    pub tree_hash: Option<ContentHash>,
    pub inputs: NodeInputs,
    /// Layer the node renders in; `None` when the cache is served.
    pub layer: Option<usize>,
}

/// Nodes that can render concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub index: usize,
    pub nodes: Vec<ResourceId>,
}

/// Per-request render schedule. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct Workplan {
    pub roots: Vec<ResourceId>,
    pub layers: Vec<Layer>,
    nodes: HashMap<ResourceId, PlannedNode>,
    /// Reachable nodes, dependencies first.
    order: Vec<ResourceId>,
    /// Indices into `roots` of the roots that reach each node.
    roots_of: HashMap<ResourceId, Vec<usize>>,
}

impl Workplan {
    #[must_use]
    pub fn node(&self, id: &ResourceId) -> Option<&PlannedNode> {
        self.nodes.get(id)
    }

    /// Reachable nodes with dependencies before dependents.
    #[must_use]
    pub fn order(&self) -> &[ResourceId] {
        &self.order
    }

    /// Roots (as indices into [`Workplan::roots`]) whose output includes `id`.
    #[must_use]
    pub fn roots_of(&self, id: &ResourceId) -> &[usize] {
        self.roots_of.get(id).map_or(&[], Vec::as_slice)
    }

    /// Number of nodes that will be rendered.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.layers.iter().map(|l| l.nodes.len()).sum()
    }

    /// Number of nodes served from the cache.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.order.len() - self.dirty_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl fmt::Display for Workplan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} nodes: {} to render, {} cached",
            self.order.len(),
            self.dirty_count(),
            self.cached_count()
        )?;
        for layer in &self.layers {
            writeln!(f, "layer {}:", layer.index)?;
            for id in &layer.nodes {
                let reason = self
                    .nodes
                    .get(id)
                    .and_then(|n| match &n.freshness {
                        Freshness::Dirty(reason) => Some(format!("{reason:?}")),
                        _ => None,
                    })
                    .unwrap_or_default();
                writeln!(f, "  {id} ({reason})")?;
            }
        }
        Ok(())
    }
}

/// Builds workplans against a cache.
pub struct WorkplanGenerator<'a> {
    cache: &'a CacheStore,
    snapshot: &'a ContentSnapshot,
    concurrency: usize,
}

impl<'a> WorkplanGenerator<'a> {
    pub fn new(cache: &'a CacheStore, snapshot: &'a ContentSnapshot, concurrency: usize) -> Self {
        Self {
            cache,
            snapshot,
            concurrency: concurrency.max(1),
        }
    }

    /// Plans the render of `roots`, all of which must be acyclic in `graph`.
    pub async fn generate(
        &self,
        graph: &DependencyGraph,
        roots: &[ResourceId],
        initial_state: &Value,
    ) -> Result<Workplan, ComposeError> {
        let reachable = graph.reachable_from(roots);
        let order = graph.dependency_order(&reachable)?;
        let mut inputs = resolve_inputs(graph, roots, initial_state);

        // Content checks may hit the network, so they run concurrently.
        let assessments: Vec<_> = stream::iter(order.iter().filter(|id| !id.is_derived()))
            .map(|id| {
                let render_key = inputs.get(id).map_or_else(ContentHash::empty, |i| i.render_key);
                async move { (id.clone(), self.cache.assess(id, render_key, self.snapshot).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        let mut assessed = HashMap::with_capacity(assessments.len());
        for (id, assessment) in assessments {
            assessed.insert(id, assessment?);
        }

        let mut nodes: HashMap<ResourceId, PlannedNode> = HashMap::with_capacity(order.len());
        for id in &order {
            let Some(node_inputs) = inputs.remove(id) else {
                continue;
            };
            let kind = graph.node(id).map_or(ResourceKind::Document, |n| n.kind);
            let child_hashes: Option<Vec<ContentHash>> = graph
                .dependencies(id)
                .into_iter()
                .map(|(child, _)| nodes.get(child).and_then(|n| n.tree_hash))
                .collect();

            let derived_task = match id {
                ResourceId::Derived { task, .. } => Some(task),
                _ => None,
            };
            let (freshness, content_hash, tree_hash) = if let Some(task) = derived_task {
                let fingerprint = child_hashes.map(|hashes| {
                    ContentHash::combine(
                        std::iter::once(ContentHash::of(task.as_str().as_bytes())).chain(hashes),
                    )
                });
                let freshness =
                    self.cache.assess_derived(id, fingerprint, node_inputs.render_key)?;
                (freshness, fingerprint, fingerprint)
            } else {
                let Some(assessment) = assessed.remove(id) else {
                    continue;
                };
                let own = assessment.content_hash;
                let tree = match (own, child_hashes) {
                    (Some(own), Some(children)) if !children.is_empty() => {
                        Some(ContentHash::combine(std::iter::once(own).chain(children)))
                    }
                    (Some(own), Some(_)) => Some(own),
                    _ => None,
                };
                (assessment.freshness, own, tree)
            };

            nodes.insert(
                id.clone(),
                PlannedNode {
                    id: id.clone(),
                    kind,
                    freshness,
                    content_hash,
                    tree_hash,
                    inputs: node_inputs,
                    layer: None,
                },
            );
        }

        // Dependencies come first in `order`, so their layers are known.
        let mut layers: Vec<Layer> = Vec::new();
        for id in &order {
            let dirty = nodes.get(id).is_some_and(|n| n.freshness.is_dirty());
            if !dirty {
                continue;
            }
            let layer = graph
                .dependencies(id)
                .into_iter()
                .filter_map(|(child, _)| nodes.get(child).and_then(|n| n.layer))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            if let Some(node) = nodes.get_mut(id) {
                node.layer = Some(layer);
            }
            while layers.len() <= layer {
                layers.push(Layer {
                    index: layers.len(),
                    nodes: Vec::new(),
                });
            }
            layers[layer].nodes.push(id.clone());
        }
        for layer in &mut layers {
            layer.nodes.sort_by(|a, b| {
                graph.in_degree(b).cmp(&graph.in_degree(a)).then_with(|| a.cmp(b))
            });
        }

        let mut roots_of: HashMap<ResourceId, Vec<usize>> = HashMap::new();
        for (index, root) in roots.iter().enumerate() {
            for id in graph.reachable_from(std::slice::from_ref(root)) {
                roots_of.entry(id).or_default().push(index);
            }
        }

        let plan = Workplan {
            roots: roots.to_vec(),
            layers,
            nodes,
            order,
            roots_of,
        };
        debug!(
            target: "workplan",
            "{} reachable, {} dirty in {} layers",
            plan.order.len(),
            plan.dirty_count(),
            plan.layers.len()
        );
        Ok(plan)
    }
}
