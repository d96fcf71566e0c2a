use super::{DependencyGraph, DirectiveEdge};
use crate::cache::CacheStore;
use crate::core::{
    ComposeError, DirectiveKind, RequiredMarker, ResourceKind, SourcePosition, UnavailableKind,
};
use crate::identity::{ContentSnapshot, ResourceId, identify};
use crate::markdown::{DirectiveOptions, DocumentParser, ParsedDocument};
use crate::store::{EdgeRecord, InvalidReference, NodeRecord};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Counters describing how much work a build did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Documents parsed because they were new or changed.
    pub parsed: usize,
    /// Documents whose stored edges were reused after rehashing.
    pub reused: usize,
    /// Remote documents whose stored edges were used without fetching.
    pub trusted: usize,
    /// Documents that could not be read.
    pub unavailable: usize,
}

/// Result of [`GraphBuilder::build`].
#[derive(Debug)]
pub struct BuildOutcome {
    pub graph: DependencyGraph,
    /// Roots whose subgraph is complete and acyclic, in request order.
    pub roots: Vec<ResourceId>,
    /// Roots that cannot be composed at all.
    pub failures: Vec<(ResourceId, ComposeError)>,
    pub stats: BuildStats,
}

struct Frame {
    id: ResourceId,
    children: Vec<ResourceId>,
    next: usize,
}

/// Discovers the dependency graph of a set of root documents.
///
/// Documents are expanded depth-first with an explicit stack, so arbitrarily
/// deep include chains do not grow the call stack. Each document is expanded
/// once per build; a document with the same content hash as the last time it
/// was parsed gets its edges back from the store instead of being parsed
/// again.
pub struct GraphBuilder<'a> {
    parser: &'a dyn DocumentParser,
    cache: &'a CacheStore,
    snapshot: &'a ContentSnapshot,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        parser: &'a dyn DocumentParser,
        cache: &'a CacheStore,
        snapshot: &'a ContentSnapshot,
    ) -> Self {
        Self {
            parser,
            cache,
            snapshot,
        }
    }

    /// Builds the graph reachable from `roots`.
    ///
    /// A root that reaches a cycle fails with [`ComposeError::CyclicDependency`];
    /// the other roots are unaffected. Only store errors abort the build.
    pub async fn build(&self, roots: &[ResourceId]) -> Result<BuildOutcome, ComposeError> {
        let mut graph = DependencyGraph::new();
        let mut stats = BuildStats::default();
        let mut complete: HashSet<ResourceId> = HashSet::new();
        // Nodes that are on or lead into a cycle, with the cycle found.
        let mut poisoned: HashMap<ResourceId, Vec<ResourceId>> = HashMap::new();
        let mut built = Vec::new();
        let mut failures = Vec::new();

        for root in roots {
            graph.ensure_node(root, ResourceKind::from_reference(&root.to_string()));
            match self.walk(&mut graph, root, &mut complete, &mut poisoned, &mut stats).await? {
                None => built.push(root.clone()),
                Some(err) => {
                    warn!(target: "graph", "{err}");
                    failures.push((root.clone(), err));
                }
            }
        }

        debug!(
            target: "graph",
            "built graph: {} nodes, {} edges ({} parsed, {} reused, {} trusted, {} unavailable)",
            graph.node_count(),
            graph.edge_count(),
            stats.parsed,
            stats.reused,
            stats.trusted,
            stats.unavailable
        );

        Ok(BuildOutcome {
            graph,
            roots: built,
            failures,
            stats,
        })
    }

    /// Walks one root. Returns the root's failure, if any.
    async fn walk(
        &self,
        graph: &mut DependencyGraph,
        root: &ResourceId,
        complete: &mut HashSet<ResourceId>,
        poisoned: &mut HashMap<ResourceId, Vec<ResourceId>>,
        stats: &mut BuildStats,
    ) -> Result<Option<ComposeError>, ComposeError> {
        if let Some(cycle) = poisoned.get(root) {
            return Ok(Some(cycle_error(root, cycle.clone())));
        }
        if complete.contains(root) {
            return Ok(None);
        }

        let mut on_path: HashSet<ResourceId> = HashSet::from([root.clone()]);
        let children = self.expand(graph, root, stats).await?;
        let mut stack = vec![Frame {
            id: root.clone(),
            children,
            next: 0,
        }];

        loop {
            let Some(frame) = stack.last_mut() else {
                break;
            };
            if frame.next == frame.children.len() {
                let id = frame.id.clone();
                stack.pop();
                on_path.remove(&id);
                complete.insert(id);
                continue;
            }
            let child = frame.children[frame.next].clone();
            frame.next += 1;

            if let Some(cycle) = poisoned.get(&child) {
                let cycle = cycle.clone();
                for frame in &stack {
                    poisoned.insert(frame.id.clone(), cycle.clone());
                }
                return Ok(Some(cycle_error(root, cycle)));
            }

            if on_path.contains(&child) {
                let start = stack.iter().position(|f| f.id == child).unwrap_or(0);
                let mut cycle: Vec<ResourceId> =
                    stack[start..].iter().map(|f| f.id.clone()).collect();
                cycle.push(child.clone());

                // Keep the shared graph acyclic for the other roots.
                if let Some(last) = stack.last() {
                    graph.remove_edges_between(&last.id, &child);
                }
                for frame in &stack {
                    poisoned.insert(frame.id.clone(), cycle.clone());
                }
                return Ok(Some(cycle_error(root, cycle)));
            }

            if complete.contains(&child) {
                continue;
            }

            let children = self.expand(graph, &child, stats).await?;
            on_path.insert(child.clone());
            stack.push(Frame {
                id: child,
                children,
                next: 0,
            });
        }
        Ok(None)
    }

    /// Adds the outgoing edges of `id` to the graph and returns the children
    /// that need expanding themselves.
    async fn expand(
        &self,
        graph: &mut DependencyGraph,
        id: &ResourceId,
        stats: &mut BuildStats,
    ) -> Result<Vec<ResourceId>, ComposeError> {
        let kind = graph.node(id).map_or(ResourceKind::Document, |n| n.kind);
        if !kind.has_dependencies() {
            return Ok(Vec::new());
        }
        if let ResourceId::Derived { sources, .. } = id {
            return Ok(expand_derived(graph, id, sources));
        }

        let store = self.cache.store();
        let stored_node = store.get_node(id)?;
        let stored_edges = store.get_edges(id)?;
        let stored = stored_node.as_ref().zip(stored_edges.as_deref());

        if id.is_remote()
            && let Some(entry) = self.cache.lookup(id)?
            && self.cache.is_fresh(&entry)
        {
            // A 404 renders empty, so the stored edges no longer apply.
            if entry.gone {
                debug!(target: "graph", "{id}: gone within TTL, no dependencies");
                stats.trusted += 1;
                return Ok(Vec::new());
            }
            if let Some((node, edges)) = stored {
                debug!(target: "graph", "{id}: within TTL, using stored structure");
                stats.trusted += 1;
                return Ok(apply_record(graph, node, edges));
            }
        }

        let fetched = match self.snapshot.get(id).await {
            Ok(fetched) => fetched,
            Err(err) => {
                let gone = err.kind.remote_failure().is_some_and(|f| f.is_not_found());
                if id.is_remote()
                    && !gone
                    && let Some((node, edges)) = stored
                    && self.cache.lookup(id)?.is_some()
                {
                    // The stale artifact served for this document still has
                    // slots for the stored edges.
                    debug!(target: "graph", "{id}: unreachable, keeping stored structure");
                    stats.trusted += 1;
                    return Ok(apply_record(graph, node, edges));
                }
                mark_unavailable(graph, id, err.kind, stats);
                return Ok(Vec::new());
            }
        };

        if let Some((node, edges)) = stored
            && node.hash == Some(fetched.hash)
        {
            stats.reused += 1;
            return Ok(apply_record(graph, node, edges));
        }

        let parsed = match self.parser.parse(&fetched.text()) {
            Ok(parsed) => parsed,
            Err(e) => {
                let kind = UnavailableKind::local(format!("parse error: {e:#}"));
                mark_unavailable(graph, id, kind, stats);
                return Ok(Vec::new());
            }
        };
        stats.parsed += 1;
        debug!(target: "graph", "parsed {id}: {} directives", parsed.directives.len());

        let (edges, invalid_references) = directive_edges(id, &parsed);
        let record = NodeRecord {
            id: id.clone(),
            kind,
            hash: Some(fetched.hash),
            frontmatter: parsed.frontmatter,
            invalid_references,
            updated_at: Utc::now(),
        };
        let children = apply_record(graph, &record, &edges);
        store.put_node(record)?;
        store.put_edges(id, edges)?;
        Ok(children)
    }
}

fn cycle_error(root: &ResourceId, cycle: Vec<ResourceId>) -> ComposeError {
    ComposeError::CyclicDependency {
        root: root.clone(),
        cycle,
    }
}

fn mark_unavailable(
    graph: &mut DependencyGraph,
    id: &ResourceId,
    kind: UnavailableKind,
    stats: &mut BuildStats,
) {
    warn!(target: "graph", "{id} is unavailable: {kind}");
    stats.unavailable += 1;
    if let Some(node) = graph.node_mut(id) {
        node.unavailable = Some(kind);
    }
}

fn apply_record(
    graph: &mut DependencyGraph,
    record: &NodeRecord,
    edges: &[EdgeRecord],
) -> Vec<ResourceId> {
    if let Some(node) = graph.node_mut(&record.id) {
        node.hash = record.hash;
        node.frontmatter.clone_from(&record.frontmatter);
        node.invalid_references.clone_from(&record.invalid_references);
    }
    for edge in edges {
        graph.add_edge(&record.id, &edge.target, DirectiveEdge::from(edge));
    }
    edges.iter().filter(|e| e.kind.has_dependencies()).map(|e| e.target.clone()).collect()
}

/// A derived node depends on each of its sources, in order.
fn expand_derived(
    graph: &mut DependencyGraph,
    id: &ResourceId,
    sources: &[ResourceId],
) -> Vec<ResourceId> {
    for (index, source) in sources.iter().enumerate() {
        graph.add_edge(
            id,
            source,
            DirectiveEdge {
                kind: ResourceKind::from_reference(&source.to_string()),
                directive_kind: DirectiveKind::File,
                directive: index,
                marker: RequiredMarker::Default,
                options: DirectiveOptions::new(),
                position: SourcePosition::new(1, 1),
            },
        );
    }
    graph
        .dependencies(id)
        .into_iter()
        .filter(|(_, edge)| edge.kind.has_dependencies())
        .map(|(child, _)| child.clone())
        .collect()
}

/// Turns the directives of a parsed document into edges, resolving targets
/// against the document's own location.
fn directive_edges(
    id: &ResourceId,
    parsed: &ParsedDocument,
) -> (Vec<EdgeRecord>, Vec<InvalidReference>) {
    let base = id.base_context();
    let mut edges = Vec::new();
    let mut invalid = Vec::new();

    'directives: for (index, directive) in parsed.directives.iter().enumerate() {
        let mut targets = Vec::with_capacity(directive.targets.len());
        for reference in &directive.targets {
            match identify(reference, &base) {
                Ok(target) => targets.push(target),
                Err(err) => {
                    let reason = match err {
                        ComposeError::InvalidReference { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    warn!(
                        target: "graph",
                        "{id}:{}: invalid reference '{reference}': {reason}",
                        directive.position
                    );
                    invalid.push(InvalidReference {
                        reference: reference.clone(),
                        reason,
                        directive: index,
                        marker: directive.marker,
                        position: directive.position,
                    });
                    continue 'directives;
                }
            }
        }

        let first = directive.targets.first().map_or("", String::as_str);
        let kind = directive.kind.resource_kind(first);
        let target = match kind.ai_task() {
            Some(task) => ResourceId::derived(task, targets),
            None => match targets.into_iter().next() {
                Some(target) => target,
                None => continue,
            },
        };
        edges.push(EdgeRecord {
            target,
            kind,
            directive_kind: directive.kind,
            directive: index,
            marker: directive.marker,
            options: directive.options.clone(),
            position: directive.position,
        });
    }
    (edges, invalid)
}
