use super::DependencyGraph;
use crate::core::{DirectiveKind, RequiredMarker, ResourceKind};
use crate::identity::{ContentHash, ResourceId};
use crate::markdown::{DirectiveOptions, merge_state};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Inputs a node is rendered with, besides its own content.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInputs {
    /// State inherited from the primary parent, before the node's own
    /// frontmatter is applied.
    pub state: Arc<Value>,
    /// Options of the directive through which the node was first reached.
    pub options: DirectiveOptions,
    pub directive_kind: Option<DirectiveKind>,
    /// Strongest marker over all incoming edges.
    pub marker: RequiredMarker,
    pub primary_parent: Option<ResourceId>,
    /// Hash over everything above plus the node kind. A cached artifact is
    /// only reused when its render key matches.
    pub render_key: ContentHash,
}

struct Visit {
    id: ResourceId,
    state: Arc<Value>,
    options: DirectiveOptions,
    directive_kind: Option<DirectiveKind>,
    parent: Option<ResourceId>,
}

/// Resolves [`NodeInputs`] for every node reachable from `roots`.
///
/// State flows top-down: each document merges its frontmatter over what it
/// inherited and passes the result to its children. A node reached from
/// several documents inherits from the first one that reaches it in a
/// depth-first walk of the roots in order, which keeps the result
/// deterministic.
#[must_use]
pub fn resolve_inputs(
    graph: &DependencyGraph,
    roots: &[ResourceId],
    initial_state: &Value,
) -> HashMap<ResourceId, NodeInputs> {
    let initial = Arc::new(initial_state.clone());
    let mut resolved: HashMap<ResourceId, NodeInputs> = HashMap::new();

    let mut stack: Vec<Visit> = roots
        .iter()
        .rev()
        .map(|root| Visit {
            id: root.clone(),
            state: initial.clone(),
            options: DirectiveOptions::new(),
            directive_kind: None,
            parent: None,
        })
        .collect();

    while let Some(visit) = stack.pop() {
        if resolved.contains_key(&visit.id) {
            continue;
        }
        let Some(node) = graph.node(&visit.id) else {
            continue;
        };

        let effective = match &node.frontmatter {
            Some(frontmatter) => {
                Arc::new(merge_state((*visit.state).clone(), &Value::Object(frontmatter.clone())))
            }
            None => visit.state.clone(),
        };

        for (child, edge) in graph.dependencies(&visit.id).into_iter().rev() {
            if !resolved.contains_key(child) {
                stack.push(Visit {
                    id: child.clone(),
                    state: effective.clone(),
                    options: edge.options.clone(),
                    directive_kind: Some(edge.directive_kind),
                    parent: Some(visit.id.clone()),
                });
            }
        }

        let render_key =
            render_key(node.kind, &visit.state, &visit.options, visit.directive_kind);
        resolved.insert(
            visit.id.clone(),
            NodeInputs {
                marker: graph.strongest_marker(&visit.id),
                state: visit.state,
                options: visit.options,
                directive_kind: visit.directive_kind,
                primary_parent: visit.parent,
                render_key,
            },
        );
    }
    resolved
}

fn render_key(
    kind: ResourceKind,
    state: &Value,
    options: &DirectiveOptions,
    directive_kind: Option<DirectiveKind>,
) -> ContentHash {
    let options = serde_json::to_value(options).unwrap_or(Value::Null);
    let directive = directive_kind.map(|k| k.to_string()).unwrap_or_default();
    ContentHash::combine([
        ContentHash::of(kind.to_string().as_bytes()),
        ContentHash::of_json(state),
        ContentHash::of_json(&options),
        ContentHash::of(directive.as_bytes()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SourcePosition;
    use crate::graph::DirectiveEdge;
    use serde_json::json;
    use std::path::PathBuf;

    fn id(name: &str) -> ResourceId {
        ResourceId::Local(PathBuf::from(format!("/{name}")))
    }

    fn edge(directive: usize, options: DirectiveOptions) -> DirectiveEdge {
        DirectiveEdge {
            kind: ResourceKind::Document,
            directive_kind: DirectiveKind::File,
            directive,
            marker: RequiredMarker::Default,
            options,
            position: SourcePosition::new(1, 1),
        }
    }

    fn graph() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        g.ensure_node(&id("root.md"), ResourceKind::Document);
        g.ensure_node(&id("other.md"), ResourceKind::Document);
        let mut opts = DirectiveOptions::new();
        opts.insert("level", "2");
        g.add_edge(&id("root.md"), &id("child.md"), edge(0, opts));
        g.add_edge(&id("other.md"), &id("child.md"), edge(0, DirectiveOptions::new()));
        g.node_mut(&id("root.md")).unwrap().frontmatter =
            json!({"title": "Root", "site": {"lang": "en"}}).as_object().cloned();
        g
    }

    #[test]
    fn test_state_flows_from_primary_parent() {
        let g = graph();
        let state = json!({"site": {"name": "x"}});
        let inputs = resolve_inputs(&g, &[id("root.md"), id("other.md")], &state);

        let root = &inputs[&id("root.md")];
        assert_eq!(*root.state, json!({"site": {"name": "x"}}));
        assert_eq!(root.primary_parent, None);

        let child = &inputs[&id("child.md")];
        assert_eq!(child.primary_parent, Some(id("root.md")));
        assert_eq!(
            *child.state,
            json!({"title": "Root", "site": {"name": "x", "lang": "en"}})
        );
        assert_eq!(child.options.get("level"), Some("2"));
    }

    #[test]
    fn test_root_order_decides_primary_parent() {
        let g = graph();
        let inputs = resolve_inputs(&g, &[id("other.md"), id("root.md")], &json!({}));
        assert_eq!(inputs[&id("child.md")].primary_parent, Some(id("other.md")));
    }

    #[test]
    fn test_render_key_changes_with_state() {
        let g = graph();
        let a = resolve_inputs(&g, &[id("root.md")], &json!({"v": 1}));
        let b = resolve_inputs(&g, &[id("root.md")], &json!({"v": 2}));
        let c = resolve_inputs(&g, &[id("root.md")], &json!({"v": 1}));
        assert_ne!(a[&id("child.md")].render_key, b[&id("child.md")].render_key);
        assert_eq!(a[&id("child.md")].render_key, c[&id("child.md")].render_key);
    }
}
