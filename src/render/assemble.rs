use super::{Fragment, FragmentPart};
use crate::cache::{ConsistencyPolicy, FailureDisposition};
use crate::core::{ComposeError, DirectiveOrigin};
use crate::diagnostics::{Diagnostic, DiagnosticCode, Diagnostics};
use crate::graph::DependencyGraph;
use crate::identity::ResourceId;
use serde::Serialize;
use std::collections::HashMap;

/// The finished output for one root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedDocument {
    pub root: ResourceId,
    pub content: String,
    pub diagnostics: Diagnostics,
}

/// Where assembly reads node results from.
pub trait ArtifactSource {
    /// Fragment to use for `id`, cached or freshly rendered.
    fn artifact(&self, id: &ResourceId) -> Option<Fragment>;

    /// Why `id` has no artifact, if it failed.
    fn failure(&self, id: &ResourceId) -> Option<ComposeError>;

    /// Diagnostics attached to `id` itself.
    fn notes(&self, id: &ResourceId) -> Vec<Diagnostic>;
}

/// Fills slots with the composed output of the nodes they point at.
///
/// Assembly walks the graph below a root in post-order with an explicit
/// stack; each node is composed once and reused wherever it appears.
pub struct Assembler<'a, S: ArtifactSource + ?Sized> {
    graph: &'a DependencyGraph,
    source: &'a S,
}

impl<'a, S: ArtifactSource + ?Sized> Assembler<'a, S> {
    pub fn new(graph: &'a DependencyGraph, source: &'a S) -> Self {
        Self {
            graph,
            source,
        }
    }

    /// Composes `root`, returning the text and the diagnostics collected on
    /// the way in document order.
    #[must_use]
    pub fn compose(&self, root: &ResourceId) -> (String, Vec<Diagnostic>) {
        let mut memo: HashMap<ResourceId, String> = HashMap::new();
        let mut diagnostics = Vec::new();
        let mut stack: Vec<(ResourceId, bool)> = vec![(root.clone(), false)];

        while let Some((id, children_done)) = stack.pop() {
            if memo.contains_key(&id) {
                continue;
            }
            if !children_done {
                stack.push((id.clone(), true));
                for (child, _) in self.graph.dependencies(&id).into_iter().rev() {
                    if !memo.contains_key(child) {
                        stack.push((child.clone(), false));
                    }
                }
                continue;
            }

            let text = self.compose_node(&id, &memo, &mut diagnostics);
            diagnostics.extend(self.source.notes(&id));
            memo.insert(id, text);
        }

        (memo.remove(root).unwrap_or_default(), diagnostics)
    }

    fn compose_node(
        &self,
        id: &ResourceId,
        memo: &HashMap<ResourceId, String>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> String {
        let Some(fragment) = self.source.artifact(id) else {
            return String::new();
        };
        let deps = self.graph.dependencies(id);
        let node = self.graph.node(id);
        let mut out = String::new();

        for part in &fragment.parts {
            let index = match part {
                FragmentPart::Text(text) => {
                    out.push_str(text);
                    continue;
                }
                FragmentPart::Slot(index) => *index,
            };

            let origin_at = |position| DirectiveOrigin {
                document: id.clone(),
                position,
            };

            if let Some((child, edge)) = deps.iter().find(|(_, e)| e.directive == index) {
                if let Some(err) = self.source.failure(child) {
                    if let FailureDisposition::Warn(code) =
                        ConsistencyPolicy::failure_disposition(edge.marker)
                    {
                        diagnostics.push(
                            Diagnostic::warning(code, format!("'{child}' left empty: {err}"))
                                .with_resource(child)
                                .with_origin(origin_at(edge.position)),
                        );
                    }
                    continue;
                }
                if let Some(text) = memo.get(*child) {
                    out.push_str(text.trim_end_matches(['\n', '\r']));
                }
                continue;
            }

            let invalid = node
                .and_then(|n| n.invalid_references.iter().find(|r| r.directive == index));
            if let Some(invalid) = invalid
                && ConsistencyPolicy::failure_disposition(invalid.marker)
                    != FailureDisposition::Fatal
            {
                diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticCode::InvalidReference,
                        format!("invalid reference '{}': {}", invalid.reference, invalid.reason),
                    )
                    .with_origin(origin_at(invalid.position)),
                );
            }
        }
        out
    }
}
