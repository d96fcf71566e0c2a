//! Built-in renderers for every resource kind.

use super::{AiProvider, AiRequest, Fragment, RenderOutput, RenderRequest, Renderer};
use crate::core::DirectiveKind;
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::markdown::{DocumentParser, Segment, merge_state};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tera::{Context as TeraContext, Tera};
use tracing::debug;

static SLOT_PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"__MDWEAVE_SLOT_(\d+)__").ok());

/// Renders markdown documents.
///
/// Frontmatter is stripped and every directive becomes a slot. When the
/// effective state (inherited state with the document's frontmatter merged
/// over it) has `templating: true`, the text is rendered as a Tera template
/// with that state as context.
pub struct DocumentRenderer {
    parser: Arc<dyn DocumentParser>,
}

impl DocumentRenderer {
    pub fn new(parser: Arc<dyn DocumentParser>) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl Renderer for DocumentRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
        let parsed = self
            .parser
            .parse(&request.text())
            .with_context(|| format!("Failed to parse {}", request.id))?;

        let state = match &parsed.frontmatter {
            Some(frontmatter) => {
                merge_state((*request.state).clone(), &Value::Object(frontmatter.clone()))
            }
            None => (*request.state).clone(),
        };

        if state.get("templating").and_then(Value::as_bool) != Some(true) {
            let mut fragment = Fragment::empty();
            for segment in &parsed.segments {
                match segment {
                    Segment::Text(text) => fragment.push_text(text),
                    Segment::Directive(index) => fragment.push_slot(*index),
                }
            }
            return Ok(RenderOutput::new(fragment));
        }

        // Directives are swapped for placeholders so template blocks may
        // span them, then split back into slots after rendering.
        let mut template = String::new();
        for segment in &parsed.segments {
            match segment {
                Segment::Text(text) => template.push_str(text),
                Segment::Directive(index) => {
                    template.push_str(&format!("__MDWEAVE_SLOT_{index}__"));
                }
            }
        }

        debug!(target: "render", "templating {}", request.id);
        let context = TeraContext::from_serialize(&state)
            .with_context(|| format!("State for {} is not an object", request.id))?;
        let rendered = Tera::one_off(&template, &context, false)
            .map_err(|e| anyhow!("Template error in {}: {}", request.id, tera_message(&e)))?;

        Ok(RenderOutput::new(split_slots(&rendered)))
    }
}

fn tera_message(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message.replace("__tera_one_off", "document")
}

fn split_slots(rendered: &str) -> Fragment {
    let Some(re) = SLOT_PLACEHOLDER.as_ref() else {
        return Fragment::text(rendered);
    };
    let mut fragment = Fragment::empty();
    let mut last = 0;
    for caps in re.captures_iter(rendered) {
        let (Some(whole), Some(index)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Ok(index) = index.as_str().parse() else {
            continue;
        };
        fragment.push_text(&rendered[last..whole.start()]);
        fragment.push_slot(index);
        last = whole.end();
    }
    fragment.push_text(&rendered[last..]);
    fragment
}

/// Passes HTML through. Pages with scripts get a note, since anything they
/// would generate on load is not part of the output.
pub struct HtmlRenderer;

#[async_trait]
impl Renderer for HtmlRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
        let text = request.text();
        let output = RenderOutput::new(Fragment::text(text.clone()));
        if text.to_ascii_lowercase().contains("<script") {
            return Ok(output.with_note(
                Diagnostic::warning(
                    DiagnosticCode::ClientScript,
                    format!("{} uses client-side scripts that are not executed", request.id),
                )
                .with_resource(&request.id),
            ));
        }
        Ok(output)
    }
}

/// Embeds images as markdown image links.
pub struct ImageRenderer;

#[async_trait]
impl Renderer for ImageRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
        let alt =
            request.options.get("alt").map_or_else(|| request.id.short_name(), str::to_string);
        Ok(RenderOutput::new(Fragment::text(format!("![{alt}]({})\n", request.id))))
    }
}

/// Embeds audio clips as an HTML `<audio>` element.
pub struct AudioRenderer;

#[async_trait]
impl Renderer for AudioRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
        Ok(RenderOutput::new(Fragment::text(format!(
            "<audio controls src=\"{}\"></audio>\n",
            request.id
        ))))
    }
}

/// Renders tabular data.
///
/// CSV and TSV become markdown tables; JSON is passed through in a fenced
/// block. A `::chart` directive wraps the raw data in a `chart` fence, with
/// the `type` option as the chart type.
pub struct TableRenderer;

#[async_trait]
impl Renderer for TableRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
        let text = request.text();
        let name = request.id.to_string().to_ascii_lowercase();
        let name = name.split(['?', '#']).next().unwrap_or_default();

        if request.directive_kind == Some(DirectiveKind::Chart) {
            let chart_type = request.options.get("type").unwrap_or("bar");
            return Ok(RenderOutput::new(Fragment::text(format!(
                "```chart type={chart_type}\n{}\n```\n",
                text.trim_end()
            ))));
        }

        if name.ends_with(".json") {
            let value: Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", request.id))?;
            let pretty = serde_json::to_string_pretty(&value)?;
            return Ok(RenderOutput::new(Fragment::text(format!("```json\n{pretty}\n```\n"))));
        }

        let tabs = name.ends_with(".tsv") || request.options.get("delimiter") == Some("tab");
        let delimiter = if tabs {
            '\t'
        } else {
            ','
        };
        Ok(RenderOutput::new(Fragment::text(markdown_table(&text, delimiter))))
    }
}

fn markdown_table(text: &str, delimiter: char) -> String {
    let rows: Vec<Vec<String>> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| split_record(line, delimiter))
        .collect();
    let Some(header) = rows.first() else {
        return String::new();
    };
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);

    let format_row = |row: &[String]| {
        let cells: Vec<String> = (0..width)
            .map(|i| row.get(i).map_or_else(String::new, |c| c.replace('|', "\\|")))
            .collect();
        format!("| {} |\n", cells.join(" | "))
    };

    let mut out = format_row(header);
    out.push_str(&format!("|{}\n", " --- |".repeat(width)));
    for row in &rows[1..] {
        out.push_str(&format_row(row));
    }
    out
}

/// Splits one delimited record. Double quotes group a field; `""` inside a
/// quoted field is a literal quote.
fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => {
                fields.push(field.trim().to_string());
                field.clear();
            }
            c => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

/// Renders AI-derived resources through an [`AiProvider`].
pub struct AiRenderer {
    provider: Option<Arc<dyn AiProvider>>,
}

impl AiRenderer {
    pub fn new(provider: Option<Arc<dyn AiProvider>>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Renderer for AiRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
        let task = request
            .kind
            .ai_task()
            .ok_or_else(|| anyhow!("{} is not an AI-derived resource", request.id))?;
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| anyhow!("No AI provider configured for {task}"))?;

        let text = provider
            .generate(&AiRequest {
                task,
                inputs: request.inputs.clone(),
                options: request.options.clone(),
            })
            .await
            .with_context(|| format!("AI provider failed to produce {}", request.id))?;

        let mut text = text.trim_end().to_string();
        text.push('\n');
        Ok(RenderOutput::new(Fragment::text(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AiTask, ResourceKind};
    use crate::identity::ResourceId;
    use crate::markdown::{DirectiveOptions, DirectiveParser};
    use crate::render::{ComposedInput, FragmentPart};
    use serde_json::json;
    use std::path::PathBuf;

    fn request(name: &str, kind: ResourceKind, content: &str) -> RenderRequest {
        RenderRequest {
            id: ResourceId::Local(PathBuf::from(format!("/docs/{name}"))),
            kind,
            content: Arc::from(content.as_bytes()),
            state: Arc::new(json!({})),
            options: DirectiveOptions::new(),
            directive_kind: None,
            inputs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_document_slots_and_frontmatter() {
        let renderer = DocumentRenderer::new(Arc::new(DirectiveParser::new()));
        let req =
            request("a.md", ResourceKind::Document, "---\ntitle: A\n---\n# A\n::file b.md\nend\n");
        let out = renderer.render(&req).await.unwrap();
        assert_eq!(
            out.fragment.parts,
            vec![
                FragmentPart::Text("# A\n".into()),
                FragmentPart::Slot(0),
                FragmentPart::Text("\nend\n".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_document_templating_uses_merged_state() {
        let renderer = DocumentRenderer::new(Arc::new(DirectiveParser::new()));
        let mut req = request(
            "a.md",
            ResourceKind::Document,
            "---\ntitle: Local\n---\n# {{ title }} for {{ site }}\n::file b.md\n{% if site %}done{% endif %}\n",
        );
        req.state = Arc::new(json!({"templating": true, "site": "docs", "title": "Inherited"}));
        let out = renderer.render(&req).await.unwrap();
        assert_eq!(
            out.fragment.parts,
            vec![
                FragmentPart::Text("# Local for docs\n".into()),
                FragmentPart::Slot(0),
                FragmentPart::Text("\ndone\n".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_document_without_templating_keeps_braces() {
        let renderer = DocumentRenderer::new(Arc::new(DirectiveParser::new()));
        let req = request("a.md", ResourceKind::Document, "{{ literal }}\n");
        let out = renderer.render(&req).await.unwrap();
        assert_eq!(out.fragment.plain_text(), "{{ literal }}\n");
    }

    #[tokio::test]
    async fn test_html_with_script_gets_note() {
        let out = HtmlRenderer
            .render(&request("p.html", ResourceKind::Html, "<p>x</p><SCRIPT>go()</SCRIPT>"))
            .await
            .unwrap();
        assert_eq!(out.notes.len(), 1);
        assert_eq!(out.notes[0].code, DiagnosticCode::ClientScript);

        let plain =
            HtmlRenderer.render(&request("p.html", ResourceKind::Html, "<p>x</p>")).await.unwrap();
        assert!(plain.notes.is_empty());
    }

    #[tokio::test]
    async fn test_image_and_audio_embeds() {
        let mut req = request("logo.png", ResourceKind::Image, "");
        req.options.insert("alt", "Logo");
        let out = ImageRenderer.render(&req).await.unwrap();
        assert_eq!(out.fragment.plain_text(), "![Logo](/docs/logo.png)\n");

        let out = AudioRenderer.render(&request("a.mp3", ResourceKind::Audio, "")).await.unwrap();
        assert_eq!(out.fragment.plain_text(), "<audio controls src=\"/docs/a.mp3\"></audio>\n");
    }

    #[tokio::test]
    async fn test_csv_becomes_markdown_table() {
        let req = request("t.csv", ResourceKind::TableData, "name,note\na,\"x, y\"\nb|c,z\n");
        let out = TableRenderer.render(&req).await.unwrap();
        assert_eq!(
            out.fragment.plain_text(),
            "| name | note |\n| --- | --- |\n| a | x, y |\n| b\\|c | z |\n"
        );
    }

    #[tokio::test]
    async fn test_chart_and_json() {
        let mut req = request("t.csv", ResourceKind::TableData, "a,1\n");
        req.directive_kind = Some(DirectiveKind::Chart);
        req.options.insert("type", "line");
        let out = TableRenderer.render(&req).await.unwrap();
        assert_eq!(out.fragment.plain_text(), "```chart type=line\na,1\n```\n");

        let req = request("t.json", ResourceKind::TableData, "{\"a\":1}");
        let out = TableRenderer.render(&req).await.unwrap();
        assert_eq!(out.fragment.plain_text(), "```json\n{\n  \"a\": 1\n}\n```\n");

        let bad = request("t.json", ResourceKind::TableData, "{");
        assert!(TableRenderer.render(&bad).await.is_err());
    }

    struct Upper;

    #[async_trait]
    impl AiProvider for Upper {
        async fn generate(&self, request: &AiRequest) -> Result<String> {
            Ok(request.inputs.iter().map(|i| i.content.to_uppercase()).collect::<Vec<_>>().join(""))
        }
    }

    #[tokio::test]
    async fn test_ai_renderer_requires_provider() {
        let mut req = request("s", ResourceKind::Ai(AiTask::Summary), "");
        req.inputs.push(ComposedInput {
            id: ResourceId::Local(PathBuf::from("/docs/n.md")),
            content: "notes".into(),
        });

        let err = AiRenderer::new(None).render(&req).await.unwrap_err();
        assert!(err.to_string().contains("No AI provider"));

        let out = AiRenderer::new(Some(Arc::new(Upper))).render(&req).await.unwrap();
        assert_eq!(out.fragment.plain_text(), "NOTES\n");
    }
}
