use super::frontmatter::{frontmatter_boundaries, parse_frontmatter};
use super::{Directive, DirectiveOptions, DocumentParser, ParsedDocument, Segment};
use crate::core::{DirectiveKind, RequiredMarker, SourcePosition};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static DIRECTIVE_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\s*)::([A-Za-z][A-Za-z0-9_-]*)(?:\s+(.*?))?\s*$").ok());

static OPTION_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_-]*)=(.*)$").ok());

/// Parser for the line-oriented `::kind target key=value` syntax.
///
/// A directive occupies a whole line. Everything else, including directives
/// inside fenced code blocks, is literal text.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveParser;

impl DirectiveParser {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn parse_line(line: &str, line_number: usize) -> Option<Directive> {
        let caps = DIRECTIVE_LINE.as_ref()?.captures(line.trim_end_matches(['\n', '\r']))?;
        let indent = caps.get(1).map_or(0, |m| m.as_str().chars().count());
        let keyword = caps.get(2)?.as_str();
        let kind: DirectiveKind = match keyword.parse() {
            Ok(kind) => kind,
            Err(_) => {
                debug!(
                    target: "graph",
                    "line {line_number}: unknown directive '::{keyword}', kept as text"
                );
                return None;
            }
        };

        let mut targets = Vec::new();
        let mut options = DirectiveOptions::new();
        let mut marker = RequiredMarker::Default;

        for token in tokenize(caps.get(3).map_or("", |m| m.as_str())) {
            if let Some(opt) = OPTION_TOKEN.as_ref().and_then(|re| re.captures(&token)) {
                options.insert(&opt[1], unquote(&opt[2]));
                continue;
            }
            let mut token = token.as_str();
            if let Some(found) = token.chars().last().and_then(RequiredMarker::from_suffix) {
                token = &token[..token.len() - 1];
                marker = found;
            }
            let target = unquote(token).to_string();
            if !target.is_empty() {
                targets.push(target);
            }
        }

        if targets.is_empty() {
            debug!(
                target: "graph",
                "line {line_number}: '::{keyword}' has no target, kept as text"
            );
            return None;
        }
        if targets.len() > 1 && !kind.accepts_many_targets() {
            debug!(
                target: "graph",
                "line {line_number}: '::{keyword}' takes one target, ignoring {} extra",
                targets.len() - 1
            );
            targets.truncate(1);
        }

        Some(Directive {
            kind,
            targets,
            options,
            marker,
            position: SourcePosition::new(line_number, indent + 1),
        })
    }
}

impl DocumentParser for DirectiveParser {
    fn parse(&self, content: &str) -> anyhow::Result<ParsedDocument> {
        let frontmatter = parse_frontmatter(content);
        let body_start = frontmatter_boundaries(content).map_or(0, |b| b.end);
        let mut line_number = content[..body_start].matches('\n').count();

        let mut doc = ParsedDocument {
            frontmatter,
            ..ParsedDocument::default()
        };
        let mut text = String::new();
        let mut fence: Option<&str> = None;

        for line in content[body_start..].split_inclusive('\n') {
            line_number += 1;
            let trimmed = line.trim_start();

            if let Some(open) = fence {
                if trimmed.starts_with(open) {
                    fence = None;
                }
                text.push_str(line);
                continue;
            }
            if trimmed.starts_with("```") {
                fence = Some("```");
                text.push_str(line);
                continue;
            }
            if trimmed.starts_with("~~~") {
                fence = Some("~~~");
                text.push_str(line);
                continue;
            }

            match Self::parse_line(line, line_number) {
                Some(directive) => {
                    if !text.is_empty() {
                        doc.segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    doc.segments.push(Segment::Directive(doc.directives.len()));
                    doc.directives.push(directive);
                    // The directive's line break stays in the text that follows.
                    if line.ends_with('\n') {
                        text.push('\n');
                    }
                }
                None => text.push_str(line),
            }
        }

        if !text.is_empty() {
            doc.segments.push(Segment::Text(text));
        }
        Ok(doc)
    }
}

/// Splits on whitespace, keeping double-quoted runs together.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in input.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ParsedDocument {
        DirectiveParser::new().parse(content).unwrap()
    }

    #[test]
    fn test_parses_directives_in_order_with_positions() {
        let doc =
            parse("# Title\n\n::file intro.md!\ntext\n  ::image logo.png? alt=\"The logo\"\n");
        assert_eq!(doc.directives.len(), 2);

        let first = &doc.directives[0];
        assert_eq!(first.kind, DirectiveKind::File);
        assert_eq!(first.targets, vec!["intro.md"]);
        assert_eq!(first.marker, RequiredMarker::Required);
        assert_eq!(first.position, SourcePosition::new(3, 1));

        let second = &doc.directives[1];
        assert_eq!(second.marker, RequiredMarker::Optional);
        assert_eq!(second.options.get("alt"), Some("The logo"));
        assert_eq!(second.position, SourcePosition::new(5, 3));
    }

    #[test]
    fn test_quoted_target_with_marker() {
        let doc = parse("::file \"my notes.md\"!\n::image \"a b.png\"?\n");
        assert_eq!(doc.directives[0].targets, vec!["my notes.md"]);
        assert_eq!(doc.directives[0].marker, RequiredMarker::Required);
        assert_eq!(doc.directives[1].targets, vec!["a b.png"]);
        assert_eq!(doc.directives[1].marker, RequiredMarker::Optional);
    }

    #[test]
    fn test_segments_interleave_text_and_slots() {
        let doc = parse("before\n::file a.md\nafter\n");
        assert_eq!(
            doc.segments,
            vec![
                Segment::Text("before\n".into()),
                Segment::Directive(0),
                Segment::Text("\nafter\n".into()),
            ]
        );
    }

    #[test]
    fn test_ignores_directives_in_code_fences() {
        let doc =
            parse("```\n::file hidden.md\n```\n~~~md\n::file also.md\n~~~\n::file shown.md\n");
        assert_eq!(doc.directives.len(), 1);
        assert_eq!(doc.directives[0].targets, vec!["shown.md"]);
    }

    #[test]
    fn test_unknown_kind_and_missing_target_are_text() {
        let doc = parse("::video clip.mp4\n::file\n");
        assert!(doc.directives.is_empty());
        assert_eq!(doc.segments, vec![Segment::Text("::video clip.mp4\n::file\n".into())]);
    }

    #[test]
    fn test_frontmatter_offsets_line_numbers() {
        let doc = parse("---\ntitle: x\n---\n::file a.md\n");
        assert_eq!(doc.frontmatter.unwrap().get("title").unwrap(), "x");
        assert_eq!(doc.directives[0].position.line, 4);
        assert_eq!(doc.segments[0], Segment::Directive(0));
    }

    #[test]
    fn test_consolidate_takes_many_targets_and_options() {
        let doc = parse("::consolidate a.md b.md https://x.org/c.md?q=1 ttl=60\n");
        let d = &doc.directives[0];
        assert_eq!(d.targets, vec!["a.md", "b.md", "https://x.org/c.md?q=1"]);
        assert_eq!(d.options.ttl_secs(), Some(60));

        let single = parse("::summarize a.md b.md\n");
        assert_eq!(single.directives[0].targets, vec!["a.md"]);
    }
}
