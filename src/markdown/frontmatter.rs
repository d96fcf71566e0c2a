//! Frontmatter extraction and state merging.
//!
//! A document may open with a YAML block delimited by `---` lines. Its
//! mapping is merged over the state inherited from the document's primary
//! parent before the document is rendered, and the merged state flows on to
//! everything the document transcludes.

use gray_matter::Matter;
use gray_matter::engine::YAML;
use serde_json::Value;
use tracing::warn;

/// Byte range of a frontmatter block, delimiters included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontmatterBoundaries {
    pub start: usize,
    pub end: usize,
}

/// Finds the frontmatter block at the very start of `content`.
///
/// The opening `---` must be the first non-blank text and sit on its own
/// line; the closing `---` must also be a line of its own. `end` points just
/// past the closing line's newline.
#[must_use]
pub fn frontmatter_boundaries(content: &str) -> Option<FrontmatterBoundaries> {
    let start = content.find("---")?;
    if !content[..start].trim().is_empty() {
        return None;
    }

    let after_open = start + 3;
    let first_line_end = content[after_open..].find('\n').map(|pos| after_open + pos + 1)?;
    if !content[after_open..first_line_end].trim().is_empty() {
        return None;
    }

    let mut offset = first_line_end;
    for line in content[first_line_end..].split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some(FrontmatterBoundaries {
                start,
                end: offset + line.len(),
            });
        }
        offset += line.len();
    }
    None
}

/// Parses the frontmatter of `content` into a JSON object.
///
/// Returns `None` when there is no frontmatter, when it is empty, or when it
/// is not a mapping. Malformed YAML is logged and treated as absent so one bad
/// header never blocks composition.
#[must_use]
pub fn parse_frontmatter(content: &str) -> Option<serde_json::Map<String, Value>> {
    frontmatter_boundaries(content)?;

    let matter = Matter::<YAML>::new();
    let parsed = match matter.parse::<serde_yaml::Value>(content) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(target: "graph", "ignoring unparseable frontmatter: {e}");
            return None;
        }
    };

    match parsed.data.map(serde_json::to_value) {
        Some(Ok(Value::Object(map))) => Some(map),
        Some(Ok(Value::Null)) | None => None,
        Some(Ok(_)) => {
            warn!(target: "graph", "ignoring frontmatter that is not a mapping");
            None
        }
        Some(Err(e)) => {
            warn!(target: "graph", "ignoring frontmatter that cannot be converted: {e}");
            None
        }
    }
}

/// Merges `overrides` into `base`.
///
/// Objects merge recursively; any other override value replaces the base
/// value outright, including arrays.
#[must_use]
pub fn merge_state(mut base: Value, overrides: &Value) -> Value {
    match (base.as_object_mut(), overrides.as_object()) {
        (Some(base_obj), Some(override_obj)) => {
            for (key, value) in override_obj {
                let merged = match base_obj.remove(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_state(existing, value)
                    }
                    _ => value.clone(),
                };
                base_obj.insert(key.clone(), merged);
            }
            base
        }
        _ => overrides.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_boundaries() {
        let content = "---\ntitle: x\n---\nbody\n";
        let b = frontmatter_boundaries(content).unwrap();
        assert_eq!(b.start, 0);
        assert_eq!(&content[b.end..], "body\n");
    }

    #[test]
    fn test_no_frontmatter_when_not_leading() {
        assert!(frontmatter_boundaries("text\n---\na: 1\n---\n").is_none());
        assert!(frontmatter_boundaries("---\nunterminated: yes\n").is_none());
        assert!(frontmatter_boundaries("--- inline\n---\n").is_none());
    }

    #[test]
    fn test_parse_frontmatter_mapping() {
        let map = parse_frontmatter("---\ntitle: Guide\ntags: [a, b]\n---\nbody").unwrap();
        assert_eq!(map.get("title"), Some(&json!("Guide")));
        assert_eq!(map.get("tags"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn test_parse_frontmatter_rejects_scalars_and_garbage() {
        assert!(parse_frontmatter("---\njust a string\n---\nbody").is_none());
        assert!(parse_frontmatter("---\n: : bad: [\n---\nbody").is_none());
        assert!(parse_frontmatter("no header").is_none());
    }

    #[test]
    fn test_merge_state_is_deep() {
        let base = json!({"site": {"name": "a", "lang": "en"}, "tags": [1]});
        let overrides = json!({"site": {"name": "b"}, "tags": [2, 3], "extra": true});
        let merged = merge_state(base, &overrides);
        assert_eq!(
            merged,
            json!({"site": {"name": "b", "lang": "en"}, "tags": [2, 3], "extra": true})
        );
    }
}
