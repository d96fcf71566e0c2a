//! Helpers shared by CLI commands.

use crate::diagnostics::Diagnostics;
use crate::engine::{RenderReport, RootOutcome};
use crate::identity::{BaseContext, ResourceId, identify};
use crate::utils::atomic_write;
use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

/// Turns command-line references into identifiers, relative to the working
/// directory.
pub fn resolve_roots(references: &[String]) -> Result<Vec<ResourceId>> {
    if references.is_empty() {
        bail!("No documents given");
    }
    let base = BaseContext::current_dir()?;
    references
        .iter()
        .map(|r| identify(r, &base).with_context(|| format!("Invalid document reference '{r}'")))
        .collect()
}

/// Parses `key=value` pairs into the initial state.
///
/// Values that parse as JSON (numbers, booleans, arrays, quoted strings) keep
/// their type; anything else is a string. Dotted keys build nested objects.
pub fn parse_state(pairs: &[String]) -> Result<Value> {
    let mut state = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid state '{pair}': expected key=value");
        };
        let key = key.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            bail!("Invalid state key in '{pair}'");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

        let mut parts: Vec<&str> = key.split('.').collect();
        let Some(last) = parts.pop() else {
            continue;
        };
        let mut target = &mut state;
        for part in parts {
            let entry = target
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            let Some(next) = entry.as_object_mut() else {
                bail!("State key '{key}' conflicts with the value set for '{part}'");
            };
            target = next;
        }
        target.insert(last.to_string(), value);
    }
    Ok(Value::Object(state))
}

/// Prints the diagnostics of one document to stderr.
pub fn print_diagnostics(root: &ResourceId, diagnostics: &Diagnostics) {
    for item in &diagnostics.items {
        eprintln!("{} {}", format!("{}:", root.short_name()).dimmed(), item.to_colored_string());
    }
}

/// Prints a one-line summary of a render to stderr.
pub fn print_summary(report: &RenderReport) {
    let ok = report.documents.iter().filter(|d| d.result.is_ok()).count();
    let failed = report.documents.len() - ok;
    let line = format!(
        "{ok} composed, {failed} failed; {} nodes rendered, {} renderer calls",
        report.rendered, report.renderer_invocations
    );
    if failed == 0 {
        eprintln!("{} {line}", "✓".green());
    } else {
        eprintln!("{} {line}", "✗".red());
    }
}

/// Writes composed documents.
///
/// Without `out`, every document goes to stdout. With a single root `out` is
/// the output file; with several it is a directory receiving one file per
/// root, named after the root.
pub fn write_outputs(documents: &[RootOutcome], out: Option<&Path>) -> Result<()> {
    let composed: Vec<_> = documents.iter().filter_map(|d| d.result.as_ref().ok()).collect();
    let Some(out) = out else {
        for document in composed {
            print!("{}", document.content);
        }
        return Ok(());
    };

    if documents.len() == 1 {
        if let Some(document) = composed.first() {
            atomic_write(out, document.content.as_bytes())?;
        }
        return Ok(());
    }

    let mut used = HashSet::new();
    for document in composed {
        let mut name = output_name(&document.root);
        let mut n = 1;
        while !used.insert(name.clone()) {
            n += 1;
            name = format!("{}-{n}.md", output_stem(&document.root));
        }
        let path = out.join(&name);
        atomic_write(&path, document.content.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

fn output_stem(root: &ResourceId) -> String {
    let name = root.short_name();
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

fn output_name(root: &ResourceId) -> String {
    format!("{}.md", output_stem(root))
}

/// Converts failed roots into one error, after printing each.
pub fn report_failures(documents: &[RootOutcome]) -> Result<()> {
    let mut failed = 0;
    for document in documents {
        if let Err(err) = &document.result {
            eprintln!("{} {err}", "error:".red().bold());
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} documents could not be composed", documents.len());
    }
    Ok(())
}
