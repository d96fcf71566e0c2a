//! Composition of nested documents and derived resources

use anyhow::Result;
use mdweave::diagnostics::DiagnosticCode;
use serde_json::json;

use crate::common::Harness;

#[tokio::test]
async fn test_nested_documents_are_spliced_in_place() -> Result<()> {
    let h = Harness::new()?;
    h.write("guide.md", "# Guide\n::file parts/intro.md\n::file parts/usage.md\nThe end.\n")?;
    h.write("parts/intro.md", "---\ntitle: Intro\n---\nWelcome.\n")?;
    h.write("parts/usage.md", "Usage:\n::file ../shared/note.md\n")?;
    h.write("shared/note.md", "> a note\n\n")?;

    let doc = h.compose("guide.md").await?;
    assert_eq!(doc.content, "# Guide\nWelcome.\nUsage:\n> a note\nThe end.\n");
    assert!(doc.diagnostics.items.is_empty());
    assert_eq!(doc.diagnostics.stats.get("document").recomputed, 4);
    Ok(())
}

#[tokio::test]
async fn test_directives_in_code_fences_stay_literal() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "```\n::file missing.md!\n```\n")?;

    let doc = h.compose("a.md").await?;
    assert_eq!(doc.content, "```\n::file missing.md!\n```\n");
    Ok(())
}

#[tokio::test]
async fn test_frontmatter_layers_over_inherited_state() -> Result<()> {
    let h = Harness::new()?;
    h.write(
        "book.md",
        "---\ntemplating: true\nproduct: Weave\nedition: first\n---\n# {{ product }}\n::file chapter.md\n",
    )?;
    h.write(
        "chapter.md",
        "---\nedition: second\n---\n{{ product }}, {{ edition }} edition, {{ audience }}.\n",
    )?;

    let report = h.render_with_state(&["book.md"], &json!({"audience": "everyone"})).await?;
    let doc = report.documents[0].result.as_ref().map_err(Clone::clone)?;
    assert!(doc.content.contains("# Weave"), "got {:?}", doc.content);
    assert!(doc.content.contains("Weave, second edition, everyone."), "got {:?}", doc.content);
    Ok(())
}

#[tokio::test]
async fn test_templating_is_off_unless_enabled() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "Hello {{ name }}\n")?;

    let report = h.render_with_state(&["a.md"], &json!({"name": "world"})).await?;
    let doc = report.documents[0].result.as_ref().map_err(Clone::clone)?;
    assert_eq!(doc.content, "Hello {{ name }}\n");
    Ok(())
}

#[tokio::test]
async fn test_tables_and_images() -> Result<()> {
    let h = Harness::new()?;
    h.write("report.md", "::table data/sales.csv\n::image img/chart.png alt=Chart\n")?;
    h.write("data/sales.csv", "region,total\nnorth,10\n")?;
    h.write("img/chart.png", "not really a png")?;

    let doc = h.compose("report.md").await?;
    let chart = h.id("img/chart.png");
    assert_eq!(
        doc.content,
        format!("| region | total |\n| --- | --- |\n| north | 10 |\n![Chart]({chart})\n")
    );
    assert_eq!(h.images.calls(&chart), 1);
    Ok(())
}

#[tokio::test]
async fn test_ai_summary_over_composed_source() -> Result<()> {
    let h = Harness::new()?;
    h.write("digest.md", "# Digest\n::summarize notes.md\n")?;
    h.write("notes.md", "Alpha.\n::file more.md\n")?;
    h.write("more.md", "Beta.\n")?;

    let doc = h.compose("digest.md").await?;
    assert_eq!(doc.content, "# Digest\n[summary] Alpha.\nBeta.\n");
    assert_eq!(h.ai.calls(), 1);

    // Unchanged sources keep the derived artifact.
    h.compose("digest.md").await?;
    assert_eq!(h.ai.calls(), 1);

    h.write("more.md", "Gamma.\n")?;
    let doc = h.compose("digest.md").await?;
    assert_eq!(doc.content, "# Digest\n[summary] Alpha.\nGamma.\n");
    assert_eq!(h.ai.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_consolidation_of_several_sources() -> Result<()> {
    let h = Harness::new()?;
    h.write("all.md", "::consolidate a.md b.md\n")?;
    h.write("a.md", "First.\n")?;
    h.write("b.md", "Second.\n")?;

    let doc = h.compose("all.md").await?;
    assert_eq!(doc.content, "[consolidation] First. | Second.\n");
    Ok(())
}

#[tokio::test]
async fn test_html_with_scripts_is_flagged() -> Result<()> {
    let h = Harness::new()?;
    h.write("page.md", "::file widget.html\n")?;
    h.write("widget.html", "<div id=\"w\"></div><script>load()</script>\n")?;

    let doc = h.compose("page.md").await?;
    assert!(doc.content.starts_with("<div id=\"w\"></div>"));
    assert!(doc.diagnostics.has_code(DiagnosticCode::ClientScript));
    Ok(())
}
