//! Incremental re-rendering and cache reuse

use anyhow::Result;
use serde_json::json;

use crate::common::Harness;

fn content(report: &mdweave::engine::RenderReport, index: usize) -> String {
    match &report.documents[index].result {
        Ok(doc) => doc.content.clone(),
        Err(e) => panic!("root {index} failed: {e}"),
    }
}

#[tokio::test]
async fn test_unchanged_tree_is_served_from_cache() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "# A\n::file b.md\n::file c.md\n")?;
    h.write("b.md", "B\n")?;
    h.write("c.md", "C\n::file d.md\n")?;
    h.write("d.md", "D\n")?;

    let first = h.render(&["a.md"]).await?;
    assert_eq!(first.renderer_invocations, 4);

    let second = h.render(&["a.md"]).await?;
    assert_eq!(second.renderer_invocations, 0);
    assert_eq!(second.rendered, 0);
    assert_eq!(content(&first, 0), content(&second, 0));

    let stats = &second.documents[0].result.as_ref().map_err(Clone::clone)?.diagnostics.stats;
    assert_eq!(stats.total_cached(), 4);
    assert_eq!(stats.total_recomputed(), 0);
    Ok(())
}

#[tokio::test]
async fn test_changed_leaf_renders_only_the_leaf() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "# A\n::file b.md\n::file c.md\n")?;
    h.write("b.md", "B\n")?;
    h.write("c.md", "C\n")?;
    h.render(&["a.md"]).await?;

    h.write("c.md", "C2\n")?;
    let report = h.render(&["a.md"]).await?;
    assert_eq!(report.renderer_invocations, 1);
    assert_eq!(h.documents.calls(&h.id("c.md")), 2);
    assert_eq!(h.documents.calls(&h.id("a.md")), 1);
    assert_eq!(content(&report, 0), "# A\nB\nC2\n");
    Ok(())
}

#[tokio::test]
async fn test_parent_frontmatter_change_rerenders_children() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "---\ntemplating: true\nname: one\n---\n::file b.md\n::file c.md\n")?;
    h.write("b.md", "b is {{ name }}\n")?;
    h.write("c.md", "---\ntemplating: false\n---\nc is plain\n")?;
    let first = h.render(&["a.md"]).await?;
    assert_eq!(content(&first, 0), "b is one\nc is plain\n");

    h.write("a.md", "---\ntemplating: true\nname: two\n---\n::file b.md\n::file c.md\n")?;
    let second = h.render(&["a.md"]).await?;
    assert_eq!(content(&second, 0), "b is two\nc is plain\n");
    // The parent changed and both children inherit a different state.
    assert_eq!(second.renderer_invocations, 3);
    Ok(())
}

#[tokio::test]
async fn test_initial_state_is_part_of_the_cache_key() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "---\ntemplating: true\n---\nHello {{ who }}\n")?;

    let first = h.render_with_state(&["a.md"], &json!({"who": "Ada"})).await?;
    assert!(content(&first, 0).starts_with("Hello Ada"));

    let same = h.render_with_state(&["a.md"], &json!({"who": "Ada"})).await?;
    assert_eq!(same.renderer_invocations, 0);

    let other = h.render_with_state(&["a.md"], &json!({"who": "Grace"})).await?;
    assert_eq!(other.renderer_invocations, 1);
    assert!(content(&other, 0).starts_with("Hello Grace"));
    Ok(())
}

#[tokio::test]
async fn test_new_directive_renders_new_child_only() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "::file b.md\n")?;
    h.write("b.md", "B\n")?;
    h.write("c.md", "C\n")?;
    h.render(&["a.md"]).await?;

    h.write("a.md", "::file b.md\n::file c.md\n")?;
    let report = h.render(&["a.md"]).await?;
    assert_eq!(content(&report, 0), "B\nC\n");
    assert_eq!(report.renderer_invocations, 2);
    assert_eq!(h.documents.calls(&h.id("b.md")), 1);
    Ok(())
}

#[tokio::test]
async fn test_store_persists_across_engines() -> Result<()> {
    let h = Harness::persistent(mdweave::test_utils::TestProject::new()?)?;
    h.write("a.md", "# A\n::file b.md\n")?;
    h.write("b.md", "B\n")?;
    let first = h.render(&["a.md"]).await?;
    assert_eq!(first.renderer_invocations, 2);
    assert!(h.project.store_path.exists());

    let project = h.into_project();
    let reopened = Harness::persistent(project)?;
    let second = reopened.render(&["a.md"]).await?;
    assert_eq!(second.renderer_invocations, 0);
    assert_eq!(second.build.parsed, 0);
    assert_eq!(content(&first, 0), content(&second, 0));

    reopened.write("b.md", "B2\n")?;
    let third = reopened.render(&["a.md"]).await?;
    assert_eq!(third.renderer_invocations, 1);
    assert_eq!(content(&third, 0), "# A\nB2\n");
    Ok(())
}

#[tokio::test]
async fn test_plan_lists_only_dirty_nodes() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "::file b.md\n::file c.md\n")?;
    h.write("b.md", "B\n")?;
    h.write("c.md", "C\n")?;
    h.render(&["a.md"]).await?;

    h.write("b.md", "B2\n")?;
    let report = h.engine.generate_workplan(&[h.id("a.md")], &json!({})).await?;
    assert_eq!(report.plan.dirty_count(), 1);
    assert_eq!(report.plan.layers.len(), 1);
    assert_eq!(report.plan.layers[0].nodes, vec![h.id("b.md")]);

    // Planning does not render.
    assert_eq!(h.documents.calls(&h.id("b.md")), 1);
    Ok(())
}
