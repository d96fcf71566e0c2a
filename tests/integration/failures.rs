//! Cycles and failure propagation through `!`, `?` and unmarked directives

use anyhow::Result;
use mdweave::core::ComposeError;
use mdweave::diagnostics::{DiagnosticCode, Severity};
use std::time::Duration;

use crate::common::Harness;

#[tokio::test]
async fn test_cycle_fails_its_root_and_names_every_document() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "::file b.md\n")?;
    h.write("b.md", "::file c.md\n")?;
    h.write("c.md", "::file a.md\n")?;
    h.write("ok.md", "fine\n")?;

    let report = h.render(&["a.md", "ok.md"]).await?;
    match &report.documents[0].result {
        Err(ComposeError::CyclicDependency { root, cycle }) => {
            assert_eq!(root, &h.id("a.md"));
            assert_eq!(cycle, &vec![h.id("a.md"), h.id("b.md"), h.id("c.md"), h.id("a.md")]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
    assert_eq!(report.documents[1].result.as_ref().map_err(Clone::clone)?.content, "fine\n");
    Ok(())
}

#[tokio::test]
async fn test_required_missing_resource_fails_root() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "intro\n::file missing.md!\nend\n")?;

    let report = h.render(&["a.md"]).await?;
    match &report.documents[0].result {
        Err(ComposeError::RequiredResourceFailed { id, root, origin, .. }) => {
            assert_eq!(id, &h.id("missing.md"));
            assert_eq!(root, &h.id("a.md"));
            let origin = origin.as_ref().expect("origin of the directive");
            assert_eq!(origin.document, h.id("a.md"));
            assert_eq!(origin.position.line, 2);
        }
        other => panic!("expected a required failure, got {other:?}"),
    }
    // The root was abandoned before its own render.
    assert_eq!(h.documents.calls(&h.id("a.md")), 0);
    Ok(())
}

#[tokio::test]
async fn test_optional_missing_resource_renders_empty_with_warning() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "intro\n::file missing.md?\nend\n")?;

    let doc = h.compose("a.md").await?;
    assert_eq!(doc.content, "intro\n\nend\n");
    assert_eq!(doc.diagnostics.items.len(), 1);
    let warning = &doc.diagnostics.items[0];
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.code, DiagnosticCode::OptionalResourceFailed);
    Ok(())
}

#[tokio::test]
async fn test_unmarked_missing_resource_warns_differently() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "intro\n::file missing.md\nend\n")?;

    let doc = h.compose("a.md").await?;
    assert_eq!(doc.content, "intro\n\nend\n");
    assert_eq!(doc.diagnostics.warnings().count(), 1);
    assert!(doc.diagnostics.has_code(DiagnosticCode::MissingContent));
    Ok(())
}

#[tokio::test]
async fn test_required_failure_deep_in_the_tree_fails_every_root_reaching_it() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "::file shared.md\n")?;
    h.write("b.md", "::file shared.md\n")?;
    h.write("shared.md", "::file gone.md!\n")?;
    h.write("c.md", "independent\n")?;

    let report = h.render(&["a.md", "b.md", "c.md"]).await?;
    for (index, root) in ["a.md", "b.md"].iter().enumerate() {
        match &report.documents[index].result {
            Err(ComposeError::RequiredResourceFailed { id, root: failed, .. }) => {
                assert_eq!(id, &h.id("gone.md"));
                assert_eq!(failed, &h.id(root));
            }
            other => panic!("expected {root} to fail, got {other:?}"),
        }
    }
    assert!(report.documents[2].result.is_ok());
    assert!(!report.all_succeeded());
    Ok(())
}

#[tokio::test]
async fn test_required_renderer_failure_carries_the_message() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "::file b.md!\n")?;
    h.write("b.md", "B\n")?;
    h.documents.fail_on(&h.id("b.md"), "boom");

    let report = h.render(&["a.md"]).await?;
    match &report.documents[0].result {
        Err(ComposeError::RequiredResourceFailed { id, reason, .. }) => {
            assert_eq!(id, &h.id("b.md"));
            assert!(reason.contains("boom"), "reason was {reason}");
        }
        other => panic!("expected a required failure, got {other:?}"),
    }

    // Once the renderer recovers, the failure is not cached.
    h.documents.clear_failures();
    let doc = h.compose("a.md").await?;
    assert_eq!(doc.content, "B\n");
    Ok(())
}

#[tokio::test]
async fn test_async_page_keeps_previous_output_when_its_renderer_fails() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "::file widget.html\n")?;
    h.write("widget.html", "<p>v1</p><script>x()</script>\n")?;
    let first = h.compose("a.md").await?;
    assert!(first.content.starts_with("<p>v1</p>"));

    h.write("widget.html", "<p>v2</p><script>x()</script>\n")?;
    h.pages.fail_on(&h.id("widget.html"), "headless browser crashed");
    let second = h.compose("a.md").await?;
    assert!(second.content.starts_with("<p>v1</p>"));
    let error = second
        .diagnostics
        .errors()
        .find(|d| d.code == DiagnosticCode::AsyncRenderFailed)
        .expect("async render failure is reported");
    assert!(error.message.contains("headless browser crashed"));

    h.pages.clear_failures();
    let third = h.compose("a.md").await?;
    assert!(third.content.starts_with("<p>v2</p>"));
    Ok(())
}

#[tokio::test]
async fn test_invalid_reference_is_reported() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "::file ftp://example.com/x.md\nafter\n")?;

    let doc = h.compose("a.md").await?;
    assert_eq!(doc.content, "\nafter\n");
    assert!(doc.diagnostics.has_code(DiagnosticCode::InvalidReference));
    Ok(())
}

#[tokio::test]
async fn test_missing_root_fails_alone() -> Result<()> {
    let h = Harness::new()?;
    h.write("ok.md", "ok\n")?;

    let report = h.render(&["nope.md", "ok.md"]).await?;
    assert!(report.documents[0].result.is_err());
    assert!(report.documents[1].result.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_required_failure_cancels_slow_siblings_in_flight() -> Result<()> {
    let h = Harness::new()?;
    h.write("a.md", "::file slow.md\n::file zz_missing.md!\n")?;
    h.write("slow.md", "slow\n")?;
    h.documents.set_delay(Duration::from_secs(3));

    let started = tokio::time::Instant::now();
    let report = h.render(&["a.md"]).await?;
    assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
    assert!(matches!(
        report.documents[0].result,
        Err(ComposeError::RequiredResourceFailed { .. })
    ));
    assert!(h.documents.calls(&h.id("slow.md")) <= 1);
    assert_eq!(h.documents.calls(&h.id("a.md")), 0);
    Ok(())
}
