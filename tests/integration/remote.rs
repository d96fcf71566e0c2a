//! Remote resources: TTL freshness, stale fallback and 404 handling

use anyhow::Result;
use chrono::Duration;
use mdweave::core::{ComposeError, RemoteFailure};
use mdweave::diagnostics::DiagnosticCode;

use crate::common::{Harness, age_entry, remote};

const LOGO: &str = "before\n::image https://example.com/logo.png\nafter\n";
const LOGO_RENDERED: &str = "before\n![logo.png](https://example.com/logo.png)\nafter\n";

#[tokio::test]
async fn test_remote_within_ttl_is_not_fetched_again() -> Result<()> {
    let h = Harness::new()?;
    let logo = remote("logo.png");
    h.remote.insert(&logo, "PNG");
    h.write("a.md", LOGO)?;

    assert_eq!(h.compose("a.md").await?.content, LOGO_RENDERED);
    assert_eq!(h.remote.calls(&logo), 1);

    let second = h.render(&["a.md"]).await?;
    assert_eq!(second.renderer_invocations, 0);
    assert_eq!(h.remote.calls(&logo), 1);
    Ok(())
}

#[tokio::test]
async fn test_expired_remote_with_same_content_is_only_rechecked() -> Result<()> {
    let h = Harness::new()?;
    let logo = remote("logo.png");
    h.remote.insert(&logo, "PNG");
    h.write("a.md", LOGO)?;
    h.render(&["a.md"]).await?;

    age_entry(&h.store, &logo, Duration::hours(25))?;
    let report = h.render(&["a.md"]).await?;
    assert_eq!(h.remote.calls(&logo), 2);
    assert_eq!(report.renderer_invocations, 0);

    let entry = h.store.get_cache_entry(&logo)?.expect("entry kept");
    assert!(!entry.stale);
    assert!(chrono::Utc::now() - entry.checked_at < Duration::hours(1));
    Ok(())
}

#[tokio::test]
async fn test_expired_remote_document_with_new_content_is_rerendered() -> Result<()> {
    let h = Harness::new()?;
    let notes = remote("notes.md");
    h.remote.insert(&notes, "v1\n");
    h.write("a.md", "::file https://example.com/notes.md\n")?;
    assert_eq!(h.compose("a.md").await?.content, "v1\n");

    // Inside the TTL the new content is not seen.
    h.remote.insert(&notes, "v2\n");
    assert_eq!(h.compose("a.md").await?.content, "v1\n");

    age_entry(&h.store, &notes, Duration::hours(25))?;
    assert_eq!(h.compose("a.md").await?.content, "v2\n");
    Ok(())
}

#[tokio::test]
async fn test_unreachable_remote_serves_stale_copy_with_warning() -> Result<()> {
    let h = Harness::new()?;
    let logo = remote("logo.png");
    h.remote.insert(&logo, "PNG");
    h.write("a.md", LOGO)?;
    h.render(&["a.md"]).await?;

    age_entry(&h.store, &logo, Duration::hours(25))?;
    h.remote.fail_remote(
        &logo,
        RemoteFailure::Connection {
            message: "connection refused".into(),
        },
    );
    let doc = h.compose("a.md").await?;
    assert_eq!(doc.content, LOGO_RENDERED);
    assert_eq!(doc.diagnostics.warnings().count(), 1);
    assert!(doc.diagnostics.has_code(DiagnosticCode::StaleContent));
    assert_eq!(h.engine.summary()?.stale, 1);

    // Stale entries keep their old timestamp, so the next render re-checks.
    h.remote.insert(&logo, "PNG");
    let doc = h.compose("a.md").await?;
    assert!(doc.diagnostics.items.is_empty());
    assert_eq!(h.engine.summary()?.stale, 0);
    assert_eq!(h.remote.calls(&logo), 3);
    Ok(())
}

#[tokio::test]
async fn test_remote_gone_renders_empty_until_ttl_elapses() -> Result<()> {
    let h = Harness::new()?;
    let logo = remote("logo.png");
    h.remote.insert(&logo, "PNG");
    h.write("a.md", LOGO)?;
    h.render(&["a.md"]).await?;

    age_entry(&h.store, &logo, Duration::hours(25))?;
    h.remote.fail_remote(&logo, RemoteFailure::NotFound);
    let doc = h.compose("a.md").await?;
    assert_eq!(doc.content, "before\n\nafter\n");
    assert!(doc.diagnostics.has_code(DiagnosticCode::RemoteNotFound));
    assert_eq!(h.engine.summary()?.gone, 1);

    // Within the new TTL the 404 is remembered without another request.
    let calls = h.remote.calls(&logo);
    let doc = h.compose("a.md").await?;
    assert_eq!(doc.content, "before\n\nafter\n");
    assert!(doc.diagnostics.has_code(DiagnosticCode::RemoteNotFound));
    assert_eq!(h.remote.calls(&logo), calls);

    // Back after the TTL.
    age_entry(&h.store, &logo, Duration::hours(25))?;
    h.remote.insert(&logo, "PNG");
    let doc = h.compose("a.md").await?;
    assert_eq!(doc.content, LOGO_RENDERED);
    assert!(doc.diagnostics.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_directive_ttl_overrides_default() -> Result<()> {
    let h = Harness::new()?;
    let logo = remote("logo.png");
    h.remote.insert(&logo, "PNG");
    h.write("a.md", "::image https://example.com/logo.png ttl=60\n")?;
    h.render(&["a.md"]).await?;

    age_entry(&h.store, &logo, Duration::minutes(2))?;
    h.render(&["a.md"]).await?;
    assert_eq!(h.remote.calls(&logo), 2);
    Ok(())
}

#[tokio::test]
async fn test_first_fetch_failure_follows_the_marker() -> Result<()> {
    let h = Harness::new()?;
    let logo = remote("logo.png");
    h.remote.fail_remote(&logo, RemoteFailure::Timeout);
    h.write("optional.md", "::image https://example.com/logo.png?\n")?;
    h.write("required.md", "::image https://example.com/logo.png!\n")?;

    let report = h.render(&["optional.md", "required.md"]).await?;
    let optional = report.documents[0].result.as_ref().map_err(Clone::clone)?;
    assert_eq!(optional.content, "\n");
    assert!(optional.diagnostics.has_code(DiagnosticCode::OptionalResourceFailed));
    assert!(matches!(
        report.documents[1].result,
        Err(ComposeError::RequiredResourceFailed { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_relative_references_in_remote_documents_resolve_against_the_url() -> Result<()> {
    let h = Harness::new()?;
    h.remote.insert(&remote("docs/guide.md"), "Guide:\n::file part.md\n");
    h.remote.insert(&remote("docs/part.md"), "remote part\n");
    h.write("a.md", "::file https://example.com/docs/guide.md\n")?;

    let doc = h.compose("a.md").await?;
    assert_eq!(doc.content, "Guide:\nremote part\n");
    assert_eq!(h.remote.calls(&remote("docs/part.md")), 1);
    Ok(())
}

#[tokio::test]
async fn test_gone_remote_document_drops_its_dependencies_until_ttl_elapses() -> Result<()> {
    let h = Harness::new()?;
    let notes = remote("notes.md");
    let part = h.project.write("part.md", "part\n")?;
    h.remote.insert(&notes, &format!("Notes:\n::file file://{}!\n", part.display()));
    h.write("a.md", "::file https://example.com/notes.md\n")?;
    assert_eq!(h.compose("a.md").await?.content, "Notes:\npart\n");

    age_entry(&h.store, &notes, Duration::hours(25))?;
    h.remote.fail_remote(&notes, RemoteFailure::NotFound);
    std::fs::remove_file(&part)?;

    let gone = h.compose("a.md").await?;
    assert_eq!(gone.content, "\n");
    assert!(gone.diagnostics.has_code(DiagnosticCode::RemoteNotFound));

    // Still inside the new TTL: the required child of the missing document
    // must not come back.
    let again = h.compose("a.md").await?;
    assert_eq!(again.content, gone.content);
    assert!(again.diagnostics.has_code(DiagnosticCode::RemoteNotFound));
    assert_eq!(h.engine.build_graph(&[h.id("a.md")]).await?.graph.node_count(), 2);
    Ok(())
}
