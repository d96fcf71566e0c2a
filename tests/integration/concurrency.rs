//! Shared nodes across roots and concurrent invocations on one engine

use anyhow::Result;
use mdweave::config::EngineConfig;
use std::time::Duration;

use crate::common::{Harness, remote};

#[tokio::test]
async fn test_roots_sharing_a_remote_image_fetch_and_render_it_once() -> Result<()> {
    let h = Harness::new()?;
    let logo = remote("logo.png");
    h.remote.insert(&logo, "PNG");
    h.write("a.md", "A\n::image https://example.com/logo.png\n")?;
    h.write("b.md", "B\n::image https://example.com/logo.png\n")?;

    let report = h.render(&["a.md", "b.md"]).await?;
    assert!(report.all_succeeded());
    assert_eq!(h.remote.calls(&logo), 1);
    assert_eq!(h.images.calls(&logo), 1);
    for outcome in &report.documents {
        let doc = outcome.result.as_ref().map_err(Clone::clone)?;
        assert!(doc.content.ends_with("![logo.png](https://example.com/logo.png)\n"));
    }
    Ok(())
}

#[tokio::test]
async fn test_concurrent_invocations_share_in_flight_renders() -> Result<()> {
    let h = Harness::new()?;
    let logo = remote("logo.png");
    h.remote.insert(&logo, "PNG");
    h.images.set_delay(Duration::from_millis(200));
    h.write("a.md", "A\n::image https://example.com/logo.png\n")?;
    h.write("b.md", "B\n::image https://example.com/logo.png\n")?;

    let (a, b) = tokio::join!(h.render(&["a.md"]), h.render(&["b.md"]));
    let (a, b) = (a?, b?);
    assert!(a.all_succeeded() && b.all_succeeded());
    assert_eq!(h.remote.calls(&logo), 1);
    assert_eq!(h.images.calls(&logo), 1);
    Ok(())
}

#[tokio::test]
async fn test_wide_tree_with_a_single_worker() -> Result<()> {
    let config = EngineConfig {
        workers: Some(1),
        ..EngineConfig::default()
    };
    let h = Harness::with_config(config)?;

    let mut index = String::new();
    let mut expected = String::new();
    for i in 0..20 {
        h.write(&format!("parts/{i:02}.md"), &format!("part {i}\n"))?;
        index.push_str(&format!("::file parts/{i:02}.md\n"));
        expected.push_str(&format!("part {i}\n"));
    }
    h.write("index.md", &index)?;

    let doc = h.compose("index.md").await?;
    assert_eq!(doc.content, expected);
    assert_eq!(doc.diagnostics.stats.total_recomputed(), 21);
    Ok(())
}

#[tokio::test]
async fn test_slow_renders_run_in_parallel_within_a_layer() -> Result<()> {
    let config = EngineConfig {
        workers: Some(8),
        ..EngineConfig::default()
    };
    let h = Harness::with_config(config)?;
    h.documents.set_delay(Duration::from_millis(200));

    let mut index = String::new();
    for i in 0..8 {
        h.write(&format!("{i}.md"), "x\n")?;
        index.push_str(&format!("::file {i}.md\n"));
    }
    h.write("index.md", &index)?;

    let started = tokio::time::Instant::now();
    h.compose("index.md").await?;
    // Two layers of 200ms each; serial rendering would take nine times that.
    assert!(started.elapsed() < Duration::from_millis(1500), "took {:?}", started.elapsed());
    Ok(())
}

#[tokio::test]
async fn test_render_timeout_fails_the_node() -> Result<()> {
    let config = EngineConfig {
        render_timeout_secs: 1,
        ..EngineConfig::default()
    };
    let h = Harness::with_config(config)?;
    h.write("a.md", "::image slow.png?\nrest\n")?;
    h.write("slow.png", "PNG")?;
    h.images.set_delay(Duration::from_millis(1500));

    let doc = h.compose("a.md").await?;
    assert_eq!(doc.content, "\nrest\n");
    assert_eq!(doc.diagnostics.warnings().count(), 1);
    Ok(())
}
