//! Commands driven in-process through the clap parser

use anyhow::Result;
use clap::Parser;
use mdweave::cli::Cli;
use mdweave::store::{FileStore, GraphStore};
use mdweave::test_utils::TestProject;
use std::path::{Path, PathBuf};

/// Writes a config file pointing the store into the project.
fn write_config(project: &TestProject) -> Result<PathBuf> {
    let path = project.temp_dir.path().join("mdweave.toml");
    std::fs::write(&path, format!("store_path = {:?}\nworkers = 2\n", project.store_path))?;
    Ok(path)
}

async fn run(config: &Path, args: &[&str]) -> Result<()> {
    let mut argv = vec!["mdweave", "--quiet", "--no-progress", "--config"];
    let config = config.to_string_lossy().into_owned();
    argv.push(&config);
    argv.extend_from_slice(args);

    let cli = Cli::try_parse_from(argv)?;
    let cli_config = cli.build_config();
    cli.execute_with_config(cli_config).await
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_render_writes_output_and_persists_store() -> Result<()> {
    let project = TestProject::new()?;
    let config = write_config(&project)?;
    let root = project.write("a.md", "# A\n::file b.md\n")?;
    project.write("b.md", "B\n")?;
    let out = project.temp_dir.path().join("dist").join("a.md");

    run(&config, &["render", &path_arg(&root), "--out", &path_arg(&out)]).await?;
    assert_eq!(std::fs::read_to_string(&out)?, "# A\nB\n");

    let store = FileStore::open(&project.store_path)?;
    assert!(store.get_cache_entry(&project.id("b.md"))?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_render_several_roots_into_a_directory() -> Result<()> {
    let project = TestProject::new()?;
    let config = write_config(&project)?;
    let a = project.write("a.md", "a\n")?;
    let b = project.write("guide/b.md", "b\n")?;
    let out = project.temp_dir.path().join("dist");

    run(&config, &["render", &path_arg(&a), &path_arg(&b), "--out", &path_arg(&out)]).await?;
    assert_eq!(std::fs::read_to_string(out.join("a.md"))?, "a\n");
    assert_eq!(std::fs::read_to_string(out.join("b.md"))?, "b\n");
    Ok(())
}

#[tokio::test]
async fn test_render_with_state_flags() -> Result<()> {
    let project = TestProject::new()?;
    let config = write_config(&project)?;
    let root = project.write("a.md", "Release {{ release.version }}\n")?;
    let out = project.temp_dir.path().join("a.out.md");

    run(
        &config,
        &[
            "render",
            &path_arg(&root),
            "--state",
            "templating=true",
            "--state",
            "release.version=1.2",
            "--out",
            &path_arg(&out),
        ],
    )
    .await?;
    assert!(std::fs::read_to_string(&out)?.starts_with("Release 1.2"));
    Ok(())
}

#[tokio::test]
async fn test_failed_root_is_an_error_but_others_are_written() -> Result<()> {
    let project = TestProject::new()?;
    let config = write_config(&project)?;
    let bad = project.write("bad.md", "::file missing.md!\n")?;
    let good = project.write("good.md", "good\n")?;
    let out = project.temp_dir.path().join("dist");

    let args = ["render", &path_arg(&bad), &path_arg(&good), "--out", &path_arg(&out)];
    let result = run(&config, &args).await;
    assert!(result.is_err());
    assert_eq!(std::fs::read_to_string(out.join("good.md"))?, "good\n");
    assert!(!out.join("bad.md").exists());
    Ok(())
}

#[tokio::test]
async fn test_cache_prune_and_clean() -> Result<()> {
    let project = TestProject::new()?;
    let config = write_config(&project)?;
    let a = project.write("a.md", "::file b.md\n")?;
    project.write("b.md", "b\n")?;
    let old = project.write("old.md", "old\n")?;
    let out = project.temp_dir.path().join("dist");

    run(&config, &["render", &path_arg(&a), &path_arg(&old), "--out", &path_arg(&out)]).await?;
    run(&config, &["cache", "info"]).await?;

    run(&config, &["cache", "prune", &path_arg(&a)]).await?;
    let store = FileStore::open(&project.store_path)?;
    assert!(store.get_cache_entry(&project.id("old.md"))?.is_none());
    assert!(store.get_cache_entry(&project.id("b.md"))?.is_some());

    run(&config, &["cache", "clean"]).await?;
    let store = FileStore::open(&project.store_path)?;
    assert!(store.resource_ids()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_graph_and_plan_commands_run() -> Result<()> {
    let project = TestProject::new()?;
    let config = write_config(&project)?;
    let a = project.write("a.md", "::file b.md\n")?;
    project.write("b.md", "b\n")?;

    run(&config, &["graph", &path_arg(&a)]).await?;
    run(&config, &["graph", &path_arg(&a), "--format", "json"]).await?;
    run(&config, &["plan", &path_arg(&a)]).await?;
    Ok(())
}

#[test]
fn test_quiet_conflicts_with_verbose() {
    assert!(Cli::try_parse_from(["mdweave", "-q", "-v", "render", "a.md"]).is_err());
}
