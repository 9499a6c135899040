use std::path::PathBuf;

use anyhow::{Context, Result};
use png_bomb::{generate_all, GeneratorConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Files land next to the executable.
fn out_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("locating the running executable")?;
    let dir = exe
        .parent()
        .context("executable has no parent directory")?
        .to_path_buf();
    Ok(dir)
}

fn main() -> Result<()> {
    init_tracing();

    let config = GeneratorConfig::new(out_dir()?);
    tracing::info!(out_dir = %config.out_dir.display(), "generating bombs");

    let reports = generate_all(&config).context("generating bomb files")?;
    for report in &reports {
        println!(
            "{}: {} bytes on disk, {} bytes inflated ({:.0}x)",
            report.path.display(),
            report.file_bytes,
            report.logical_bytes,
            report.ratio()
        );
    }
    Ok(())
}
