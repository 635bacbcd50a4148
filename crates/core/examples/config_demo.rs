//! Example demonstrating the configuration and job file formats
//!
//! Run with: cargo run --package recast-core --example config_demo

use recast_core::domain::config::{JobConfig, RecastConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("recast_core=debug,info")
        .init();

    println!("=== Recast Configuration Demo ===\n");

    let dir = std::env::temp_dir().join("recast-config-demo");

    // 1. Save and reload the default configuration
    println!("1. Saving default configuration...");
    let config = RecastConfig::default();
    let config_path = dir.join("config.toml");
    config.save_to_file(&config_path).await?;
    let loaded = RecastConfig::load_from_file(&config_path).await?;
    println!(
        "   ✓ block_bytes={} tolerance={}ms fallback={}",
        loaded.mix.block_bytes,
        loaded.mix.tolerance_ms,
        loaded.mix.fallback_target.format()
    );

    // 2. Write a sample job
    println!("\n2. Writing sample job...");
    let job_path = dir.join("job.toml");
    JobConfig::sample().save_to_file(&job_path).await?;
    println!("{}", tokio::fs::read_to_string(&job_path).await?);

    // 3. Reload it; segment paths now point next to the job file
    println!("3. Reloading job...");
    let job = JobConfig::load_from_file(&job_path).await?;
    for stream in &job.streams {
        for segment in &stream.segments {
            println!(
                "   {} / {} at {}s -> {}",
                stream.name,
                segment.source_id,
                segment.start_secs,
                segment.path.display()
            );
        }
    }
    println!(
        "   output -> {}",
        job.output_path(&loaded.output).display()
    );

    tokio::fs::remove_dir_all(&dir).await?;
    println!("\n=== Demo Complete ===");
    Ok(())
}
