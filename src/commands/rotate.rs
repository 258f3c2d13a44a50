use anyhow::Result;
use colored::Colorize;
use fanlog::config::Settings;
use fanlog::rotation_job::run_rotation_now;

/// Execute the rotate command
pub async fn execute(settings: &Settings) -> Result<()> {
    let registry = super::open_registry(settings).await?;

    println!("{}", "Running rotation...".yellow());
    let report = run_rotation_now(&registry).await;

    println!("{}", "✓ Rotation completed".green());
    println!();
    println!("{:<30} {:>10}", "Buckets rotated:", report.buckets);
    println!("{:<30} {:>10}", "Unbounded (skipped):", report.unbounded);
    println!("{:<30} {:>10}", "Records removed:", report.removed);

    if !report.per_bucket.is_empty() {
        println!();
        for (bucket, removed) in &report.per_bucket {
            println!("  {:<40} {:>10}", bucket.cyan(), removed);
        }
    }

    Ok(())
}
