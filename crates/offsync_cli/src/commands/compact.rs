//! Compact command implementation.

use super::{format_size, open_log};
use offsync_core::CompactionStats;
use offsync_storage::InMemoryBackend;
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting record log at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact(path, dry_run)?;

    println!("Compaction Analysis:");
    println!("  Live records:  {}", stats.live_records);
    println!("  Frames before: {}", stats.frames_before);
    println!("  Frames after:  {}", stats.frames_after);
    println!();
    println!("  Size before: {}", format_size(stats.bytes_before));
    println!("  Size after:  {}", format_size(stats.bytes_after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(stats.reclaimed_bytes()),
        if stats.bytes_before > 0 {
            (stats.reclaimed_bytes() as f64 / stats.bytes_before as f64) * 100.0
        } else {
            0.0
        }
    );

    if !dry_run {
        println!();
        println!("Compaction complete");
    }

    Ok(())
}

/// Compacts the log at `path`, or only measures the result on a dry run.
pub fn compact(path: &Path, dry_run: bool) -> Result<CompactionStats, Box<dyn std::error::Error>> {
    let log = open_log(path)?;
    if dry_run {
        let (_, stats) = log.compact_into(InMemoryBackend::new())?;
        return Ok(stats);
    }
    Ok(log.compact()?)
}
