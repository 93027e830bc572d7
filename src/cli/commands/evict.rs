//! Evict command - enforce the cache size budget.

use crate::cache::DiskCache;
use crate::config::Settings;

pub fn run(max_size_mb: Option<u64>, settings: &Settings) -> anyhow::Result<()> {
    let max_bytes = max_size_mb
        .map(|mb| mb.saturating_mul(1024 * 1024))
        .unwrap_or_else(|| settings.cache.max_size_bytes());

    let cache = DiskCache::new(&settings.cache.dir);
    let stats = cache.evict(max_bytes)?;

    println!(
        "Removed {} of {} indexes ({} -> {} bytes, budget {max_bytes})",
        stats.removed, stats.files, stats.bytes_before, stats.bytes_after
    );
    if stats.stale_temps_removed > 0 {
        println!("Removed {} abandoned temp files", stats.stale_temps_removed);
    }
    Ok(())
}
