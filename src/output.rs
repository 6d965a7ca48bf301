//! Colored terminal output helpers for the CLI binary.

use colored::Colorize;

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "error:".red().bold(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

pub fn print_verbose(msg: &str, verbose: bool) {
    if verbose {
        eprintln!("{} {}", "debug:".dimmed(), msg.dimmed());
    }
}

/// Render cache statistics for `--cache-stats`
pub fn format_cache_stats(name: &str, stats: &crate::cache::CacheStats) -> String {
    format!(
        "{name}: {} entries, {} hits / {} misses ({:.1}% hit rate)",
        stats.size,
        stats.hits,
        stats.misses,
        stats.hit_rate() * 100.0
    )
}
