use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct BenchmarkMetrics {
    // Cache Stats
    pub total_hot_hits: AtomicUsize,
    pub total_warm_hits: AtomicUsize,
    pub total_cache_misses: AtomicUsize,
    pub total_demotions: AtomicUsize,
    pub total_discards: AtomicUsize,
    pub total_skipped_writes: AtomicUsize,

    // Storage Stats
    pub total_blocks_loaded: AtomicUsize,
    pub total_load_time_us: AtomicU64,
    pub total_blocks_saved: AtomicUsize,
    pub total_save_time_us: AtomicU64,

    // Lighting Stats
    pub total_full_relights: AtomicUsize,
    pub total_full_relight_blocks: AtomicUsize,
    pub total_full_relight_time_us: AtomicU64,
    pub max_full_relight_time_us: AtomicU64,
    pub total_fast_relights: AtomicUsize,
    pub total_fast_relight_time_us: AtomicU64,

    // Generation Stats
    pub total_blocks_generated: AtomicUsize,
    pub total_generation_time_us: AtomicU64,

    // Session
    pub start_time: Option<Instant>,
    pub config_summary: String,
}

impl BenchmarkMetrics {
    pub fn new(config_summary: String) -> Self {
        Self {
            start_time: Some(Instant::now()),
            config_summary,
            ..Default::default()
        }
    }

    pub fn record_hot_hit(&self) {
        self.total_hot_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warm_hit(&self) {
        self.total_warm_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.total_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_demotion(&self) {
        self.total_demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discard(&self) {
        self.total_discards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_write(&self) {
        self.total_skipped_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self, duration: Duration) {
        self.total_blocks_loaded.fetch_add(1, Ordering::Relaxed);
        self.total_load_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_save(&self, duration: Duration) {
        self.total_blocks_saved.fetch_add(1, Ordering::Relaxed);
        self.total_save_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_full_relight(&self, duration: Duration, blocks: usize) {
        self.total_full_relights.fetch_add(1, Ordering::Relaxed);
        self.total_full_relight_blocks.fetch_add(blocks, Ordering::Relaxed);
        let us = duration.as_micros() as u64;
        self.total_full_relight_time_us.fetch_add(us, Ordering::Relaxed);
        self.max_full_relight_time_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn record_fast_relight(&self, duration: Duration) {
        self.total_fast_relights.fetch_add(1, Ordering::Relaxed);
        self.total_fast_relight_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_generation(&self, duration: Duration) {
        self.total_blocks_generated.fetch_add(1, Ordering::Relaxed);
        self.total_generation_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn generate_report(&self) -> String {
        let uptime = self.start_time.unwrap_or_else(Instant::now).elapsed();
        let ms = |v: &AtomicU64| v.load(Ordering::Relaxed) as f64 / 1000.0;
        let avg = |total: f64, n: usize| if n > 0 { total / n as f64 } else { 0.0 };

        // Cache stats
        let hot = self.total_hot_hits.load(Ordering::Relaxed);
        let warm = self.total_warm_hits.load(Ordering::Relaxed);
        let misses = self.total_cache_misses.load(Ordering::Relaxed);
        let total_requests = hot + warm + misses;
        let hit_rate = if total_requests > 0 { ((hot + warm) as f64 / total_requests as f64) * 100.0 } else { 0.0 };
        let demotions = self.total_demotions.load(Ordering::Relaxed);
        let discards = self.total_discards.load(Ordering::Relaxed);
        let skipped = self.total_skipped_writes.load(Ordering::Relaxed);

        let loaded = self.total_blocks_loaded.load(Ordering::Relaxed);
        let load_avg = avg(ms(&self.total_load_time_us), loaded);
        let saved = self.total_blocks_saved.load(Ordering::Relaxed);
        let save_avg = avg(ms(&self.total_save_time_us), saved);

        let full = self.total_full_relights.load(Ordering::Relaxed);
        let full_blocks = self.total_full_relight_blocks.load(Ordering::Relaxed);
        let full_total = ms(&self.total_full_relight_time_us);
        let full_max = ms(&self.max_full_relight_time_us);
        let fast = self.total_fast_relights.load(Ordering::Relaxed);
        let fast_avg = avg(ms(&self.total_fast_relight_time_us), fast);

        let generated = self.total_blocks_generated.load(Ordering::Relaxed);
        let gen_avg = avg(ms(&self.total_generation_time_us), generated);

        format!(
            "mc4 World Report\n\
             ================\n\
             Configuration: {}\n\
             Session Duration: {:.2?}\n\n\
             [Cache]\n\
             Tier 1 Hits: {}\n\
             Tier 2 Hits: {}\n\
             Misses: {}\n\
             Hit Rate: {:.1}%\n\
             Demotions: {}\n\
             Tier 2 Discards: {}\n\
             Skipped Writes: {}\n\n\
             [Storage Read]\n\
             Blocks Loaded: {}\n\
             Avg Time: {:.2} ms/block\n\n\
             [Storage Write]\n\
             Blocks Saved: {}\n\
             Avg Time: {:.2} ms/block\n\n\
             [Lighting]\n\
             Full Recomputes: {} ({} blocks)\n\
             Avg Time: {:.2} ms/recompute\n\
             Max Time: {:.2} ms\n\
             Fast Path Updates: {}\n\
             Avg Time: {:.2} ms/update\n\n\
             [Generation]\n\
             Blocks Generated: {}\n\
             Avg Time: {:.2} ms/block\n",
            self.config_summary,
            uptime,
            hot, warm, misses, hit_rate, demotions, discards, skipped,
            loaded, load_avg,
            saved, save_avg,
            full, full_blocks, avg(full_total, full), full_max,
            fast, fast_avg,
            generated, gen_avg
        )
    }
}
