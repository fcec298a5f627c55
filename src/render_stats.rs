//! Batching statistics for debugging and performance analysis.
//!
//! Enable stats by compiling with the `render-stats` feature:
//! ```bash
//! cargo run --example headless_frame --features render-stats
//! ```
//!
//! Stats are printed every second when enabled, showing frame counts,
//! draw calls, batch splits and merges, and uploaded bytes.

/// Snapshot of accumulated render statistics.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub draw_calls: u64,
    pub batch_splits: u64,
    pub batch_merges: u64,
    pub force_splits: u64,
    pub pool_reuses: u64,
    pub uploads: u64,
    pub uploaded_bytes: u64,
}

#[cfg(feature = "render-stats")]
mod inner {
    use super::StatsSnapshot;
    use std::cell::RefCell;
    use std::time::Instant;

    thread_local! {
        static STATS: RefCell<RenderStats> = RefCell::new(RenderStats::new());
    }

    struct RenderStats {
        counters: StatsSnapshot,
        last_print: Instant,
    }

    impl RenderStats {
        fn new() -> Self {
            Self {
                counters: StatsSnapshot::default(),
                last_print: Instant::now(),
            }
        }

        fn reset(&mut self) {
            self.counters = StatsSnapshot::default();
            self.last_print = Instant::now();
        }
    }

    fn update(f: impl FnOnce(&mut StatsSnapshot)) {
        STATS.with(|s| f(&mut s.borrow_mut().counters));
    }

    /// Record a frame that reached `end_frame`, printing a summary once a second.
    #[inline]
    pub fn record_frame_rendered() {
        STATS.with(|s| {
            let mut stats = s.borrow_mut();
            stats.counters.frames_rendered += 1;

            if stats.last_print.elapsed().as_secs() >= 1 {
                let c = &stats.counters;
                let frames = c.frames_rendered.max(1);
                eprintln!(
                    "[Render Stats] frames={} skipped={} draws={} ({:.1}/frame)",
                    c.frames_rendered,
                    c.frames_skipped,
                    c.draw_calls,
                    c.draw_calls as f64 / frames as f64
                );
                eprintln!(
                    "  batches: splits={} merges={} forced={} pool_reuse={}",
                    c.batch_splits, c.batch_merges, c.force_splits, c.pool_reuses
                );
                eprintln!("  uploads: count={} bytes={}", c.uploads, c.uploaded_bytes);
                stats.reset();
            }
        });
    }

    /// Record a frame that was abandoned or skipped.
    #[inline]
    pub fn record_frame_skipped() {
        update(|c| c.frames_skipped += 1);
    }

    #[inline]
    pub fn record_draw_call() {
        update(|c| c.draw_calls += 1);
    }

    #[inline]
    pub fn record_batch_split() {
        update(|c| c.batch_splits += 1);
    }

    #[inline]
    pub fn record_batch_merge() {
        update(|c| c.batch_merges += 1);
    }

    /// Record a split forced by a full batch.
    #[inline]
    pub fn record_force_split() {
        update(|c| c.force_splits += 1);
    }

    /// Record a batch handed out from the pool instead of freshly allocated.
    #[inline]
    pub fn record_pool_reuse() {
        update(|c| c.pool_reuses += 1);
    }

    #[inline]
    pub fn record_upload(bytes: usize) {
        update(|c| {
            c.uploads += 1;
            c.uploaded_bytes += bytes as u64;
        });
    }

    /// Return a snapshot of the current stats (for testing).
    pub fn get_stats() -> StatsSnapshot {
        STATS.with(|s| s.borrow().counters.clone())
    }

    /// Reset all stats to zero (for test isolation).
    pub fn reset_stats() {
        STATS.with(|s| s.borrow_mut().reset());
    }
}

#[cfg(feature = "render-stats")]
pub use inner::*;

// No-op implementations when feature is disabled - these get completely inlined away

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn get_stats() -> StatsSnapshot {
    StatsSnapshot::default()
}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn reset_stats() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_frame_rendered() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_frame_skipped() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_draw_call() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_batch_split() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_batch_merge() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_force_split() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_pool_reuse() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_upload(_bytes: usize) {}

#[cfg(test)]
#[cfg(feature = "render-stats")]
mod tests {
    use super::*;

    /// Tests share the thread-local when run on the same thread.
    fn setup() {
        reset_stats();
    }

    #[test]
    fn test_frame_counters() {
        setup();
        record_frame_rendered();
        record_frame_rendered();
        record_frame_skipped();
        let s = get_stats();
        assert_eq!(s.frames_rendered, 2);
        assert_eq!(s.frames_skipped, 1);
    }

    #[test]
    fn test_upload_bytes_accumulate() {
        setup();
        record_upload(80);
        record_upload(20);
        let s = get_stats();
        assert_eq!(s.uploads, 2);
        assert_eq!(s.uploaded_bytes, 100);
    }

    #[test]
    fn test_reset_clears_everything() {
        setup();
        record_batch_split();
        record_batch_merge();
        record_force_split();
        record_pool_reuse();
        record_draw_call();
        reset_stats();
        assert_eq!(get_stats(), StatsSnapshot::default());
    }
}
