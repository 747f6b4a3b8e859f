//! Frame statistics for debugging and performance analysis.
//!
//! Each [`Stage`](crate::Stage) owns one [`RenderStats`]. Counters accumulate
//! until [`RenderStats::reset`]; [`RenderStats::snapshot`] copies them out.
//! A summary is logged at debug level once per second of rendering.

use std::time::{Duration, Instant};

/// What one traversal did, reported by the batcher.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TraversalCounts {
    pub nodes_visited: u64,
    pub nodes_recomputed: u64,
    pub nodes_culled: u64,
    pub quads_emitted: u64,
    pub quads_coalesced: u64,
    pub draw_batches: u64,
    pub render_targets_rendered: u64,
    pub render_targets_failed: u64,
}

/// Snapshot of accumulated render statistics.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub traversal: TraversalCounts,
    pub textures_evicted: u64,
    pub bytes_reclaimed: u64,
}

#[derive(Debug)]
pub struct RenderStats {
    totals: StatsSnapshot,
    window: StatsSnapshot,
    last_print: Option<Instant>,
}

impl Default for RenderStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderStats {
    pub fn new() -> Self {
        Self {
            totals: StatsSnapshot::default(),
            window: StatsSnapshot::default(),
            last_print: None,
        }
    }

    /// Record a frame that ran a traversal.
    pub fn record_frame_rendered(&mut self, counts: &TraversalCounts) {
        for stats in [&mut self.totals, &mut self.window] {
            stats.frames_rendered += 1;
            let t = &mut stats.traversal;
            t.nodes_visited += counts.nodes_visited;
            t.nodes_recomputed += counts.nodes_recomputed;
            t.nodes_culled += counts.nodes_culled;
            t.quads_emitted += counts.quads_emitted;
            t.quads_coalesced += counts.quads_coalesced;
            t.draw_batches += counts.draw_batches;
            t.render_targets_rendered += counts.render_targets_rendered;
            t.render_targets_failed += counts.render_targets_failed;
        }
    }

    /// Record a tick that had nothing to draw.
    pub fn record_frame_skipped(&mut self) {
        self.totals.frames_skipped += 1;
        self.window.frames_skipped += 1;
    }

    pub fn record_eviction(&mut self, evicted: usize, bytes: u64) {
        for stats in [&mut self.totals, &mut self.window] {
            stats.textures_evicted += evicted as u64;
            stats.bytes_reclaimed += bytes;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.totals.clone()
    }

    pub fn reset(&mut self) {
        self.totals = StatsSnapshot::default();
        self.window = StatsSnapshot::default();
    }

    /// Log the per-second summary when due.
    pub fn end_frame(&mut self, now: Instant) {
        let last = *self.last_print.get_or_insert(now);
        if now.saturating_duration_since(last) < Duration::from_secs(1) {
            return;
        }

        let w = &self.window;
        let visited = w.traversal.nodes_visited;
        let cull_rate = if visited > 0 {
            (w.traversal.nodes_culled as f64 / visited as f64) * 100.0
        } else {
            0.0
        };
        log::debug!(
            "[Render Stats] frames={} rendered={} skipped={}",
            w.frames_rendered + w.frames_skipped,
            w.frames_rendered,
            w.frames_skipped
        );
        log::debug!(
            "  nodes: visited={} recomputed={} culled={} cull_rate={:.1}%",
            visited,
            w.traversal.nodes_recomputed,
            w.traversal.nodes_culled,
            cull_rate
        );
        log::debug!(
            "  quads: emitted={} coalesced={} batches={} targets={} failed_targets={}",
            w.traversal.quads_emitted,
            w.traversal.quads_coalesced,
            w.traversal.draw_batches,
            w.traversal.render_targets_rendered,
            w.traversal.render_targets_failed
        );
        if w.textures_evicted > 0 {
            log::debug!(
                "  textures: evicted={} reclaimed={} bytes",
                w.textures_evicted,
                w.bytes_reclaimed
            );
        }

        self.window = StatsSnapshot::default();
        self.last_print = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(visited: u64, culled: u64) -> TraversalCounts {
        TraversalCounts {
            nodes_visited: visited,
            nodes_culled: culled,
            quads_emitted: visited - culled,
            ..TraversalCounts::default()
        }
    }

    #[test]
    fn test_frame_counters() {
        let mut stats = RenderStats::new();
        stats.record_frame_rendered(&counts(10, 2));
        stats.record_frame_rendered(&counts(4, 0));
        stats.record_frame_skipped();
        let s = stats.snapshot();
        assert_eq!(s.frames_rendered, 2);
        assert_eq!(s.frames_skipped, 1);
        assert_eq!(s.traversal.nodes_visited, 14);
        assert_eq!(s.traversal.nodes_culled, 2);
        assert_eq!(s.traversal.quads_emitted, 12);
    }

    #[test]
    fn test_eviction_counters() {
        let mut stats = RenderStats::new();
        stats.record_eviction(3, 1024);
        stats.record_eviction(1, 16);
        let s = stats.snapshot();
        assert_eq!(s.textures_evicted, 4);
        assert_eq!(s.bytes_reclaimed, 1040);
    }

    #[test]
    fn test_end_frame_keeps_totals() {
        let mut stats = RenderStats::new();
        let start = Instant::now();
        stats.end_frame(start);
        stats.record_frame_rendered(&counts(1, 0));
        stats.end_frame(start + Duration::from_secs(2));
        assert_eq!(stats.snapshot().frames_rendered, 1);
        assert_eq!(stats.window, StatsSnapshot::default());
    }

    #[test]
    fn test_reset_clears_all_counters() {
        let mut stats = RenderStats::new();
        stats.record_frame_rendered(&counts(3, 1));
        stats.record_frame_skipped();
        stats.record_eviction(1, 1);
        assert_ne!(stats.snapshot(), StatsSnapshot::default());
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
