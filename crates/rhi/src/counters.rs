//! Per-frame GPU work counters.
//!
//! The device holds an injected [`CounterSink`]; command lists report draws,
//! dispatches and binds to it and the frame loop resets it at frame
//! boundaries. [`FrameCounters`] is the default atomic implementation.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    Draw,
    Dispatch,
    PipelineBind,
    VertexBufferBind,
    IndexBufferBind,
    DescriptorFlush,
    Barrier,
    RenderPass,
    Submission,
}

impl Counter {
    pub const COUNT: usize = 9;

    pub const ALL: [Counter; Counter::COUNT] = [
        Counter::Draw,
        Counter::Dispatch,
        Counter::PipelineBind,
        Counter::VertexBufferBind,
        Counter::IndexBufferBind,
        Counter::DescriptorFlush,
        Counter::Barrier,
        Counter::RenderPass,
        Counter::Submission,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Counter::Draw => "draw",
            Counter::Dispatch => "dispatch",
            Counter::PipelineBind => "pipeline_bind",
            Counter::VertexBufferBind => "vertex_buffer_bind",
            Counter::IndexBufferBind => "index_buffer_bind",
            Counter::DescriptorFlush => "descriptor_flush",
            Counter::Barrier => "barrier",
            Counter::RenderPass => "render_pass",
            Counter::Submission => "submission",
        }
    }
}

/// Observability hook for recorded GPU work.
pub trait CounterSink: Send + Sync {
    fn increment(&self, counter: Counter);

    /// Called at frame boundaries.
    fn reset(&self);

    /// Current values, if the sink keeps any.
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot::default()
    }
}

/// Point-in-time copy of all counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    values: [u64; Counter::COUNT],
}

impl CounterSnapshot {
    #[inline]
    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter.index()]
    }
}

impl std::fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for counter in Counter::ALL {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}={}", counter.name(), self.get(counter))?;
        }
        Ok(())
    }
}

/// Lock-free counter sink.
#[derive(Debug, Default)]
pub struct FrameCounters {
    values: [AtomicU64; Counter::COUNT],
}

impl FrameCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter.index()].load(Ordering::Relaxed)
    }
}

impl CounterSink for FrameCounters {
    fn increment(&self, counter: Counter) {
        self.values[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for value in &self.values {
            value.store(0, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> CounterSnapshot {
        let mut snapshot = CounterSnapshot::default();
        for counter in Counter::ALL {
            snapshot.values[counter.index()] = self.get(counter);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_reset() {
        let counters = FrameCounters::new();
        counters.increment(Counter::Draw);
        counters.increment(Counter::Draw);
        counters.increment(Counter::Dispatch);

        assert_eq!(counters.get(Counter::Draw), 2);
        assert_eq!(counters.get(Counter::Dispatch), 1);
        assert_eq!(counters.get(Counter::Barrier), 0);

        counters.reset();
        assert_eq!(counters.get(Counter::Draw), 0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let counters = FrameCounters::new();
        counters.increment(Counter::VertexBufferBind);
        let snapshot = counters.snapshot();
        counters.increment(Counter::VertexBufferBind);

        assert_eq!(snapshot.get(Counter::VertexBufferBind), 1);
        assert_eq!(counters.get(Counter::VertexBufferBind), 2);
    }

    #[test]
    fn test_counter_indices_match_all() {
        for (i, counter) in Counter::ALL.iter().enumerate() {
            assert_eq!(counter.index(), i);
        }
    }

    #[test]
    fn test_snapshot_display() {
        let counters = FrameCounters::new();
        counters.increment(Counter::Draw);
        let text = counters.snapshot().to_string();
        assert!(text.starts_with("draw=1, dispatch=0"));
    }
}
