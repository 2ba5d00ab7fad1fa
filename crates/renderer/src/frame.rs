//! Frame pacing over a ring of command lists.
//!
//! The pacer implements the "frames in flight" pattern on top of the RHI:
//!
//! 1. `begin_frame` begins the slot's command list, which blocks until the
//!    list's previous submission has finished on the GPU
//! 2. The caller records into the returned list
//! 3. `end_frame` ends and submits it, collects garbage that no outstanding
//!    list can reference, snapshots the counters and advances the slot
//!
//! While the GPU executes frame N the CPU records frame N+1 into another list.

use std::sync::Arc;

use tracing::{debug, info, trace};

use lumen_rhi::backend::Backend;
use lumen_rhi::{CommandList, CounterSnapshot, Device, GpuTiming, QueueType, RhiResult};

/// What one finished frame did.
#[derive(Clone, Copy, Debug)]
pub struct FrameStats {
    pub frame: u64,
    pub counters: CounterSnapshot,
    /// Handles released by the garbage collection at the end of the frame.
    pub released: usize,
}

pub struct FramePacer<B: Backend> {
    device: Arc<Device<B>>,
    lists: Vec<CommandList<B>>,
    current: usize,
    frame: u64,
    in_frame: bool,
}

impl<B: Backend> FramePacer<B> {
    /// Creates one graphics command list per frame in flight.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is zero.
    pub fn new(device: Arc<Device<B>>, frames_in_flight: usize) -> RhiResult<Self> {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");

        let lists = (0..frames_in_flight)
            .map(|i| CommandList::new(device.clone(), QueueType::Graphics, &format!("frame {}", i)))
            .collect::<RhiResult<Vec<_>>>()?;
        info!("Frame pacer created with {} frame(s) in flight", frames_in_flight);

        Ok(Self {
            device,
            lists,
            current: 0,
            frame: 0,
            in_frame: false,
        })
    }

    /// Begins the current slot's list and returns it for recording.
    ///
    /// # Panics
    ///
    /// Panics if the previous frame was not ended.
    pub fn begin_frame(&mut self) -> RhiResult<&mut CommandList<B>> {
        assert!(!self.in_frame, "begin_frame called twice without end_frame");
        let list = &mut self.lists[self.current];
        list.begin()?;
        self.in_frame = true;
        trace!("Frame {} recording into slot {}", self.frame, self.current);
        Ok(list)
    }

    /// The list of the frame being recorded.
    pub fn current_list(&mut self) -> &mut CommandList<B> {
        &mut self.lists[self.current]
    }

    /// Ends and submits the current list, then advances to the next slot.
    ///
    /// # Panics
    ///
    /// Panics if no frame is being recorded.
    pub fn end_frame(&mut self) -> RhiResult<FrameStats> {
        assert!(self.in_frame, "end_frame called without begin_frame");
        let list = &mut self.lists[self.current];
        list.end()?;
        list.submit()?;
        self.in_frame = false;

        let released = self.device.collect_garbage();
        let counters = self.device.counters();
        let snapshot = counters.snapshot();
        counters.reset();

        let stats = FrameStats {
            frame: self.frame,
            counters: snapshot,
            released,
        };
        if released > 0 {
            debug!("Frame {} released {} handle(s)", self.frame, released);
        }

        self.frame += 1;
        self.current = (self.current + 1) % self.lists.len();
        Ok(stats)
    }

    /// Number of frames submitted so far.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.lists.len()
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// GPU timeblock durations of the most recently submitted frame. Waits
    /// for that frame to finish executing.
    ///
    /// # Panics
    ///
    /// Panics while a frame is being recorded.
    pub fn last_frame_timings(&mut self) -> RhiResult<Vec<GpuTiming>> {
        assert!(!self.in_frame, "timings requested while recording a frame");
        if self.frame == 0 {
            return Ok(Vec::new());
        }
        let slot = (self.current + self.lists.len() - 1) % self.lists.len();
        let list = &mut self.lists[slot];
        list.wait_for_execution()?;
        list.gpu_timings()
    }

    /// Waits for every submitted frame and releases all queued handles.
    pub fn wait_idle(&mut self) -> RhiResult<()> {
        for list in &mut self.lists {
            list.wait_for_execution()?;
        }
        self.device.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_rhi::backend::null::NullBackend;
    use lumen_rhi::{Counter, DeviceSettings};

    fn pacer(frames: usize) -> FramePacer<NullBackend> {
        let device = Device::new(NullBackend::new(), DeviceSettings::default());
        FramePacer::new(device, frames).unwrap()
    }

    #[test]
    fn test_slots_rotate() {
        let mut pacer = pacer(2);
        for expected in [0, 1, 0, 1] {
            assert_eq!(pacer.current_slot(), expected);
            pacer.begin_frame().unwrap();
            pacer.end_frame().unwrap();
        }
        assert_eq!(pacer.frame_count(), 4);
    }

    #[test]
    fn test_counters_reset_each_frame() {
        let mut pacer = pacer(2);
        pacer.begin_frame().unwrap();
        let stats = pacer.end_frame().unwrap();
        assert_eq!(stats.frame, 0);
        assert_eq!(stats.counters.get(Counter::Submission), 1);

        let stats = {
            pacer.begin_frame().unwrap();
            pacer.end_frame().unwrap()
        };
        assert_eq!(stats.counters.get(Counter::Submission), 1);
    }

    #[test]
    #[should_panic(expected = "without end_frame")]
    fn test_double_begin_panics() {
        let mut pacer = pacer(1);
        pacer.begin_frame().unwrap();
        let _ = pacer.begin_frame();
    }

    #[test]
    #[should_panic(expected = "at least 1")]
    fn test_zero_frames_panics() {
        let _ = pacer(0);
    }

    #[test]
    fn test_last_frame_timings() {
        let mut pacer = pacer(2);
        assert!(pacer.last_frame_timings().unwrap().is_empty());

        let cmd = pacer.begin_frame().unwrap();
        cmd.begin_timeblock("shadows", true, true);
        cmd.end_timeblock();
        pacer.end_frame().unwrap();

        let timings = pacer.last_frame_timings().unwrap();
        assert_eq!(timings.len(), 1);
        assert_eq!(timings[0].name, "shadows");
        assert!(timings[0].duration_ms > 0.0);
    }

    #[test]
    fn test_wait_idle_retires_everything() {
        let mut pacer = pacer(3);
        for _ in 0..3 {
            pacer.begin_frame().unwrap();
            pacer.end_frame().unwrap();
        }
        pacer.wait_idle().unwrap();
        assert_eq!(pacer.device.outstanding_command_lists(), 0);
    }
}
