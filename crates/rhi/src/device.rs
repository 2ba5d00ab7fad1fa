//! The device: backend, deletion queue, counters and submission tickets.
//!
//! # Overview
//!
//! [`Device`] is what every RHI object holds on to (through an `Arc`). It owns
//! the concrete [`Backend`], the [`DeletionQueue`] that object destructors feed,
//! and the injected [`CounterSink`]. It also tracks which command lists may
//! still reference queued handles, so that garbage collection is only ever a
//! question of comparing ticket numbers.
//!
//! # Example
//!
//! ```
//! use lumen_rhi::{Device, DeviceSettings};
//! use lumen_rhi::backend::null::NullBackend;
//!
//! let device = Device::new(NullBackend::new(), DeviceSettings::default());
//! assert_eq!(device.backend_name(), "null");
//!
//! // Frame boundary: release whatever no command list can still see.
//! device.collect_garbage();
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::backend::{Backend, Resource};
use crate::counters::{CounterSink, FrameCounters};
use crate::deletion_queue::DeletionQueue;
use crate::error::RhiResult;

/// Device-level configuration.
#[derive(Clone, Debug)]
pub struct DeviceSettings {
    /// Enable API validation layers when the backend has them
    pub validation: bool,
    /// Forward object names to the backend's debug tooling
    pub debug_names: bool,
    /// Allocate timestamp query slots for command lists
    pub timestamps: bool,
    /// Overrides the backend-reported push-constant limit when lower
    pub max_push_constant_size: Option<u32>,
    /// Upper bound for blocking waits on a single command list
    pub wait_timeout: Duration,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            debug_names: true,
            timestamps: true,
            max_push_constant_size: None,
            wait_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TicketState {
    Recording,
    Submitted,
}

#[derive(Debug, Default)]
struct TicketLedger {
    last_issued: u64,
    outstanding: BTreeMap<u64, TicketState>,
}

impl TicketLedger {
    /// Entries tagged below this value are unreachable.
    fn watermark(&self) -> u64 {
        self.outstanding
            .keys()
            .next()
            .copied()
            .unwrap_or(u64::MAX)
    }
}

pub struct Device<B: Backend> {
    backend: B,
    settings: DeviceSettings,
    deletion_queue: DeletionQueue<B>,
    counters: Arc<dyn CounterSink>,
    tickets: Mutex<TicketLedger>,
}

impl<B: Backend> Device<B> {
    /// Creates a device with a default [`FrameCounters`] sink.
    pub fn new(backend: B, settings: DeviceSettings) -> Arc<Self> {
        Self::with_counters(backend, settings, Arc::new(FrameCounters::new()))
    }

    pub fn with_counters(
        backend: B,
        settings: DeviceSettings,
        counters: Arc<dyn CounterSink>,
    ) -> Arc<Self> {
        let caps = backend.capabilities();
        info!(
            "RHI device ready: backend={}, adapter='{}', max push constants={} bytes",
            backend.name(),
            caps.device_name,
            caps.max_push_constant_size
        );

        Arc::new(Self {
            backend,
            settings,
            deletion_queue: DeletionQueue::new(),
            counters,
            tickets: Mutex::new(TicketLedger::default()),
        })
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    #[inline]
    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    #[inline]
    pub fn counters(&self) -> &dyn CounterSink {
        self.counters.as_ref()
    }

    #[inline]
    pub fn deletion_queue(&self) -> &DeletionQueue<B> {
        &self.deletion_queue
    }

    /// Effective push-constant limit in bytes.
    pub fn max_push_constant_size(&self) -> u32 {
        let reported = self.backend.capabilities().max_push_constant_size;
        match self.settings.max_push_constant_size {
            Some(limit) => limit.min(reported),
            None => reported,
        }
    }

    /// Nanoseconds per timestamp tick.
    #[inline]
    pub fn timestamp_period(&self) -> f32 {
        self.backend.capabilities().timestamp_period
    }

    pub fn set_name(&self, resource: Resource<B>, name: &str) {
        if self.settings.debug_names && !name.is_empty() {
            self.backend.set_name(resource, name);
        }
    }

    /// Parks a handle until no outstanding command list can reference it.
    pub fn defer_release(&self, resource: Resource<B>) {
        let ticket = self.tickets.lock().last_issued;
        self.deletion_queue.add(resource, ticket);
    }

    /// Releases every queued handle that no outstanding command list can see.
    /// Call at frame boundaries.
    pub fn collect_garbage(&self) -> usize {
        let watermark = self.tickets.lock().watermark();
        self.deletion_queue
            .drain(watermark, |resource| self.backend.release(resource))
    }

    /// Blocks until all queues are idle, then collects garbage.
    ///
    /// An idle device proves every submitted list has finished, so their
    /// tickets are retired even if the lists themselves have not noticed yet.
    /// Lists that are still recording keep holding entries back.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.backend.wait_idle()?;
        {
            let mut tickets = self.tickets.lock();
            tickets
                .outstanding
                .retain(|_, state| *state != TicketState::Submitted);
        }
        self.collect_garbage();
        Ok(())
    }

    /// Number of command lists that may still reference queued handles.
    pub fn outstanding_command_lists(&self) -> usize {
        self.tickets.lock().outstanding.len()
    }

    // =========================================================================
    // Ticket bookkeeping for command lists
    // =========================================================================

    pub(crate) fn open_ticket(&self) -> u64 {
        let mut tickets = self.tickets.lock();
        tickets.last_issued += 1;
        let ticket = tickets.last_issued;
        tickets.outstanding.insert(ticket, TicketState::Recording);
        ticket
    }

    pub(crate) fn mark_submitted(&self, ticket: u64) {
        if let Some(state) = self.tickets.lock().outstanding.get_mut(&ticket) {
            *state = TicketState::Submitted;
        }
    }

    pub(crate) fn retire_ticket(&self, ticket: u64) {
        self.tickets.lock().outstanding.remove(&ticket);
    }
}

impl<B: Backend> Drop for Device<B> {
    fn drop(&mut self) {
        // Every object holds an Arc to the device, so nothing can be recording.
        if let Err(e) = self.backend.wait_idle() {
            error!("Failed to wait for device idle during drop: {:?}", e);
        }
        let released = self
            .deletion_queue
            .drain(u64::MAX, |resource| self.backend.release(resource));
        debug!("Released {} deferred handle(s) at device teardown", released);
        info!("RHI device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::{NullBackend, NullHandle};
    use crate::definitions::ResourceType;

    fn device() -> Arc<Device<NullBackend>> {
        Device::new(NullBackend::new(), DeviceSettings::default())
    }

    fn buffer(id: u64) -> Resource<NullBackend> {
        Resource::Buffer(NullHandle::from_raw(ResourceType::Buffer, id))
    }

    #[test]
    fn test_collect_without_command_lists_releases_everything() {
        let device = device();
        device.defer_release(buffer(1));
        assert_eq!(device.backend().release_count(), 0);
        assert_eq!(device.collect_garbage(), 1);
        assert_eq!(device.backend().release_count(), 1);
    }

    #[test]
    fn test_recording_ticket_holds_back_release() {
        let device = device();
        let ticket = device.open_ticket();
        device.defer_release(buffer(1));

        assert_eq!(device.collect_garbage(), 0);
        device.retire_ticket(ticket);
        assert_eq!(device.collect_garbage(), 1);
    }

    #[test]
    fn test_newer_tickets_do_not_hold_back_older_entries() {
        let device = device();
        device.defer_release(buffer(1));
        let _ticket = device.open_ticket();
        assert_eq!(device.collect_garbage(), 1);
    }

    #[test]
    fn test_wait_idle_retires_submitted_but_not_recording() {
        let device = device();
        let submitted = device.open_ticket();
        device.mark_submitted(submitted);
        device.defer_release(buffer(1));
        let _recording = device.open_ticket();
        device.defer_release(buffer(2));

        device.wait_idle().unwrap();
        assert_eq!(device.backend().release_count(), 1);
        assert_eq!(device.outstanding_command_lists(), 1);
    }

    #[test]
    fn test_push_constant_override_only_lowers_limit() {
        let settings = DeviceSettings {
            max_push_constant_size: Some(64),
            ..Default::default()
        };
        let device = Device::new(NullBackend::new(), settings);
        assert_eq!(device.max_push_constant_size(), 64);

        let settings = DeviceSettings {
            max_push_constant_size: Some(1 << 20),
            ..Default::default()
        };
        let device = Device::new(NullBackend::new(), settings);
        assert_eq!(
            device.max_push_constant_size(),
            device.backend().capabilities().max_push_constant_size
        );
    }
}
