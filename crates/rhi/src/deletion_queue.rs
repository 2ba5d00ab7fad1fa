//! Deferred destruction of backend handles.
//!
//! Objects never destroy their backend handles directly: their `Drop` impls
//! hand the handles to the device, which parks them here until no command list
//! that might reference them is still outstanding.
//!
//! # Tickets
//!
//! Every `CommandList::begin` opens a ticket (a monotonically increasing
//! number). An entry is tagged with the newest ticket at the time it was added.
//! Any list that could have recorded the handle therefore holds a ticket less
//! than or equal to the tag. Once the oldest outstanding ticket is greater than
//! the tag, the handle is unreachable and can be released.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::backend::{Backend, Resource};
use crate::definitions::ResourceType;

pub struct DeletionQueue<B: Backend> {
    entries: Mutex<BTreeMap<ResourceType, HashMap<Resource<B>, u64>>>,
}

impl<B: Backend> DeletionQueue<B> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Queues a handle for release. Never releases anything itself.
    ///
    /// Adding the same handle twice keeps a single entry with the newer tag, so
    /// the handle is still released exactly once.
    pub fn add(&self, resource: Resource<B>, ticket: u64) {
        if resource.is_null() {
            return;
        }

        trace!("Queued {:?} for deletion (ticket {})", resource, ticket);

        let mut entries = self.entries.lock();
        let tag = entries
            .entry(resource.resource_type())
            .or_default()
            .entry(resource)
            .or_insert(ticket);
        *tag = (*tag).max(ticket);
    }

    /// Number of handles waiting for release.
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of waiting handles of one kind.
    pub fn len_of(&self, resource_type: ResourceType) -> usize {
        self.entries
            .lock()
            .get(&resource_type)
            .map_or(0, HashMap::len)
    }

    pub fn contains(&self, resource: &Resource<B>) -> bool {
        self.entries
            .lock()
            .get(&resource.resource_type())
            .is_some_and(|handles| handles.contains_key(resource))
    }

    /// Releases every entry tagged below `watermark`, in resource-type order.
    ///
    /// The lock is not held while `release` runs, so release callbacks may
    /// queue further handles. Returns the number of handles released.
    pub fn drain(&self, watermark: u64, mut release: impl FnMut(Resource<B>)) -> usize {
        let ready: Vec<Resource<B>> = {
            let mut entries = self.entries.lock();
            let mut ready = Vec::new();

            for handles in entries.values_mut() {
                // Sort within a type so release order is reproducible.
                let mut batch: Vec<(Resource<B>, u64)> = handles
                    .iter()
                    .filter(|(_, tag)| **tag < watermark)
                    .map(|(resource, tag)| (*resource, *tag))
                    .collect();
                batch.sort_by_key(|(_, tag)| *tag);

                for (resource, _) in batch {
                    handles.remove(&resource);
                    ready.push(resource);
                }
            }

            entries.retain(|_, handles| !handles.is_empty());
            ready
        };

        let count = ready.len();
        for resource in ready {
            release(resource);
        }

        if count > 0 {
            debug!("Deletion queue released {} handle(s)", count);
        }
        count
    }
}

impl<B: Backend> Default for DeletionQueue<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::{NullBackend, NullHandle};

    fn pipeline(id: u64) -> Resource<NullBackend> {
        Resource::Pipeline(NullHandle::from_raw(ResourceType::Pipeline, id))
    }

    fn layout(id: u64) -> Resource<NullBackend> {
        Resource::PipelineLayout(NullHandle::from_raw(ResourceType::PipelineLayout, id))
    }

    #[test]
    fn test_add_does_not_release() {
        let queue = DeletionQueue::<NullBackend>::new();
        queue.add(pipeline(1), 0);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(&pipeline(1)));
    }

    #[test]
    fn test_drain_releases_once() {
        let queue = DeletionQueue::<NullBackend>::new();
        queue.add(pipeline(1), 0);
        queue.add(pipeline(1), 0);

        let mut released = Vec::new();
        assert_eq!(queue.drain(u64::MAX, |r| released.push(r)), 1);
        assert_eq!(queue.drain(u64::MAX, |r| released.push(r)), 0);
        assert_eq!(released, vec![pipeline(1)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_watermark_holds_back_newer_entries() {
        let queue = DeletionQueue::<NullBackend>::new();
        queue.add(pipeline(1), 3);
        queue.add(pipeline(2), 5);

        let mut released = Vec::new();
        queue.drain(5, |r| released.push(r));
        assert_eq!(released, vec![pipeline(1)]);
        assert!(queue.contains(&pipeline(2)));
    }

    #[test]
    fn test_readding_keeps_newest_tag() {
        let queue = DeletionQueue::<NullBackend>::new();
        queue.add(pipeline(1), 2);
        queue.add(pipeline(1), 7);

        assert_eq!(queue.drain(5, |_| {}), 0);
        assert_eq!(queue.drain(8, |_| {}), 1);
    }

    #[test]
    fn test_release_order_by_type() {
        let queue = DeletionQueue::<NullBackend>::new();
        queue.add(layout(1), 0);
        queue.add(pipeline(2), 0);

        let mut order = Vec::new();
        queue.drain(u64::MAX, |r| order.push(r.resource_type()));
        assert_eq!(order, vec![ResourceType::Pipeline, ResourceType::PipelineLayout]);
    }

    #[test]
    fn test_null_handles_are_ignored() {
        let queue = DeletionQueue::<NullBackend>::new();
        queue.add(Resource::Buffer(NullHandle::NULL), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_adds() {
        let queue = std::sync::Arc::new(DeletionQueue::<NullBackend>::new());
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        queue.add(pipeline(t * 1000 + i + 1), 0);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(queue.len_of(ResourceType::Pipeline), 400);
    }
}
