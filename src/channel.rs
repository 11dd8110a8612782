//! Capacity-limited FIFO shared by exactly one producer and one consumer stage
//!
//! Producers that find the channel full poll it again after a short sleep
//! (the sleep is taken on the run's `SignalOfStop`, so a tripped run wakes
//! them immediately). Capacity is counted in items, so a bounded channel
//! caps the memory held between two stages and throttles the faster one.

use crate::utils::sos::SignalOfStop;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

/// Why a blocking channel operation gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The run was stopped while waiting for space
    #[error("run aborted while waiting for channel space")]
    Aborted,
    /// The unit can never fit in this channel
    #[error("unit of {len} items exceeds channel capacity {capacity}")]
    Oversized { len: usize, capacity: usize },
}

struct Inner<T> {
    name: &'static str,
    capacity: usize,
    queue: Mutex<VecDeque<T>>,
}

/// Handle to a bounded FIFO; clones share the same queue
pub struct BoundedChannel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedChannel")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl<T> BoundedChannel<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                name,
                capacity,
                queue: Mutex::new(VecDeque::with_capacity(capacity.min(64 * 1024))),
            }),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<T>> {
        // a panicking peer is reported through its join handle
        self.inner
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Snapshot of the queued item count
    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push one item if there is room, handing it back otherwise
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut queue = self.queue();
        if queue.len() >= self.inner.capacity {
            return Err(item);
        }
        queue.push_back(item);
        Ok(())
    }

    /// Push one item, polling every `poll` while the channel is full
    pub fn push(&self, item: T, stop: &SignalOfStop, poll: Duration) -> Result<(), ChannelError> {
        let mut item = item;
        loop {
            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(back) => item = back,
            }
            if stop.wait_timeout(poll) {
                return Err(ChannelError::Aborted);
            }
        }
    }

    /// Remove and return the oldest item
    pub fn pop(&self) -> Option<T> {
        self.queue().pop_front()
    }

    /// Pop exactly `n` items into `out`, or nothing when fewer are queued
    pub fn pop_exact(&self, n: usize, out: &mut Vec<T>) -> bool {
        let mut queue = self.queue();
        if queue.len() < n {
            return false;
        }
        out.extend(queue.drain(..n));
        true
    }

    /// Discard everything queued, returning the number of items dropped
    pub fn clear(&self) -> usize {
        let mut queue = self.queue();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl<T: Clone> BoundedChannel<T> {
    /// Push a whole unit under one lock once it fits entirely.
    ///
    /// The channel never holds more than `capacity` items.
    pub fn push_all(
        &self,
        items: &[T],
        stop: &SignalOfStop,
        poll: Duration,
    ) -> Result<(), ChannelError> {
        if items.len() > self.inner.capacity {
            return Err(ChannelError::Oversized {
                len: items.len(),
                capacity: self.inner.capacity,
            });
        }
        loop {
            {
                let mut queue = self.queue();
                if queue.len() + items.len() <= self.inner.capacity {
                    queue.extend(items.iter().cloned());
                    return Ok(());
                }
            }
            if stop.wait_timeout(poll) {
                return Err(ChannelError::Aborted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const POLL: Duration = Duration::from_micros(100);

    #[test]
    fn test_fifo_order() {
        let ch = BoundedChannel::new("test", 16);
        let stop = SignalOfStop::new();
        for i in 0..10u8 {
            ch.push(i, &stop, POLL).unwrap();
        }
        ch.push_all(&[10, 11, 12], &stop, POLL).unwrap();

        let popped: Vec<u8> = std::iter::from_fn(|| ch.pop()).collect();
        assert_eq!(popped, (0..13).collect::<Vec<u8>>());
        assert!(ch.pop().is_none());
    }

    #[test]
    fn test_pop_exact_all_or_nothing() {
        let ch = BoundedChannel::new("test", 16);
        let stop = SignalOfStop::new();
        ch.push_all(&[1u8, 2, 3], &stop, POLL).unwrap();

        let mut out = Vec::new();
        assert!(!ch.pop_exact(4, &mut out));
        assert!(out.is_empty());
        assert_eq!(ch.len(), 3);

        assert!(ch.pop_exact(2, &mut out));
        assert_eq!(out, vec![1, 2]);
        assert_eq!(ch.len(), 1);
    }

    #[test]
    fn test_try_push_rejects_when_full() {
        let ch = BoundedChannel::new("test", 2);
        assert!(ch.try_push(1u16).is_ok());
        assert!(ch.try_push(2u16).is_ok());
        assert_eq!(ch.try_push(3u16), Err(3));
        assert_eq!(ch.len(), ch.capacity());
    }

    #[test]
    fn test_oversized_unit_rejected() {
        let ch = BoundedChannel::new("test", 4);
        let stop = SignalOfStop::new();
        let err = ch.push_all(&[0u8; 5], &stop, POLL).unwrap_err();
        assert_eq!(err, ChannelError::Oversized { len: 5, capacity: 4 });
        assert_eq!(err.to_string(), "unit of 5 items exceeds channel capacity 4");
        assert!(ch.is_empty());
    }

    #[test]
    fn test_full_channel_blocks_producer_until_consumer_frees_space() {
        let capacity = 8;
        let ch = BoundedChannel::new("test", capacity);
        let stop = SignalOfStop::new();
        ch.push_all(&[0u8; 8], &stop, POLL).unwrap();

        let producer_ch = ch.clone();
        let producer_stop = stop.clone();
        let producer = thread::spawn(move || {
            producer_ch.push_all(&[1u8; 4], &producer_stop, POLL).unwrap();
        });

        // producer must still be blocked, and the channel must not grow
        for _ in 0..20 {
            thread::sleep(Duration::from_millis(1));
            assert!(ch.len() <= capacity);
        }
        assert_eq!(ch.len(), capacity);
        assert!(!producer.is_finished());

        let mut out = Vec::new();
        assert!(ch.pop_exact(4, &mut out));

        producer.join().unwrap();
        assert_eq!(ch.len(), capacity);
        assert!(ch.len() <= ch.capacity());
    }

    #[test]
    fn test_capacity_never_exceeded_under_load() {
        let ch = BoundedChannel::new("test", 64);
        let stop = SignalOfStop::new();

        let producer_ch = ch.clone();
        let producer_stop = stop.clone();
        let producer = thread::spawn(move || {
            for i in 0..2000u32 {
                producer_ch.push(i, &producer_stop, POLL).unwrap();
            }
        });

        let mut received = Vec::with_capacity(2000);
        while received.len() < 2000 {
            assert!(ch.len() <= 64);
            match ch.pop() {
                Some(v) => received.push(v),
                None => thread::sleep(Duration::from_micros(50)),
            }
        }
        producer.join().unwrap();
        assert_eq!(received, (0..2000).collect::<Vec<u32>>());
    }

    #[test]
    fn test_stop_signal_unblocks_producer() {
        let ch = BoundedChannel::new("test", 1);
        let stop = SignalOfStop::new();
        ch.push(0u8, &stop, POLL).unwrap();

        let producer_ch = ch.clone();
        let producer_stop = stop.clone();
        let producer =
            thread::spawn(move || producer_ch.push(1u8, &producer_stop, Duration::from_millis(50)));

        thread::sleep(Duration::from_millis(10));
        stop.cancel();
        assert_eq!(producer.join().unwrap(), Err(ChannelError::Aborted));
        assert_eq!(ch.len(), 1);
    }

    #[test]
    fn test_clear_reports_dropped() {
        let ch = BoundedChannel::new("test", 16);
        let stop = SignalOfStop::new();
        ch.push_all(&[1i16, 2, 3], &stop, POLL).unwrap();
        assert_eq!(ch.clear(), 3);
        assert!(ch.is_empty());
    }
}
