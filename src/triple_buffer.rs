//! Lock-free three-slot exchange between one capture producer and one
//! render consumer, with per-slot 64-bit frame identities.
//!
//! The buffer tracks *indices only*; the GPU textures the indices refer
//! to are owned by the engines. Keeping the exchange free of platform
//! types makes its invariants testable off-GPU:
//!
//! 1. `write`, `ready` (if set) and `display` (if set) are pairwise
//!    distinct after every publish and acquire.
//! 2. The consumer's display slot is never selected as the next write
//!    target until the consumer moves off it with a fresh acquire.
//! 3. Per-slot frame IDs grow monotonically across publishes, and the
//!    ready slot's ID is always >= the display slot's ID.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

const SLOT_COUNT: usize = 3;
const NONE: i32 = -1;

pub struct TripleBuffer {
    frame_ids: [AtomicU64; SLOT_COUNT],
    /// Slot the producer will overwrite next. Producer-owned; the
    /// consumer never reads it.
    write_idx: AtomicI32,
    /// Most recently published slot not yet adopted by the consumer,
    /// or `NONE`.
    ready_idx: AtomicI32,
    /// Slot currently owned by the consumer, or `NONE`. Written only by
    /// the consumer.
    display_idx: AtomicI32,
    /// Slot of the producer's previous publish. Producer-owned; used to
    /// pick the next write target without trusting a racy read of
    /// `display_idx` (see `publish`).
    last_published: AtomicI32,
}

impl TripleBuffer {
    pub fn new() -> Self {
        Self {
            frame_ids: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            write_idx: AtomicI32::new(0),
            ready_idx: AtomicI32::new(NONE),
            display_idx: AtomicI32::new(NONE),
            last_published: AtomicI32::new(NONE),
        }
    }

    /// Slot the producer should copy the next frame into. Side-effect
    /// free; only `publish` advances it.
    pub fn write_index(&self) -> usize {
        self.write_idx.load(Ordering::Relaxed) as usize
    }

    /// Mark the current write slot as ready, stamp its frame ID, and
    /// move `write` to a slot the consumer cannot be reading.
    ///
    /// The release ordering of the ready exchange pairs with the acquire
    /// in [`acquire`], so every byte the producer copied into the slot
    /// texture is visible to the consumer before it samples the slot.
    pub fn publish(&self, frame_id: u64) {
        let completed = self.write_idx.load(Ordering::Relaxed);
        self.frame_ids[completed as usize].store(frame_id, Ordering::Relaxed);

        let prev_ready = self.ready_idx.swap(completed, Ordering::AcqRel);

        let next_write = if prev_ready != NONE {
            // The consumer never adopted the previous publish, so its
            // display slot is elsewhere and the skipped slot is free to
            // recycle.
            prev_ready
        } else {
            // Either the very first publish, or the consumer consumed
            // the previous publish and is adopting that slot as its
            // display slot. Its `display_idx` store may not be visible
            // yet, so exclude the slot we published last time instead of
            // trusting a racy read of `display_idx`. Two exclusions over
            // three slots always leave a candidate.
            let avoid = self.last_published.load(Ordering::Relaxed);
            (0..SLOT_COUNT as i32)
                .find(|&slot| slot != completed && slot != avoid)
                .unwrap()
        };

        self.write_idx.store(next_write, Ordering::Relaxed);
        self.last_published.store(completed, Ordering::Relaxed);
    }

    /// Adopt the freshest published slot, or keep the current display
    /// slot when nothing new was published (idle desktop). Returns the
    /// display slot and its frame ID, or `None` before the first
    /// publish has been observed.
    pub fn acquire(&self) -> Option<(usize, u64)> {
        let ready = self.ready_idx.swap(NONE, Ordering::AcqRel);
        if ready != NONE {
            self.display_idx.store(ready, Ordering::Release);
        }
        let display = self.display_idx.load(Ordering::Acquire);
        if display == NONE {
            return None;
        }
        let frame_id = self.frame_ids[display as usize].load(Ordering::Relaxed);
        Some((display as usize, frame_id))
    }

    /// Frame ID of the currently ready slot, or 0 when no unconsumed
    /// publish exists.
    pub fn ready_frame_id(&self) -> u64 {
        let ready = self.ready_idx.load(Ordering::Acquire);
        if ready == NONE {
            return 0;
        }
        self.frame_ids[ready as usize].load(Ordering::Relaxed)
    }
}

impl Default for TripleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU64;

    fn indices(buffer: &TripleBuffer) -> (i32, i32, i32) {
        (
            buffer.write_idx.load(Ordering::Relaxed),
            buffer.ready_idx.load(Ordering::Relaxed),
            buffer.display_idx.load(Ordering::Relaxed),
        )
    }

    fn assert_distinct(buffer: &TripleBuffer) {
        let (write, ready, display) = indices(buffer);
        if ready >= 0 {
            assert_ne!(write, ready, "write and ready collide");
        }
        if display >= 0 {
            assert_ne!(write, display, "write and display collide");
        }
        if ready >= 0 && display >= 0 {
            assert_ne!(ready, display, "ready and display collide");
        }
    }

    #[test]
    fn acquire_before_first_publish_returns_none() {
        let buffer = TripleBuffer::new();
        assert_eq!(buffer.acquire(), None);
        assert_eq!(buffer.ready_frame_id(), 0);
    }

    #[test]
    fn publish_then_acquire_returns_the_published_frame() {
        let buffer = TripleBuffer::new();
        buffer.publish(1);
        assert_eq!(buffer.ready_frame_id(), 1);
        assert_eq!(buffer.acquire(), Some((0, 1)));
        // The ready slot was consumed.
        assert_eq!(buffer.ready_frame_id(), 0);
        assert_distinct(&buffer);
    }

    #[test]
    fn acquire_without_new_publish_keeps_the_display_slot() {
        let buffer = TripleBuffer::new();
        buffer.publish(1);
        let first = buffer.acquire().unwrap();
        let second = buffer.acquire().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unconsumed_publish_is_recycled_as_the_next_write_slot() {
        let buffer = TripleBuffer::new();
        buffer.publish(1);
        buffer.publish(2);
        // Frame 1 (slot 0) was never acquired; its slot must be reused.
        assert_eq!(buffer.write_index(), 0);
        assert_eq!(buffer.ready_frame_id(), 2);
        assert_distinct(&buffer);
    }

    #[test]
    fn write_never_lands_on_the_display_slot() {
        let buffer = TripleBuffer::new();
        for frame_id in 1..=100u64 {
            buffer.publish(frame_id);
            if frame_id % 3 == 0 {
                let (display, _) = buffer.acquire().unwrap();
                assert_ne!(buffer.write_index(), display);
            }
            assert_distinct(&buffer);
        }
    }

    #[test]
    fn acquired_frame_ids_are_monotonic() {
        let buffer = TripleBuffer::new();
        let mut last = 0u64;
        for frame_id in 1..=50u64 {
            buffer.publish(frame_id);
            let (_, seen) = buffer.acquire().unwrap();
            assert!(seen >= last, "acquired id went backwards: {seen} < {last}");
            assert!(seen >= frame_id.saturating_sub(1));
            last = seen;
        }
    }

    #[test]
    fn ready_id_is_never_behind_display_id() {
        let buffer = TripleBuffer::new();
        buffer.publish(1);
        buffer.acquire().unwrap();
        buffer.publish(2);
        buffer.publish(3);
        assert!(buffer.ready_frame_id() >= 1);
        let (_, display_id) = buffer.acquire().unwrap();
        assert_eq!(display_id, 3);
    }

    /// Producer/consumer stress: each publish stamps the target slot's
    /// payload with the frame ID before publishing, and the consumer
    /// checks that the payload of the slot it acquired matches the ID it
    /// was handed. A write into a slot the consumer owns (the race the
    /// free-slot selection must rule out) shows up as a mismatch.
    #[test]
    fn concurrent_producer_never_writes_the_consumer_slot() {
        const FRAMES: u64 = 200_000;

        let buffer = Arc::new(TripleBuffer::new());
        let payload: Arc<[AtomicU64; 3]> =
            Arc::new([AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)]);

        let producer = {
            let buffer = Arc::clone(&buffer);
            let payload = Arc::clone(&payload);
            std::thread::spawn(move || {
                for frame_id in 1..=FRAMES {
                    let slot = buffer.write_index();
                    payload[slot].store(frame_id, Ordering::Release);
                    buffer.publish(frame_id);
                }
            })
        };

        let consumer = {
            let buffer = Arc::clone(&buffer);
            let payload = Arc::clone(&payload);
            std::thread::spawn(move || {
                let mut last = 0u64;
                loop {
                    if let Some((slot, frame_id)) = buffer.acquire() {
                        assert!(frame_id >= last, "ids regressed: {frame_id} < {last}");
                        let stamped = payload[slot].load(Ordering::Acquire);
                        assert_eq!(
                            stamped, frame_id,
                            "slot {slot} was overwritten while displayed"
                        );
                        last = frame_id;
                        if frame_id == FRAMES {
                            break;
                        }
                    }
                    std::hint::spin_loop();
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
    }
}
