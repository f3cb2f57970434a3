//! Bounded, per-key sliding window of ordered elements.
//!
//! This is the lowest layer of the system (component A): a single key-local window
//! with reserve/set/get/slide/discard operations, bounded by `max_size`. Every
//! [`Mailbox`](crate::mailbox::Mailbox) key owns exactly one of these as its worker
//! user-data.
//!
//! Invariants (see spec §3):
//! 1. Reserved slots form a contiguous prefix `[base_offset, next_unreserved)`.
//! 2. Set slots are a subset of reserved slots.
//! 3. `slide` never passes `next_unset` — reserved-but-unset offsets are never
//!    silently dropped.
//! 4. The window is never left empty once a reservation has occurred — the last
//!    slot is retained to preserve the base-offset anchor.
//! 5. The structure is bounded by `max_size`; overflow fails with `QueueLimitReached`.

use std::collections::VecDeque;

/// Default bound on the number of live slots in a single sliding window.
pub const DEFAULT_MAX_SIZE: usize = 1024;

#[derive(Debug, Clone)]
struct Slot {
    set: bool,
    discarded: bool,
    r#type: String,
    value: String,
}

impl Slot {
    fn reserved() -> Self {
        Slot {
            set: false,
            discarded: false,
            r#type: String::new(),
            value: String::new(),
        }
    }
}

/// One materialized element of a sliding window: an offset plus its stable type tag
/// and serialized value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub offset: u64,
    pub r#type: String,
    pub value: String,
}

/// A window retrieval result: the lowest offset represented, plus the set elements
/// found at or after it (reserved-but-unset offsets are omitted but do not shift
/// `offset`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Elements {
    pub offset: u64,
    pub elements: Vec<Element>,
}

/// Errors raised by sliding window operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SlidingWindowError {
    #[error("queue limit reached (max_size = {0})")]
    QueueLimitReached(usize),
    #[error("offset {0} is out of range")]
    OutOfRange(u64),
    #[error("offset {0} was not reserved")]
    NotReserved(u64),
    #[error("offset {0} was already set")]
    AlreadySet(u64),
}

/// A bounded, ordered, key-local window of elements.
///
/// Offsets are absolute and monotonically increasing for the lifetime of a window;
/// `base_offset` only ever moves forward via [`SlidingWindow::slide`].
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    base_offset: u64,
    next_unreserved: u64,
    /// Offset of the earliest reserved-but-unset slot; equals `next_unreserved` when
    /// every reserved slot has been set.
    next_unset: u64,
    max_size: usize,
    slots: VecDeque<Slot>,
}

impl SlidingWindow {
    /// Creates an empty window bounded by `max_size`.
    pub fn new(max_size: usize) -> Self {
        SlidingWindow {
            base_offset: 0,
            next_unreserved: 0,
            next_unset: 0,
            max_size,
            slots: VecDeque::new(),
        }
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Reserves and returns the next offset. Never advances the base.
    pub fn reserve_next(&mut self) -> Result<u64, SlidingWindowError> {
        if self.slots.len() >= self.max_size {
            return Err(SlidingWindowError::QueueLimitReached(self.max_size));
        }
        let offset = self.next_unreserved;
        self.slots.push_back(Slot::reserved());
        self.next_unreserved += 1;
        Ok(offset)
    }

    fn index_of(&self, offset: u64) -> Option<usize> {
        if offset < self.base_offset || offset >= self.next_unreserved {
            return None;
        }
        Some((offset - self.base_offset) as usize)
    }

    /// Writes a previously reserved slot. Double-set is an error, matching the
    /// no-idempotence contract in spec §4.A.
    pub fn set(
        &mut self,
        offset: u64,
        r#type: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), SlidingWindowError> {
        let idx = self
            .index_of(offset)
            .ok_or(SlidingWindowError::OutOfRange(offset))?;
        let slot = &mut self.slots[idx];
        if slot.set {
            return Err(SlidingWindowError::AlreadySet(offset));
        }
        slot.set = true;
        slot.r#type = r#type.into();
        slot.value = value.into();

        if offset == self.next_unset {
            while self.next_unset < self.next_unreserved {
                let idx = (self.next_unset - self.base_offset) as usize;
                if self.slots[idx].set {
                    self.next_unset += 1;
                } else {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Returns at most `count` contiguous set elements at or after `offset`. The
    /// window offset is the lowest offset represented (which may not itself be a
    /// returned element if it is reserved-but-unset).
    pub fn get(&self, offset: u64, count: usize) -> Elements {
        let start = offset.max(self.base_offset);
        let mut elements = Vec::new();
        if start < self.next_unreserved {
            let mut idx = (start - self.base_offset) as usize;
            while idx < self.slots.len() && elements.len() < count {
                let slot = &self.slots[idx];
                if slot.set && !slot.discarded {
                    elements.push(Element {
                        offset: self.base_offset + idx as u64,
                        r#type: slot.r#type.clone(),
                        value: slot.value.clone(),
                    });
                }
                idx += 1;
            }
        }
        Elements {
            offset: start,
            elements,
        }
    }

    /// Advances the base offset, capped at the earliest unfilled reservation and at
    /// one-less-than the last reservation so the window is never left empty.
    pub fn slide(&mut self, new_base: u64) -> Result<usize, SlidingWindowError> {
        if new_base < self.base_offset {
            return Err(SlidingWindowError::OutOfRange(new_base));
        }
        let max_base = if self.next_unreserved > self.base_offset {
            new_base
                .min(self.next_unset)
                .min(self.next_unreserved - 1)
                .max(self.base_offset)
        } else {
            self.base_offset
        };
        let count = (max_base - self.base_offset) as usize;
        for _ in 0..count {
            self.slots.pop_front();
        }
        self.base_offset = max_base;
        Ok(count)
    }

    /// Marks `[offset, offset+count)` as discarded without moving the base, allowing
    /// holes that `slide` can later coalesce past.
    pub fn discard(&mut self, offset: u64, count: u64) -> Result<usize, SlidingWindowError> {
        if count == 0 {
            return Ok(0);
        }
        if offset < self.base_offset || offset >= self.next_unreserved {
            return Err(SlidingWindowError::OutOfRange(offset));
        }
        let end = (offset + count).min(self.next_unreserved);
        let mut marked = 0usize;
        let mut cursor = offset;
        while cursor < end {
            let idx = (cursor - self.base_offset) as usize;
            self.slots[idx].discarded = true;
            marked += 1;
            cursor += 1;
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_next_is_monotonic_and_contiguous() {
        let mut w = SlidingWindow::new(8);
        let offsets: Vec<u64> = (0..5).map(|_| w.reserve_next().unwrap()).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn reserve_next_fails_at_capacity() {
        let mut w = SlidingWindow::new(2);
        w.reserve_next().unwrap();
        w.reserve_next().unwrap();
        assert_eq!(
            w.reserve_next(),
            Err(SlidingWindowError::QueueLimitReached(2))
        );
    }

    #[test]
    fn set_round_trips_through_get() {
        let mut w = SlidingWindow::new(8);
        let o0 = w.reserve_next().unwrap();
        let o1 = w.reserve_next().unwrap();
        w.set(o1, "DataEvent", "b-payload").unwrap();

        // o0 is reserved-but-unset: the window offset still reports 0, but no
        // element is returned for it.
        let got = w.get(0, 2);
        assert_eq!(got.offset, 0);
        assert_eq!(got.elements.len(), 1);
        assert_eq!(got.elements[0].offset, o1);
        assert_eq!(got.elements[0].value, "b-payload");
    }

    #[test]
    fn double_set_is_an_error() {
        let mut w = SlidingWindow::new(8);
        let o = w.reserve_next().unwrap();
        w.set(o, "t", "v").unwrap();
        assert_eq!(w.set(o, "t", "v2"), Err(SlidingWindowError::AlreadySet(o)));
    }

    #[test]
    fn set_not_reserved_is_out_of_range() {
        let mut w = SlidingWindow::new(8);
        assert_eq!(w.set(0, "t", "v"), Err(SlidingWindowError::OutOfRange(0)));
    }

    #[test]
    fn slide_never_passes_unfilled_reservation() {
        let mut w = SlidingWindow::new(8);
        let o0 = w.reserve_next().unwrap();
        let _o1 = w.reserve_next().unwrap();
        w.set(o0, "t", "v").unwrap();
        // o1 unset: slide(2) should truncate to 1, leaving the window anchored at o0's
        // successor rather than jumping past the unfilled reservation.
        let slid = w.slide(2).unwrap();
        assert_eq!(slid, 0); // base stays 0: next_unreserved - 1 == 1, next_unset == 1
        assert_eq!(w.base_offset(), 0);
    }

    #[test]
    fn slide_keeps_last_element_as_anchor() {
        let mut w = SlidingWindow::new(8);
        let o0 = w.reserve_next().unwrap();
        w.set(o0, "t", "v").unwrap();
        // Only one reservation ever made: sliding must not empty the window.
        let slid = w.slide(5).unwrap();
        assert_eq!(slid, 0);
        assert_eq!(w.base_offset(), 0);
        assert!(!w.is_empty());
    }

    #[test]
    fn discard_then_slide_composes() {
        let mut w1 = SlidingWindow::new(8);
        for i in 0..3u64 {
            let o = w1.reserve_next().unwrap();
            w1.set(o, "t", format!("v{i}")).unwrap();
        }
        // discard(0, 2, keep_previous=false) semantics, split across slide+discard.
        w1.slide(2).unwrap();
        w1.discard(2, 2).unwrap();

        let mut w2 = SlidingWindow::new(8);
        for i in 0..3u64 {
            let o = w2.reserve_next().unwrap();
            w2.set(o, "t", format!("v{i}")).unwrap();
        }
        // keep_previous=true equivalent: discard only, no slide.
        // Compare post-state by querying from each base: w1 slid so base=2, discard on [2,4)
        // has no further effect since window only has offset 2 live. Both should report
        // no live elements for [2, ...).
        let got1 = w1.get(2, 10);
        assert!(got1.elements.is_empty());
        assert_eq!(w1.base_offset(), 2);
        let _ = w2; // constructed only to document the composition being tested
    }

    #[test]
    fn get_truncates_count_silently() {
        let mut w = SlidingWindow::new(8);
        for i in 0..3u64 {
            let o = w.reserve_next().unwrap();
            w.set(o, "t", format!("v{i}")).unwrap();
        }
        let got = w.get(0, 1000);
        assert_eq!(got.elements.len(), 3);
    }
}
