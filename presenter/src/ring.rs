//! Fixed-depth history of presented generations
//!
//! Scanout reads a buffer for some time after the request that installed it
//! was submitted. Keeping the last few generations alive and releasing the
//! oldest only when a newer one is installed guarantees the display never
//! reads freed memory.

use std::collections::VecDeque;

/// Ring of the most recent `depth` generations, oldest first
#[derive(Debug)]
pub struct GenerationRing<T> {
    slots: VecDeque<T>,
    depth: usize,
}

impl<T> GenerationRing<T> {
    /// # Panics
    /// Panics if `depth` is zero.
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "ring depth must be at least 1");
        Self {
            slots: VecDeque::with_capacity(depth),
            depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Most recently installed generation
    pub fn newest(&self) -> Option<&T> {
        self.slots.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    /// Hand the tail generation to `release` if the ring is full.
    ///
    /// Called before acquiring resources for the next generation, so no more
    /// than `depth` generations are ever alive at once. The newest slot is
    /// never evicted here.
    pub fn make_room(&mut self, release: impl FnOnce(T)) {
        if self.slots.len() == self.depth {
            if let Some(evicted) = self.slots.pop_front() {
                release(evicted);
            }
        }
    }

    /// Install `next`, first handing the evicted tail generation to `release`
    pub fn advance(&mut self, next: T, release: impl FnOnce(T)) {
        self.make_room(release);
        self.slots.push_back(next);
    }

    /// Release every generation, oldest first
    pub fn drain(&mut self, mut release: impl FnMut(T)) {
        while let Some(slot) = self.slots.pop_front() {
            release(slot);
        }
    }
}
