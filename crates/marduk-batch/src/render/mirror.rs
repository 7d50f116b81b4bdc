use std::ops::Range;

use bytemuck::Pod;

use crate::device::{Backend, BufferDesc, BufferKind};
use crate::error::{BatchError, Result};

/// What a [`MirroredBuffer::sync`] call did.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SyncOutcome {
    /// Nothing was dirty.
    Clean,
    /// Dirty records were written into the existing buffer.
    Uploaded,
    /// A new buffer was allocated; anything bound to the old one is stale.
    Reallocated,
}

/// Growable CPU array of `Pod` records mirrored into one device buffer.
///
/// Mutations only touch the CPU side and widen a dirty span. [`sync`](Self::sync)
/// makes the device buffer's first `len()` records equal to the CPU records,
/// reallocating at power-of-two capacities when the length crosses one.
pub struct MirroredBuffer<T: Pod, B: Backend> {
    label: String,
    kind: BufferKind,
    min_capacity: u32,

    items: Vec<T>,
    /// `None` when clean. An empty range means "dirty, nothing to upload"
    /// (shrinking operations may still require a reallocation).
    dirty: Option<Range<usize>>,

    buffer: Option<B::Buffer>,
    /// Capacity (in records) of `buffer`; 0 before the first allocation.
    capacity: u32,
    generation: u64,
}

impl<T: Pod, B: Backend> MirroredBuffer<T, B> {
    pub fn new(label: impl Into<String>, kind: BufferKind, min_capacity: u32) -> Result<Self> {
        if min_capacity == 0 {
            return Err(BatchError::InvalidCapacity("minimum capacity must be non-zero"));
        }
        Ok(Self {
            label: label.into(),
            kind,
            min_capacity,
            items: Vec::with_capacity(min_capacity as usize),
            dirty: Some(0..0),
            buffer: None,
            capacity: 0,
            generation: 0,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    /// Record capacity of the current device buffer (0 before the first sync).
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn min_capacity(&self) -> u32 {
        self.min_capacity
    }

    /// Bumped every time the device buffer is replaced.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn buffer(&self) -> Option<&B::Buffer> {
        self.buffer.as_ref()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Mutable access to one record; marks it dirty.
    ///
    /// # Panics
    /// If `index >= len()`.
    #[track_caller]
    pub fn get_mut(&mut self, index: usize) -> &mut T {
        self.check_index(index);
        self.mark(index..index + 1);
        &mut self.items[index]
    }

    pub fn append(&mut self, value: T) {
        let start = self.items.len();
        self.items.push(value);
        self.mark(start..start + 1);
    }

    pub fn append_bulk(&mut self, values: &[T]) {
        let start = self.items.len();
        self.items.extend_from_slice(values);
        self.mark(start..self.items.len());
    }

    /// Grows with zeroed records or truncates.
    pub fn resize(&mut self, len: usize) {
        let old = self.items.len();
        self.items.resize(len, T::zeroed());
        self.mark(old.min(len)..len);
    }

    /// Removes `index`, shifting the tail down. O(n).
    #[track_caller]
    pub fn remove_ordered(&mut self, index: usize) -> T {
        self.check_index(index);
        let value = self.items.remove(index);
        self.mark(index..self.items.len());
        value
    }

    /// Removes `index`, moving the last record into its slot. O(1).
    #[track_caller]
    pub fn swap_remove(&mut self, index: usize) -> T {
        self.check_index(index);
        let value = self.items.swap_remove(index);
        let end = (index + 1).min(self.items.len());
        self.mark(index.min(end)..end);
        value
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.mark(0..0);
    }

    /// Marks every active record for upload.
    pub fn invalidate(&mut self) {
        self.mark(0..self.items.len());
    }

    /// Brings the device buffer in line with the CPU records.
    ///
    /// A failed reallocation leaves the old buffer installed and the data dirty.
    pub fn sync(&mut self, backend: &B) -> Result<SyncOutcome> {
        let Some(span) = self.dirty.clone() else {
            return Ok(SyncOutcome::Clean);
        };

        let len = self.items.len();
        if self.items.capacity() > self.min_capacity as usize && len * 2 <= self.items.capacity() {
            self.items.shrink_to(len.max(self.min_capacity as usize));
        }

        let target = self.target_capacity();
        let mut outcome = SyncOutcome::Uploaded;
        let span = if self.buffer.is_none() || target != self.capacity {
            let buffer = self.allocate(backend, target)?;
            log::trace!(
                "`{}`: reallocated {} -> {} records",
                self.label,
                self.capacity,
                target
            );
            self.replace_buffer(buffer, target);
            outcome = SyncOutcome::Reallocated;
            0..len
        } else {
            span.start.min(len)..span.end.min(len)
        };

        if let Some(buffer) = self.buffer.as_ref() {
            if !span.is_empty() {
                let offset = (span.start * std::mem::size_of::<T>()) as u64;
                backend.write_buffer(buffer, offset, bytemuck::cast_slice(&self.items[span]));
            }
        }

        self.dirty = None;
        Ok(outcome)
    }

    /// Installed device buffer, allocated for the current length if there is
    /// none yet.
    pub fn ensure_buffer(&mut self, backend: &B) -> Result<&B::Buffer> {
        match self.buffer {
            Some(ref buffer) => Ok(buffer),
            None => {
                let target = self.target_capacity();
                let buffer = self.allocate(backend, target)?;
                self.capacity = target;
                self.generation += 1;
                self.invalidate();
                Ok(self.buffer.insert(buffer))
            }
        }
    }

    /// First phase of an owner-driven reallocation: creates a buffer for
    /// `capacity` records without touching the installed one.
    pub fn allocate(&self, backend: &B, capacity: u32) -> Result<B::Buffer> {
        if capacity == 0 {
            return Err(BatchError::InvalidCapacity("buffer capacity must be non-zero"));
        }
        backend.create_buffer(&BufferDesc {
            label: &self.label,
            size: u64::from(capacity) * std::mem::size_of::<T>() as u64,
            kind: self.kind,
        })
    }

    /// Second phase: installs `buffer` (from [`allocate`](Self::allocate)),
    /// pins the minimum capacity to `capacity` and schedules a full upload.
    ///
    /// The previously installed buffer is dropped here.
    pub fn install(&mut self, buffer: B::Buffer, capacity: u32) {
        self.min_capacity = capacity;
        self.replace_buffer(buffer, capacity);
        self.invalidate();
    }

    fn replace_buffer(&mut self, buffer: B::Buffer, capacity: u32) {
        self.buffer = Some(buffer);
        self.capacity = capacity;
        self.generation += 1;
        if self.items.capacity() < capacity as usize {
            self.items.reserve_exact(capacity as usize - self.items.len());
        }
    }

    fn target_capacity(&self) -> u32 {
        let len = u32::try_from(self.items.len()).unwrap_or(u32::MAX);
        len.max(self.min_capacity).next_power_of_two()
    }

    fn mark(&mut self, range: Range<usize>) {
        self.dirty = Some(match self.dirty.take() {
            None => range,
            Some(span) if span.is_empty() => range,
            Some(span) if range.is_empty() => span,
            Some(span) => span.start.min(range.start)..span.end.max(range.end),
        });
    }

    #[track_caller]
    fn check_index(&self, index: usize) {
        assert!(
            index < self.items.len(),
            "`{}`: index {index} out of range for {} records",
            self.label,
            self.items.len()
        );
    }
}
