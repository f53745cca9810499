//! Scoped batch acquisition
//!
//! A [`BatchLease`] owns one provider batch for the duration of a pull. The
//! batch is released when the lease drops, on every exit path including
//! early returns and panics.

use std::mem::size_of;
use tether_core::TrackableKind;
use tracing::{trace, warn};

use crate::native::{BatchHandle, BatchSection, BatchSource};

/// Exclusive hold on one provider batch
pub struct BatchLease<'p, S: BatchSource + ?Sized> {
    source: &'p mut S,
    handle: BatchHandle,
    kind: TrackableKind,
}

impl<'p, S: BatchSource + ?Sized> BatchLease<'p, S> {
    /// Pull the next batch for `kind`, or `None` when nothing is ready
    pub fn acquire(source: &'p mut S, kind: TrackableKind) -> Option<Self> {
        let handle = source.pull(kind)?;
        trace!(kind = %kind, handle = %handle, "Acquired batch");
        Some(Self {
            source,
            handle,
            kind,
        })
    }

    pub fn handle(&self) -> BatchHandle {
        self.handle
    }

    pub fn kind(&self) -> TrackableKind {
        self.kind
    }

    /// Size of one added/updated record as reported by the provider
    pub fn element_size(&self) -> usize {
        self.source.element_size(self.handle)
    }

    /// Bounds-checked view of one section
    pub fn section(&self, section: BatchSection) -> RawSection<'_> {
        let element_size = match section {
            BatchSection::Removed => size_of::<u64>(),
            BatchSection::Added | BatchSection::Updated => self.element_size(),
        };
        RawSection {
            kind: self.kind,
            section,
            data: self.source.list(self.handle, section),
            count: self.source.count(self.handle, section),
            element_size,
        }
    }
}

impl<S: BatchSource + ?Sized> Drop for BatchLease<'_, S> {
    fn drop(&mut self) {
        self.source.release_batch(self.handle);
        trace!(kind = %self.kind, handle = %self.handle, "Released batch");
    }
}

/// One flat section of a batch
#[derive(Debug, Clone, Copy)]
pub struct RawSection<'a> {
    kind: TrackableKind,
    section: BatchSection,
    data: &'a [u8],
    count: usize,
    element_size: usize,
}

impl<'a> RawSection<'a> {
    /// Count reported by the provider
    pub fn reported_count(&self) -> usize {
        self.count
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Number of whole records actually backed by the buffer
    pub fn len(&self) -> usize {
        if self.element_size == 0 {
            return 0;
        }
        self.count.min(self.data.len() / self.element_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over whole records, never reading past the buffer
    pub fn records(&self) -> impl Iterator<Item = &'a [u8]> {
        let len = self.len();
        if len < self.count {
            warn!(
                kind = %self.kind,
                section = ?self.section,
                reported = self.count,
                available = len,
                element_size = self.element_size,
                "Batch section shorter than reported count, truncating"
            );
        }
        // chunks_exact panics on zero; len is already 0 in that case
        let chunk = self.element_size.max(1);
        self.data.chunks_exact(chunk).take(len)
    }
}
