//! Chunked append-only columns with lock-free readers.
//!
//! A [`ConcurrentVector`] stores rows in fixed-capacity chunks. The chunk
//! directory grows by appending; existing chunks are never moved or
//! reallocated, so a reader holding a [`ChunkView`] stays valid across
//! concurrent growth.
//!
//! The reader/writer protocol is the one enforced by the owning record:
//! writers copy into ranges they reserved via a `fetch_add` counter and
//! then publish through [`AckResponder`](super::AckResponder); readers
//! derive every index bound from `ack()` before touching a chunk. Cells at
//! or beyond the published horizon race with writers and must not be
//! interpreted.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLock;

/// One fixed-capacity slab of column cells.
struct Chunk<T> {
    cells: Box<[UnsafeCell<T>]>,
}

// Disjoint writers and horizon-bounded readers are coordinated by the
// owning record's AckResponder; the cells themselves carry no locks.
unsafe impl<T: Send + Sync> Send for Chunk<T> {}
unsafe impl<T: Send + Sync> Sync for Chunk<T> {}

impl<T: Copy + Default> Chunk<T> {
    fn new(len: usize) -> Self {
        let cells: Vec<UnsafeCell<T>> = (0..len).map(|_| UnsafeCell::new(T::default())).collect();
        Self {
            cells: cells.into_boxed_slice(),
        }
    }

    fn as_ptr(&self) -> *mut T {
        // UnsafeCell<T> is repr(transparent) over T.
        self.cells.as_ptr() as *mut T
    }
}

enum Backing<T> {
    Chunk(Arc<Chunk<T>>),
    Owned(Arc<Vec<T>>),
}

/// A borrowed span of column elements, kept alive by an `Arc` to its
/// backing storage. Dereferences to `&[T]`.
pub struct ChunkView<T> {
    backing: Backing<T>,
    start: usize,
    len: usize,
}

impl<T: Copy> ChunkView<T> {
    pub(crate) fn from_owned(data: Arc<Vec<T>>, start: usize, len: usize) -> Self {
        debug_assert!(start + len <= data.len());
        Self {
            backing: Backing::Owned(data),
            start,
            len,
        }
    }
}

impl<T: Copy + Default> Deref for ChunkView<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match &self.backing {
            // SAFETY: the span was carved from a live chunk; cells below
            // the ack horizon are never written again, and callers bound
            // their reads by that horizon.
            Backing::Chunk(chunk) => unsafe {
                std::slice::from_raw_parts(chunk.as_ptr().add(self.start), self.len)
            },
            Backing::Owned(data) => &data[self.start..self.start + self.len],
        }
    }
}

/// A chunked append-only column of `T`, `elements_per_row` elements per
/// row. Scalar columns use one element per row; vector columns flatten
/// each row into `dim` (float) or `dim / 8` (binary byte) elements.
pub struct ConcurrentVector<T> {
    elements_per_row: usize,
    size_per_chunk: usize,
    chunks: RwLock<Vec<Arc<Chunk<T>>>>,
}

impl<T: Copy + Default + Send + Sync> ConcurrentVector<T> {
    /// A scalar column: one element per row.
    pub fn new(size_per_chunk: usize) -> Self {
        Self::with_elements_per_row(1, size_per_chunk)
    }

    /// A flattened column of `elements_per_row` elements per row.
    pub fn with_elements_per_row(elements_per_row: usize, size_per_chunk: usize) -> Self {
        assert!(elements_per_row > 0 && size_per_chunk > 0);
        Self {
            elements_per_row,
            size_per_chunk,
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub fn elements_per_row(&self) -> usize {
        self.elements_per_row
    }

    /// Rows per chunk.
    pub fn size_per_chunk(&self) -> usize {
        self.size_per_chunk
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.read().len()
    }

    /// Ensure chunks exist for rows `[0, row_count)`.
    pub fn grow_to_at_least(&self, row_count: usize) {
        let needed = row_count.div_ceil(self.size_per_chunk);
        if self.chunks.read().len() >= needed {
            return;
        }
        let mut chunks = self.chunks.write();
        while chunks.len() < needed {
            chunks.push(Arc::new(Chunk::new(
                self.size_per_chunk * self.elements_per_row,
            )));
        }
    }

    /// Copy `src` (a whole number of rows) into rows starting at
    /// `row_begin`. The caller owns the reservation for that range and no
    /// other writer touches it.
    pub fn set_data(&self, row_begin: usize, src: &[T]) {
        debug_assert_eq!(src.len() % self.elements_per_row, 0);
        let row_count = src.len() / self.elements_per_row;
        if row_count == 0 {
            return;
        }
        self.grow_to_at_least(row_begin + row_count);

        let chunks = self.chunks.read();
        let chunk_elements = self.size_per_chunk * self.elements_per_row;
        let mut element_begin = row_begin * self.elements_per_row;
        let mut copied = 0;
        while copied < src.len() {
            let chunk_id = element_begin / chunk_elements;
            let offset = element_begin % chunk_elements;
            let n = (chunk_elements - offset).min(src.len() - copied);
            // SAFETY: the target cells belong to this writer's reserved
            // range; no reader interprets them until the range is acked.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src.as_ptr().add(copied),
                    chunks[chunk_id].as_ptr().add(offset),
                    n,
                );
            }
            copied += n;
            element_begin += n;
        }
    }

    /// Read one element of a scalar column. The row must be below the ack
    /// horizon.
    pub fn get(&self, row: usize) -> T {
        debug_assert_eq!(self.elements_per_row, 1);
        let chunks = self.chunks.read();
        let chunk = &chunks[row / self.size_per_chunk];
        // SAFETY: published cells are stable; see the module protocol.
        unsafe { *chunk.as_ptr().add(row % self.size_per_chunk) }
    }

    /// Borrow the full span of one chunk.
    pub fn chunk_view(&self, chunk_id: usize) -> ChunkView<T> {
        let chunks = self.chunks.read();
        ChunkView {
            backing: Backing::Chunk(Arc::clone(&chunks[chunk_id])),
            start: 0,
            len: self.size_per_chunk * self.elements_per_row,
        }
    }

    /// Borrow the elements of one row. Rows never straddle chunks.
    pub fn row_view(&self, row: usize) -> ChunkView<T> {
        let chunks = self.chunks.read();
        let chunk = Arc::clone(&chunks[row / self.size_per_chunk]);
        ChunkView {
            backing: Backing::Chunk(chunk),
            start: (row % self.size_per_chunk) * self.elements_per_row,
            len: self.elements_per_row,
        }
    }

    /// Copy the published rows `[0, row_count)` into a flat vector.
    pub fn copy_flat(&self, row_count: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(row_count * self.elements_per_row);
        let mut row = 0;
        while row < row_count {
            let chunk_id = row / self.size_per_chunk;
            let rows_here = (self.size_per_chunk - row % self.size_per_chunk)
                .min(row_count - row);
            let view = self.chunk_view(chunk_id);
            let start = (row % self.size_per_chunk) * self.elements_per_row;
            out.extend_from_slice(&view[start..start + rows_here * self.elements_per_row]);
            row += rows_here;
        }
        out
    }
}
