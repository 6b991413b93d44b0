//! Row bitmaps for predicate filters and delete visibility.
//!
//! [`RowBitmap`] pairs a roaring bitmap with an explicit domain length so
//! that complement is well defined. Offsets are segment row offsets; a
//! segment never exceeds `u32::MAX` rows.

use roaring::RoaringBitmap;

/// A bitmap over row offsets `[0, len)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBitmap {
    bits: RoaringBitmap,
    len: u32,
}

impl RowBitmap {
    /// An all-clear bitmap over `[0, len)`.
    pub fn empty(len: u32) -> Self {
        Self {
            bits: RoaringBitmap::new(),
            len,
        }
    }

    /// An all-set bitmap over `[0, len)`.
    pub fn full(len: u32) -> Self {
        let mut bits = RoaringBitmap::new();
        if len > 0 {
            bits.insert_range(0..len);
        }
        Self { bits, len }
    }

    /// Domain length.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the domain is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of set bits.
    pub fn count(&self) -> u64 {
        self.bits.len()
    }

    pub fn contains(&self, offset: u32) -> bool {
        self.bits.contains(offset)
    }

    pub fn set(&mut self, offset: u32) {
        debug_assert!(offset < self.len);
        self.bits.insert(offset);
    }

    pub fn clear(&mut self, offset: u32) {
        self.bits.remove(offset);
    }

    /// In-place intersection. Domains must match.
    pub fn and(&mut self, other: &RowBitmap) {
        debug_assert_eq!(self.len, other.len);
        self.bits &= &other.bits;
    }

    /// In-place union. Domains must match.
    pub fn or(&mut self, other: &RowBitmap) {
        debug_assert_eq!(self.len, other.len);
        self.bits |= &other.bits;
    }

    /// In-place difference: clears every bit set in `other`.
    pub fn and_not(&mut self, other: &RowBitmap) {
        debug_assert_eq!(self.len, other.len);
        self.bits -= &other.bits;
    }

    /// In-place complement over the domain.
    pub fn flip(&mut self) {
        let mut full = RoaringBitmap::new();
        if self.len > 0 {
            full.insert_range(0..self.len);
        }
        full -= &self.bits;
        self.bits = full;
    }

    /// Clone into a new domain length. Bits at or beyond the new length are
    /// dropped; a longer domain leaves the new tail clear.
    pub fn resized(&self, len: u32) -> Self {
        let mut bits = self.bits.clone();
        if len < self.len {
            bits.remove_range(len..self.len);
        }
        Self { bits, len }
    }

    /// Extract the sub-domain `[start, start + len)` rebased to zero.
    pub fn slice(&self, start: u32, len: u32) -> Self {
        let end = start.saturating_add(len);
        let mut bits = RoaringBitmap::new();
        for offset in self
            .bits
            .iter()
            .skip_while(|&offset| offset < start)
            .take_while(|&offset| offset < end)
        {
            bits.insert(offset - start);
        }
        Self { bits, len }
    }

    /// Iterate the set offsets in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits.iter()
    }
}
