//! ## Recovery
//!
//! Deleted items survive as index leaf pages in space the allocation maps
//! mark free. Recovery harvests those ranges, re-validates candidate pages
//! with the same rules as live pages, and produces a parallel tree of
//! recovered items plus a recovered offsets map for reading their data. The
//! main item tree is never touched.

use bitflags::bitflags;
use std::collections::HashMap;

use crate::item::ItemTree;

bitflags! {
    /// What recovery is allowed to look at.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct RecoveryFlags: u8 {
        /// Scan allocated space as well as unallocated space.
        const SCAN_ALLOCATED = 0b0000_0001;
        /// Distrust the allocation tables entirely and sweep the whole
        /// container.
        const IGNORE_ALLOCATION_TABLE = 0b0000_0010;
    }
}

impl Default for RecoveryFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// The two allocation granularities a container tracks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnallocatedBlockKind {
    /// Data allocation map ranges (64-byte granularity).
    Data,
    /// Page allocation map ranges (page granularity).
    Page,
}

/// An offsets-index leaf rediscovered in unallocated space.
#[derive(Copy, Clone, Debug)]
pub struct RecoveredOffset {
    pub identifier: u64,
    pub file_offset: u64,
    pub data_size: u16,
    pub ref_count: u16,
}

/// Everything one recovery pass produced.
pub struct RecoveredItems {
    pub(crate) tree: ItemTree,
    pub(crate) offsets: HashMap<u64, RecoveredOffset>,
    pub(crate) ambiguous_offsets: Vec<RecoveredOffset>,
    pub(crate) unallocated_data: Vec<(u64, u64)>,
    pub(crate) unallocated_page: Vec<(u64, u64)>,
}

impl RecoveredItems {
    pub(crate) fn new(
        unallocated_data: Vec<(u64, u64)>,
        unallocated_page: Vec<(u64, u64)>,
    ) -> Self {
        Self {
            tree: ItemTree::new(),
            offsets: HashMap::new(),
            ambiguous_offsets: Vec::new(),
            unallocated_data,
            unallocated_page,
        }
    }

    pub fn tree(&self) -> &ItemTree {
        &self.tree
    }

    pub fn number_of_items(&self) -> usize {
        self.tree.len()
    }

    /// Recovered offsets-index leaves that duplicated an identifier already
    /// recovered earlier in file order. The earlier value wins; these are
    /// surfaced for the caller to arbitrate.
    pub fn ambiguous_offsets(&self) -> &[RecoveredOffset] {
        &self.ambiguous_offsets
    }

    pub fn unallocated_ranges(&self, kind: UnallocatedBlockKind) -> &[(u64, u64)] {
        match kind {
            UnallocatedBlockKind::Data => &self.unallocated_data,
            UnallocatedBlockKind::Page => &self.unallocated_page,
        }
    }
}

/// Turn the clear bits of one allocation map page into `(offset, length)`
/// ranges. Bits are most-significant-first; each covers `granularity` bytes
/// starting at `base`. Ranges are clipped to `region_end`.
pub(crate) fn free_runs(
    bits: &[u8],
    base: u64,
    granularity: u64,
    region_end: u64,
) -> Vec<(u64, u64)> {
    let mut runs = Vec::new();
    let mut run_start: Option<u64> = None;

    for (byte_index, byte) in bits.iter().enumerate() {
        for bit_index in 0..8 {
            let allocated = byte & (0x80 >> bit_index) != 0;
            let offset = base + (byte_index as u64 * 8 + bit_index as u64) * granularity;
            if offset >= region_end {
                break;
            }

            match (allocated, run_start) {
                (false, None) => run_start = Some(offset),
                (true, Some(start)) => {
                    runs.push((start, offset - start));
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    if let Some(start) = run_start {
        if start < region_end {
            runs.push((start, region_end - start));
        }
    }

    runs
}

/// Coalesce adjacent or overlapping sorted ranges.
pub(crate) fn merge_ranges(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.sort_unstable_by_key(|range| range.0);
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (start, length) in ranges {
        match merged.last_mut() {
            Some((last_start, last_length)) if *last_start + *last_length >= start => {
                let end = (start + length).max(*last_start + *last_length);
                *last_length = end - *last_start;
            }
            _ => merged.push((start, length)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_runs_all_allocated() {
        assert!(free_runs(&[0xFF, 0xFF], 0x4400, 64, u64::MAX).is_empty());
    }

    #[test]
    fn test_free_runs_all_free() {
        let runs = free_runs(&[0x00], 0x4400, 64, u64::MAX);
        assert_eq!(runs, vec![(0x4400, 8 * 64)]);
    }

    #[test]
    fn test_free_runs_msb_first() {
        // 0b0111_1110: first and last of 8 units allocated... inverted:
        // bit 0 (MSB) clear means the first unit is free.
        let runs = free_runs(&[0b0111_1110], 0, 64, u64::MAX);
        assert_eq!(runs, vec![(0, 64), (7 * 64, 64)]);
    }

    #[test]
    fn test_free_runs_clip_to_region_end() {
        let runs = free_runs(&[0x00], 0, 64, 100);
        assert_eq!(runs, vec![(0, 100)]);
    }

    #[test]
    fn test_merge_ranges() {
        let merged = merge_ranges(vec![(0, 64), (64, 64), (256, 64)]);
        assert_eq!(merged, vec![(0, 128), (256, 64)]);
    }

    #[test]
    fn test_recovery_flags() {
        let flags = RecoveryFlags::SCAN_ALLOCATED | RecoveryFlags::IGNORE_ALLOCATION_TABLE;
        assert!(flags.contains(RecoveryFlags::SCAN_ALLOCATED));
        assert!(RecoveryFlags::default().is_empty());
    }
}
