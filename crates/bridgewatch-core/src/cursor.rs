//! Block range cursor: decides which blocks the next cycle scans.

use serde::{Deserialize, Serialize};

/// An inclusive block range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// Compute the next range to scan.
    ///
    /// Returns `None` when `finalized < resume` (nothing finalized yet).
    /// Otherwise the range starts at `resume` and spans at most
    /// `max_batch_size` blocks without passing `finalized`.
    pub fn next(resume: u64, finalized: u64, max_batch_size: u64) -> Option<Self> {
        if finalized < resume {
            return None;
        }
        let span = max_batch_size.max(1) - 1;
        Some(Self {
            from: resume,
            to: resume.saturating_add(span).min(finalized),
        })
    }

    /// Number of blocks in the range.
    pub fn block_count(&self) -> u64 {
        self.to - self.from + 1
    }

    pub fn contains(&self, block: u64) -> bool {
        (self.from..=self.to).contains(&block)
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_bounded_by_finalized() {
        let r = BlockRange::next(1000, 1050, 100).unwrap();
        assert_eq!(r, BlockRange { from: 1000, to: 1050 });
        assert_eq!(r.block_count(), 51);
    }

    #[test]
    fn range_bounded_by_batch_size() {
        let r = BlockRange::next(1000, 5000, 100).unwrap();
        assert_eq!(r.to, 1099);
        assert_eq!(r.block_count(), 100);
    }

    #[test]
    fn no_range_when_finalized_behind_resume() {
        assert!(BlockRange::next(1051, 1049, 100).is_none());
        assert!(BlockRange::next(1051, 1051, 100).is_some());
    }

    #[test]
    fn huge_batch_size_does_not_overflow() {
        let r = BlockRange::next(u64::MAX - 5, u64::MAX, u64::MAX).unwrap();
        assert_eq!(r.to, u64::MAX);
        assert!(r.contains(u64::MAX - 1));
    }
}
