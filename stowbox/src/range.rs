use std::fmt;

/// Position of one upload chunk within the final blob, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Value of the `Content-Range` header announcing this chunk.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/*", self.start, self.end.saturating_sub(1))
    }

    /// Splits `[0, total)` into contiguous chunks of at most `max_chunk_size`
    /// bytes; only the last one may be shorter.
    ///
    /// Yields `ceil(total / max_chunk_size)` ranges, none for an empty blob.
    /// A zero `max_chunk_size` is treated as one byte.
    pub fn tile(total: u64, max_chunk_size: u64) -> impl Iterator<Item = ByteRange> {
        let step = max_chunk_size.max(1);
        (0..total.div_ceil(step)).map(move |index| {
            let start = index * step;
            ByteRange::new(start, total.min(start.saturating_add(step)))
        })
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_uses_inclusive_end() {
        assert_eq!(ByteRange::new(0, 100).content_range(), "bytes 0-99/*");
        assert_eq!(ByteRange::new(100, 150).content_range(), "bytes 100-149/*");
    }

    #[test]
    fn tiles_exactly_without_gaps_or_overlaps() {
        for (total, max) in [(1, 1), (10, 3), (12, 4), (100, 7), (5, 1000), (4097, 1024)] {
            let ranges: Vec<_> = ByteRange::tile(total, max).collect();

            assert_eq!(ranges.len() as u64, total.div_ceil(max), "{total}/{max}");
            assert_eq!(ranges.first().map(|r| r.start), Some(0));
            assert_eq!(ranges.last().map(|r| r.end), Some(total));
            assert!(ranges.windows(2).all(|pair| pair[0].end == pair[1].start));
            assert!(ranges.iter().all(|r| !r.is_empty() && r.len() <= max));
        }
    }

    #[test]
    fn huge_chunk_size_does_not_overflow() {
        let ranges: Vec<_> = ByteRange::tile(u64::MAX, u64::MAX - 1).collect();
        assert_eq!(
            ranges,
            [
                ByteRange::new(0, u64::MAX - 1),
                ByteRange::new(u64::MAX - 1, u64::MAX)
            ]
        );
    }

    #[test]
    fn tail_beyond_concurrency_times_chunk_size_is_covered() {
        // 4 chunks of 8 bytes would only reach offset 32.
        let ranges: Vec<_> = ByteRange::tile(50, 8).collect();
        assert_eq!(ranges.len(), 7);
        assert_eq!(ranges[6], ByteRange::new(48, 50));
    }

    #[test]
    fn empty_blob_has_no_chunks() {
        assert_eq!(ByteRange::tile(0, 1024).count(), 0);
    }

    #[test]
    fn zero_chunk_size_degrades_to_single_bytes() {
        assert_eq!(ByteRange::tile(3, 0).count(), 3);
    }
}
