//! Adaptive page sizing for table reads.

/// Row count of the next page to read.
///
/// The first page asks for one row. After each full page the size grows by
/// `growth`, clamped so the estimated footprint of the next page stays under
/// `max_bytes`. The size never shrinks, and never drops below one row. A
/// page shorter than requested ends the table.
#[derive(Debug, Clone)]
pub struct Pager {
    rows: u64,
    growth: f64,
    max_bytes: usize,
}

impl Pager {
    pub fn new(growth: f64, max_bytes: usize) -> Self {
        Self {
            rows: 1,
            growth,
            max_bytes,
        }
    }

    pub fn page_rows(&self) -> u64 {
        self.rows
    }

    /// Record a page of `returned` rows totalling `bytes`. Returns true when
    /// the table is exhausted.
    pub fn advance(&mut self, returned: usize, bytes: usize) -> bool {
        if (returned as u64) < self.rows {
            return true;
        }
        let avg_row = (bytes / returned.max(1)).max(1);
        let by_bytes = (self.max_bytes / avg_row).max(1) as u64;
        let grown = (self.rows as f64 * self.growth).ceil();
        let grown = if grown.is_finite() && grown >= 1.0 {
            grown.min(u64::MAX as f64) as u64
        } else {
            self.rows
        };
        self.rows = self.rows.max(grown.min(by_bytes));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_growth_and_byte_cap() {
        let mut pager = Pager::new(2.0, 1000);
        assert_eq!(pager.page_rows(), 1);
        assert!(!pager.advance(1, 100));
        assert_eq!(pager.page_rows(), 2);
        assert!(!pager.advance(2, 200));
        assert_eq!(pager.page_rows(), 4);
        assert!(!pager.advance(4, 400));
        // 8 rows of 100 bytes would exceed 1000 bytes, 10 would not.
        assert_eq!(pager.page_rows(), 8);
        assert!(!pager.advance(8, 800));
        assert_eq!(pager.page_rows(), 10);
        assert!(!pager.advance(10, 1000));
        assert_eq!(pager.page_rows(), 10);
        assert!(pager.advance(3, 300));
    }

    #[test]
    fn test_wide_rows_never_shrink_below_current() {
        let mut pager = Pager::new(3.0, 10);
        assert!(!pager.advance(1, 5000));
        assert_eq!(pager.page_rows(), 1);
    }

    #[test]
    fn test_pagination_terminates_and_covers_table() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let n = rng.gen_range(0..400usize);
            let widths: Vec<usize> = (0..n).map(|_| rng.gen_range(0..300)).collect();
            let growth = rng.gen_range(1.0..5.0);
            let max_bytes = rng.gen_range(1..20_000);
            let mut pager = Pager::new(growth, max_bytes);

            let mut read = Vec::new();
            let mut last_request = 0;
            let mut pages = 0;
            loop {
                pages += 1;
                assert!(pages <= n + 1, "pagination did not terminate");
                let request = pager.page_rows();
                assert!(request >= last_request, "page size shrank");
                last_request = request;
                let start = read.len();
                let end = (start + request as usize).min(n);
                let page: Vec<usize> = (start..end).collect();
                let bytes = page.iter().map(|&i| widths[i]).sum();
                read.extend(page);
                if pager.advance(end - start, bytes) {
                    break;
                }
            }
            assert_eq!(read, (0..n).collect::<Vec<_>>());
        }
    }
}
