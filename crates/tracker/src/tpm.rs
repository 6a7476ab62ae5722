/// Twelve 5-second buckets covering a 60-second sliding window of
/// successful uploads.
pub const TPM_BUCKET_COUNT: usize = 12;
pub const TPM_BUCKET_MS: i64 = 5_000;
const TPM_WINDOW_MS: i64 = TPM_BUCKET_MS * TPM_BUCKET_COUNT as i64;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    start_ms: i64,
    count: u64,
}

/// Sliding-window throughput meter. A bucket is cleared lazily as its slot
/// becomes current again, so a missed rotation merely lags by one bucket.
#[derive(Debug, Default)]
pub struct TpmWindow {
    buckets: [Bucket; TPM_BUCKET_COUNT],
}

impl TpmWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful upload at `now_ms`.
    pub fn record(&mut self, now_ms: i64) {
        let bucket = self.rotate(now_ms);
        self.buckets[bucket].count += 1;
    }

    /// Transactions within the last 60 seconds.
    pub fn current(&self, now_ms: i64) -> u64 {
        self.buckets
            .iter()
            .filter(|b| now_ms - b.start_ms < TPM_WINDOW_MS && b.start_ms <= now_ms)
            .map(|b| b.count)
            .sum()
    }

    fn rotate(&mut self, now_ms: i64) -> usize {
        let aligned = (now_ms / TPM_BUCKET_MS) * TPM_BUCKET_MS;
        let index = ((now_ms / TPM_BUCKET_MS) % TPM_BUCKET_COUNT as i64) as usize;
        if self.buckets[index].start_ms != aligned {
            self.buckets[index] = Bucket {
                start_ms: aligned,
                count: 0,
            };
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_within_the_window() {
        let mut window = TpmWindow::new();
        window.record(1_000);
        window.record(2_000);
        window.record(31_000);
        assert_eq!(window.current(31_000), 3);
    }

    #[test]
    fn old_buckets_age_out() {
        let mut window = TpmWindow::new();
        window.record(1_000);
        assert_eq!(window.current(1_000), 1);
        // Just inside the window.
        assert_eq!(window.current(59_999), 1);
        // The bucket started at 0 ms; 60 s later it no longer counts.
        assert_eq!(window.current(60_000), 0);
    }

    #[test]
    fn a_reused_slot_is_cleared_before_counting() {
        let mut window = TpmWindow::new();
        window.record(0);
        window.record(0);
        // 60 s later the same slot index comes around again.
        window.record(60_000);
        assert_eq!(window.current(60_000), 1);
    }

    #[test]
    fn a_stalled_meter_recovers_on_the_next_record() {
        let mut window = TpmWindow::new();
        window.record(0);
        // Nothing recorded for ten minutes, then one upload.
        window.record(600_000);
        assert_eq!(window.current(600_000), 1);
    }
}
