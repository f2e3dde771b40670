/// Percentage callback handed to [`crate::pan::Uploader::upload`]
pub type ProgressCallback<'a> = &'a mut (dyn FnMut(u8) + Send);

/// Turns cumulative byte counts into strictly increasing percentages
///
/// Transfer progress tops out at 99; 100 is reserved for [`complete`],
/// which the caller invokes once the remote object exists.
///
/// [`complete`]: ProgressTracker::complete
pub struct ProgressTracker<'a> {
    total: u64,
    last: Option<u8>,
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(total: u64, callback: Option<ProgressCallback<'a>>) -> Self {
        Self {
            total,
            last: None,
            callback,
        }
    }

    /// Report `transferred` of `total` bytes
    pub fn bytes(&mut self, transferred: u64) {
        let percent = if self.total == 0 {
            0
        } else {
            (transferred.min(self.total) as u128 * 100 / self.total as u128) as u8
        };
        self.report(percent.min(99));
    }

    pub fn complete(&mut self) {
        self.report(100);
    }

    fn report(&mut self, percent: u8) {
        if self.last.is_some_and(|last| percent <= last) {
            return;
        }
        self.last = Some(percent);
        if let Some(callback) = self.callback.as_mut() {
            callback(percent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(total: u64, steps: &[u64], complete: bool) -> Vec<u8> {
        let mut seen = Vec::new();
        {
            let mut callback = |p: u8| seen.push(p);
            let mut tracker = ProgressTracker::new(total, Some(&mut callback));
            for step in steps {
                tracker.bytes(*step);
            }
            if complete {
                tracker.complete();
            }
        }
        seen
    }

    #[test]
    fn test_progress_is_monotonic_and_ends_at_100() {
        let seen = record(1000, &[0, 250, 250, 500, 999, 1000], true);
        assert_eq!(seen, vec![0, 25, 50, 99, 100]);
    }

    #[test]
    fn test_progress_holds_at_99_until_complete() {
        let seen = record(10, &[5, 10], false);
        assert_eq!(seen, vec![50, 99]);
    }

    #[test]
    fn test_empty_file_reports_100_once() {
        let seen = record(0, &[], true);
        assert_eq!(seen, vec![100]);
    }

    #[test]
    fn test_no_callback_is_fine() {
        let mut tracker = ProgressTracker::new(10, None);
        tracker.bytes(5);
        tracker.complete();
    }
}
