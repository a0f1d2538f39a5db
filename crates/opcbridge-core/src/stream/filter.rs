// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-subscriber stages: change detection and latest-wins throttling.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::OpcData;

// =============================================================================
// DistinctUntilChanged
// =============================================================================

/// Passes the first sample and every sample whose reading differs from the last one passed.
#[derive(Debug, Default)]
pub(crate) struct DistinctUntilChanged {
    last: Option<OpcData>,
}

impl DistinctUntilChanged {
    pub(crate) fn admit(&mut self, sample: &OpcData) -> bool {
        match &self.last {
            Some(last) if last.same_reading(sample) => false,
            _ => {
                self.last = Some(sample.clone());
                true
            }
        }
    }
}

// =============================================================================
// LatestThrottle
// =============================================================================

/// Emits at most one item per interval, always the most recent one.
///
/// The first item of a quiet period goes out immediately and opens a window. Items arriving
/// inside the window replace each other; when the window closes the survivor is emitted and
/// a new window opens.
#[derive(Debug)]
pub(crate) struct LatestThrottle<T> {
    interval: Duration,
    window_end: Option<Instant>,
    pending: Option<T>,
}

impl<T> LatestThrottle<T> {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_end: None,
            pending: None,
        }
    }

    /// Offers an item. Returns it back if it may be emitted right away.
    pub(crate) fn offer(&mut self, item: T, now: Instant) -> Option<T> {
        match self.window_end {
            Some(end) if now < end => {
                self.pending = Some(item);
                None
            }
            _ => {
                self.pending = None;
                self.window_end = Some(now + self.interval);
                Some(item)
            }
        }
    }

    /// When the held item becomes due, if there is one.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().and(self.window_end)
    }

    /// Releases the held item if its window has closed.
    pub(crate) fn flush(&mut self, now: Instant) -> Option<T> {
        match self.window_end {
            Some(end) if now >= end && self.pending.is_some() => {
                self.window_end = Some(now + self.interval);
                self.pending.take()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::Quality;

    #[test]
    fn test_distinct() {
        let mut distinct = DistinctUntilChanged::default();
        assert!(distinct.admit(&OpcData::new("T1", 1)));
        assert!(!distinct.admit(&OpcData::new("T1", 1)));
        assert!(distinct.admit(&OpcData::new("T1", 1).with_quality(Quality::Bad)));
        assert!(distinct.admit(&OpcData::new("T1", 2)));
        assert!(distinct.admit(&OpcData::new("T1", 1)));
    }

    #[test]
    fn test_throttle_latest_wins() {
        let start = Instant::now();
        let ms = |n| start + Duration::from_millis(n);
        let mut throttle = LatestThrottle::new(Duration::from_millis(100));

        assert_eq!(throttle.offer(1, ms(0)), Some(1));
        assert_eq!(throttle.offer(2, ms(10)), None);
        assert_eq!(throttle.offer(3, ms(50)), None);
        assert_eq!(throttle.deadline(), Some(ms(100)));

        assert_eq!(throttle.flush(ms(99)), None);
        assert_eq!(throttle.flush(ms(100)), Some(3));
        assert_eq!(throttle.deadline(), None);

        // Window reopened at 100; nothing pending when it closes.
        assert_eq!(throttle.offer(4, ms(150)), None);
        assert_eq!(throttle.flush(ms(200)), Some(4));
        assert_eq!(throttle.offer(5, ms(450)), Some(5));
    }

    #[test]
    fn test_throttle_quiet_stream_passes_through() {
        let start = Instant::now();
        let mut throttle = LatestThrottle::new(Duration::from_millis(50));
        for (i, t) in [0u64, 120, 240].iter().enumerate() {
            assert_eq!(throttle.offer(i, start + Duration::from_millis(*t)), Some(i));
        }
    }
}
