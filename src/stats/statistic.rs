//! The shared statistics block used for damage, healing and per-skill
//! aggregation: categorized totals and counts, a one second sliding window
//! for the instantaneous rate, and first/last-seen stamps for the whole
//! session average.

use crate::now_ms;
use serde::Serialize;
use std::collections::VecDeque;

/// The trailing window length for the instantaneous rate.
pub const REALTIME_WINDOW_MS: u64 = 1000;

#[derive(Debug, Default, Clone, Serialize)]
pub struct ValueBuckets {
    pub normal: u64,
    pub critical: u64,
    pub lucky: u64,
    pub crit_lucky: u64,
    pub hp_lessen: u64,
    pub total: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CountBuckets {
    pub normal: u64,
    pub critical: u64,
    pub lucky: u64,
    pub total: u64,
}

#[derive(Debug, Default, Clone)]
pub struct StatisticBlock {
    pub stats: ValueBuckets,
    pub count: CountBuckets,
    window: VecDeque<(u64, u64)>,
    first_ms: Option<u64>,
    last_ms: Option<u64>,
    pub realtime_value: u64,
    pub realtime_max: u64,
}

impl StatisticBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, value: u64, is_crit: bool, is_lucky: bool, hp_lessen: u64) {
        self.add_record_at(now_ms(), value, is_crit, is_lucky, hp_lessen);
    }

    pub(crate) fn add_record_at(
        &mut self,
        now: u64,
        value: u64,
        is_crit: bool,
        is_lucky: bool,
        hp_lessen: u64,
    ) {
        // Every record lands in exactly one value bucket
        match (is_crit, is_lucky) {
            (true, true) => self.stats.crit_lucky += value,
            (true, false) => self.stats.critical += value,
            (false, true) => self.stats.lucky += value,
            (false, false) => self.stats.normal += value,
        }
        self.stats.total += value;
        self.stats.hp_lessen += hp_lessen;

        // Crit and lucky counts are independent of each other
        if is_crit {
            self.count.critical += 1;
        }
        if is_lucky {
            self.count.lucky += 1;
        }
        if !is_crit && !is_lucky {
            self.count.normal += 1;
        }
        self.count.total += 1;

        self.window.push_back((now, value));

        if self.first_ms.is_some() {
            self.last_ms = Some(now);
        } else {
            self.first_ms = Some(now);
        }
    }

    /// Evicts window entries older than one second and recomputes the
    /// instantaneous value, raising the running maximum if exceeded.
    pub fn update_realtime(&mut self) {
        self.update_realtime_at(now_ms());
    }

    pub(crate) fn update_realtime_at(&mut self, now: u64) {
        while let Some(&(time, _)) = self.window.front() {
            if now.saturating_sub(time) > REALTIME_WINDOW_MS {
                self.window.pop_front();
            } else {
                break;
            }
        }

        self.realtime_value = self.window.iter().map(|&(_, v)| v).sum();
        if self.realtime_value > self.realtime_max {
            self.realtime_max = self.realtime_value;
        }
    }

    /// Whole-session average per second. Zero or one records give 0, never
    /// NaN or infinity.
    pub fn total_per_second(&self) -> f64 {
        let (first, last) = match (self.first_ms, self.last_ms) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0.0,
        };
        let per_second = self.stats.total as f64 / (last.saturating_sub(first)) as f64 * 1000.0;
        if per_second.is_finite() {
            per_second
        } else {
            0.0
        }
    }

    /// Per-skill blocks report cumulative totals only, not their own rate.
    pub fn clear_window(&mut self) {
        self.window.clear();
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_assignment() {
        let mut block = StatisticBlock::new();
        block.add_record_at(0, 100, false, false, 0);
        block.add_record_at(1, 200, true, false, 0);
        block.add_record_at(2, 300, false, true, 0);
        block.add_record_at(3, 400, true, true, 0);

        assert_eq!(block.stats.normal, 100);
        assert_eq!(block.stats.critical, 200);
        assert_eq!(block.stats.lucky, 300);
        assert_eq!(block.stats.crit_lucky, 400);
        assert_eq!(block.stats.total, 1000);

        // Crit and lucky counts overlap on the crit+lucky record
        assert_eq!(block.count.normal, 1);
        assert_eq!(block.count.critical, 2);
        assert_eq!(block.count.lucky, 2);
        assert_eq!(block.count.total, 4);
    }

    #[test]
    fn test_order_independence() {
        let records = [
            (100u64, false, false),
            (250, true, false),
            (300, false, true),
            (450, true, true),
            (100, false, false),
        ];

        let mut forward = StatisticBlock::new();
        for (i, &(v, c, l)) in records.iter().enumerate() {
            forward.add_record_at(i as u64, v, c, l, 0);
        }

        let mut reverse = StatisticBlock::new();
        for (i, &(v, c, l)) in records.iter().rev().enumerate() {
            reverse.add_record_at(i as u64, v, c, l, 0);
        }

        assert_eq!(forward.stats.total, reverse.stats.total);
        assert_eq!(forward.stats.normal, reverse.stats.normal);
        assert_eq!(forward.stats.critical, reverse.stats.critical);
        assert_eq!(forward.stats.lucky, reverse.stats.lucky);
        assert_eq!(forward.stats.crit_lucky, reverse.stats.crit_lucky);
        assert_eq!(forward.count.total, reverse.count.total);
        assert_eq!(forward.count.critical, reverse.count.critical);
    }

    #[test]
    fn test_total_per_second_degenerate_cases() {
        // No records at all
        let block = StatisticBlock::new();
        assert_eq!(block.total_per_second(), 0.0);

        // A single record has no time range yet
        let mut block = StatisticBlock::new();
        block.add_record_at(5000, 777, false, false, 0);
        assert_eq!(block.total_per_second(), 0.0);

        // Two records at the same millisecond divide by zero
        let mut block = StatisticBlock::new();
        block.add_record_at(5000, 100, false, false, 0);
        block.add_record_at(5000, 100, false, false, 0);
        assert!(block.total_per_second().is_finite());
        assert_eq!(block.total_per_second(), 0.0);
    }

    #[test]
    fn test_total_per_second_average() {
        let mut block = StatisticBlock::new();
        block.add_record_at(1000, 500, false, false, 0);
        block.add_record_at(3000, 500, false, false, 0);

        // 1000 total over 2 seconds
        assert_eq!(block.total_per_second(), 500.0);
    }

    #[test]
    fn test_realtime_window_eviction_and_max() {
        let mut block = StatisticBlock::new();
        block.add_record_at(1000, 400, false, false, 0);
        block.add_record_at(1500, 600, false, false, 0);

        block.update_realtime_at(1600);
        assert_eq!(block.realtime_value, 1000);
        assert_eq!(block.realtime_max, 1000);

        // The first record ages out of the window
        block.update_realtime_at(2100);
        assert_eq!(block.realtime_value, 600);
        assert_eq!(block.realtime_max, 1000);

        block.update_realtime_at(3000);
        assert_eq!(block.realtime_value, 0);
        assert_eq!(block.realtime_max, 1000);
    }

    #[test]
    fn test_clear_window_keeps_totals() {
        let mut block = StatisticBlock::new();
        block.add_record_at(100, 50, true, false, 10);
        block.clear_window();
        block.update_realtime_at(101);

        assert_eq!(block.realtime_value, 0);
        assert_eq!(block.stats.critical, 50);
        assert_eq!(block.stats.hp_lessen, 10);
        assert_eq!(block.count.total, 1);
    }
}
