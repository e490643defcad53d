pub mod store;

use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::s0pcm::Reading;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounter {
    /// Last absolute pulse count accepted from the device.
    #[serde(default)]
    pub pulsecount: u64,
    /// Lifetime accumulated pulses, never decreases.
    #[serde(default)]
    pub total: u64,
    /// Accumulated pulses since the stored date.
    #[serde(default)]
    pub today: u64,
}

impl ChannelCounter {
    pub fn new() -> Self {
        return ChannelCounter { pulsecount: 0, total: 0, today: 0 };
    }
}

fn channels_default() -> BTreeMap<u8, ChannelCounter> { return BTreeMap::new() }

/// The persisted counter state: the calendar date of the last processed
/// reading plus one counter set per metering channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    pub date: NaiveDate,
    #[serde(default="channels_default")]
    pub channels: BTreeMap<u8, ChannelCounter>,
}

impl Measurement {
    pub fn new(date: NaiveDate) -> Self {
        return Measurement { date, channels: BTreeMap::new() };
    }

    /// Fold one reading into the counters. Returns true when a counter or
    /// the stored date actually changed, which is what gates persistence.
    pub fn apply(&mut self, reading: &Reading, today: NaiveDate) -> bool {
        let before = self.clone();

        /* Day rollover: all daily counters reset before this reading's
           delta is applied, also for channels the telegram doesn't carry */
        if self.date != today {
            debug!("Day changed from '{}' to '{}', resetting the today counters to 0", self.date, today);
            for counter in self.channels.values_mut() {
                counter.today = 0;
            }
        }

        for channel in &reading.channels {
            let counter = self.channels.entry(channel.channel).or_insert_with(ChannelCounter::new);

            if channel.pulsecount > counter.pulsecount {
                debug!("Pulsecount of channel {} changed from '{}' to '{}'", channel.channel, counter.pulsecount, channel.pulsecount);

                let delta = channel.pulsecount - counter.pulsecount;
                counter.pulsecount = channel.pulsecount;
                counter.total += delta;
                counter.today += delta;
            } else if channel.pulsecount < counter.pulsecount {
                /* The device restarted and its internal counter began again
                   at zero. Taking the new absolute value as the delta keeps
                   counting without going negative, at the price of missing
                   whatever pulses fell between the last accepted value and
                   the restart. */
                warn!("Stored pulsecount '{}' of channel {} is higher than the received '{}', this normally happens when the s0pcm is restarted. Counting continues, but for a precise value read the meter and correct the totals in the measurement file", counter.pulsecount, channel.channel, channel.pulsecount);

                let delta = channel.pulsecount;
                counter.pulsecount = channel.pulsecount;
                counter.total += delta;
                counter.today += delta;
            }
        }

        if self.date != today {
            self.date = today;
        }

        return *self != before;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s0pcm::parse_telegram;

    fn date(day: u32) -> NaiveDate {
        return NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
    }

    fn counter(pulsecount: u64, total: u64, today: u64) -> ChannelCounter {
        return ChannelCounter { pulsecount, total, today };
    }

    #[test]
    fn test_normal_increment() {
        let mut measurement = Measurement::new(date(17));
        measurement.channels.insert(1, counter(2, 10, 1));
        measurement.channels.insert(2, counter(3, 20, 2));

        let reading = parse_telegram("ID:8237:I:10:M1:0:5:M2:0:3").unwrap().unwrap();
        let changed = measurement.apply(&reading, date(17));

        assert!(changed);
        assert_eq!(measurement.channels[&1], counter(5, 13, 4));
        /* Channel 2 reported the same pulsecount and stays untouched */
        assert_eq!(measurement.channels[&2], counter(3, 20, 2));
        assert_eq!(measurement.date, date(17));
    }

    #[test]
    fn test_restart_regression_counts_new_value_as_delta() {
        let mut measurement = Measurement::new(date(17));
        measurement.channels.insert(1, counter(7, 10, 1));

        let reading = parse_telegram("ID:8237:I:10:M1:0:5:M2:0:0").unwrap().unwrap();
        let changed = measurement.apply(&reading, date(17));

        assert!(changed);
        assert_eq!(measurement.channels[&1], counter(5, 15, 6));
    }

    #[test]
    fn test_unchanged_reading_reports_no_change() {
        let mut measurement = Measurement::new(date(17));
        measurement.channels.insert(1, counter(5, 13, 4));
        measurement.channels.insert(2, counter(3, 20, 2));

        let reading = parse_telegram("ID:8237:I:10:M1:0:5:M2:0:3").unwrap().unwrap();
        let changed = measurement.apply(&reading, date(17));

        assert!(!changed);
    }

    #[test]
    fn test_day_rollover_resets_today_before_delta() {
        let mut measurement = Measurement::new(date(17));
        measurement.channels.insert(1, counter(2, 10, 5));

        let reading = parse_telegram("ID:8237:I:10:M1:0:4:M2:0:0").unwrap().unwrap();
        let changed = measurement.apply(&reading, date(18));

        assert!(changed);
        assert_eq!(measurement.channels[&1], counter(4, 12, 2));
        assert_eq!(measurement.date, date(18));
    }

    #[test]
    fn test_day_rollover_resets_channels_missing_from_reading() {
        let mut measurement = Measurement::new(date(17));
        measurement.channels.insert(1, counter(2, 10, 5));
        measurement.channels.insert(5, counter(9, 30, 7));

        /* A 2-channel telegram never mentions channel 5 */
        let reading = parse_telegram("ID:8237:I:10:M1:0:2:M2:0:0").unwrap().unwrap();
        measurement.apply(&reading, date(18));

        assert_eq!(measurement.channels[&5], counter(9, 30, 0));
    }

    #[test]
    fn test_date_change_alone_is_a_change() {
        let mut measurement = Measurement::new(date(17));
        measurement.channels.insert(1, counter(5, 13, 0));
        measurement.channels.insert(2, counter(0, 0, 0));

        let reading = parse_telegram("ID:8237:I:10:M1:0:5:M2:0:0").unwrap().unwrap();
        let changed = measurement.apply(&reading, date(18));

        assert!(changed);
        assert_eq!(measurement.date, date(18));
    }

    #[test]
    fn test_unknown_channel_starts_from_zero() {
        let mut measurement = Measurement::new(date(17));

        let reading = parse_telegram("ID:8237:I:10:M1:0:5:M2:0:3").unwrap().unwrap();
        let changed = measurement.apply(&reading, date(17));

        assert!(changed);
        assert_eq!(measurement.channels[&1], counter(5, 5, 5));
        assert_eq!(measurement.channels[&2], counter(3, 3, 3));
    }
}
