// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cycle clock.
//!
//! A cycle is the window between two consecutive cutovers (`cutover_hour:00`
//! local time in a fixed time zone). Everything keyed by day in the pipeline
//! (cache entries, trigger markers, history cleanup) goes through
//! [`CycleClock::cycle_key`], so the whole system agrees on which day it is.
//!
//! Cutovers follow the wall clock. In a zone with a fixed UTC offset every
//! cycle lasts exactly 86 400 s. In a zone that observes daylight saving
//! time, the cycle spanning a transition is shorter or longer by the size of
//! the shift (82 800 s or 90 000 s for the usual one-hour shift), and cache
//! TTLs follow the real length.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Identifier of one challenge cycle, rendered as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleKey(NaiveDate);

impl CycleKey {
    /// Wrap a calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// The calendar date this cycle starts on.
    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// The following cycle.
    pub fn next(&self) -> Self {
        Self(self.0.succ_opt().unwrap_or(self.0))
    }

    /// The cycle `days` before this one.
    pub fn days_before(&self, days: u64) -> Self {
        Self(self.0.checked_sub_days(Days::new(days)).unwrap_or(self.0))
    }
}

impl fmt::Display for CycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for CycleKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Self)
    }
}

/// Maps instants to cycles for a fixed time zone and cutover hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleClock {
    timezone: Tz,
    cutover_hour: u32,
}

impl CycleClock {
    /// Create a clock. `cutover_hour` must be in `0..24`.
    pub fn new(timezone: Tz, cutover_hour: u32) -> Result<Self, ConfigError> {
        if cutover_hour > 23 {
            return Err(ConfigError::InvalidCutoverHour(cutover_hour));
        }
        Ok(Self {
            timezone,
            cutover_hour,
        })
    }

    /// Time zone cycles are computed in.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Local hour at which a new cycle begins.
    pub fn cutover_hour(&self) -> u32 {
        self.cutover_hour
    }

    /// Cycle containing `now`. Before the cutover hour this is the previous
    /// calendar date.
    pub fn cycle_key(&self, now: DateTime<Utc>) -> CycleKey {
        let local = now.with_timezone(&self.timezone);
        let date = local.date_naive();
        if local.hour() < self.cutover_hour {
            CycleKey(date.pred_opt().unwrap_or(date))
        } else {
            CycleKey(date)
        }
    }

    /// Instant at which `key` begins.
    ///
    /// A cutover that falls into a DST gap starts at the first valid local
    /// time after it; an ambiguous cutover starts at its earlier occurrence.
    pub fn cycle_start(&self, key: CycleKey) -> DateTime<Utc> {
        let cutover = NaiveTime::from_hms_opt(self.cutover_hour, 0, 0).unwrap_or(NaiveTime::MIN);
        let naive = NaiveDateTime::new(key.date(), cutover);
        self.resolve_local(naive)
    }

    /// First cutover strictly after `now`.
    pub fn next_cycle_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.cycle_start(self.cycle_key(now).next())
    }

    /// Whole seconds until the next cutover, rounded up and never zero.
    ///
    /// At most [`cycle_length`](Self::cycle_length) of the current cycle.
    pub fn seconds_until_next_cycle(&self, now: DateTime<Utc>) -> u64 {
        self.seconds_until_cycle_end(self.cycle_key(now), now)
    }

    /// Real duration of `key`, from its cutover to the next one.
    pub fn cycle_length(&self, key: CycleKey) -> chrono::Duration {
        self.cycle_start(key.next()) - self.cycle_start(key)
    }

    /// Whole seconds from `at` until `key` ends, rounded up and never zero.
    /// An `at` past the end of `key` yields 1.
    pub fn seconds_until_cycle_end(&self, key: CycleKey, at: DateTime<Utc>) -> u64 {
        let millis = (self.cycle_start(key.next()) - at).num_milliseconds().max(1) as u64;
        millis.div_ceil(1000).max(1)
    }

    fn resolve_local(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        // Gaps are at most an hour in every zone chrono-tz ships.
        let mut candidate = naive;
        for _ in 0..4 {
            if let Some(local) = self.timezone.from_local_datetime(&candidate).earliest() {
                return local.with_timezone(&Utc);
            }
            candidate += chrono::Duration::minutes(30);
        }
        Utc.from_utc_datetime(&naive)
    }
}
