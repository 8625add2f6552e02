use std::cmp::Ordering;

/// Default timescale for times derived from floating-point seconds (90 kHz MPEG clock).
pub const DEFAULT_TIMESCALE: u32 = 90_000;

/// Rational media time `value / timescale` seconds.
///
/// Equality and ordering compare the represented instant, so `1/2` equals `2/4`. A zero timescale
/// is treated as `1` when converting.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct MediaTime {
    /// Tick count.
    pub value: i64,
    /// Ticks per second.
    pub timescale: u32,
}

impl MediaTime {
    /// Time zero.
    pub const ZERO: Self = Self {
        value: 0,
        timescale: 1,
    };

    /// Create a time of `value` ticks at `timescale` ticks per second.
    pub const fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    /// Convert seconds to the nearest tick at `timescale`.
    pub fn from_seconds(seconds: f64, timescale: u32) -> Self {
        let ts = timescale.max(1);
        let value = if seconds.is_finite() {
            (seconds * f64::from(ts)).round() as i64
        } else {
            0
        };
        Self {
            value,
            timescale: ts,
        }
    }

    fn ts(self) -> i128 {
        i128::from(self.timescale.max(1))
    }

    /// Represented time in seconds.
    pub fn seconds(self) -> f64 {
        self.value as f64 / f64::from(self.timescale.max(1))
    }

    /// Return `true` when the time is exactly zero.
    pub fn is_zero(self) -> bool {
        self.value == 0
    }

    /// Re-express this time at `timescale`, rounding to the nearest tick.
    pub fn rescale(self, timescale: u32) -> Self {
        let to = i128::from(timescale.max(1));
        let from = self.ts();
        if to == from {
            return Self {
                value: self.value,
                timescale: timescale.max(1),
            };
        }
        let num = i128::from(self.value) * to;
        let half = from / 2;
        let rounded = if num >= 0 {
            (num + half) / from
        } else {
            (num - half) / from
        };
        Self {
            value: clamp_i64(rounded),
            timescale: timescale.max(1),
        }
    }

    fn common(self, other: Self) -> (i128, i128, u32) {
        if self.timescale == other.timescale {
            return (
                i128::from(self.value),
                i128::from(other.value),
                self.timescale.max(1),
            );
        }
        let ts = self.timescale.max(other.timescale).max(1);
        (
            i128::from(self.rescale(ts).value),
            i128::from(other.rescale(ts).value),
            ts,
        )
    }
}

fn clamp_i64(v: i128) -> i64 {
    v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = i128::from(self.value) * other.ts();
        let rhs = i128::from(other.value) * self.ts();
        lhs.cmp(&rhs)
    }
}

impl std::ops::Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: Self) -> Self::Output {
        let (a, b, ts) = self.common(rhs);
        MediaTime {
            value: clamp_i64(a + b),
            timescale: ts,
        }
    }
}

impl std::ops::Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: Self) -> Self::Output {
        let (a, b, ts) = self.common(rhs);
        MediaTime {
            value: clamp_i64(a - b),
            timescale: ts,
        }
    }
}

impl std::fmt::Display for MediaTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}s", self.seconds())
    }
}

/// `(start, duration)` window over an asset timeline.
///
/// `duration == None` means unbounded: through the end of the asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeRange {
    /// Inclusive range start.
    pub start: MediaTime,
    /// Range length, `None` when unbounded.
    pub duration: Option<MediaTime>,
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::FULL
    }
}

impl TimeRange {
    /// Whole asset: start at zero, unbounded.
    pub const FULL: Self = Self {
        start: MediaTime::ZERO,
        duration: None,
    };

    /// Bounded range `[start, start + duration)`.
    pub fn new(start: MediaTime, duration: MediaTime) -> Self {
        Self {
            start,
            duration: Some(duration),
        }
    }

    /// Unbounded range starting at `start`.
    pub fn from_start(start: MediaTime) -> Self {
        Self {
            start,
            duration: None,
        }
    }

    /// Return `true` when the range has no upper bound.
    pub fn is_unbounded(self) -> bool {
        self.duration.is_none()
    }

    /// Exclusive end, or `None` when unbounded.
    pub fn end(self) -> Option<MediaTime> {
        self.duration.map(|d| self.start + d)
    }

    /// Exclusive end, clipping an unbounded range to `asset_duration`.
    pub fn end_within(self, asset_duration: MediaTime) -> MediaTime {
        self.end().unwrap_or(asset_duration)
    }

    /// Duration used for progress: the bounded duration, else the full asset duration.
    pub fn export_duration(self, asset_duration: MediaTime) -> MediaTime {
        self.duration.unwrap_or(asset_duration)
    }

    /// Return `true` when `t` lies inside `[start, end)`.
    pub fn contains(self, t: MediaTime) -> bool {
        t >= self.start && self.end().is_none_or(|end| t < end)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/time.rs"]
mod tests;
