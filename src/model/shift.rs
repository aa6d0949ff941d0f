use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Shift reference data (read-only here): a named time window assigned to an
/// employee. `start_time`/`end_time` are "HH:MM" time-of-day strings in the
/// tenant's local timezone; a shift is a night shift when end < start.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ShiftAssignment {
    pub tenant_id: u64,
    pub employee_id: u64,
    pub shift_name: String,
    pub start_time: String,
    pub end_time: String,
    pub break_minutes: i32,
}

/// Parse "HH:MM" into minutes since midnight. Returns None for anything
/// outside 00:00..=23:59 or not in the expected shape.
pub fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// Shortest distance in minutes between two times of day, wrapping at
/// midnight.
pub fn wrap_distance(a: u32, b: u32) -> u32 {
    let d = a.abs_diff(b) % 1440;
    d.min(1440 - d)
}

impl ShiftAssignment {
    pub fn start_minutes(&self) -> u32 {
        parse_hhmm(&self.start_time).unwrap_or(0)
    }

    pub fn end_minutes(&self) -> u32 {
        parse_hhmm(&self.end_time).unwrap_or(0)
    }

    pub fn is_night_shift(&self) -> bool {
        self.end_minutes() < self.start_minutes()
    }

    /// Scheduled length in minutes, crossing midnight when needed.
    pub fn duration_minutes(&self) -> u32 {
        let s = self.start_minutes();
        let mut e = self.end_minutes();
        if e < s {
            e += 1440;
        }
        e - s
    }

    /// Midpoint between start and end, in un-wrapped minutes (may exceed
    /// 1440 for night shifts).
    fn midpoint_unwrapped(&self) -> u32 {
        let s = self.start_minutes();
        let mut e = self.end_minutes();
        if e < s {
            e += 1440;
        }
        (s + e) / 2
    }

    /// True when a punch at `minutes` since midnight falls before the shift
    /// midpoint. Night shifts normalize the punch time onto the shift's own
    /// axis before comparing, so a 05:00 punch against 22:00-06:00 reads as
    /// "after midpoint".
    pub fn before_midpoint(&self, minutes: u32) -> bool {
        let s = self.start_minutes();
        let mut p = minutes;
        if self.is_night_shift() && p < s {
            p += 1440;
        }
        p < self.midpoint_unwrapped()
    }

    /// Distance in minutes from a punch time to the nearer shift boundary.
    pub fn distance_to_start(&self, minutes: u32) -> u32 {
        wrap_distance(minutes, self.start_minutes())
    }

    pub fn distance_to_end(&self, minutes: u32) -> u32 {
        wrap_distance(minutes, self.end_minutes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(start: &str, end: &str) -> ShiftAssignment {
        ShiftAssignment {
            tenant_id: 1,
            employee_id: 1,
            shift_name: "test".into(),
            start_time: start.into(),
            end_time: end.into(),
            break_minutes: 60,
        }
    }

    #[test]
    fn parses_hhmm() {
        assert_eq!(parse_hhmm("08:00"), Some(480));
        assert_eq!(parse_hhmm("23:59"), Some(1439));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("8"), None);
    }

    #[test]
    fn day_shift_midpoint() {
        let s = shift("08:00", "17:00");
        assert!(!s.is_night_shift());
        assert_eq!(s.duration_minutes(), 540);
        // midpoint is 12:30
        assert!(s.before_midpoint(parse_hhmm("09:00").unwrap()));
        assert!(!s.before_midpoint(parse_hhmm("13:00").unwrap()));
    }

    #[test]
    fn night_shift_midpoint_wraps() {
        let s = shift("22:00", "06:00");
        assert!(s.is_night_shift());
        assert_eq!(s.duration_minutes(), 480);
        // midpoint is 02:00
        assert!(s.before_midpoint(parse_hhmm("23:30").unwrap()));
        assert!(s.before_midpoint(parse_hhmm("01:00").unwrap()));
        assert!(!s.before_midpoint(parse_hhmm("05:00").unwrap()));
    }

    #[test]
    fn wrap_distance_is_shortest() {
        assert_eq!(wrap_distance(parse_hhmm("23:50").unwrap(), parse_hhmm("00:10").unwrap()), 20);
        assert_eq!(wrap_distance(480, 540), 60);
    }

    #[test]
    fn boundary_distances_on_night_shift() {
        let s = shift("22:00", "06:00");
        assert_eq!(s.distance_to_end(parse_hhmm("05:45").unwrap()), 15);
        assert_eq!(s.distance_to_start(parse_hhmm("21:40").unwrap()), 20);
    }
}
