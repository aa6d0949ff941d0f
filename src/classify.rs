use crate::model::punch::{PunchEvent, PunchType};
use crate::model::shift::ShiftAssignment;
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Fallback cutoff for the TIME_BASED tier: before 14:00 local reads as IN.
const TIME_BASED_CUTOFF_MIN: u32 = 14 * 60;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
    strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
    strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassifyMethod {
    Alternation,
    ShiftBased,
    TimeBased,
}

/// Outcome of the classifier for a punch the terminal did not type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub punch_type: PunchType,
    pub confidence: Confidence,
    pub method: ClassifyMethod,
    pub reason: String,
}

fn minutes_of(ts: NaiveDateTime) -> u32 {
    ts.time().hour() * 60 + ts.time().minute()
}

/// Tier 1: alternate against the most recent valid IN/OUT of the day; a day
/// with no punches at all opens with IN.
fn by_alternation(today: &[PunchEvent], ts: NaiveDateTime) -> Option<Classification> {
    let last = today
        .iter()
        .filter(|p| p.timestamp < ts)
        .filter(|p| p.is_valid_for_sequence())
        .filter(|p| !p.punch_type.is_break() && !p.punch_type.is_mission())
        .max_by_key(|p| p.timestamp);

    if let Some(last) = last {
        let next = last.punch_type.alternated()?;
        return Some(Classification {
            punch_type: next,
            confidence: Confidence::High,
            method: ClassifyMethod::Alternation,
            reason: format!(
                "alternating after {} at {}",
                last.punch_type,
                last.timestamp.format("%H:%M")
            ),
        });
    }

    if today.is_empty() {
        return Some(Classification {
            punch_type: PunchType::In,
            confidence: Confidence::High,
            method: ClassifyMethod::Alternation,
            reason: "first punch of the day".into(),
        });
    }

    // Punches exist today but none is usable for alternation; let the
    // shift/time tiers decide.
    None
}

/// Tier 2: compare the punch time of day to the shift midpoint, wrapping
/// across midnight for night shifts.
fn by_shift(shift: Option<&ShiftAssignment>, ts: NaiveDateTime) -> Option<Classification> {
    let shift = shift?;
    let m = minutes_of(ts);
    let punch_type = if shift.before_midpoint(m) {
        PunchType::In
    } else {
        PunchType::Out
    };
    Some(Classification {
        punch_type,
        confidence: Confidence::Medium,
        method: ClassifyMethod::ShiftBased,
        reason: format!(
            "{} side of shift {} ({}-{})",
            if punch_type == PunchType::In { "start" } else { "end" },
            shift.shift_name,
            shift.start_time,
            shift.end_time
        ),
    })
}

/// Tier 3: fixed time-of-day cutoff when nothing else applies.
fn by_time(ts: NaiveDateTime) -> Classification {
    let punch_type = if minutes_of(ts) < TIME_BASED_CUTOFF_MIN {
        PunchType::In
    } else {
        PunchType::Out
    };
    Classification {
        punch_type,
        confidence: Confidence::Low,
        method: ClassifyMethod::TimeBased,
        reason: format!("fixed cutoff at {:02}:00", TIME_BASED_CUTOFF_MIN / 60),
    }
}

/// Classify a punch without an explicit terminal-supplied type. `today` is
/// the employee's punch history for the punch's calendar day, sorted is not
/// required. Evaluated strictly in tier order; the first applicable wins.
pub fn classify(
    today: &[PunchEvent],
    shift: Option<&ShiftAssignment>,
    ts: NaiveDateTime,
) -> Classification {
    by_alternation(today, ts)
        .or_else(|| by_shift(shift, ts))
        .unwrap_or_else(|| by_time(ts))
}

/// Decide whether a classified punch is ambiguous and must be routed to the
/// validation workflow. Only night-shift assignments produce ambiguity: the
/// alternation and shift views can disagree around the midnight boundary.
pub fn detect_ambiguity(
    shift: Option<&ShiftAssignment>,
    ts: NaiveDateTime,
    chosen: &Classification,
    tolerance_minutes: u32,
) -> Option<String> {
    let shift = shift?;
    if !shift.is_night_shift() {
        return None;
    }

    let m = minutes_of(ts);
    let shift_view = if shift.before_midpoint(m) {
        PunchType::In
    } else {
        PunchType::Out
    };

    if chosen.method == ClassifyMethod::Alternation && chosen.punch_type != shift_view {
        return Some(format!(
            "night shift {}-{}: alternation says {} but shift position says {}",
            shift.start_time, shift.end_time, chosen.punch_type, shift_view
        ));
    }

    if chosen.confidence == Confidence::Low && shift.distance_to_end(m) <= tolerance_minutes {
        return Some(format!(
            "low-confidence punch within {} min of midnight-crossing shift end {}",
            tolerance_minutes, shift.end_time
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::punch::{PunchMethod, ValidationStatus};
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 20)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn punch(id: u64, ts: NaiveDateTime, punch_type: PunchType) -> PunchEvent {
        PunchEvent {
            id,
            tenant_id: 1,
            employee_id: 7,
            device_id: None,
            timestamp: ts,
            punch_type,
            method: PunchMethod::Fingerprint,
            raw_payload: None,
            has_anomaly: false,
            anomaly_type: None,
            anomaly_note: None,
            is_corrected: false,
            corrected_by: None,
            corrected_at: None,
            correction_note: None,
            prev_type: None,
            prev_timestamp: None,
            needs_approval: false,
            approval_status: None,
            approved_by: None,
            approved_at: None,
            validation_status: None,
            ambiguity_reason: None,
            escalation_level: 0,
            escalated_at: None,
            hours_worked: None,
            late_minutes: None,
            early_leave_minutes: None,
            overtime_minutes: None,
            is_generated: false,
            generated_by: None,
            created_at: ts,
        }
    }

    fn night_shift() -> ShiftAssignment {
        ShiftAssignment {
            tenant_id: 1,
            employee_id: 7,
            shift_name: "night".into(),
            start_time: "22:00".into(),
            end_time: "06:00".into(),
            break_minutes: 30,
        }
    }

    fn day_shift() -> ShiftAssignment {
        ShiftAssignment {
            tenant_id: 1,
            employee_id: 7,
            shift_name: "day".into(),
            start_time: "08:00".into(),
            end_time: "17:00".into(),
            break_minutes: 60,
        }
    }

    #[test]
    fn first_punch_of_day_is_in() {
        for (h, m) in [(6, 0), (11, 30), (16, 45), (23, 10)] {
            let c = classify(&[], Some(&day_shift()), at(h, m));
            assert_eq!(c.punch_type, PunchType::In, "at {h}:{m}");
            assert_eq!(c.confidence, Confidence::High);
            assert_eq!(c.method, ClassifyMethod::Alternation);
        }
    }

    #[test]
    fn alternation_strictly_alternates() {
        let mut today = vec![punch(1, at(8, 0), PunchType::In)];
        let c = classify(&today, None, at(12, 0));
        assert_eq!(c.punch_type, PunchType::Out);

        today.push(punch(2, at(12, 0), PunchType::Out));
        let c = classify(&today, None, at(13, 0));
        assert_eq!(c.punch_type, PunchType::In);

        today.push(punch(3, at(13, 0), PunchType::In));
        let c = classify(&today, None, at(17, 0));
        assert_eq!(c.punch_type, PunchType::Out);
    }

    #[test]
    fn alternation_skips_invalid_punches() {
        let mut rejected = punch(1, at(8, 0), PunchType::In);
        rejected.validation_status = Some(ValidationStatus::Rejected);
        let mut generated = punch(2, at(8, 5), PunchType::In);
        generated.is_generated = true;
        let today = vec![rejected, generated];

        // Punches exist but none counts: falls through to shift tier.
        let c = classify(&today, Some(&day_shift()), at(16, 0));
        assert_eq!(c.method, ClassifyMethod::ShiftBased);
        assert_eq!(c.punch_type, PunchType::Out);
        assert_eq!(c.confidence, Confidence::Medium);
    }

    #[test]
    fn time_based_fallback_without_shift() {
        let mut blocked = punch(1, at(7, 0), PunchType::In);
        blocked.is_generated = true;
        let today = vec![blocked];

        let c = classify(&today, None, at(9, 0));
        assert_eq!(c.method, ClassifyMethod::TimeBased);
        assert_eq!(c.punch_type, PunchType::In);
        assert_eq!(c.confidence, Confidence::Low);

        let c = classify(&today, None, at(15, 0));
        assert_eq!(c.punch_type, PunchType::Out);
    }

    #[test]
    fn night_shift_first_punch_near_end_is_ambiguous() {
        // 05:55 against 22:00-06:00: alternation says IN (no prior punch
        // today) while the shift position says OUT.
        let c = classify(&[], Some(&night_shift()), at(5, 55));
        assert_eq!(c.punch_type, PunchType::In);
        let reason = detect_ambiguity(Some(&night_shift()), at(5, 55), &c, 30);
        assert!(reason.is_some());
    }

    #[test]
    fn day_shift_never_ambiguous() {
        let c = classify(&[], Some(&day_shift()), at(8, 0));
        assert!(detect_ambiguity(Some(&day_shift()), at(8, 0), &c, 30).is_none());
    }

    #[test]
    fn night_shift_evening_start_not_ambiguous() {
        // 22:05 first punch: alternation IN agrees with shift position IN.
        let c = classify(&[], Some(&night_shift()), at(22, 5));
        assert_eq!(c.punch_type, PunchType::In);
        assert!(detect_ambiguity(Some(&night_shift()), at(22, 5), &c, 30).is_none());
    }
}
