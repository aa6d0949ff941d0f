use crate::model::punch::{AnomalyType, PunchEvent, PunchType};
use crate::model::settings::TenantSettings;
use crate::model::shift::ShiftAssignment;
use chrono::{NaiveDateTime, Timelike};

/// Inputs for one employee-day evaluation. `day_complete` is false while the
/// day is still in progress, in which case an open IN is not yet a
/// MISSING_OUT.
pub struct DayContext<'a> {
    pub punches: &'a [PunchEvent],
    pub shift: Option<&'a ShiftAssignment>,
    pub settings: &'a TenantSettings,
    pub on_approved_leave: bool,
    pub day_complete: bool,
}

/// Derived metrics and the highest-priority anomaly for one employee-day.
#[derive(Debug, Clone, Default)]
pub struct DayMetrics {
    pub hours_worked: Option<f64>,
    pub late_minutes: Option<i32>,
    pub early_leave_minutes: Option<i32>,
    pub overtime_minutes: Option<i32>,
    pub anomaly: Option<(AnomalyType, String)>,
    pub needs_approval: bool,
}

fn minutes_of(ts: NaiveDateTime) -> i32 {
    (ts.time().hour() * 60 + ts.time().minute()) as i32
}

struct Pairing {
    worked_minutes: i64,
    has_complete_pair: bool,
    first_in: Option<NaiveDateTime>,
    last_out: Option<NaiveDateTime>,
    open_in: Option<NaiveDateTime>,
    sequence_anomaly: Option<(AnomalyType, String)>,
}

/// Walk the day chronologically, pairing IN/OUT and subtracting closed BREAK
/// intervals. Sequence violations report missing-in before double-punch;
/// missing-out is decided by the caller since it depends on the day being
/// over.
fn pair_day(punches: &[PunchEvent], double_punch_window_min: i32) -> Pairing {
    let mut sorted: Vec<&PunchEvent> = punches
        .iter()
        .filter(|p| p.is_valid_for_sequence())
        .collect();
    sorted.sort_by_key(|p| p.timestamp);

    let mut worked: i64 = 0;
    let mut break_taken: i64 = 0;
    let mut has_pair = false;
    let mut first_in = None;
    let mut last_out = None;
    let mut open_in: Option<NaiveDateTime> = None;
    let mut open_break: Option<NaiveDateTime> = None;
    let mut missing_in: Option<String> = None;
    let mut double_punch: Option<String> = None;
    let mut prev_work_punch: Option<&PunchEvent> = None;

    for p in &sorted {
        match p.punch_type {
            PunchType::In => {
                if first_in.is_none() {
                    first_in = Some(p.timestamp);
                }
                if let Some(prev) = prev_work_punch {
                    if prev.punch_type == PunchType::In && double_punch.is_none() {
                        let gap = (p.timestamp - prev.timestamp).num_minutes();
                        if gap <= double_punch_window_min as i64 {
                            double_punch = Some(format!(
                                "two IN punches {} min apart ({} and {})",
                                gap,
                                prev.timestamp.format("%H:%M"),
                                p.timestamp.format("%H:%M")
                            ));
                        }
                    }
                }
                if open_in.is_none() {
                    open_in = Some(p.timestamp);
                }
                prev_work_punch = Some(p);
            }
            PunchType::Out => {
                if let Some(prev) = prev_work_punch {
                    if prev.punch_type == PunchType::Out && double_punch.is_none() {
                        let gap = (p.timestamp - prev.timestamp).num_minutes();
                        if gap <= double_punch_window_min as i64 {
                            double_punch = Some(format!(
                                "two OUT punches {} min apart ({} and {})",
                                gap,
                                prev.timestamp.format("%H:%M"),
                                p.timestamp.format("%H:%M")
                            ));
                        }
                    }
                }
                match open_in.take() {
                    Some(in_ts) => {
                        worked += (p.timestamp - in_ts).num_minutes();
                        has_pair = true;
                    }
                    None => {
                        if missing_in.is_none() {
                            missing_in = Some(format!(
                                "OUT at {} with no preceding IN",
                                p.timestamp.format("%H:%M")
                            ));
                        }
                    }
                }
                last_out = Some(p.timestamp);
                prev_work_punch = Some(p);
            }
            PunchType::BreakStart => {
                if open_break.is_some() {
                    if double_punch.is_none() {
                        double_punch = Some(format!(
                            "BREAK_START at {} while a break is already open",
                            p.timestamp.format("%H:%M")
                        ));
                    }
                } else {
                    open_break = Some(p.timestamp);
                }
            }
            PunchType::BreakEnd => match open_break.take() {
                Some(start) => break_taken += (p.timestamp - start).num_minutes(),
                None => {
                    if double_punch.is_none() {
                        double_punch = Some(format!(
                            "BREAK_END at {} with no open break",
                            p.timestamp.format("%H:%M")
                        ));
                    }
                }
            },
            PunchType::MissionStart | PunchType::MissionEnd => {
                // Missions count as worked time; nothing to subtract.
            }
        }
    }

    let sequence_anomaly = missing_in
        .map(|n| (AnomalyType::MissingIn, n))
        .or(double_punch.map(|n| (AnomalyType::DoublePunch, n)));

    Pairing {
        worked_minutes: (worked - break_taken).max(0),
        has_complete_pair: has_pair,
        first_in,
        last_out,
        open_in,
        sequence_anomaly,
    }
}

/// Evaluate one employee-day: derived metrics plus the highest-priority
/// anomaly, and whether a correction of this day needs approval.
pub fn evaluate_day(ctx: &DayContext) -> DayMetrics {
    let mut out = DayMetrics::default();
    let settings = ctx.settings;

    let pairing = pair_day(ctx.punches, settings.double_punch_window_minutes);

    if pairing.has_complete_pair {
        out.hours_worked = Some(pairing.worked_minutes as f64 / 60.0);
    }

    // A punch during an approved leave trumps everything else; no lateness
    // math applies to a day the employee should not work.
    if ctx.on_approved_leave {
        if pairing.first_in.is_some() || pairing.last_out.is_some() {
            out.anomaly = Some((
                AnomalyType::LeaveConflict,
                "punch recorded during an approved leave".into(),
            ));
            out.needs_approval = needs_approval(settings, &out.anomaly);
        }
        return out;
    }

    let mut partial_absence: Option<String> = None;

    if let (Some(shift), Some(first_in)) = (ctx.shift, pairing.first_in) {
        let delta = minutes_of(first_in) - shift.start_minutes() as i32;
        let late = (delta - settings.late_grace_minutes).max(0);
        if late > 0 {
            out.late_minutes = Some(late);
        }
        if delta >= settings.absence_partial_threshold_hours * 60 {
            partial_absence = Some(format!(
                "arrived {:.1}h after shift start {}",
                delta as f64 / 60.0,
                shift.start_time
            ));
        }
    }

    if let (Some(shift), Some(last_out)) = (ctx.shift, pairing.last_out) {
        let mut out_min = minutes_of(last_out);
        let mut end_min = shift.end_minutes() as i32;
        if shift.is_night_shift() {
            // Normalize both onto the shift's own axis.
            end_min += 1440;
            if out_min < shift.start_minutes() as i32 {
                out_min += 1440;
            }
        }
        let early = (end_min - out_min - settings.early_grace_minutes).max(0);
        if early > 0 && pairing.open_in.is_none() {
            out.early_leave_minutes = Some(early);
        }
    }

    if let Some(shift) = ctx.shift {
        if pairing.has_complete_pair {
            let ot = pairing.worked_minutes as i32
                - shift.duration_minutes() as i32
                - shift.break_minutes
                - settings.overtime_threshold_minutes;
            let ot = settings.round_overtime(ot.max(0));
            if ot > 0 {
                out.overtime_minutes = Some(ot);
            }
        }
    }

    // Anomaly priority: missing punches, then sequence faults, then partial
    // absence, then lateness classes.
    out.anomaly = if let (true, Some(open_in)) = (ctx.day_complete, pairing.open_in) {
        Some((
            AnomalyType::MissingOut,
            format!(
                "IN at {} with no matching OUT by end of day",
                open_in.format("%H:%M")
            ),
        ))
    } else if let Some((kind, note)) = pairing.sequence_anomaly {
        Some((kind, note))
    } else if let Some(note) = partial_absence {
        Some((AnomalyType::AbsencePartial, note))
    } else if let Some(late) = out.late_minutes {
        Some((AnomalyType::Late, format!("late by {} minutes", late)))
    } else if let Some(early) = out.early_leave_minutes {
        Some((AnomalyType::EarlyLeave, format!("left {} minutes early", early)))
    } else {
        None
    };

    out.needs_approval = needs_approval(settings, &out.anomaly);
    out
}

fn needs_approval(settings: &TenantSettings, anomaly: &Option<(AnomalyType, String)>) -> bool {
    match anomaly {
        Some((kind, _)) => settings.approval_set().contains(kind),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::punch::PunchMethod;
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

    fn ctx<'a>(
        punches: &'a [PunchEvent],
        shift: Option<&'a ShiftAssignment>,
        settings: &'a TenantSettings,
    ) -> DayContext<'a> {
        DayContext {
            punches,
            shift,
            settings,
            on_approved_leave: false,
            day_complete: false,
        }
    }

    #[test]
    fn hours_worked_simple_pair() {
        let settings = TenantSettings::defaults_for(1);
        let punches = vec![
            punch(1, at(8, 0), PunchType::In),
            punch(2, at(17, 0), PunchType::Out),
        ];
        let m = evaluate_day(&ctx(&punches, None, &settings));
        assert_eq!(m.hours_worked, Some(9.0));
        assert!(m.anomaly.is_none());
    }

    #[test]
    fn hours_worked_subtracts_break_punches() {
        let settings = TenantSettings::defaults_for(1);
        let punches = vec![
            punch(1, at(8, 0), PunchType::In),
            punch(2, at(12, 0), PunchType::BreakStart),
            punch(3, at(13, 0), PunchType::BreakEnd),
            punch(4, at(17, 0), PunchType::Out),
        ];
        let m = evaluate_day(&ctx(&punches, None, &settings));
        assert_eq!(m.hours_worked, Some(8.0));
    }

    #[test]
    fn late_minutes_with_grace() {
        let settings = TenantSettings::defaults_for(1);
        let shift = day_shift();
        let punches = vec![punch(1, at(8, 25), PunchType::In)];
        let m = evaluate_day(&ctx(&punches, Some(&shift), &settings));
        assert_eq!(m.late_minutes, Some(15));
        assert_eq!(m.anomaly.as_ref().map(|(k, _)| *k), Some(AnomalyType::Late));
        assert!(!m.needs_approval);
    }

    #[test]
    fn early_leave_with_grace() {
        let settings = TenantSettings::defaults_for(1);
        let shift = day_shift();
        let punches = vec![
            punch(1, at(8, 0), PunchType::In),
            punch(2, at(16, 30), PunchType::Out),
        ];
        let m = evaluate_day(&ctx(&punches, Some(&shift), &settings));
        assert_eq!(m.early_leave_minutes, Some(25));
        assert_eq!(
            m.anomaly.as_ref().map(|(k, _)| *k),
            Some(AnomalyType::EarlyLeave)
        );
    }

    #[test]
    fn missing_in_detected() {
        let settings = TenantSettings::defaults_for(1);
        let punches = vec![punch(1, at(17, 0), PunchType::Out)];
        let m = evaluate_day(&ctx(&punches, None, &settings));
        assert_eq!(
            m.anomaly.as_ref().map(|(k, _)| *k),
            Some(AnomalyType::MissingIn)
        );
        assert!(m.needs_approval);
    }

    #[test]
    fn missing_out_only_when_day_complete() {
        let settings = TenantSettings::defaults_for(1);
        let punches = vec![punch(1, at(8, 0), PunchType::In)];

        let live = evaluate_day(&ctx(&punches, None, &settings));
        assert!(live.anomaly.is_none());

        let closed = evaluate_day(&DayContext {
            punches: &punches,
            shift: None,
            settings: &settings,
            on_approved_leave: false,
            day_complete: true,
        });
        assert_eq!(
            closed.anomaly.as_ref().map(|(k, _)| *k),
            Some(AnomalyType::MissingOut)
        );
        assert!(closed.needs_approval);
    }

    #[test]
    fn double_punch_within_window() {
        let settings = TenantSettings::defaults_for(1);
        let punches = vec![
            punch(1, at(8, 0), PunchType::In),
            punch(2, at(8, 6), PunchType::In),
            punch(3, at(17, 0), PunchType::Out),
        ];
        let m = evaluate_day(&ctx(&punches, None, &settings));
        assert_eq!(
            m.anomaly.as_ref().map(|(k, _)| *k),
            Some(AnomalyType::DoublePunch)
        );
    }

    #[test]
    fn same_type_punches_outside_window_are_not_double() {
        let settings = TenantSettings::defaults_for(1);
        let punches = vec![
            punch(1, at(8, 0), PunchType::In),
            punch(2, at(9, 0), PunchType::In),
            punch(3, at(17, 0), PunchType::Out),
        ];
        let m = evaluate_day(&ctx(&punches, None, &settings));
        assert_ne!(
            m.anomaly.as_ref().map(|(k, _)| *k),
            Some(AnomalyType::DoublePunch)
        );
    }

    #[test]
    fn break_end_without_start_is_sequence_fault() {
        let settings = TenantSettings::defaults_for(1);
        let punches = vec![
            punch(1, at(8, 0), PunchType::In),
            punch(2, at(13, 0), PunchType::BreakEnd),
            punch(3, at(17, 0), PunchType::Out),
        ];
        let m = evaluate_day(&ctx(&punches, None, &settings));
        assert_eq!(
            m.anomaly.as_ref().map(|(k, _)| *k),
            Some(AnomalyType::DoublePunch)
        );
    }

    #[test]
    fn partial_absence_beats_late() {
        let settings = TenantSettings::defaults_for(1);
        let shift = day_shift();
        let punches = vec![punch(1, at(10, 30), PunchType::In)];
        let m = evaluate_day(&ctx(&punches, Some(&shift), &settings));
        assert_eq!(
            m.anomaly.as_ref().map(|(k, _)| *k),
            Some(AnomalyType::AbsencePartial)
        );
        assert!(m.needs_approval);
    }

    #[test]
    fn leave_conflict_trumps_everything() {
        let settings = TenantSettings::defaults_for(1);
        let shift = day_shift();
        let punches = vec![punch(1, at(10, 30), PunchType::In)];
        let m = evaluate_day(&DayContext {
            punches: &punches,
            shift: Some(&shift),
            settings: &settings,
            on_approved_leave: true,
            day_complete: false,
        });
        assert_eq!(
            m.anomaly.as_ref().map(|(k, _)| *k),
            Some(AnomalyType::LeaveConflict)
        );
        assert!(m.late_minutes.is_none());
    }

    #[test]
    fn overtime_rounds_to_step() {
        let settings = TenantSettings::defaults_for(1);
        let shift = day_shift();
        // 08:00-19:25 worked = 685 min; 685 - 540 - 60 - 15 = 70 -> rounds to 75.
        let punches = vec![
            punch(1, at(8, 0), PunchType::In),
            punch(2, at(19, 25), PunchType::Out),
        ];
        let m = evaluate_day(&ctx(&punches, Some(&shift), &settings));
        assert_eq!(m.overtime_minutes, Some(75));
    }

    #[test]
    fn generated_records_do_not_count_toward_hours() {
        let settings = TenantSettings::defaults_for(1);
        let mut synthetic = punch(1, at(8, 0), PunchType::In);
        synthetic.is_generated = true;
        let punches = vec![synthetic, punch(2, at(17, 0), PunchType::Out)];
        let m = evaluate_day(&ctx(&punches, None, &settings));
        assert_eq!(m.hours_worked, None);
        assert_eq!(
            m.anomaly.as_ref().map(|(k, _)| *k),
            Some(AnomalyType::MissingIn)
        );
    }
}
