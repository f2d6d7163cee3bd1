use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use spinpost_core::{Frequency, Schedule, ScheduleDraft};
use spinpost_store::TriggeredLedger;

use crate::error::{Result, SchedulerError};

/// One concrete firing of a schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub date: NaiveDate,
    pub fire_at: NaiveDateTime,
    /// Ledger key, `{schedule_id}@{date}`.
    pub id: String,
}

/// Whether `schedule` has an occurrence on `date` at all.
pub fn fires_on(schedule: &Schedule, date: NaiveDate) -> bool {
    if date < schedule.start_date {
        return false;
    }
    match schedule.frequency {
        Frequency::Once => date == schedule.start_date,
        Frequency::Daily => true,
        Frequency::Weekly => {
            let dow = date.weekday().num_days_from_monday() as u8;
            schedule.weekdays.contains(&dow)
        }
        Frequency::Monthly => schedule.month_days.contains(&(date.day() as u8)),
    }
}

/// The occurrence `now` falls inside, if any.
///
/// An occurrence is due when `fire_at <= now < fire_at + window`. Yesterday
/// is checked too so a window spanning midnight is honoured. Completed
/// schedules are never due.
pub fn due_occurrence(schedule: &Schedule, now: NaiveDateTime, window: Duration) -> Option<Occurrence> {
    if schedule.completed {
        return None;
    }
    let today = now.date();
    let candidates = [Some(today), today.pred_opt()];
    candidates.into_iter().flatten().find_map(|date| {
        if !fires_on(schedule, date) {
            return None;
        }
        let fire_at = date.and_time(schedule.time_of_day);
        (fire_at <= now && now < fire_at + window).then(|| Occurrence {
            date,
            fire_at,
            id: TriggeredLedger::occurrence_id(&schedule.id, date),
        })
    })
}

/// Reject drafts that could never fire or could not launch.
pub fn validate_draft(draft: &ScheduleDraft) -> Result<()> {
    if draft.name.trim().is_empty() {
        return Err(SchedulerError::InvalidSchedule("name is required".into()));
    }
    match draft.frequency {
        Frequency::Weekly => {
            if draft.weekdays.is_empty() {
                return Err(SchedulerError::InvalidSchedule(
                    "weekly schedule needs at least one weekday".into(),
                ));
            }
            if let Some(d) = draft.weekdays.iter().find(|d| **d > 6) {
                return Err(SchedulerError::InvalidSchedule(format!(
                    "weekday {d} out of range 0-6"
                )));
            }
        }
        Frequency::Monthly => {
            if draft.month_days.is_empty() {
                return Err(SchedulerError::InvalidSchedule(
                    "monthly schedule needs at least one day".into(),
                ));
            }
            if let Some(d) = draft.month_days.iter().find(|d| !(1..=31).contains(*d)) {
                return Err(SchedulerError::InvalidSchedule(format!(
                    "day {d} out of range 1-31"
                )));
            }
        }
        Frequency::Once | Frequency::Daily => {}
    }
    if draft.campaign.destinations.is_empty() {
        return Err(SchedulerError::InvalidSchedule(
            "campaign needs at least one destination".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Utc};
    use spinpost_core::{CampaignRequest, Destination};

    fn schedule(frequency: Frequency) -> Schedule {
        Schedule {
            id: "s1".into(),
            name: "morning".into(),
            frequency,
            time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            weekdays: vec![0, 2], // Mon, Wed
            month_days: vec![1, 15],
            start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            completed: false,
            campaign: CampaignRequest {
                destinations: vec![Destination::new("g1")],
                template: "hi".into(),
                media_refs: Vec::new(),
                pacing: None,
            },
            created_at: Utc::now(),
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn window() -> Duration {
        Duration::minutes(10)
    }

    #[test]
    fn daily_is_due_only_inside_window() {
        let s = schedule(Frequency::Daily);
        assert!(due_occurrence(&s, at(2026, 3, 10, 8, 59), window()).is_none());
        let occ = due_occurrence(&s, at(2026, 3, 10, 9, 0), window()).unwrap();
        assert_eq!(occ.id, "s1@2026-03-10");
        assert!(due_occurrence(&s, at(2026, 3, 10, 9, 9), window()).is_some());
        assert!(due_occurrence(&s, at(2026, 3, 10, 9, 10), window()).is_none());
    }

    #[test]
    fn nothing_fires_before_start_date() {
        let s = schedule(Frequency::Daily);
        assert!(due_occurrence(&s, at(2026, 2, 28, 9, 1), window()).is_none());
    }

    #[test]
    fn once_fires_on_start_date_only() {
        let s = schedule(Frequency::Once);
        assert!(due_occurrence(&s, at(2026, 3, 1, 9, 5), window()).is_some());
        assert!(due_occurrence(&s, at(2026, 3, 2, 9, 5), window()).is_none());

        let mut done = s.clone();
        done.completed = true;
        assert!(due_occurrence(&done, at(2026, 3, 1, 9, 5), window()).is_none());
    }

    #[test]
    fn weekly_respects_weekday_set() {
        let s = schedule(Frequency::Weekly);
        // 2026-03-09 is a Monday, 03-10 a Tuesday
        assert!(due_occurrence(&s, at(2026, 3, 9, 9, 1), window()).is_some());
        assert!(due_occurrence(&s, at(2026, 3, 10, 9, 1), window()).is_none());
        assert!(due_occurrence(&s, at(2026, 3, 11, 9, 1), window()).is_some());
    }

    #[test]
    fn monthly_respects_day_set() {
        let s = schedule(Frequency::Monthly);
        assert!(due_occurrence(&s, at(2026, 4, 15, 9, 2), window()).is_some());
        assert!(due_occurrence(&s, at(2026, 4, 16, 9, 2), window()).is_none());
    }

    #[test]
    fn window_spanning_midnight_uses_previous_date() {
        let mut s = schedule(Frequency::Daily);
        s.time_of_day = NaiveTime::from_hms_opt(23, 55, 0).unwrap();
        let occ = due_occurrence(&s, at(2026, 3, 11, 0, 2), window()).unwrap();
        assert_eq!(occ.date, NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
    }

    #[test]
    fn weekly_draft_without_days_is_invalid() {
        let s = schedule(Frequency::Weekly);
        let draft = ScheduleDraft {
            name: s.name,
            frequency: Frequency::Weekly,
            time_of_day: s.time_of_day,
            weekdays: vec![],
            month_days: vec![],
            start_date: s.start_date,
            campaign: s.campaign,
        };
        assert!(matches!(
            validate_draft(&draft),
            Err(SchedulerError::InvalidSchedule(_))
        ));
    }
}
