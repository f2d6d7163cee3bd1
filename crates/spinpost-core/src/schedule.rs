use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::CampaignRequest;

/// How often a stored schedule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Fire once on `start_date`.
    Once,
    /// Fire every day from `start_date` on.
    Daily,
    /// Fire on each weekday listed in `weekdays` (0 = Monday … 6 = Sunday).
    Weekly,
    /// Fire on each day-of-month listed in `month_days` (1–31).
    Monthly,
}

/// User-supplied fields of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDraft {
    pub name: String,
    pub frequency: Frequency,
    /// Local wall-clock fire time.
    pub time_of_day: NaiveTime,
    #[serde(default)]
    pub weekdays: Vec<u8>,
    #[serde(default)]
    pub month_days: Vec<u8>,
    pub start_date: NaiveDate,
    /// Campaign launched at every occurrence.
    pub campaign: CampaignRequest,
}

/// A persisted schedule record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub frequency: Frequency,
    pub time_of_day: NaiveTime,
    #[serde(default)]
    pub weekdays: Vec<u8>,
    #[serde(default)]
    pub month_days: Vec<u8>,
    pub start_date: NaiveDate,
    /// Set by the scheduler once a one-shot schedule has fired.
    #[serde(default)]
    pub completed: bool,
    pub campaign: CampaignRequest,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn from_draft(id: String, draft: ScheduleDraft) -> Self {
        Self {
            id,
            name: draft.name,
            frequency: draft.frequency,
            time_of_day: draft.time_of_day,
            weekdays: draft.weekdays,
            month_days: draft.month_days,
            start_date: draft.start_date,
            completed: false,
            campaign: draft.campaign,
            created_at: Utc::now(),
        }
    }
}
