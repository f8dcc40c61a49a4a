//! Read-side aggregation of sessions into daily summaries

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::model::{AssignmentId, DailySummary, EmployeeId, Session};
use crate::store::TrackingStore;

/// Reporting window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Today,
    Yesterday,
    /// The seven dates ending today
    Weekly,
}

impl Period {
    /// Dates covered by the period, oldest first
    pub fn dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        let days_back = |n: u64| today.checked_sub_days(Days::new(n)).unwrap_or(today);
        match self {
            Period::Today => vec![today],
            Period::Yesterday => vec![days_back(1)],
            Period::Weekly => (0..7).rev().map(days_back).collect(),
        }
    }
}

impl FromStr for Period {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "today" => Ok(Period::Today),
            "yesterday" => Ok(Period::Yesterday),
            "weekly" | "week" => Ok(Period::Weekly),
            other => Err(EngineError::InvalidInput(format!(
                "unknown period '{other}', expected today, yesterday or weekly"
            ))),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Period::Today => "today",
            Period::Yesterday => "yesterday",
            Period::Weekly => "weekly",
        };
        f.write_str(name)
    }
}

pub struct SummaryAggregator<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for SummaryAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: TrackingStore> SummaryAggregator<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Summary of one employee on one date; a date without sessions yields
    /// an empty summary
    pub async fn summary_for(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
    ) -> EngineResult<DailySummary> {
        if self.store.employee(employee_id).await?.is_none() {
            return Err(EngineError::EmployeeNotFound(employee_id.to_string()));
        }
        let sessions: Vec<Session> = self
            .sessions_on(&[date])
            .await?
            .into_iter()
            .filter(|s| s.employee_id == employee_id)
            .collect();
        self.build(employee_id, date, &sessions).await
    }

    /// One summary per employee per date with activity in the period, newest
    /// date first, then by employee
    pub async fn summaries(&self, period: Period) -> EngineResult<Vec<DailySummary>> {
        let dates = period.dates(self.clock.today());
        let sessions = self.sessions_on(&dates).await?;

        let mut grouped: BTreeMap<(NaiveDate, EmployeeId), Vec<Session>> = BTreeMap::new();
        for session in sessions {
            grouped
                .entry((session.date(), session.employee_id))
                .or_default()
                .push(session);
        }

        let mut summaries = Vec::with_capacity(grouped.len());
        for ((date, employee_id), sessions) in grouped {
            summaries.push(self.build(employee_id, date, &sessions).await?);
        }
        summaries.sort_by(|a, b| b.date.cmp(&a.date).then(a.employee_id.cmp(&b.employee_id)));
        Ok(summaries)
    }

    /// Every date an employee has sessions on, newest first
    pub async fn employee_summaries(&self, employee_id: EmployeeId) -> EngineResult<Vec<DailySummary>> {
        if self.store.employee(employee_id).await?.is_none() {
            return Err(EngineError::EmployeeNotFound(employee_id.to_string()));
        }
        let sessions = self.store.sessions_for_employee(employee_id).await?;

        let mut by_date: BTreeMap<NaiveDate, Vec<Session>> = BTreeMap::new();
        for session in sessions {
            by_date.entry(session.date()).or_default().push(session);
        }

        let mut summaries = Vec::with_capacity(by_date.len());
        for (date, mut sessions) in by_date.into_iter().rev() {
            sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
            summaries.push(self.build(employee_id, date, &sessions).await?);
        }
        Ok(summaries)
    }

    /// Sessions started on any of `dates`, in start order
    async fn sessions_on(&self, dates: &[NaiveDate]) -> EngineResult<Vec<Session>> {
        let (Some(first), Some(last)) = (dates.iter().min(), dates.iter().max()) else {
            return Ok(Vec::new());
        };
        let from = first.and_time(NaiveTime::MIN).and_utc();
        let to = last
            .checked_add_days(Days::new(1))
            .unwrap_or(*last)
            .and_time(NaiveTime::MIN)
            .and_utc();
        Ok(self.store.sessions_started_between(from, to).await?)
    }

    /// Fold the sessions of one employee on one date; `sessions` must be in
    /// start order
    async fn build(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
        sessions: &[Session],
    ) -> EngineResult<DailySummary> {
        let mut summary = DailySummary::empty(employee_id, date);
        let (Some(first), Some(last)) = (sessions.first(), sessions.last()) else {
            return Ok(summary);
        };

        summary.session_count = sessions.len() as u32;
        summary.total_distance_m = sessions.iter().map(|s| s.distance_m).sum();
        summary.tracked_seconds = sessions.iter().map(Session::tracked_seconds).sum();
        summary.open = sessions.iter().any(Session::is_active);
        summary.start = Some(first.start_position);
        summary.end = Some(last.end_so_far());
        summary.odometer_start = first.checkin.odometer_reading;
        summary.odometer_end = last.checkout.as_ref().and_then(|c| c.odometer_reading);

        let assigned = self.store.assignments_for(employee_id, date).await?;
        let ids: Vec<AssignmentId> = assigned.iter().map(|a| a.assignment.id).collect();
        summary.geofences_entered = self.store.entries_for(&ids).await?.len() as u32;

        Ok(summary)
    }
}
