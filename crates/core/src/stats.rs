//! Admin dashboard statistics.
//!
//! Response times are whole seconds, floored. Averages are `None` when there is nothing to
//! average.

use crate::case::CaseRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use td_types::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DoctorResponseTime {
    pub doctor_user_id: UserId,
    pub avg_response_time: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub avg_response_time: Option<i64>,
    pub cases_remaining: usize,
    /// Per doctor, fastest first; doctors without a measured response come last.
    pub response_times: Vec<DoctorResponseTime>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    /// From case creation to the reviewer's first diagnosis.
    pub create_to_review: StageStats,
    /// From the first diagnosis to approval.
    pub review_to_approve: StageStats,
}

impl DashboardStats {
    pub fn compute(records: &[CaseRecord]) -> Self {
        let mut review_samples = Vec::new();
        let mut per_reviewer: BTreeMap<&UserId, Vec<i64>> = BTreeMap::new();
        let mut approve_samples = Vec::new();
        let mut per_approver: BTreeMap<&UserId, Vec<i64>> = BTreeMap::new();
        let mut awaiting_review = 0;
        let mut awaiting_approval = 0;

        for record in records {
            let Some(reviewed_at) = record.reviewed_at else {
                awaiting_review += 1;
                continue;
            };

            let review_secs = (reviewed_at - record.created_at).num_seconds();
            review_samples.push(review_secs);
            per_reviewer
                .entry(&record.reviewer_id)
                .or_default()
                .push(review_secs);

            // Every approver of a reviewed case is listed, even before they approve anything.
            let approver_samples = per_approver.entry(&record.approver_id).or_default();
            match record.approved_at {
                Some(approved_at) => {
                    let approve_secs = (approved_at - reviewed_at).num_seconds();
                    approve_samples.push(approve_secs);
                    approver_samples.push(approve_secs);
                }
                None => awaiting_approval += 1,
            }
        }

        Self {
            create_to_review: StageStats {
                avg_response_time: floored_mean(&review_samples),
                cases_remaining: awaiting_review,
                response_times: ranked(per_reviewer),
            },
            review_to_approve: StageStats {
                avg_response_time: floored_mean(&approve_samples),
                cases_remaining: awaiting_approval,
                response_times: ranked(per_approver),
            },
        }
    }
}

fn floored_mean(samples: &[i64]) -> Option<i64> {
    if samples.is_empty() {
        return None;
    }
    let total: i64 = samples.iter().sum();
    Some(total.div_euclid(samples.len() as i64))
}

fn ranked(per_doctor: BTreeMap<&UserId, Vec<i64>>) -> Vec<DoctorResponseTime> {
    let mut times: Vec<_> = per_doctor
        .into_iter()
        .map(|(doctor, samples)| DoctorResponseTime {
            doctor_user_id: doctor.clone(),
            avg_response_time: floored_mean(&samples),
        })
        .collect();
    times.sort_by_key(|t| (t.avg_response_time.is_none(), t.avg_response_time));
    times
}

/// Renders a duration in seconds as `"<d>d <h>h"`, omitting days when there are none.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 3600 / 24;
    let hours = (seconds / 3600) % 24;
    if days > 0 {
        format!("{days}d {hours}h")
    } else {
        format!("{hours}h")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CaseStatus;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use td_types::{DocumentId, GroupId};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()
    }

    fn case(
        id: &str,
        approver: &str,
        reviewer: &str,
        review_after: Option<Duration>,
        approve_after: Option<Duration>,
    ) -> CaseRecord {
        let mut record = CaseRecord::new(
            DocumentId::parse(id).unwrap(),
            DocumentId::parse(format!("{id}-d")).unwrap(),
            UserId::parse(approver).unwrap(),
            UserId::parse(reviewer).unwrap(),
            GroupId::parse(format!("{id}-g")).unwrap(),
            start(),
        );
        if let Some(review_after) = review_after {
            let reviewed_at = start() + review_after;
            record.reviewed_at = Some(reviewed_at);
            record.status = CaseStatus::WaitingForApproval;
            if let Some(approve_after) = approve_after {
                record.approved_at = Some(reviewed_at + approve_after);
                record.status = CaseStatus::Approved;
            }
        }
        record
    }

    #[test]
    fn test_empty_dashboard() {
        let stats = DashboardStats::compute(&[]);
        assert_eq!(stats, DashboardStats::default());
    }

    #[test]
    fn test_stage_averages_and_remaining() {
        let records = vec![
            case("c1", "dr-a", "dr-b", Some(Duration::seconds(100)), Some(Duration::seconds(10))),
            case("c2", "dr-a", "dr-b", Some(Duration::seconds(201)), None),
            case("c3", "dr-b", "dr-c", Some(Duration::seconds(50)), Some(Duration::seconds(31))),
            case("c4", "dr-c", "dr-a", None, None),
        ];

        let stats = DashboardStats::compute(&records);

        // (100 + 201 + 50) / 3 = 117
        assert_eq!(stats.create_to_review.avg_response_time, Some(117));
        assert_eq!(stats.create_to_review.cases_remaining, 1);
        // (10 + 31) / 2 = 20
        assert_eq!(stats.review_to_approve.avg_response_time, Some(20));
        assert_eq!(stats.review_to_approve.cases_remaining, 1);

        let reviewers: Vec<_> = stats
            .create_to_review
            .response_times
            .iter()
            .map(|t| (t.doctor_user_id.as_str(), t.avg_response_time))
            .collect();
        assert_eq!(reviewers, vec![("dr-c", Some(50)), ("dr-b", Some(150))]);
    }

    #[test]
    fn test_approvers_without_approvals_are_listed_last() {
        let records = vec![
            case("c1", "dr-slow", "dr-r", Some(Duration::hours(1)), None),
            case("c2", "dr-fast", "dr-r", Some(Duration::hours(1)), Some(Duration::hours(3))),
        ];

        let approvers = DashboardStats::compute(&records)
            .review_to_approve
            .response_times;
        assert_eq!(approvers.len(), 2);
        assert_eq!(approvers[0].doctor_user_id.as_str(), "dr-fast");
        assert_eq!(approvers[0].avg_response_time, Some(3 * 3600));
        assert_eq!(approvers[1].doctor_user_id.as_str(), "dr-slow");
        assert_eq!(approvers[1].avg_response_time, None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0h");
        assert_eq!(format_duration(3599), "0h");
        assert_eq!(format_duration(5 * 3600), "5h");
        assert_eq!(format_duration(26 * 3600 + 59), "1d 2h");
        assert_eq!(format_duration(-10), "0h");
    }
}
