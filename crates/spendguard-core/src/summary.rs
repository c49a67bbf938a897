//! Aggregates shown on role dashboards and fed to the insight provider.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{parse_transaction_date, PurchaseRecord};
use crate::types::{FlagType, RecordStatus};

/// A commitment whose cancellation deadline has not passed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingDeadline {
    pub record_id: String,
    pub vendor: String,
    pub cancellation_deadline: String,
}

/// Dashboard aggregates over a set of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DashboardSummary {
    pub total_records: usize,
    pub total_spend: f64,
    pub by_status: BTreeMap<String, usize>,
    pub flagged_records: usize,
    pub awaiting_review: usize,
    pub spend_by_category: BTreeMap<String, f64>,
    pub potential_savings: f64,
    pub zombie_subscriptions: usize,
    pub recurring_commitments: usize,
    pub upcoming_deadlines: Vec<UpcomingDeadline>,
}

impl DashboardSummary {
    /// Aggregate `records`, counting deadlines from today (UTC).
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a PurchaseRecord>,
    {
        Self::from_records_as_of(records, Utc::now().date_naive())
    }

    /// Aggregate `records`. Cancellation deadlines before `today` are left
    /// out; deadlines that do not parse as dates are kept.
    pub fn from_records_as_of<'a, I>(records: I, today: NaiveDate) -> Self
    where
        I: IntoIterator<Item = &'a PurchaseRecord>,
    {
        let mut summary = DashboardSummary::default();
        for status in RecordStatus::ALL {
            summary.by_status.insert(status.to_string(), 0);
        }

        for record in records {
            summary.total_records += 1;
            summary.total_spend += record.amount;
            *summary
                .by_status
                .entry(record.status().to_string())
                .or_insert(0) += 1;

            if !record.flags.is_empty() {
                summary.flagged_records += 1;
            }
            if record.status().awaits_review() {
                summary.awaiting_review += 1;
            }

            let category = if record.category.trim().is_empty() {
                "Uncategorized".to_string()
            } else {
                record.category.clone()
            };
            *summary.spend_by_category.entry(category).or_insert(0.0) += record.amount;

            if let Some(savings) = record
                .price_intelligence
                .as_ref()
                .and_then(|p| p.savings_opportunity)
            {
                summary.potential_savings += savings;
            }

            if record.flags.iter().any(|f| f.flag_type == FlagType::ZombieSpend) {
                summary.zombie_subscriptions += 1;
            }

            if let Some(commitments) = record.commitments.as_ref().filter(|c| c.is_recurring) {
                summary.recurring_commitments += 1;
                let upcoming = commitments
                    .cancellation_deadline
                    .as_ref()
                    .filter(|d| parse_transaction_date(d).map_or(true, |day| day >= today));
                if let Some(deadline) = upcoming {
                    summary.upcoming_deadlines.push(UpcomingDeadline {
                        record_id: record.id.to_string(),
                        vendor: record.vendor.clone(),
                        cancellation_deadline: deadline.clone(),
                    });
                }
            }
        }

        summary
            .upcoming_deadlines
            .sort_by(|a, b| a.cancellation_deadline.cmp(&b.cancellation_deadline));
        summary
    }

    /// Plain-text digest handed to the insight provider as context.
    pub fn to_data_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Records: {}", self.total_records);
        let _ = writeln!(out, "Total spend: ${:.2}", self.total_spend);
        let _ = writeln!(
            out,
            "Flagged: {} | Awaiting review: {}",
            self.flagged_records, self.awaiting_review
        );
        for (status, count) in &self.by_status {
            let _ = writeln!(out, "Status {}: {}", status, count);
        }
        for (category, spend) in &self.spend_by_category {
            let _ = writeln!(out, "Category {}: ${:.2}", category, spend);
        }
        let _ = writeln!(out, "Potential savings: ${:.2}", self.potential_savings);
        let _ = writeln!(
            out,
            "Recurring commitments: {} (zombie subscriptions: {})",
            self.recurring_commitments, self.zombie_subscriptions
        );
        for deadline in &self.upcoming_deadlines {
            let _ = writeln!(
                out,
                "Cancel {} by {}",
                deadline.vendor, deadline.cancellation_deadline
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::tests::sample;
    use crate::market::{CommitmentDetails, PriceIntelligence};
    use crate::record::{NewRecord, RecordId, Submitter};
    use crate::types::Flag;

    fn submitter() -> Submitter {
        Submitter {
            user_id: "u1".into(),
            display_name: "Ada".into(),
            organization: "acme".into(),
        }
    }

    #[test]
    fn test_summary_aggregates() {
        let mut zombie = sample("StreamCo", 30.0, "2024-01-01");
        zombie.category = "Software".into();
        zombie.append_flag(Flag::new(FlagType::ZombieSpend, "No logins in 90 days"));
        let mut zombie = NewRecord::from_extraction(zombie, submitter());
        zombie.commitments = Some(CommitmentDetails {
            is_recurring: true,
            renewal_date: Some("2024-12-01".into()),
            cancellation_deadline: Some("2024-11-01".into()),
            escalation_clause: None,
        });

        let mut chair = NewRecord::from_extraction(sample("Chairs", 400.0, "2024-01-02"), submitter());
        chair.price_intelligence = Some(PriceIntelligence::from_estimate(250.0, 400.0));

        let records = vec![
            zombie.into_record(RecordId::new("a"), Utc::now()),
            chair.into_record(RecordId::new("b"), Utc::now()),
        ];
        let summary = DashboardSummary::from_records_as_of(&records, day("2024-06-01"));

        assert_eq!(summary.total_records, 2);
        assert_eq!(summary.total_spend, 430.0);
        assert_eq!(summary.flagged_records, 1);
        assert_eq!(summary.awaiting_review, 2);
        assert_eq!(summary.by_status["FLAGGED"], 1);
        assert_eq!(summary.by_status["PENDING"], 1);
        assert_eq!(summary.by_status["REJECTED"], 0);
        assert_eq!(summary.spend_by_category["Software"], 30.0);
        assert_eq!(summary.potential_savings, 150.0);
        assert_eq!(summary.zombie_subscriptions, 1);
        assert_eq!(summary.upcoming_deadlines.len(), 1);

        let text = summary.to_data_summary();
        assert!(text.contains("Total spend: $430.00"));
        assert!(text.contains("Cancel StreamCo by 2024-11-01"));
    }

    fn day(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_past_deadlines_are_not_upcoming() {
        let commitment = |deadline: &str| {
            let mut record = NewRecord::from_extraction(sample("StreamCo", 30.0, "2024-01-01"), submitter());
            record.commitments = Some(CommitmentDetails {
                is_recurring: true,
                renewal_date: None,
                cancellation_deadline: Some(deadline.into()),
                escalation_clause: None,
            });
            record
        };
        let records = vec![
            commitment("2024-03-01").into_record(RecordId::new("past"), Utc::now()),
            commitment("2024-06-01").into_record(RecordId::new("today"), Utc::now()),
            commitment("2024-09-15").into_record(RecordId::new("later"), Utc::now()),
        ];

        let summary = DashboardSummary::from_records_as_of(&records, day("2024-06-01"));
        assert_eq!(summary.recurring_commitments, 3);
        let ids: Vec<&str> = summary
            .upcoming_deadlines
            .iter()
            .map(|d| d.record_id.as_str())
            .collect();
        assert_eq!(ids, vec!["today", "later"]);
    }

    #[test]
    fn test_empty_summary() {
        let records: Vec<PurchaseRecord> = Vec::new();
        let summary = DashboardSummary::from_records(&records);
        assert_eq!(summary.total_records, 0);
        assert_eq!(summary.by_status.len(), 5);
    }
}
