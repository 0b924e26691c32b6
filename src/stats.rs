use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{ClassroomAggregate, ClassroomRef, ProgressRecord};

struct ClassroomScores<'a> {
    classroom_id: Uuid,
    classroom: &'a ClassroomRef,
    scores: Vec<f64>,
}

/// Groups records by classroom and computes per-classroom statistics,
/// stamped with the current time.
pub fn aggregate(records: &[ProgressRecord]) -> Vec<ClassroomAggregate> {
    aggregate_at(records, Utc::now())
}

/// Same as [`aggregate`] with an explicit `calculated_at`. Output order is
/// the order in which each classroom first appears in `records`.
pub fn aggregate_at(
    records: &[ProgressRecord],
    calculated_at: DateTime<Utc>,
) -> Vec<ClassroomAggregate> {
    let (groups, _) = records.iter().fold(
        (Vec::<ClassroomScores>::new(), HashMap::<Uuid, usize>::new()),
        |(mut groups, mut index), record| {
            // Orphaned rows are skipped.
            let Some(classroom) = record.classroom.as_ref() else {
                return (groups, index);
            };

            let slot = *index.entry(record.classroom_id).or_insert_with(|| {
                groups.push(ClassroomScores {
                    classroom_id: record.classroom_id,
                    classroom,
                    scores: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].scores.push(record.score);
            (groups, index)
        },
    );

    groups
        .into_iter()
        .map(|group| summarize(group, calculated_at))
        .collect()
}

fn summarize(group: ClassroomScores<'_>, calculated_at: DateTime<Utc>) -> ClassroomAggregate {
    let count = group.scores.len();
    let total: f64 = group.scores.iter().sum();
    let average = if count == 0 { 0.0 } else { total / count as f64 };

    ClassroomAggregate {
        classroom_id: group.classroom_id,
        classroom_name: group.classroom.name.clone(),
        school_id: group.classroom.school_id,
        subject: group.classroom.subject.clone(),
        grade_level: group.classroom.grade_level.clone(),
        average_score: round2(average),
        median_score: round2(median(&group.scores)),
        min_score: extreme(&group.scores, f64::min),
        max_score: extreme(&group.scores, f64::max),
        assignment_count: count,
        calculated_at,
    }
}

/// Rounds half-up to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0 + 0.5).floor() / 100.0
}

pub fn median(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }

    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;

    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// NaN propagates instead of being dropped the way f64::min/max would.
fn extreme(scores: &[f64], pick: fn(f64, f64) -> f64) -> f64 {
    let mut iter = scores.iter().copied();
    let Some(first) = iter.next() else {
        return 0.0;
    };

    iter.fold(first, |acc, score| {
        if acc.is_nan() || score.is_nan() {
            f64::NAN
        } else {
            pick(acc, score)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn classroom(name: &str) -> ClassroomRef {
        ClassroomRef {
            id: Uuid::new_v4(),
            name: name.to_string(),
            school_id: Uuid::nil(),
            subject: Some("Math".to_string()),
            grade_level: Some("7".to_string()),
        }
    }

    fn record(classroom: &ClassroomRef, score: f64) -> ProgressRecord {
        ProgressRecord {
            classroom_id: classroom.id,
            score,
            assignment_name: "Quiz".to_string(),
            date_submitted: Utc::now() - Duration::days(1),
            classroom: Some(classroom.clone()),
        }
    }

    fn orphan(classroom_id: Uuid, score: f64) -> ProgressRecord {
        ProgressRecord {
            classroom_id,
            score,
            assignment_name: "Lost quiz".to_string(),
            date_submitted: Utc::now(),
            classroom: None,
        }
    }

    #[test]
    fn odd_group_uses_middle_score() {
        let a = classroom("Algebra A");
        let records = vec![record(&a, 80.0), record(&a, 90.0), record(&a, 100.0)];

        let results = aggregate(&records);
        assert_eq!(results.len(), 1);
        let agg = &results[0];
        assert_eq!(agg.classroom_id, a.id);
        assert_eq!(agg.average_score, 90.0);
        assert_eq!(agg.median_score, 90.0);
        assert_eq!(agg.min_score, 80.0);
        assert_eq!(agg.max_score, 100.0);
        assert_eq!(agg.assignment_count, 3);
    }

    #[test]
    fn even_group_averages_the_two_middle_scores() {
        let b = classroom("Biology B");
        let records = vec![record(&b, 85.0), record(&b, 70.0)];

        let agg = &aggregate(&records)[0];
        assert_eq!(agg.average_score, 77.5);
        assert_eq!(agg.median_score, 77.5);
        assert_eq!(agg.min_score, 70.0);
        assert_eq!(agg.max_score, 85.0);
        assert_eq!(agg.assignment_count, 2);
    }

    #[test]
    fn orphans_never_create_or_inflate_groups() {
        let a = classroom("Algebra A");
        let records = vec![
            record(&a, 60.0),
            orphan(a.id, 10.0),
            orphan(Uuid::new_v4(), 99.0),
            record(&a, 70.0),
        ];

        let results = aggregate(&records);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].assignment_count, 2);
        assert_eq!(results[0].min_score, 60.0);
        assert_eq!(results[0].average_score, 65.0);
    }

    #[test]
    fn groups_keep_first_appearance_order() {
        let a = classroom("A");
        let b = classroom("B");
        let c = classroom("C");
        let records = vec![
            record(&c, 50.0),
            record(&a, 60.0),
            record(&c, 70.0),
            record(&b, 80.0),
        ];

        let ids: Vec<Uuid> = aggregate(&records).iter().map(|agg| agg.classroom_id).collect();
        assert_eq!(ids, vec![c.id, a.id, b.id]);
    }

    #[test]
    fn one_timestamp_per_invocation() {
        let a = classroom("A");
        let b = classroom("B");
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let results = aggregate_at(&[record(&a, 1.0), record(&b, 2.0)], at);
        assert!(results.iter().all(|agg| agg.calculated_at == at));
    }

    #[test]
    fn rerunning_is_idempotent_apart_from_timestamp() {
        let a = classroom("A");
        let b = classroom("B");
        let records = vec![record(&a, 71.3), record(&b, 64.0), record(&a, 88.8)];

        let first = aggregate_at(&records, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let second = aggregate_at(&records, Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(first.len(), second.len());
        for (x, y) in first.iter().zip(second.iter()) {
            assert_eq!(x.classroom_id, y.classroom_id);
            assert_eq!(x.average_score, y.average_score);
            assert_eq!(x.median_score, y.median_score);
            assert_eq!(x.assignment_count, y.assignment_count);
            assert_ne!(x.calculated_at, y.calculated_at);
        }
    }

    #[test]
    fn rounding_is_half_up_to_two_places() {
        assert_eq!(round2(77.5), 77.5);
        assert_eq!(round2(2.0 / 3.0), 0.67);
        assert_eq!(round2(1.0 / 3.0), 0.33);
        assert_eq!(round2(-0.125), -0.12);

        let a = classroom("A");
        let agg = &aggregate(&[record(&a, 90.0), record(&a, 85.0), record(&a, 86.0)])[0];
        assert_eq!(agg.average_score, 87.0);
        let agg = &aggregate(&[record(&a, 100.0), record(&a, 0.0), record(&a, 0.0)])[0];
        assert_eq!(agg.average_score, 33.33);
    }

    #[test]
    fn empty_scores_yield_zero_median() {
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn scores_outside_range_pass_through() {
        let a = classroom("A");
        let agg = &aggregate(&[record(&a, -20.0), record(&a, 140.0)])[0];
        assert_eq!(agg.min_score, -20.0);
        assert_eq!(agg.max_score, 140.0);
        assert_eq!(agg.average_score, 60.0);

        let agg = &aggregate(&[record(&a, f64::NAN), record(&a, 50.0)])[0];
        assert!(agg.average_score.is_nan());
        assert!(agg.min_score.is_nan());
        assert!(agg.max_score.is_nan());
    }

    #[test]
    fn statistics_hold_across_generated_inputs() {
        let rooms: Vec<ClassroomRef> = (0..4).map(|i| classroom(&format!("Room {i}"))).collect();
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;

        for _ in 0..50 {
            let mut records = Vec::new();
            for _ in 0..40 {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let room = &rooms[(seed >> 33) as usize % rooms.len()];
                let score = ((seed >> 11) % 10_001) as f64 / 100.0;
                if (seed >> 7) % 9 == 0 {
                    records.push(orphan(room.id, score));
                } else {
                    records.push(record(room, score));
                }
            }

            for agg in aggregate(&records) {
                let scores: Vec<f64> = records
                    .iter()
                    .filter(|r| r.classroom.is_some() && r.classroom_id == agg.classroom_id)
                    .map(|r| r.score)
                    .collect();
                assert_eq!(agg.assignment_count, scores.len());
                assert!(agg.assignment_count >= 1);

                let true_min = scores.iter().copied().fold(f64::INFINITY, f64::min);
                let true_max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                assert_eq!(agg.min_score, true_min);
                assert_eq!(agg.max_score, true_max);
                assert!(agg.min_score <= agg.median_score + 0.005);
                assert!(agg.median_score <= agg.max_score + 0.005);

                let mean = scores.iter().sum::<f64>() / scores.len() as f64;
                assert_eq!(agg.average_score, round2(mean));
            }
        }
    }
}
