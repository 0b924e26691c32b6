use std::fmt::Write;

use crate::models::{ClassroomAggregate, SubjectSummary};

pub fn summarize_by_subject(aggregates: &[ClassroomAggregate]) -> Vec<SubjectSummary> {
    let mut map: std::collections::HashMap<String, (usize, f64)> =
        std::collections::HashMap::new();

    for agg in aggregates {
        let subject = agg.subject.clone().unwrap_or_else(|| "Unassigned".to_string());
        let entry = map.entry(subject).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += agg.average_score;
    }

    let mut summaries: Vec<SubjectSummary> = map
        .into_iter()
        .map(|(subject, (classroom_count, total))| SubjectSummary {
            subject,
            classroom_count,
            avg_score: if classroom_count == 0 {
                0.0
            } else {
                total / classroom_count as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.classroom_count
            .cmp(&a.classroom_count)
            .then_with(|| a.subject.cmp(&b.subject))
    });
    summaries
}

pub fn build_report(school_label: &str, aggregates: &[ClassroomAggregate]) -> String {
    let summaries = summarize_by_subject(aggregates);

    let mut output = String::new();
    let _ = writeln!(output, "# Class Averages Report");
    let _ = writeln!(output, "Generated for {school_label}");
    if let Some(latest) = aggregates.iter().map(|agg| agg.calculated_at).max() {
        let _ = writeln!(output, "Last calculated {}", latest.format("%Y-%m-%d %H:%M UTC"));
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## Classrooms by Average");

    if aggregates.is_empty() {
        let _ = writeln!(output, "No stored averages for this school.");
    } else {
        let mut ranked = aggregates.to_vec();
        ranked.sort_by(|a, b| b.average_score.total_cmp(&a.average_score));
        for agg in &ranked {
            let _ = writeln!(
                output,
                "- {} ({}, grade {}): average {:.2}, median {:.2}, range {:.0}-{:.0} across {} assignments",
                agg.classroom_name,
                agg.subject.as_deref().unwrap_or("no subject"),
                agg.grade_level.as_deref().unwrap_or("n/a"),
                agg.average_score,
                agg.median_score,
                agg.min_score,
                agg.max_score,
                agg.assignment_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No subjects recorded.");
    } else {
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- {}: {} classrooms (mean of averages {:.1})",
                summary.subject, summary.classroom_count, summary.avg_score
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn aggregate(name: &str, subject: Option<&str>, average: f64) -> ClassroomAggregate {
        ClassroomAggregate {
            classroom_id: Uuid::new_v4(),
            classroom_name: name.to_string(),
            school_id: Uuid::nil(),
            subject: subject.map(str::to_string),
            grade_level: Some("7".to_string()),
            average_score: average,
            median_score: average,
            min_score: average - 10.0,
            max_score: average + 10.0,
            assignment_count: 4,
            calculated_at: Utc::now(),
        }
    }

    #[test]
    fn subjects_are_grouped_with_unassigned_bucket() {
        let aggregates = vec![
            aggregate("7A", Some("Math"), 80.0),
            aggregate("7B", Some("Math"), 70.0),
            aggregate("Homeroom", None, 60.0),
        ];

        let summaries = summarize_by_subject(&aggregates);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].subject, "Math");
        assert_eq!(summaries[0].classroom_count, 2);
        assert!((summaries[0].avg_score - 75.0).abs() < 1e-9);
        assert_eq!(summaries[1].subject, "Unassigned");
    }

    #[test]
    fn report_ranks_classrooms_by_average() {
        let aggregates = vec![
            aggregate("Low", Some("Art"), 55.0),
            aggregate("High", Some("Art"), 95.0),
        ];

        let report = build_report("Northfield", &aggregates);
        let high = report.find("- High").unwrap();
        let low = report.find("- Low").unwrap();
        assert!(high < low);
        assert!(report.contains("average 95.00"));
        assert!(report.contains("- Art: 2 classrooms"));
    }

    #[test]
    fn empty_report_says_so() {
        let report = build_report("Northfield", &[]);
        assert!(report.contains("No stored averages for this school."));
        assert!(report.contains("No subjects recorded."));
    }
}
