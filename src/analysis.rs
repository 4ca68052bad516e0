use std::collections::BTreeMap;

use tracing::warn;

use crate::models::{
    AnalysisResult, CompletionRecord, Degeneracy, Peer, Student, StyleGrade, StyleSummary,
};

/// Mean grade points over `completions`, or `None` when there are none.
pub fn gpa(completions: &[CompletionRecord]) -> Option<f64> {
    mean(completions.iter().map(|record| record.grade.points()))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

fn average_difficulty(completions: &[CompletionRecord]) -> Option<f64> {
    mean(completions.iter().filter_map(|record| record.difficulty))
}

pub fn analyze(target: &Student, peers: &[Peer]) -> AnalysisResult {
    let mut flags = Vec::new();

    let target_gpa = match gpa(&target.completions) {
        Some(value) => value,
        None => {
            warn!(student_id = %target.id, "target has no completed courses");
            flags.push(Degeneracy::TargetWithoutCompletions);
            0.0
        }
    };

    let comparable: Vec<(&Peer, f64)> = peers
        .iter()
        .filter_map(|peer| gpa(&peer.student.completions).map(|value| (peer, value)))
        .collect();

    if peers.is_empty() {
        warn!(student_id = %target.id, "empty peer set");
        flags.push(Degeneracy::EmptyPeerSet);
    } else if comparable.is_empty() {
        warn!(student_id = %target.id, peers = peers.len(), "no peer has completed courses");
        flags.push(Degeneracy::NoComparablePeers);
    }

    let similar_avg_gpa = mean(comparable.iter().map(|(_, value)| *value));
    let gpa_gap = similar_avg_gpa.map(|average| average - target_gpa);
    let better_performers_count = comparable
        .iter()
        .filter(|(_, value)| *value > target_gpa)
        .count();

    let similar_avg_courses = mean(
        comparable
            .iter()
            .map(|(peer, _)| peer.student.completions.len() as f64),
    );
    let similar_avg_difficulty = mean(
        comparable
            .iter()
            .filter_map(|(peer, _)| average_difficulty(&peer.student.completions)),
    );

    AnalysisResult {
        target_gpa,
        similar_avg_gpa,
        gpa_gap,
        better_performers_count,
        total_similar_count: comparable.len(),
        target_courses: target.completions.len(),
        similar_avg_courses,
        target_avg_difficulty: average_difficulty(&target.completions),
        similar_avg_difficulty,
        flags,
    }
}

/// Pooled GPA per learning style, for styles with at least `min_grades`
/// recorded grades.
pub fn compare_styles(grades: &[StyleGrade], min_grades: usize) -> Vec<StyleSummary> {
    let mut pooled: BTreeMap<_, (f64, usize)> = BTreeMap::new();
    for entry in grades {
        let slot = pooled.entry(entry.learning_style).or_insert((0.0, 0));
        slot.0 += entry.grade.points();
        slot.1 += 1;
    }

    pooled
        .into_iter()
        .filter(|(_, (_, count))| *count >= min_grades.max(1))
        .map(|(learning_style, (total, count))| StyleSummary {
            learning_style,
            average_gpa: total / count as f64,
            total_completions: count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Grade, LearningStyle, Pace};

    fn record(course_id: &str, grade: Grade, difficulty: Option<f64>) -> CompletionRecord {
        CompletionRecord {
            course_id: course_id.to_string(),
            course_name: course_id.to_string(),
            grade,
            difficulty,
        }
    }

    fn student(id: &str, grades: &[Grade]) -> Student {
        Student {
            id: id.to_string(),
            name: id.to_string(),
            learning_style: Some(LearningStyle::Visual),
            preferred_pace: Some(Pace::Standard),
            completions: grades
                .iter()
                .enumerate()
                .map(|(i, grade)| record(&format!("C{i}"), *grade, Some(3.0)))
                .collect(),
        }
    }

    fn peer(id: &str, grades: &[Grade]) -> Peer {
        Peer {
            student: student(id, grades),
            similarity: 0.8,
        }
    }

    #[test]
    fn gpa_stays_within_scale() {
        let all = [
            Grade::A,
            Grade::AMinus,
            Grade::BPlus,
            Grade::B,
            Grade::BMinus,
            Grade::CPlus,
            Grade::C,
            Grade::CMinus,
            Grade::DPlus,
            Grade::D,
            Grade::DMinus,
            Grade::F,
            Grade::Withdrawn,
        ];
        for window in 1..=all.len() {
            for chunk in all.windows(window) {
                let value = gpa(&student("S", chunk).completions).unwrap();
                assert!((0.0..=4.0).contains(&value), "{value} out of range");
            }
        }
        assert_eq!(gpa(&[]), None);
    }

    #[test]
    fn gap_is_peer_average_minus_target() {
        let target = student("T", &[Grade::B, Grade::CPlus, Grade::BMinus]);
        let peers = vec![
            peer("P1", &[Grade::A, Grade::AMinus, Grade::BPlus]),
            peer("P2", &[Grade::A, Grade::BPlus, Grade::AMinus, Grade::B]),
            peer("P3", &[Grade::C]),
        ];

        let result = analyze(&target, &peers);
        let average = result.similar_avg_gpa.unwrap();
        assert!((result.gpa_gap.unwrap() - (average - result.target_gpa)).abs() < 1e-9);
        assert_eq!(result.better_performers_count, 2);
        assert_eq!(result.total_similar_count, 3);
        assert!(result.flags.is_empty());
    }

    #[test]
    fn example_gap_of_point_four() {
        let target = student("T", &[Grade::BPlus, Grade::B, Grade::BPlus]);
        let peers = vec![peer("P1", &[Grade::AMinus, Grade::AMinus, Grade::BPlus])];
        let result = analyze(&target, &peers);
        assert!((result.target_gpa - 3.2).abs() < 1e-9);
        assert!((result.similar_avg_gpa.unwrap() - 3.5666666666).abs() < 1e-6);
        assert!(result.gpa_gap.unwrap() > 0.3);
    }

    #[test]
    fn peers_without_completions_are_excluded_from_average() {
        let target = student("T", &[Grade::B]);
        let peers = vec![peer("P1", &[Grade::A]), peer("P2", &[])];

        let result = analyze(&target, &peers);
        assert_eq!(result.total_similar_count, 1);
        assert_eq!(result.similar_avg_gpa, Some(4.0));
    }

    #[test]
    fn empty_peer_set_is_flagged() {
        let target = student("T", &[Grade::B]);
        let result = analyze(&target, &[]);
        assert_eq!(result.similar_avg_gpa, None);
        assert_eq!(result.gpa_gap, None);
        assert_eq!(result.total_similar_count, 0);
        assert!(result.is_flagged(Degeneracy::EmptyPeerSet));
    }

    #[test]
    fn peers_with_no_completions_are_flagged() {
        let target = student("T", &[Grade::B]);
        let result = analyze(&target, &[peer("P1", &[])]);
        assert_eq!(result.similar_avg_gpa, None);
        assert!(result.is_flagged(Degeneracy::NoComparablePeers));
    }

    #[test]
    fn target_without_completions_is_flagged_not_scored() {
        let target = student("T", &[]);
        let result = analyze(&target, &[peer("P1", &[Grade::B])]);
        assert_eq!(result.target_gpa, 0.0);
        assert!(result.is_flagged(Degeneracy::TargetWithoutCompletions));
        assert_eq!(result.comparable_gap(), None);
        assert_eq!(result.gpa_gap, Some(3.0));
    }

    #[test]
    fn compares_pooled_style_averages() {
        let grades = vec![
            StyleGrade { learning_style: LearningStyle::Visual, grade: Grade::A },
            StyleGrade { learning_style: LearningStyle::Visual, grade: Grade::B },
            StyleGrade { learning_style: LearningStyle::Visual, grade: Grade::C },
            StyleGrade { learning_style: LearningStyle::Auditory, grade: Grade::A },
        ];

        let summaries = compare_styles(&grades, 3);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].learning_style, LearningStyle::Visual);
        assert!((summaries[0].average_gpa - 3.0).abs() < 1e-9);
        assert_eq!(summaries[0].total_completions, 3);
    }
}
