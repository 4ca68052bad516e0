use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::coach::AnalysisReport;
use crate::models::{Degeneracy, StyleSummary};

fn optional(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "n/a".to_string())
}

fn flag_note(flag: Degeneracy) -> &'static str {
    match flag {
        Degeneracy::EmptyPeerSet => "No similar students were found above the similarity threshold.",
        Degeneracy::NoComparablePeers => "Similar students were found but none has completed a course.",
        Degeneracy::TargetWithoutCompletions => {
            "This student has not completed any courses yet, so GPA advice is skipped."
        }
    }
}

pub fn build_report(report: &AnalysisReport, generated_at: DateTime<Utc>) -> String {
    let student = &report.student;
    let analysis = &report.analysis;

    let mut output = String::new();
    let _ = writeln!(output, "# Study Coach Report: {} ({})", student.name, student.id);
    let _ = writeln!(output, "Generated {}", generated_at.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(output);

    let _ = writeln!(output, "## Profile");
    let _ = writeln!(
        output,
        "- Learning style: {}",
        student
            .learning_style
            .map(|style| style.as_str())
            .unwrap_or("unspecified")
    );
    let _ = writeln!(
        output,
        "- Preferred pace: {}",
        student
            .preferred_pace
            .map(|pace| pace.as_str())
            .unwrap_or("unspecified")
    );
    let grades: Vec<&str> = student.grades.iter().map(|grade| grade.as_str()).collect();
    if grades.is_empty() {
        let _ = writeln!(output, "- Grades: none recorded");
    } else {
        let _ = writeln!(output, "- Grades: {}", grades.join(", "));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Peer Comparison");
    if analysis.target_courses > 0 {
        let _ = writeln!(output, "- GPA: {:.2}", analysis.target_gpa);
    }
    let _ = writeln!(output, "- Similar students' GPA: {}", optional(analysis.similar_avg_gpa));
    let _ = writeln!(output, "- GPA gap: {}", optional(analysis.comparable_gap()));
    if !analysis.is_flagged(Degeneracy::TargetWithoutCompletions) {
        let _ = writeln!(
            output,
            "- Better performers: {} of {}",
            analysis.better_performers_count, analysis.total_similar_count
        );
    }
    let _ = writeln!(
        output,
        "- Courses completed: {} (peers average {})",
        analysis.target_courses,
        optional(analysis.similar_avg_courses)
    );
    for flag in &analysis.flags {
        let _ = writeln!(output, "- Note: {}", flag_note(*flag));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommendations");
    if report.recommendations.is_empty() {
        let _ = writeln!(output, "No recommendations for this student.");
    } else {
        for (index, rec) in report.recommendations.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. **{}** ({} priority): {}",
                index + 1,
                rec.category.as_str(),
                rec.priority.as_str(),
                rec.recommendation
            );
            let _ = writeln!(output, "   {}", rec.explanation);
        }
    }

    if let Some(insight) = &report.ai_insight {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Coach Insight");
        let _ = writeln!(output, "{insight}");
    }

    output
}

/// Markdown table for the learning-style comparison.
pub fn build_style_table(summaries: &[StyleSummary]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## GPA by Learning Style");
    if summaries.is_empty() {
        let _ = writeln!(output, "No learning style has enough graded completions yet.");
        return output;
    }

    let mut ranked = summaries.to_vec();
    ranked.sort_by(|a, b| {
        b.average_gpa
            .partial_cmp(&a.average_gpa)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let _ = writeln!(output, "| Learning style | Average GPA | Completions |");
    let _ = writeln!(output, "|---|---|---|");
    for summary in &ranked {
        let _ = writeln!(
            output,
            "| {} | {:.2} | {} |",
            summary.learning_style, summary.average_gpa, summary.total_completions
        );
    }
    output
}
