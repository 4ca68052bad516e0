use tracing::debug;

use crate::models::{AnalysisResult, Category, LearningStyle, Pace, Priority, Recommendation};

#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Gap above which academic advice is high priority.
    pub high_priority_gap: f64,
    pub course_gap: f64,
    pub difficulty_gap: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high_priority_gap: 0.3,
            course_gap: 1.0,
            difficulty_gap: 0.3,
        }
    }
}

pub struct RuleContext<'a> {
    pub analysis: &'a AnalysisResult,
    pub learning_style: Option<LearningStyle>,
    pub pace: Option<Pace>,
    pub thresholds: &'a Thresholds,
}

impl RuleContext<'_> {
    fn peer_label(&self) -> String {
        match self.learning_style {
            Some(style) => format!("{style} learners"),
            None => "learners".to_string(),
        }
    }
}

/// One row of the recommendation table.
pub struct Rule {
    pub name: &'static str,
    pub category: Category,
    pub priority: Priority,
    pub applies: fn(&RuleContext<'_>) -> bool,
    /// Recommendation and explanation text.
    pub render: fn(&RuleContext<'_>) -> Option<(String, String)>,
}

pub const RULES: &[Rule] = &[
    Rule {
        name: "gpa_gap_wide",
        category: Category::AcademicPerformance,
        priority: Priority::High,
        applies: gap_is_wide,
        render: render_gap,
    },
    Rule {
        name: "gpa_gap_narrow",
        category: Category::AcademicPerformance,
        priority: Priority::Medium,
        applies: gap_is_narrow,
        render: render_gap,
    },
    Rule {
        name: "gpa_on_track",
        category: Category::AcademicPerformance,
        priority: Priority::Low,
        applies: gap_is_closed,
        render: render_on_track,
    },
    Rule {
        name: "learning_style_method",
        category: Category::StudyHabits,
        priority: Priority::Medium,
        applies: has_learning_style,
        render: render_style_method,
    },
    Rule {
        name: "pace_schedule",
        category: Category::TimeManagement,
        priority: Priority::Medium,
        applies: has_pace,
        render: render_pace_schedule,
    },
    Rule {
        name: "course_load",
        category: Category::CoursePlanning,
        priority: Priority::Medium,
        applies: course_gap_is_wide,
        render: render_course_load,
    },
    Rule {
        name: "perceived_difficulty",
        category: Category::StudyStrategy,
        priority: Priority::Medium,
        applies: difficulty_gap_is_wide,
        render: render_difficulty,
    },
];

fn gap_is_wide(ctx: &RuleContext<'_>) -> bool {
    ctx.analysis
        .comparable_gap()
        .is_some_and(|gap| gap > ctx.thresholds.high_priority_gap)
}

fn gap_is_narrow(ctx: &RuleContext<'_>) -> bool {
    ctx.analysis
        .comparable_gap()
        .is_some_and(|gap| gap > 0.0 && gap <= ctx.thresholds.high_priority_gap)
}

fn gap_is_closed(ctx: &RuleContext<'_>) -> bool {
    ctx.analysis.comparable_gap().is_some_and(|gap| gap <= 0.0)
}

fn has_learning_style(ctx: &RuleContext<'_>) -> bool {
    ctx.learning_style.is_some()
}

fn has_pace(ctx: &RuleContext<'_>) -> bool {
    ctx.pace.is_some()
}

fn course_gap_is_wide(ctx: &RuleContext<'_>) -> bool {
    course_gap(ctx.analysis).is_some_and(|gap| gap > ctx.thresholds.course_gap)
}

fn difficulty_gap_is_wide(ctx: &RuleContext<'_>) -> bool {
    difficulty_gap(ctx.analysis).is_some_and(|gap| gap > ctx.thresholds.difficulty_gap)
}

fn render_gap(ctx: &RuleContext<'_>) -> Option<(String, String)> {
    let gap = ctx.analysis.comparable_gap()?;
    let average = ctx.analysis.similar_avg_gpa?;
    Some((
        format!("Work to improve your GPA by {gap:.2} points"),
        format!(
            "Similar {} average {:.2} GPA compared with your {:.2}; {} of {} perform better",
            ctx.peer_label(),
            average,
            ctx.analysis.target_gpa,
            ctx.analysis.better_performers_count,
            ctx.analysis.total_similar_count
        ),
    ))
}

fn render_on_track(ctx: &RuleContext<'_>) -> Option<(String, String)> {
    let average = ctx.analysis.similar_avg_gpa?;
    Some((
        "Keep up the strong work: your GPA is at or above your peers' average".to_string(),
        format!(
            "Your {:.2} GPA compares with an average of {:.2} across {} similar {}",
            ctx.analysis.target_gpa,
            average,
            ctx.analysis.total_similar_count,
            ctx.peer_label()
        ),
    ))
}

fn render_style_method(ctx: &RuleContext<'_>) -> Option<(String, String)> {
    let (recommendation, explanation) = match ctx.learning_style? {
        LearningStyle::Visual => (
            "Use diagrams, charts, mind maps and colour-coded notes",
            "Visual learners retain more when material is organised spatially",
        ),
        LearningStyle::Auditory => (
            "Join study groups, record lectures and explain concepts aloud",
            "Auditory learners retain more through discussion and listening",
        ),
        LearningStyle::Kinesthetic => (
            "Use hands-on practice, labs and real-world applications",
            "Kinesthetic learners retain more by doing and moving",
        ),
        LearningStyle::ReadingWriting => (
            "Write detailed notes, summaries and practice problems",
            "Reading-Writing learners retain more through written material",
        ),
    };
    Some((recommendation.to_string(), explanation.to_string()))
}

fn render_pace_schedule(ctx: &RuleContext<'_>) -> Option<(String, String)> {
    let (recommendation, explanation) = match ctx.pace? {
        Pace::Accelerated => (
            "Block out fixed weekly review sessions so new material does not crowd out old",
            "An accelerated pace covers a lot quickly; scheduled review protects recall",
        ),
        Pace::Standard => (
            "Keep a consistent weekly study calendar with time reserved before exams",
            "A steady routine suits a standard course load",
        ),
        Pace::PartTime => (
            "Plan short, focused study sessions around work and other commitments",
            "Part-time students get the most from regular, compact sessions",
        ),
    };
    Some((recommendation.to_string(), explanation.to_string()))
}

fn render_course_load(ctx: &RuleContext<'_>) -> Option<(String, String)> {
    let gap = course_gap(ctx.analysis)?;
    let peer_average = ctx.analysis.similar_avg_courses?;
    let extra = gap.round().max(1.0) as u32;
    Some((
        format!(
            "Consider taking {extra} more {} to keep pace with similar peers",
            plural(extra, "course", "courses")
        ),
        format!(
            "Similar students have completed {peer_average:.1} courses on average compared with your {}",
            ctx.analysis.target_courses
        ),
    ))
}

fn render_difficulty(ctx: &RuleContext<'_>) -> Option<(String, String)> {
    let gap = difficulty_gap(ctx.analysis)?;
    Some((
        "Seek extra support through office hours or tutoring, and break hard topics into smaller parts"
            .to_string(),
        format!("You rate course difficulty {gap:.1} points higher than similar peers do"),
    ))
}

fn plural(count: u32, one: &'static str, many: &'static str) -> &'static str {
    if count == 1 {
        one
    } else {
        many
    }
}

fn course_gap(analysis: &AnalysisResult) -> Option<f64> {
    Some(analysis.similar_avg_courses? - analysis.target_courses as f64)
}

fn difficulty_gap(analysis: &AnalysisResult) -> Option<f64> {
    Some(analysis.target_avg_difficulty? - analysis.similar_avg_difficulty?)
}

/// Evaluates the rule table in order. Output depends only on `ctx`.
pub fn generate(ctx: &RuleContext<'_>) -> Vec<Recommendation> {
    RULES
        .iter()
        .filter(|rule| (rule.applies)(ctx))
        .filter_map(|rule| {
            let (recommendation, explanation) = (rule.render)(ctx)?;
            debug!(rule = rule.name, "recommendation rule fired");
            Some(Recommendation {
                category: rule.category,
                priority: rule.priority,
                recommendation,
                explanation,
                ai_insight: None,
            })
        })
        .collect()
}
