use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::ParseValueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LearningStyle {
    Visual,
    Auditory,
    Kinesthetic,
    #[serde(rename = "Reading-Writing")]
    ReadingWriting,
}

impl LearningStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningStyle::Visual => "Visual",
            LearningStyle::Auditory => "Auditory",
            LearningStyle::Kinesthetic => "Kinesthetic",
            LearningStyle::ReadingWriting => "Reading-Writing",
        }
    }
}

impl fmt::Display for LearningStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningStyle {
    type Err = ParseValueError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match normalize(value).as_str() {
            "visual" => Ok(LearningStyle::Visual),
            "auditory" => Ok(LearningStyle::Auditory),
            "kinesthetic" => Ok(LearningStyle::Kinesthetic),
            "readingwriting" => Ok(LearningStyle::ReadingWriting),
            _ => Err(ParseValueError::new("learning style", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pace {
    Accelerated,
    Standard,
    #[serde(rename = "Part-time")]
    PartTime,
}

impl Pace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pace::Accelerated => "Accelerated",
            Pace::Standard => "Standard",
            Pace::PartTime => "Part-time",
        }
    }
}

impl fmt::Display for Pace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pace {
    type Err = ParseValueError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match normalize(value).as_str() {
            "accelerated" => Ok(Pace::Accelerated),
            "standard" => Ok(Pace::Standard),
            "parttime" => Ok(Pace::PartTime),
            _ => Err(ParseValueError::new("pace", value)),
        }
    }
}

fn normalize(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Letter grade as recorded on a completion. `W` is a withdrawal and
/// carries no grade points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grade {
    A,
    AMinus,
    BPlus,
    B,
    BMinus,
    CPlus,
    C,
    CMinus,
    DPlus,
    D,
    DMinus,
    F,
    Withdrawn,
}

impl Grade {
    pub fn points(&self) -> f64 {
        match self {
            Grade::A => 4.0,
            Grade::AMinus => 3.7,
            Grade::BPlus => 3.3,
            Grade::B => 3.0,
            Grade::BMinus => 2.7,
            Grade::CPlus => 2.3,
            Grade::C => 2.0,
            Grade::CMinus => 1.7,
            Grade::DPlus => 1.3,
            Grade::D => 1.0,
            Grade::DMinus => 0.7,
            Grade::F | Grade::Withdrawn => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::AMinus => "A-",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::BMinus => "B-",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::CMinus => "C-",
            Grade::DPlus => "D+",
            Grade::D => "D",
            Grade::DMinus => "D-",
            Grade::F => "F",
            Grade::Withdrawn => "W",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = ParseValueError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let grade = match value.trim().to_ascii_uppercase().as_str() {
            "A" => Grade::A,
            "A-" => Grade::AMinus,
            "B+" => Grade::BPlus,
            "B" => Grade::B,
            "B-" => Grade::BMinus,
            "C+" => Grade::CPlus,
            "C" => Grade::C,
            "C-" => Grade::CMinus,
            "D+" => Grade::DPlus,
            "D" => Grade::D,
            "D-" => Grade::DMinus,
            "F" => Grade::F,
            "W" => Grade::Withdrawn,
            _ => return Err(ParseValueError::new("grade", value)),
        };
        Ok(grade)
    }
}

impl Serialize for Grade {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub course_id: String,
    pub course_name: String,
    pub grade: Grade,
    pub difficulty: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub learning_style: Option<LearningStyle>,
    pub preferred_pace: Option<Pace>,
    pub completions: Vec<CompletionRecord>,
}

impl Student {
    pub fn grades(&self) -> Vec<Grade> {
        self.completions.iter().map(|record| record.grade).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Course {
    pub id: String,
    pub name: String,
    pub credits: i32,
    pub avg_difficulty: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityKind {
    LearningStyle,
    Performance,
}

impl SimilarityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityKind::LearningStyle => "learning_style",
            SimilarityKind::Performance => "performance",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimilarityEdge {
    pub source_id: String,
    pub target_id: String,
    pub kind: SimilarityKind,
    pub similarity: f64,
}

/// One row of the peer pattern match: a peer joined with at most one of its
/// completions. Peers without completions appear once with empty course
/// fields.
#[derive(Debug, Clone)]
pub struct PeerRow {
    pub student_id: String,
    pub name: String,
    pub learning_style: Option<String>,
    pub pace: Option<String>,
    pub similarity_score: f64,
    pub grade_letter: Option<String>,
    pub course_id: Option<String>,
    pub course_name: Option<String>,
    pub difficulty: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub student: Student,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    pub learning_style: Option<LearningStyle>,
    pub preferred_pace: Option<Pace>,
    pub course_count: i64,
}

#[derive(Debug, Clone)]
pub struct StyleGrade {
    pub learning_style: LearningStyle,
    pub grade: Grade,
}

#[derive(Debug, Clone, Serialize)]
pub struct StyleSummary {
    pub learning_style: LearningStyle,
    #[serde(serialize_with = "round2")]
    pub average_gpa: f64,
    pub total_completions: usize,
}

/// Why an analysis could not compute a full set of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Degeneracy {
    EmptyPeerSet,
    NoComparablePeers,
    TargetWithoutCompletions,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    #[serde(serialize_with = "round2")]
    pub target_gpa: f64,
    #[serde(serialize_with = "round2_opt")]
    pub similar_avg_gpa: Option<f64>,
    #[serde(serialize_with = "round2_opt")]
    pub gpa_gap: Option<f64>,
    pub better_performers_count: usize,
    pub total_similar_count: usize,
    pub target_courses: usize,
    #[serde(serialize_with = "round2_opt")]
    pub similar_avg_courses: Option<f64>,
    #[serde(serialize_with = "round2_opt")]
    pub target_avg_difficulty: Option<f64>,
    #[serde(serialize_with = "round2_opt")]
    pub similar_avg_difficulty: Option<f64>,
    pub flags: Vec<Degeneracy>,
}

impl AnalysisResult {
    pub fn is_flagged(&self, flag: Degeneracy) -> bool {
        self.flags.contains(&flag)
    }

    /// Gap that can be trusted for grade-based advice.
    pub fn comparable_gap(&self) -> Option<f64> {
        if self.is_flagged(Degeneracy::TargetWithoutCompletions) {
            return None;
        }
        self.gpa_gap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    #[serde(rename = "Academic Performance")]
    AcademicPerformance,
    #[serde(rename = "Study Habits")]
    StudyHabits,
    #[serde(rename = "Time Management")]
    TimeManagement,
    #[serde(rename = "Course Planning")]
    CoursePlanning,
    #[serde(rename = "Study Strategy")]
    StudyStrategy,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::AcademicPerformance => "Academic Performance",
            Category::StudyHabits => "Study Habits",
            Category::TimeManagement => "Time Management",
            Category::CoursePlanning => "Course Planning",
            Category::StudyStrategy => "Study Strategy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub category: Category,
    pub priority: Priority,
    pub recommendation: String,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_insight: Option<String>,
}

pub fn round2_value(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn round2<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round2_value(*value))
}

pub(crate) fn round2_opt<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.serialize_some(&round2_value(*value)),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_points_follow_fixed_table() {
        assert_eq!(Grade::A.points(), 4.0);
        assert_eq!(Grade::AMinus.points(), 3.7);
        assert_eq!(Grade::BPlus.points(), 3.3);
        assert_eq!(Grade::DMinus.points(), 0.7);
        assert_eq!(Grade::F.points(), 0.0);
        assert_eq!(Grade::Withdrawn.points(), 0.0);
    }

    #[test]
    fn grades_parse_case_insensitively() {
        assert_eq!("b+".parse::<Grade>().unwrap(), Grade::BPlus);
        assert_eq!(" A- ".parse::<Grade>().unwrap(), Grade::AMinus);
        assert!("E".parse::<Grade>().is_err());
    }

    #[test]
    fn styles_and_paces_accept_source_spellings() {
        assert_eq!(
            "Reading-Writing".parse::<LearningStyle>().unwrap(),
            LearningStyle::ReadingWriting
        );
        assert_eq!("Part-time".parse::<Pace>().unwrap(), Pace::PartTime);
        assert!("Olfactory".parse::<LearningStyle>().is_err());
    }

    #[test]
    fn analysis_rounds_only_when_serialized() {
        let analysis = AnalysisResult {
            target_gpa: 3.0 + 1.0 / 3.0,
            similar_avg_gpa: None,
            gpa_gap: None,
            better_performers_count: 0,
            total_similar_count: 0,
            target_courses: 3,
            similar_avg_courses: None,
            target_avg_difficulty: None,
            similar_avg_difficulty: None,
            flags: vec![Degeneracy::EmptyPeerSet],
        };
        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["target_gpa"], 3.33);
        assert!(json["similar_avg_gpa"].is_null());
        assert_eq!(json["flags"][0], "empty_peer_set");
        assert!((analysis.target_gpa - 3.333_333_333).abs() < 1e-6);
    }
}
