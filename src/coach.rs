use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::analysis;
use crate::config::Settings;
use crate::error::CoachError;
use crate::insight::{InsightComposer, InsightInput};
use crate::models::{
    AnalysisResult, Category, Grade, LearningStyle, Pace, Recommendation, Student, StyleSummary,
};
use crate::peers::{select_peers, PeerQuery};
use crate::recommend::{self, RuleContext, Thresholds};
use crate::roster::MIN_LISTED_COURSES;
use crate::store::{guarded, GraphStore};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub id: String,
    pub name: String,
    pub learning_style: Option<LearningStyle>,
    pub preferred_pace: Option<Pace>,
    pub grades: Vec<Grade>,
}

impl From<&Student> for StudentView {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id.clone(),
            name: student.name.clone(),
            learning_style: student.learning_style,
            preferred_pace: student.preferred_pace,
            grades: student.grades(),
        }
    }
}

/// Everything one analysis request produces.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub student: StudentView,
    pub analysis: AnalysisResult,
    pub recommendations: Vec<Recommendation>,
    pub ai_insight: Option<String>,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: String,
    pub name: String,
    pub learning_style: Option<LearningStyle>,
    pub preferred_pace: Option<Pace>,
    pub grades: Vec<Grade>,
    pub course_names: Vec<String>,
    pub course_count: usize,
    #[serde(serialize_with = "crate::models::round2_opt")]
    pub gpa: Option<f64>,
}

/// Runs peer selection, analysis, recommendation and the optional insight
/// for one student.
pub struct Coach {
    store: Arc<dyn GraphStore>,
    insight: Option<InsightComposer>,
    peer_query: PeerQuery,
    thresholds: Thresholds,
    graph_timeout: Duration,
}

impl Coach {
    pub fn new(store: Arc<dyn GraphStore>, settings: &Settings) -> Self {
        Self {
            store,
            insight: None,
            peer_query: PeerQuery {
                threshold: settings.similarity_threshold,
                same_degree_only: false,
                limit: settings.peer_limit,
            },
            thresholds: Thresholds {
                high_priority_gap: settings.high_priority_gap,
                ..Thresholds::default()
            },
            graph_timeout: settings.graph_timeout(),
        }
    }

    pub fn with_insight(mut self, composer: InsightComposer) -> Self {
        self.insight = Some(composer);
        self
    }

    pub fn same_degree_only(mut self, enabled: bool) -> Self {
        self.peer_query.same_degree_only = enabled;
        self
    }

    pub async fn analyze(&self, student_id: &str) -> Result<AnalysisReport, CoachError> {
        let peer_set = select_peers(
            self.store.as_ref(),
            student_id,
            &self.peer_query,
            self.graph_timeout,
        )
        .await?;
        let target = &peer_set.target;

        let analysis = analysis::analyze(target, &peer_set.peers);
        let mut recommendations = recommend::generate(&RuleContext {
            analysis: &analysis,
            learning_style: target.learning_style,
            pace: target.preferred_pace,
            thresholds: &self.thresholds,
        });

        let ai_insight = match &self.insight {
            Some(composer) => Some(
                composer
                    .compose(&InsightInput {
                        learning_style: target.learning_style,
                        pace: target.preferred_pace,
                        analysis: &analysis,
                    })
                    .await,
            ),
            None => None,
        };

        if let Some(text) = &ai_insight {
            if let Some(academic) = recommendations
                .iter_mut()
                .find(|rec| rec.category == Category::AcademicPerformance)
            {
                academic.ai_insight = Some(text.clone());
            }
        }

        info!(
            student_id,
            peers = analysis.total_similar_count,
            recommendations = recommendations.len(),
            degenerate = !analysis.flags.is_empty(),
            "analysis complete"
        );

        Ok(AnalysisReport {
            student: StudentView::from(target),
            analysis,
            recommendations,
            ai_insight,
            success: true,
        })
    }

    pub async fn profile(&self, student_id: &str) -> Result<StudentProfile, CoachError> {
        let student = guarded("student", self.graph_timeout, || self.store.student(student_id))
            .await
            .map_err(CoachError::graph_store)?
            .ok_or_else(|| CoachError::NotFound(student_id.to_string()))?;

        Ok(StudentProfile {
            gpa: analysis::gpa(&student.completions),
            grades: student.grades(),
            course_names: student
                .completions
                .iter()
                .map(|record| record.course_name.clone())
                .collect(),
            course_count: student.completions.len(),
            id: student.id,
            name: student.name,
            learning_style: student.learning_style,
            preferred_pace: student.preferred_pace,
        })
    }

    pub async fn compare_styles(&self) -> Result<Vec<StyleSummary>, CoachError> {
        let grades = guarded("style_grades", self.graph_timeout, || self.store.style_grades())
            .await
            .map_err(CoachError::graph_store)?;
        Ok(analysis::compare_styles(&grades, MIN_LISTED_COURSES as usize))
    }
}
