use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::db::Dataset;
use crate::error::StoreError;
use crate::models::{
    CompletionRecord, Grade, PeerRow, RosterEntry, SimilarityEdge, SimilarityKind, Student,
    StyleGrade,
};

/// Pattern-match queries over the student/course graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Student node with its completed courses, or `None` for an unknown id.
    async fn student(&self, student_id: &str) -> Result<Option<Student>, StoreError>;

    /// Peers reachable over a learning-style edge scoring above `threshold`,
    /// one row per peer completion.
    async fn peer_rows(
        &self,
        student_id: &str,
        threshold: f64,
        same_degree_only: bool,
    ) -> Result<Vec<PeerRow>, StoreError>;

    async fn roster(&self) -> Result<Vec<RosterEntry>, StoreError>;

    async fn style_grades(&self) -> Result<Vec<StyleGrade>, StoreError>;
}

/// Runs a store query under `deadline`, retrying once when the first attempt
/// fails with a transient connection error.
pub async fn guarded<T, F, Fut>(label: &str, deadline: Duration, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut retried = false;
    loop {
        let outcome = match tokio::time::timeout(deadline, op()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(deadline)),
        };

        match outcome {
            Err(err) if !retried && err.is_transient() => {
                warn!(query = label, error = %err, "transient graph store failure, retrying once");
                retried = true;
            }
            other => return other,
        }
    }
}

/// Graph held in memory. Backs the demo mode and the tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryGraphStore {
    students: BTreeMap<String, Student>,
    edges: Vec<SimilarityEdge>,
    degrees: HashMap<String, HashSet<String>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(dataset: &Dataset) -> Self {
        let course_names: HashMap<&str, &str> = dataset
            .courses
            .iter()
            .map(|course| (course.id.as_str(), course.name.as_str()))
            .collect();

        let mut store = Self::new();
        for row in &dataset.students {
            store = store.with_student(Student {
                id: row.id.clone(),
                name: row.name.clone(),
                learning_style: row.learning_style.as_deref().and_then(|v| v.parse().ok()),
                preferred_pace: row.preferred_pace.as_deref().and_then(|v| v.parse().ok()),
                completions: Vec::new(),
            });
            if let Some(degree_id) = &row.degree_id {
                store = store.with_degree(&row.id, degree_id);
            }
        }

        for row in &dataset.completions {
            let grade = match row.grade.parse::<Grade>() {
                Ok(grade) => grade,
                Err(err) => {
                    warn!(student_id = %row.student_id, error = %err, "skipping completion");
                    continue;
                }
            };
            if let Some(student) = store.students.get_mut(&row.student_id) {
                student.completions.push(CompletionRecord {
                    course_id: row.course_id.clone(),
                    course_name: course_names
                        .get(row.course_id.as_str())
                        .map(|name| name.to_string())
                        .unwrap_or_else(|| row.course_id.clone()),
                    grade,
                    difficulty: row.difficulty,
                });
            }
        }

        for edge in &dataset.edges {
            store = store.with_edge(edge.clone());
        }
        store
    }

    pub fn with_student(mut self, student: Student) -> Self {
        self.students.insert(student.id.clone(), student);
        self
    }

    /// Adds an edge, replacing any existing edge of the same kind between
    /// the same pair.
    pub fn with_edge(mut self, edge: SimilarityEdge) -> Self {
        self.edges.retain(|existing| {
            !(existing.source_id == edge.source_id
                && existing.target_id == edge.target_id
                && existing.kind == edge.kind)
        });
        self.edges.push(edge);
        self
    }

    pub fn with_degree(mut self, student_id: &str, degree_id: &str) -> Self {
        self.degrees
            .entry(student_id.to_string())
            .or_default()
            .insert(degree_id.to_string());
        self
    }

    fn shares_degree(&self, a: &str, b: &str) -> bool {
        match (self.degrees.get(a), self.degrees.get(b)) {
            (Some(left), Some(right)) => !left.is_disjoint(right),
            _ => false,
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn student(&self, student_id: &str) -> Result<Option<Student>, StoreError> {
        Ok(self.students.get(student_id).cloned())
    }

    async fn peer_rows(
        &self,
        student_id: &str,
        threshold: f64,
        same_degree_only: bool,
    ) -> Result<Vec<PeerRow>, StoreError> {
        let mut rows = Vec::new();
        for edge in self.edges.iter().filter(|edge| {
            edge.source_id == student_id
                && edge.kind == SimilarityKind::LearningStyle
                && edge.similarity > threshold
        }) {
            if same_degree_only && !self.shares_degree(student_id, &edge.target_id) {
                continue;
            }
            let Some(peer) = self.students.get(&edge.target_id) else {
                continue;
            };

            let base = PeerRow {
                student_id: peer.id.clone(),
                name: peer.name.clone(),
                learning_style: peer.learning_style.map(|style| style.as_str().to_string()),
                pace: peer.preferred_pace.map(|pace| pace.as_str().to_string()),
                similarity_score: edge.similarity,
                grade_letter: None,
                course_id: None,
                course_name: None,
                difficulty: None,
            };

            if peer.completions.is_empty() {
                rows.push(base);
                continue;
            }
            for record in &peer.completions {
                rows.push(PeerRow {
                    grade_letter: Some(record.grade.as_str().to_string()),
                    course_id: Some(record.course_id.clone()),
                    course_name: Some(record.course_name.clone()),
                    difficulty: record.difficulty,
                    ..base.clone()
                });
            }
        }
        debug!(student_id, rows = rows.len(), "in-memory peer match");
        Ok(rows)
    }

    async fn roster(&self) -> Result<Vec<RosterEntry>, StoreError> {
        let mut entries: Vec<RosterEntry> = self
            .students
            .values()
            .map(|student| RosterEntry {
                id: student.id.clone(),
                name: student.name.clone(),
                learning_style: student.learning_style,
                preferred_pace: student.preferred_pace,
                course_count: student.completions.len() as i64,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn style_grades(&self) -> Result<Vec<StyleGrade>, StoreError> {
        Ok(self
            .students
            .values()
            .filter_map(|student| student.learning_style.map(|style| (style, student)))
            .flat_map(|(style, student)| {
                student.completions.iter().map(move |record| StyleGrade {
                    learning_style: style,
                    grade: record.grade,
                })
            })
            .collect())
    }
}
