use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::{
    CompletionRecord, Course, Grade, LearningStyle, Pace, PeerRow, RosterEntry, SimilarityEdge,
    SimilarityKind, Student, StyleGrade,
};
use crate::store::GraphStore;

#[derive(Debug, Clone, Deserialize)]
pub struct StudentImport {
    pub id: String,
    pub name: String,
    pub learning_style: Option<String>,
    pub preferred_pace: Option<String>,
    pub degree_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionImport {
    pub student_id: String,
    pub course_id: String,
    pub grade: String,
    pub difficulty: Option<f64>,
}

/// Everything needed to populate a fresh graph.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub students: Vec<StudentImport>,
    pub courses: Vec<Course>,
    pub completions: Vec<CompletionImport>,
    pub edges: Vec<SimilarityEdge>,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let dataset = sample_dataset();
    let mut written = 0usize;

    for course in &dataset.courses {
        written += upsert_course(pool, course).await?;
    }
    for student in &dataset.students {
        written += upsert_student(pool, student).await?;
    }
    for completion in &dataset.completions {
        written += upsert_completion(pool, completion).await?;
    }
    for edge in &dataset.edges {
        written += upsert_edge(pool, edge).await?;
    }

    Ok(written)
}

pub async fn import_students(pool: &PgPool, csv_path: &Path) -> anyhow::Result<usize> {
    let mut inserted = 0usize;
    for row in read_csv::<StudentImport>(csv_path)? {
        inserted += upsert_student(pool, &row).await?;
    }
    Ok(inserted)
}

pub async fn import_courses(pool: &PgPool, csv_path: &Path) -> anyhow::Result<usize> {
    let mut inserted = 0usize;
    for row in read_csv::<Course>(csv_path)? {
        inserted += upsert_course(pool, &row).await?;
    }
    Ok(inserted)
}

pub async fn import_completions(pool: &PgPool, csv_path: &Path) -> anyhow::Result<usize> {
    let mut inserted = 0usize;
    for row in read_csv::<CompletionImport>(csv_path)? {
        if let Err(err) = row.grade.parse::<Grade>() {
            warn!(student_id = %row.student_id, course_id = %row.course_id, error = %err, "skipping completion");
            continue;
        }
        inserted += upsert_completion(pool, &row).await?;
    }
    Ok(inserted)
}

pub async fn import_edges(pool: &PgPool, csv_path: &Path) -> anyhow::Result<usize> {
    let mut inserted = 0usize;
    for row in read_csv::<SimilarityEdge>(csv_path)? {
        if !(0.0..=1.0).contains(&row.similarity) {
            warn!(source_id = %row.source_id, target_id = %row.target_id, similarity = row.similarity, "skipping edge outside [0, 1]");
            continue;
        }
        inserted += upsert_edge(pool, &row).await?;
    }
    Ok(inserted)
}

fn read_csv<T: DeserializeOwned>(csv_path: &Path) -> anyhow::Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        rows.push(result?);
    }
    Ok(rows)
}

async fn upsert_student(pool: &PgPool, row: &StudentImport) -> anyhow::Result<usize> {
    let learning_style = row
        .learning_style
        .as_deref()
        .and_then(|value| canonical::<LearningStyle>(&row.id, value))
        .map(|style| style.as_str());
    let preferred_pace = row
        .preferred_pace
        .as_deref()
        .and_then(|value| canonical::<Pace>(&row.id, value))
        .map(|pace| pace.as_str());

    let result = sqlx::query(
        r#"
        INSERT INTO study_coach.students (id, name, learning_style, preferred_pace)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE
        SET name = EXCLUDED.name,
            learning_style = EXCLUDED.learning_style,
            preferred_pace = EXCLUDED.preferred_pace
        "#,
    )
    .bind(&row.id)
    .bind(&row.name)
    .bind(learning_style)
    .bind(preferred_pace)
    .execute(pool)
    .await?;

    if let Some(degree_id) = &row.degree_id {
        sqlx::query(
            r#"
            INSERT INTO study_coach.pursuing (student_id, degree_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&row.id)
        .bind(degree_id)
        .execute(pool)
        .await?;
    }

    Ok(result.rows_affected() as usize)
}

fn canonical<T>(student_id: &str, value: &str) -> Option<T>
where
    T: std::str::FromStr<Err = crate::error::ParseValueError>,
{
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(student_id, error = %err, "storing student without this attribute");
            None
        }
    }
}

async fn upsert_course(pool: &PgPool, course: &Course) -> anyhow::Result<usize> {
    let result = sqlx::query(
        r#"
        INSERT INTO study_coach.courses (id, name, credits, avg_difficulty)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE
        SET name = EXCLUDED.name,
            credits = EXCLUDED.credits,
            avg_difficulty = EXCLUDED.avg_difficulty
        "#,
    )
    .bind(&course.id)
    .bind(&course.name)
    .bind(course.credits)
    .bind(course.avg_difficulty)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn upsert_completion(pool: &PgPool, row: &CompletionImport) -> anyhow::Result<usize> {
    let result = sqlx::query(
        r#"
        INSERT INTO study_coach.completions (student_id, course_id, grade, difficulty)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (student_id, course_id) DO UPDATE
        SET grade = EXCLUDED.grade, difficulty = EXCLUDED.difficulty
        "#,
    )
    .bind(&row.student_id)
    .bind(&row.course_id)
    .bind(row.grade.trim().to_ascii_uppercase())
    .bind(row.difficulty)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn upsert_edge(pool: &PgPool, edge: &SimilarityEdge) -> anyhow::Result<usize> {
    let result = sqlx::query(
        r#"
        INSERT INTO study_coach.similarity_edges (source_id, target_id, kind, similarity)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (source_id, target_id, kind) DO UPDATE
        SET similarity = EXCLUDED.similarity
        "#,
    )
    .bind(&edge.source_id)
    .bind(&edge.target_id)
    .bind(edge.kind.as_str())
    .bind(edge.similarity)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

/// Graph store backed by the `study_coach` Postgres schema.
#[derive(Debug, Clone)]
pub struct PgGraphStore {
    pool: PgPool,
}

impl PgGraphStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn student(&self, student_id: &str) -> Result<Option<Student>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.name, s.learning_style, s.preferred_pace,
                   c.id AS course_id, c.name AS course_name, cp.grade, cp.difficulty
            FROM study_coach.students s
            LEFT JOIN study_coach.completions cp ON cp.student_id = s.id
            LEFT JOIN study_coach.courses c ON c.id = cp.course_id
            WHERE s.id = $1
            ORDER BY c.id
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let mut student = Student {
            id: first.try_get("id")?,
            name: first.try_get("name")?,
            learning_style: optional_attr(student_id, first.try_get("learning_style")?),
            preferred_pace: optional_attr(student_id, first.try_get("preferred_pace")?),
            completions: Vec::new(),
        };

        for row in &rows {
            if let Some(record) = completion_from_row(student_id, row)? {
                student.completions.push(record);
            }
        }

        Ok(Some(student))
    }

    async fn peer_rows(
        &self,
        student_id: &str,
        threshold: f64,
        same_degree_only: bool,
    ) -> Result<Vec<PeerRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT p.id AS student_id, p.name, p.learning_style, p.preferred_pace AS pace,
                   e.similarity AS similarity_score, cp.grade AS grade_letter,
                   c.id AS course_id, c.name AS course_name, cp.difficulty
            FROM study_coach.similarity_edges e
            JOIN study_coach.students p ON p.id = e.target_id
            LEFT JOIN study_coach.completions cp ON cp.student_id = p.id
            LEFT JOIN study_coach.courses c ON c.id = cp.course_id
            WHERE e.source_id = $1
              AND e.kind = 'learning_style'
              AND e.similarity > $2
              AND (NOT $3 OR EXISTS (
                  SELECT 1
                  FROM study_coach.pursuing mine
                  JOIN study_coach.pursuing theirs ON theirs.degree_id = mine.degree_id
                  WHERE mine.student_id = $1 AND theirs.student_id = p.id
              ))
            ORDER BY e.similarity DESC, p.id, c.id
            "#,
        )
        .bind(student_id)
        .bind(threshold)
        .bind(same_degree_only)
        .fetch_all(&self.pool)
        .await?;

        debug!(student_id, rows = rows.len(), "peer pattern match");

        let mut peer_rows = Vec::with_capacity(rows.len());
        for row in rows {
            peer_rows.push(PeerRow {
                student_id: row.try_get("student_id")?,
                name: row.try_get("name")?,
                learning_style: row.try_get("learning_style")?,
                pace: row.try_get("pace")?,
                similarity_score: row.try_get("similarity_score")?,
                grade_letter: row.try_get("grade_letter")?,
                course_id: row.try_get("course_id")?,
                course_name: row.try_get("course_name")?,
                difficulty: row.try_get("difficulty")?,
            });
        }
        Ok(peer_rows)
    }

    async fn roster(&self) -> Result<Vec<RosterEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.name, s.learning_style, s.preferred_pace,
                   COUNT(cp.course_id) AS course_count
            FROM study_coach.students s
            LEFT JOIN study_coach.completions cp ON cp.student_id = s.id
            GROUP BY s.id, s.name, s.learning_style, s.preferred_pace
            ORDER BY s.name, s.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            entries.push(RosterEntry {
                learning_style: optional_attr(&id, row.try_get("learning_style")?),
                preferred_pace: optional_attr(&id, row.try_get("preferred_pace")?),
                name: row.try_get("name")?,
                course_count: row.try_get("course_count")?,
                id,
            });
        }
        info!(students = entries.len(), "loaded roster");
        Ok(entries)
    }

    async fn style_grades(&self) -> Result<Vec<StyleGrade>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.learning_style, cp.grade
            FROM study_coach.students s
            JOIN study_coach.completions cp ON cp.student_id = s.id
            WHERE s.learning_style IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grades = Vec::with_capacity(rows.len());
        for row in rows {
            let style: String = row.try_get("learning_style")?;
            let letter: String = row.try_get("grade")?;
            match (style.parse::<LearningStyle>(), letter.parse::<Grade>()) {
                (Ok(learning_style), Ok(grade)) => grades.push(StyleGrade {
                    learning_style,
                    grade,
                }),
                _ => warn!(%style, %letter, "skipping unrecognised style or grade"),
            }
        }
        Ok(grades)
    }
}

fn optional_attr<T>(student_id: &str, value: Option<String>) -> Option<T>
where
    T: std::str::FromStr<Err = crate::error::ParseValueError>,
{
    value.and_then(|value| canonical(student_id, &value))
}

fn completion_from_row(student_id: &str, row: &PgRow) -> Result<Option<CompletionRecord>, StoreError> {
    let course_id: Option<String> = row.try_get("course_id")?;
    let letter: Option<String> = row.try_get("grade")?;
    let (Some(course_id), Some(letter)) = (course_id, letter) else {
        return Ok(None);
    };

    match letter.parse::<Grade>() {
        Ok(grade) => Ok(Some(CompletionRecord {
            course_name: row
                .try_get::<Option<String>, _>("course_name")?
                .unwrap_or_else(|| course_id.clone()),
            course_id,
            grade,
            difficulty: row.try_get("difficulty")?,
        })),
        Err(err) => {
            warn!(student_id, %course_id, error = %err, "skipping completion");
            Ok(None)
        }
    }
}

/// Small, realistic graph used by `seed` and by the in-memory demo store.
pub fn sample_dataset() -> Dataset {
    let students = [
        ("VS10001", "Avery Lee", Some("Visual"), Some("Standard"), Some("CMSC-BS")),
        ("VS10002", "Jules Moreno", Some("Visual"), Some("Standard"), Some("CMSC-BS")),
        ("VS10003", "Kiara Patel", Some("Visual"), Some("Accelerated"), Some("MATH-BS")),
        ("VS10004", "Noah Brooks", Some("Visual"), Some("Part-time"), Some("CMSC-BS")),
        ("AU20001", "Priya Shah", Some("Auditory"), Some("Standard"), Some("PHYS-BS")),
        ("AU20002", "Marcus Chen", Some("Auditory"), Some("Part-time"), Some("PHYS-BS")),
        ("KN30001", "Sofia Alvarez", Some("Kinesthetic"), Some("Accelerated"), None),
        ("KN30002", "Liam O'Connor", Some("Kinesthetic"), Some("Standard"), None),
        ("RW40001", "Hana Sato", Some("Reading-Writing"), Some("Standard"), Some("ENGL-BA")),
    ]
    .into_iter()
    .map(|(id, name, style, pace, degree)| StudentImport {
        id: id.to_string(),
        name: name.to_string(),
        learning_style: style.map(str::to_string),
        preferred_pace: pace.map(str::to_string),
        degree_id: degree.map(str::to_string),
    })
    .collect();

    let courses = [
        ("CMSC201", "Computer Science I", 4, 3.4),
        ("CMSC202", "Computer Science II", 4, 3.8),
        ("MATH151", "Calculus and Analytic Geometry I", 4, 3.6),
        ("MATH221", "Introduction to Linear Algebra", 3, 3.5),
        ("PHYS121", "Introductory Physics I", 4, 3.7),
        ("ENGL100", "Composition", 3, 2.4),
        ("HIST101", "American History", 3, 2.6),
    ]
    .into_iter()
    .map(|(id, name, credits, avg_difficulty)| Course {
        id: id.to_string(),
        name: name.to_string(),
        credits,
        avg_difficulty,
    })
    .collect();

    let completions = [
        ("VS10001", "CMSC201", "B", Some(4.0)),
        ("VS10001", "MATH151", "C+", Some(4.0)),
        ("VS10001", "ENGL100", "B-", Some(3.0)),
        ("VS10002", "CMSC201", "A", Some(3.0)),
        ("VS10002", "MATH151", "A-", Some(2.0)),
        ("VS10002", "ENGL100", "B+", Some(3.0)),
        ("VS10003", "CMSC201", "A", Some(3.0)),
        ("VS10003", "MATH151", "B+", Some(3.0)),
        ("VS10003", "MATH221", "A-", Some(3.0)),
        ("VS10003", "HIST101", "B", None),
        ("VS10004", "CMSC201", "B", Some(4.0)),
        ("VS10004", "ENGL100", "B", Some(2.0)),
        ("VS10004", "HIST101", "C", Some(3.0)),
        ("AU20001", "PHYS121", "B+", Some(4.0)),
        ("AU20001", "MATH151", "B", Some(4.0)),
        ("AU20001", "ENGL100", "A-", Some(2.0)),
        ("AU20002", "PHYS121", "A", Some(3.0)),
        ("AU20002", "MATH151", "A", Some(3.0)),
        ("AU20002", "HIST101", "B+", Some(2.0)),
        ("KN30002", "CMSC201", "B", Some(3.0)),
        ("KN30002", "PHYS121", "C", Some(5.0)),
        ("KN30002", "ENGL100", "B-", Some(2.0)),
        ("RW40001", "ENGL100", "A-", Some(2.0)),
        ("RW40001", "HIST101", "B", Some(3.0)),
    ]
    .into_iter()
    .map(|(student_id, course_id, grade, difficulty)| CompletionImport {
        student_id: student_id.to_string(),
        course_id: course_id.to_string(),
        grade: grade.to_string(),
        difficulty,
    })
    .collect();

    let edges = [
        ("VS10001", "VS10002", SimilarityKind::LearningStyle, 0.86),
        ("VS10001", "VS10003", SimilarityKind::LearningStyle, 0.78),
        ("VS10001", "VS10004", SimilarityKind::LearningStyle, 0.65),
        ("VS10001", "AU20001", SimilarityKind::Performance, 0.81),
        ("VS10002", "VS10001", SimilarityKind::LearningStyle, 0.86),
        ("VS10003", "VS10002", SimilarityKind::LearningStyle, 0.74),
        ("AU20001", "AU20002", SimilarityKind::LearningStyle, 0.9),
        ("AU20002", "AU20001", SimilarityKind::LearningStyle, 0.9),
        ("KN30001", "KN30002", SimilarityKind::LearningStyle, 0.75),
    ]
    .into_iter()
    .map(|(source_id, target_id, kind, similarity)| SimilarityEdge {
        source_id: source_id.to_string(),
        target_id: target_id.to_string(),
        kind,
        similarity,
    })
    .collect();

    Dataset {
        students,
        courses,
        completions,
        edges,
    }
}
