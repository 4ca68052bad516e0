use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::CoachError;
use crate::models::{CompletionRecord, Grade, Peer, PeerRow, Student};
use crate::store::{guarded, GraphStore};

#[derive(Debug, Clone)]
pub struct PeerQuery {
    pub threshold: f64,
    pub same_degree_only: bool,
    pub limit: Option<usize>,
}

impl Default for PeerQuery {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            same_degree_only: false,
            limit: None,
        }
    }
}

/// Target student plus the peers selected for comparison. An empty `peers`
/// list is a valid outcome.
#[derive(Debug, Clone)]
pub struct PeerSet {
    pub target: Student,
    pub peers: Vec<Peer>,
}

pub async fn select_peers(
    store: &dyn GraphStore,
    student_id: &str,
    query: &PeerQuery,
    deadline: Duration,
) -> Result<PeerSet, CoachError> {
    let target = guarded("student", deadline, || store.student(student_id))
        .await
        .map_err(CoachError::graph_store)?
        .ok_or_else(|| CoachError::NotFound(student_id.to_string()))?;

    let rows = guarded("peer_rows", deadline, || {
        store.peer_rows(student_id, query.threshold, query.same_degree_only)
    })
    .await
    .map_err(CoachError::graph_store)?;

    let mut peers = group_peer_rows(rows);
    peers.retain(|peer| peer.student.id != target.id);
    if let Some(limit) = query.limit {
        peers.truncate(limit);
    }

    if peers.is_empty() {
        info!(
            student_id,
            threshold = query.threshold,
            same_degree_only = query.same_degree_only,
            "no peers above similarity threshold"
        );
    }

    Ok(PeerSet { target, peers })
}

/// Folds flat match rows into one `Peer` per student, ordered by descending
/// similarity and then by id.
pub fn group_peer_rows(rows: Vec<PeerRow>) -> Vec<Peer> {
    let mut grouped: BTreeMap<String, Peer> = BTreeMap::new();

    for row in rows {
        let peer = grouped.entry(row.student_id.clone()).or_insert_with(|| Peer {
            student: Student {
                id: row.student_id.clone(),
                name: row.name.clone(),
                learning_style: row.learning_style.as_deref().and_then(|v| v.parse().ok()),
                preferred_pace: row.pace.as_deref().and_then(|v| v.parse().ok()),
                completions: Vec::new(),
            },
            similarity: row.similarity_score,
        });
        peer.similarity = peer.similarity.max(row.similarity_score);

        let (Some(course_id), Some(letter)) = (row.course_id, row.grade_letter) else {
            continue;
        };
        if peer
            .student
            .completions
            .iter()
            .any(|record| record.course_id == course_id)
        {
            continue;
        }
        match letter.parse::<Grade>() {
            Ok(grade) => peer.student.completions.push(CompletionRecord {
                course_name: row.course_name.unwrap_or_else(|| course_id.clone()),
                course_id,
                grade,
                difficulty: row.difficulty,
            }),
            Err(err) => {
                warn!(peer_id = %row.student_id, %course_id, error = %err, "skipping peer completion")
            }
        }
    }

    let mut peers: Vec<Peer> = grouped.into_values().collect();
    peers.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.student.id.cmp(&b.student.id))
    });
    peers
}
