use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::IteratorRandom;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::CoachError;
use crate::models::{LearningStyle, RosterEntry};
use crate::store::{guarded, GraphStore};

/// Students need this many completions to be listed or picked at random.
pub const MIN_LISTED_COURSES: i64 = 3;

/// Read-only view of the student list at one point in time.
#[derive(Debug, Clone)]
pub struct Roster {
    pub entries: Vec<RosterEntry>,
    pub refreshed_at: DateTime<Utc>,
}

impl Roster {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self {
            entries,
            refreshed_at: Utc::now(),
        }
    }

    pub fn eligible(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.course_count >= MIN_LISTED_COURSES)
    }

    /// Eligible students ordered by name.
    pub fn listing(&self, limit: usize) -> Vec<RosterEntry> {
        let mut listed: Vec<RosterEntry> = self.eligible().cloned().collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        listed.truncate(limit);
        listed
    }

    pub fn learning_styles(&self) -> Vec<LearningStyle> {
        self.entries
            .iter()
            .filter_map(|entry| entry.learning_style)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn pick_any(&self) -> Option<&RosterEntry> {
        self.eligible().choose(&mut rand::thread_rng())
    }

    /// Up to `count` distinct eligible students in random order.
    pub fn pick_many(&self, count: usize) -> Vec<&RosterEntry> {
        self.eligible().choose_multiple(&mut rand::thread_rng(), count)
    }
}

/// Shared owner of the current roster snapshot. Readers clone the `Arc`;
/// a refresh loads the new roster before taking the write lock.
pub struct RosterCache {
    store: Arc<dyn GraphStore>,
    deadline: Duration,
    current: RwLock<Arc<Roster>>,
}

impl RosterCache {
    pub async fn load(store: Arc<dyn GraphStore>, deadline: Duration) -> Result<Self, CoachError> {
        let roster = fetch(store.as_ref(), deadline).await?;
        Ok(Self {
            store,
            deadline,
            current: RwLock::new(Arc::new(roster)),
        })
    }

    pub async fn snapshot(&self) -> Arc<Roster> {
        self.current.read().await.clone()
    }

    pub async fn refresh(&self) -> Result<Arc<Roster>, CoachError> {
        let roster = Arc::new(fetch(self.store.as_ref(), self.deadline).await?);
        *self.current.write().await = roster.clone();
        info!(students = roster.entries.len(), "roster refreshed");
        Ok(roster)
    }

    pub fn spawn_refresher(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = self.refresh().await {
                    warn!(error = %err, "roster refresh failed, keeping previous snapshot");
                }
            }
        })
    }
}

async fn fetch(store: &dyn GraphStore, deadline: Duration) -> Result<Roster, CoachError> {
    let entries = guarded("roster", deadline, || store.roster())
        .await
        .map_err(CoachError::graph_store)?;
    Ok(Roster::new(entries))
}
