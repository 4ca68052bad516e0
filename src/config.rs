use std::time::Duration;

use anyhow::ensure;
use clap::Args;

/// Runtime settings shared by every command. Each flag can also be set
/// through the environment.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434", global = true)]
    pub ollama_url: String,

    #[arg(long, env = "OLLAMA_MODEL", default_value = "llama2", global = true)]
    pub ollama_model: String,

    /// Minimum learning-style similarity (exclusive) for a peer to count
    #[arg(long, env = "STUDY_COACH_SIMILARITY_THRESHOLD", default_value_t = 0.7, global = true)]
    pub similarity_threshold: f64,

    /// GPA gap above which academic advice is high priority
    #[arg(long, env = "STUDY_COACH_HIGH_PRIORITY_GAP", default_value_t = 0.3, global = true)]
    pub high_priority_gap: f64,

    /// Keep only the N most similar peers
    #[arg(long, env = "STUDY_COACH_PEER_LIMIT", global = true)]
    pub peer_limit: Option<usize>,

    #[arg(long, env = "STUDY_COACH_GRAPH_TIMEOUT_SECS", default_value_t = 5, global = true)]
    pub graph_timeout_secs: u64,

    #[arg(long, env = "STUDY_COACH_GENERATION_TIMEOUT_SECS", default_value_t = 10, global = true)]
    pub generation_timeout_secs: u64,

    #[arg(long, env = "STUDY_COACH_INSIGHT_MAX_CHARS", default_value_t = 600, global = true)]
    pub insight_max_chars: usize,

    #[arg(long, env = "STUDY_COACH_PROMPT_MAX_CHARS", default_value_t = 1200, global = true)]
    pub prompt_max_chars: usize,

    #[arg(long, env = "STUDY_COACH_ROSTER_REFRESH_SECS", default_value_t = 300, global = true)]
    pub roster_refresh_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama2".to_string(),
            similarity_threshold: 0.7,
            high_priority_gap: 0.3,
            peer_limit: None,
            graph_timeout_secs: 5,
            generation_timeout_secs: 10,
            insight_max_chars: 600,
            prompt_max_chars: 1200,
            roster_refresh_secs: 300,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.similarity_threshold),
            "similarity threshold must be within [0, 1], got {}",
            self.similarity_threshold
        );
        ensure!(
            self.high_priority_gap >= 0.0,
            "high priority gap must not be negative"
        );
        ensure!(self.graph_timeout_secs > 0, "graph timeout must be positive");
        ensure!(
            self.generation_timeout_secs > 0,
            "generation timeout must be positive"
        );
        ensure!(self.insight_max_chars > 0, "insight cap must be positive");
        ensure!(self.prompt_max_chars > 0, "prompt cap must be positive");
        ensure!(self.roster_refresh_secs > 0, "roster refresh interval must be positive");
        Ok(())
    }

    pub fn graph_timeout(&self) -> Duration {
        Duration::from_secs(self.graph_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn roster_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.roster_refresh_secs)
    }
}
