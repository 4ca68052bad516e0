use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod analysis;
mod coach;
mod config;
mod db;
mod error;
mod insight;
mod models;
mod peers;
mod recommend;
mod report;
mod roster;
mod server;
mod store;

use crate::coach::Coach;
use crate::config::Settings;
use crate::insight::{InsightComposer, OllamaClient};
use crate::roster::RosterCache;
use crate::server::AppState;
use crate::store::{GraphStore, InMemoryGraphStore};

#[derive(Parser)]
#[command(name = "study-coach")]
#[command(about = "Peer-comparison study coach over a student/course graph", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Use the built-in sample graph instead of Postgres
    #[arg(long, global = true)]
    demo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small realistic dataset
    Seed,
    /// Import students, courses, completions or similarity edges from CSV
    Import {
        #[arg(long)]
        students: Option<PathBuf>,
        #[arg(long)]
        courses: Option<PathBuf>,
        #[arg(long)]
        completions: Option<PathBuf>,
        #[arg(long)]
        edges: Option<PathBuf>,
    },
    /// Compare one student with similar peers and print recommendations
    #[command(group(
        ArgGroup::new("target")
            .args(["student_id", "any"])
            .required(true)
            .multiple(false)
    ))]
    Analyze {
        #[arg(long)]
        student_id: Option<String>,
        /// Pick a random student with at least three completed courses
        #[arg(long)]
        any: bool,
        /// Only compare against peers pursuing the same degree
        #[arg(long)]
        same_degree: bool,
        /// Skip the generated insight
        #[arg(long)]
        no_ai: bool,
        #[arg(long)]
        json: bool,
        /// Write a markdown report instead of printing a summary
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Average GPA per learning style
    Compare,
    /// Run the REST API
    Serve {
        #[arg(long, default_value = "0.0.0.0:5000")]
        bind: SocketAddr,
        #[arg(long)]
        no_ai: bool,
    },
}

async fn connect(settings: &Settings) -> anyhow::Result<PgPool> {
    let database_url = settings
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a Postgres instance (or pass --demo)")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn graph_store(settings: &Settings, demo: bool) -> anyhow::Result<Arc<dyn GraphStore>> {
    if demo {
        info!("using the in-memory sample graph");
        return Ok(Arc::new(InMemoryGraphStore::from_dataset(&db::sample_dataset())));
    }
    let pool = connect(settings).await?;
    Ok(Arc::new(db::PgGraphStore::new(pool)))
}

fn build_coach(store: Arc<dyn GraphStore>, settings: &Settings, no_ai: bool) -> anyhow::Result<Coach> {
    let coach = Coach::new(store, settings);
    if no_ai {
        return Ok(coach);
    }

    let client = OllamaClient::new(
        &settings.ollama_url,
        &settings.ollama_model,
        settings.generation_timeout(),
    )
    .context("failed to build the text generation client")?;
    Ok(coach.with_insight(InsightComposer::new(
        Arc::new(client),
        settings.generation_timeout(),
        settings.prompt_max_chars,
        settings.insight_max_chars,
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("study_coach=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.settings;
    settings.validate()?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&settings).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&settings).await?;
            let written = db::seed(&pool).await?;
            println!("Seed data written ({written} rows).");
        }
        Commands::Import {
            students,
            courses,
            completions,
            edges,
        } => {
            if students.is_none() && courses.is_none() && completions.is_none() && edges.is_none() {
                bail!("pass at least one of --students, --courses, --completions or --edges");
            }
            let pool = connect(&settings).await?;
            // Students and courses go first so completions and edges can reference them.
            if let Some(path) = students {
                let count = db::import_students(&pool, &path).await?;
                println!("Imported {count} students from {}.", path.display());
            }
            if let Some(path) = courses {
                let count = db::import_courses(&pool, &path).await?;
                println!("Imported {count} courses from {}.", path.display());
            }
            if let Some(path) = completions {
                let count = db::import_completions(&pool, &path).await?;
                println!("Imported {count} completions from {}.", path.display());
            }
            if let Some(path) = edges {
                let count = db::import_edges(&pool, &path).await?;
                println!("Imported {count} similarity edges from {}.", path.display());
            }
        }
        Commands::Analyze {
            student_id,
            any,
            same_degree,
            no_ai,
            json,
            out,
        } => {
            let store = graph_store(&settings, cli.demo).await?;
            let student_id = match student_id {
                Some(id) => id,
                None if any => {
                    let roster = RosterCache::load(store.clone(), settings.graph_timeout()).await?;
                    let snapshot = roster.snapshot().await;
                    match snapshot.pick_any() {
                        Some(entry) => entry.id.clone(),
                        None => bail!("no student has completed at least three courses"),
                    }
                }
                None => bail!("pass --student-id or --any"),
            };

            let coach = build_coach(store, &settings, no_ai)?.same_degree_only(same_degree);
            let report = coach.analyze(&student_id).await?;

            if let Some(out) = out {
                std::fs::write(&out, report::build_report(&report, Utc::now()))
                    .with_context(|| format!("failed to write {}", out.display()))?;
                println!("Report written to {}.", out.display());
            } else if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let analysis = &report.analysis;
                println!("{} ({})", report.student.name, report.student.id);
                println!(
                    "GPA {:.2} vs similar peers {} across {} peers ({} perform better)",
                    analysis.target_gpa,
                    analysis
                        .similar_avg_gpa
                        .map(|value| format!("{value:.2}"))
                        .unwrap_or_else(|| "n/a".to_string()),
                    analysis.total_similar_count,
                    analysis.better_performers_count
                );
                println!("Recommendations:");
                for rec in &report.recommendations {
                    println!(
                        "- [{}] {}: {}",
                        rec.priority.as_str(),
                        rec.category.as_str(),
                        rec.recommendation
                    );
                }
                if let Some(insight) = &report.ai_insight {
                    println!();
                    println!("{insight}");
                }
            }
        }
        Commands::Compare => {
            let store = graph_store(&settings, cli.demo).await?;
            let summaries = Coach::new(store, &settings).compare_styles().await?;
            print!("{}", report::build_style_table(&summaries));
        }
        Commands::Serve { bind, no_ai } => {
            let store = graph_store(&settings, cli.demo).await?;
            let roster = Arc::new(
                RosterCache::load(store.clone(), settings.graph_timeout())
                    .await
                    .context("failed to load the initial roster")?,
            );
            let refresher = roster.clone().spawn_refresher(settings.roster_refresh_interval());
            let coach = Arc::new(build_coach(store, &settings, no_ai)?);

            let served = server::serve(AppState { coach, roster }, bind).await;
            refresher.abort();
            served?;
        }
    }

    Ok(())
}
