use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::GenerationError;
use crate::models::{AnalysisResult, Degeneracy, LearningStyle, Pace};

/// Prompt in, free text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(alias = "text")]
    response: String,
}

/// Client for a local Ollama `/api/generate` endpoint.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0.7,
                top_p: 0.9,
                num_predict: 150,
            },
        };

        debug!(model = %self.model, prompt_chars = prompt.len(), "requesting generation");
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenerationError::Status(response.status().as_u16()));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|err| GenerationError::Malformed(err.to_string()))?;
        Ok(body.response)
    }
}

/// What the insight is about.
pub struct InsightInput<'a> {
    pub learning_style: Option<LearningStyle>,
    pub pace: Option<Pace>,
    pub analysis: &'a AnalysisResult,
}

pub struct InsightComposer {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
    prompt_max_chars: usize,
    max_chars: usize,
}

impl InsightComposer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        timeout: Duration,
        prompt_max_chars: usize,
        max_chars: usize,
    ) -> Self {
        Self {
            generator,
            timeout,
            prompt_max_chars,
            max_chars,
        }
    }

    /// Generated insight, or the fallback sentence when generation fails.
    /// Never empty.
    pub async fn compose(&self, input: &InsightInput<'_>) -> String {
        self.try_generate(input).await.unwrap_or_else(|err| {
            warn!(error = %err, "text generation unavailable, using fallback insight");
            fallback_insight(input)
        })
    }

    pub async fn try_generate(&self, input: &InsightInput<'_>) -> Result<String, GenerationError> {
        let prompt = build_prompt(input, self.prompt_max_chars);
        let text = tokio::time::timeout(self.timeout, self.generator.generate(&prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))??;

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(GenerationError::Malformed("empty response".to_string()));
        }
        info!(chars = trimmed.chars().count(), "generated insight");
        Ok(cap_chars(trimmed, self.max_chars))
    }
}

pub fn build_prompt(input: &InsightInput<'_>, max_chars: usize) -> String {
    let analysis = input.analysis;
    let style = input
        .learning_style
        .map(|style| style.as_str())
        .unwrap_or("unspecified");
    let pace = input.pace.map(|pace| pace.as_str()).unwrap_or("unspecified");

    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "You are an academic advisor. A student with a {style} learning style needs study advice."
    );
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Student profile:");
    let _ = writeln!(prompt, "- Learning style: {style}");
    let _ = writeln!(prompt, "- Preferred pace: {pace}");
    let _ = writeln!(prompt, "- Courses completed: {}", analysis.target_courses);
    if analysis.target_courses > 0 {
        let _ = writeln!(prompt, "- Current GPA: {:.2}", analysis.target_gpa);
    }
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Comparison with similar students:");
    match (analysis.similar_avg_gpa, analysis.comparable_gap()) {
        (Some(average), Some(gap)) => {
            let _ = writeln!(prompt, "- Similar students' average GPA: {average:.2}");
            let _ = writeln!(prompt, "- GPA gap: {gap:.2} points");
        }
        (Some(average), None) => {
            let _ = writeln!(prompt, "- Similar students' average GPA: {average:.2}");
        }
        _ => {
            let _ = writeln!(prompt, "- No comparable peers were found");
        }
    }
    if !analysis.is_flagged(Degeneracy::TargetWithoutCompletions) {
        let _ = writeln!(
            prompt,
            "- Better performers: {}/{}",
            analysis.better_performers_count, analysis.total_similar_count
        );
    }
    let _ = writeln!(prompt);
    let _ = write!(
        prompt,
        "Give 2-3 specific, actionable study recommendations for this {style} learner. \
         Keep the response under 100 words."
    );

    cap_chars(&prompt, max_chars)
}

/// Deterministic insight built from the same figures as the prompt.
pub fn fallback_insight(input: &InsightInput<'_>) -> String {
    let analysis = input.analysis;
    let label = match input.learning_style {
        Some(style) => format!("{style} learners"),
        None => "learners".to_string(),
    };

    let mut text = String::new();
    match analysis.comparable_gap() {
        Some(gap) if gap > 0.0 => {
            let _ = write!(
                text,
                "Similar {label} average {gap:.2} GPA points higher than you across {} peers, so there is room to close the gap. ",
                analysis.total_similar_count
            );
        }
        Some(_) => {
            let _ = write!(
                text,
                "You are performing at or above the {} similar {label} you were compared with. ",
                analysis.total_similar_count
            );
        }
        None => {}
    }

    text.push_str(match input.learning_style {
        Some(LearningStyle::Visual) => {
            "Create visual study aids like diagrams, charts and mind maps, and colour-code your notes."
        }
        Some(LearningStyle::Auditory) => {
            "Form study groups, record lectures and explain concepts aloud to reinforce them."
        }
        Some(LearningStyle::Kinesthetic) => {
            "Use hands-on practice and labs, and take short movement breaks while studying."
        }
        Some(LearningStyle::ReadingWriting) => {
            "Rely on detailed note-taking, written summaries and practice problems."
        }
        None => "Focus on consistent study habits and seek help when you need it.",
    });
    text
}

fn cap_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].trim_end().to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    struct Canned(&'static str);

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            Ok(self.0.to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl TextGenerator for Failing {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            Err(GenerationError::Timeout(Duration::from_secs(10)))
        }
    }

    struct Stalled;

    #[async_trait]
    impl TextGenerator for Stalled {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }
    }

    fn analysis() -> AnalysisResult {
        AnalysisResult {
            target_gpa: 3.2,
            similar_avg_gpa: Some(3.6),
            gpa_gap: Some(0.4),
            better_performers_count: 3,
            total_similar_count: 4,
            target_courses: 5,
            similar_avg_courses: Some(5.5),
            target_avg_difficulty: None,
            similar_avg_difficulty: None,
            flags: Vec::new(),
        }
    }

    fn input(analysis: &AnalysisResult) -> InsightInput<'_> {
        InsightInput {
            learning_style: Some(LearningStyle::Visual),
            pace: Some(Pace::Standard),
            analysis,
        }
    }

    fn composer(generator: impl TextGenerator + 'static) -> InsightComposer {
        InsightComposer::new(Arc::new(generator), Duration::from_secs(10), 1200, 40)
    }

    #[test]
    fn prompt_embeds_style_gap_and_peer_count() {
        let analysis = analysis();
        let prompt = build_prompt(&input(&analysis), 1200);
        assert!(prompt.contains("Visual"));
        assert!(prompt.contains("GPA gap: 0.40"));
        assert!(prompt.contains("3/4"));
        assert!(build_prompt(&input(&analysis), 50).chars().count() <= 50);
    }

    #[tokio::test]
    async fn returns_trimmed_generated_text() {
        let analysis = analysis();
        let text = composer(Canned("  Review lecture slides weekly.  \n"))
            .compose(&input(&analysis))
            .await;
        assert_eq!(text, "Review lecture slides weekly.");
    }

    #[tokio::test]
    async fn caps_long_generated_text() {
        let analysis = analysis();
        let text = composer(Canned("Draw a concept map for every chapter you read this term"))
            .compose(&input(&analysis))
            .await;
        assert!(text.chars().count() <= 40);
        assert!(text.starts_with("Draw a concept map"));
    }

    #[tokio::test]
    async fn failure_falls_back_to_deterministic_sentence() {
        let analysis = analysis();
        let first = composer(Failing).compose(&input(&analysis)).await;
        let second = composer(Failing).compose(&input(&analysis)).await;

        assert!(!first.is_empty());
        assert_eq!(first, second);
        assert_eq!(first, fallback_insight(&input(&analysis)));
        assert!(first.contains("0.40"));
        assert!(!first.to_lowercase().contains("error"));
        assert!(!first.to_lowercase().contains("timed out"));
    }

    #[tokio::test]
    async fn blank_output_is_malformed() {
        let analysis = analysis();
        let composer = composer(Canned("   "));
        let result = composer.try_generate(&input(&analysis)).await;
        assert!(matches!(result, Err(GenerationError::Malformed(_))));
        assert_eq!(
            composer.compose(&input(&analysis)).await,
            fallback_insight(&input(&analysis))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_generation_times_out() {
        let analysis = analysis();
        let result = composer(Stalled).try_generate(&input(&analysis)).await;
        assert!(matches!(result, Err(GenerationError::Timeout(_))));
    }

    #[test]
    fn prompt_skips_peer_ranking_for_target_without_courses() {
        let mut analysis = analysis();
        analysis.target_gpa = 0.0;
        analysis.target_courses = 0;
        analysis.flags = vec![Degeneracy::TargetWithoutCompletions];

        let prompt = build_prompt(&input(&analysis), 1200);
        assert!(!prompt.contains("Better performers"));
        assert!(!prompt.contains("Current GPA"));
        assert!(!prompt.contains("GPA gap"));
        assert!(prompt.contains("- Courses completed: 0"));
    }

    #[test]
    fn fallback_without_peers_still_gives_advice() {
        let mut analysis = analysis();
        analysis.similar_avg_gpa = None;
        analysis.gpa_gap = None;
        analysis.flags = vec![Degeneracy::EmptyPeerSet];
        let text = fallback_insight(&InsightInput {
            learning_style: None,
            pace: None,
            analysis: &analysis,
        });
        assert_eq!(text, "Focus on consistent study habits and seek help when you need it.");
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn ollama_client_reads_response_field() {
        let router = Router::new().route(
            "/api/generate",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["stream"], false);
                Json(serde_json::json!({ "response": "Use flashcards.", "done": true }))
            }),
        );
        let addr = serve(router).await;

        let client =
            OllamaClient::new(&format!("http://{addr}"), "llama2", Duration::from_secs(5)).unwrap();
        assert_eq!(client.generate("hi").await.unwrap(), "Use flashcards.");
    }

    #[tokio::test]
    async fn ollama_client_reports_non_success_status() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "model loading") }),
        );
        let addr = serve(router).await;

        let client =
            OllamaClient::new(&format!("http://{addr}"), "llama2", Duration::from_secs(5)).unwrap();
        let result = client.generate("hi").await;
        assert!(matches!(result, Err(GenerationError::Status(503))));
    }

    #[tokio::test]
    async fn unreachable_service_uses_fallback() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            OllamaClient::new(&format!("http://{addr}"), "llama2", Duration::from_secs(2)).unwrap();
        let analysis = analysis();
        let composer = InsightComposer::new(Arc::new(client), Duration::from_secs(2), 1200, 600);
        assert_eq!(
            composer.compose(&input(&analysis)).await,
            fallback_insight(&input(&analysis))
        );
    }
}
