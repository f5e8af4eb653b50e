//! Semantic intent router.
//!
//! Each route is described by example utterances. Their embeddings are
//! computed once when the router is built; classifying a message embeds it
//! and compares it against every cached utterance with cosine similarity.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use parley_core::config::{RouteConfig, ScoreAggregation};
use parley_vector::embedding::DynEmbeddingService;
use parley_vector::similarity::cosine_similarity;

use crate::error::ChatError;
use crate::types::{ClassificationResult, RouteScore};

#[derive(Debug)]
struct CompiledRoute {
    name: String,
    threshold: f32,
    utterances: Vec<Vec<f32>>,
}

/// Classifies messages into one of a fixed, ordered set of routes.
///
/// Routes and their cached embeddings are immutable after [`IntentRouter::build`],
/// so a router can be shared behind an `Arc` and used concurrently.
pub struct IntentRouter {
    routes: Vec<CompiledRoute>,
    embedder: Arc<dyn DynEmbeddingService>,
    aggregation: ScoreAggregation,
}

impl std::fmt::Debug for IntentRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentRouter")
            .field("routes", &self.route_names())
            .field("aggregation", &self.aggregation)
            .finish()
    }
}

impl IntentRouter {
    /// Validate the route set and embed every utterance.
    pub async fn build(
        routes: &[RouteConfig],
        embedder: Arc<dyn DynEmbeddingService>,
        aggregation: ScoreAggregation,
    ) -> Result<Self, ChatError> {
        validate_routes(routes)?;

        let mut compiled = Vec::with_capacity(routes.len());
        for route in routes {
            let mut utterances = Vec::with_capacity(route.utterances.len());
            for utterance in &route.utterances {
                let embedding = embedder.embed_boxed(utterance).await.map_err(|e| {
                    ChatError::Config(format!(
                        "failed to embed utterance {:?} of route '{}': {}",
                        utterance, route.name, e
                    ))
                })?;
                utterances.push(embedding);
            }
            compiled.push(CompiledRoute {
                name: route.name.clone(),
                threshold: route.threshold,
                utterances,
            });
        }

        info!(
            routes = compiled.len(),
            utterances = compiled.iter().map(|r| r.utterances.len()).sum::<usize>(),
            ?aggregation,
            "Intent router ready"
        );

        Ok(Self {
            routes: compiled,
            embedder,
            aggregation,
        })
    }

    /// Route names in declaration order.
    pub fn route_names(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.name.clone()).collect()
    }

    pub fn aggregation(&self) -> ScoreAggregation {
        self.aggregation
    }

    /// Score the message against every route, in declaration order.
    pub async fn scores(&self, message: &str) -> Result<Vec<RouteScore>, ChatError> {
        let query = self
            .embedder
            .embed_boxed(message)
            .await
            .map_err(|e| ChatError::Classification(e.to_string()))?;

        Ok(self
            .routes
            .iter()
            .map(|route| {
                let score = self.aggregate(&query, &route.utterances);
                RouteScore {
                    route: route.name.clone(),
                    score,
                    threshold: route.threshold,
                    // Compared at threshold precision so a score equal to
                    // the configured value qualifies.
                    qualifies: score as f32 >= route.threshold,
                }
            })
            .collect())
    }

    /// Pick the best qualifying route, or report the best score when none qualifies.
    pub async fn classify(&self, message: &str) -> Result<ClassificationResult, ChatError> {
        let scores = self.scores(message).await?;
        Ok(pick_route(&scores))
    }

    fn aggregate(&self, query: &[f32], utterances: &[Vec<f32>]) -> f64 {
        let sims = utterances.iter().map(|u| cosine_similarity(query, u));
        match self.aggregation {
            ScoreAggregation::Max => sims.fold(f64::NEG_INFINITY, f64::max),
            ScoreAggregation::Mean => {
                let (sum, n) = sims.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                if n == 0 {
                    0.0
                } else {
                    sum / n as f64
                }
            }
        }
    }
}

/// Choose a route from already computed scores.
///
/// Exact ties go to the route declared first.
pub fn pick_route(scores: &[RouteScore]) -> ClassificationResult {
    let mut best: Option<&RouteScore> = None;
    let mut best_qualifying: Option<&RouteScore> = None;
    for score in scores {
        if best.is_none_or(|b| score.score > b.score) {
            best = Some(score);
        }
        if score.qualifies && best_qualifying.is_none_or(|b| score.score > b.score) {
            best_qualifying = Some(score);
        }
    }

    let result = match best_qualifying {
        Some(hit) => ClassificationResult::matched(hit.route.clone(), hit.score),
        None => ClassificationResult::unmatched(best.map(|b| b.score).unwrap_or(0.0)),
    };
    debug!(route = result.label(), score = result.score, "Message classified");
    result
}

/// Check names are unique, utterance sets are non-empty, and thresholds lie in [0, 1].
pub fn validate_routes(routes: &[RouteConfig]) -> Result<(), ChatError> {
    if routes.is_empty() {
        return Err(ChatError::Config("at least one route is required".to_string()));
    }
    let mut seen = HashSet::new();
    for route in routes {
        if route.name.trim().is_empty() {
            return Err(ChatError::Config("route name cannot be empty".to_string()));
        }
        if !seen.insert(route.name.as_str()) {
            return Err(ChatError::Config(format!("duplicate route '{}'", route.name)));
        }
        if route.utterances.is_empty() {
            return Err(ChatError::Config(format!(
                "route '{}' has no utterances",
                route.name
            )));
        }
        if route.utterances.iter().any(|u| u.trim().is_empty()) {
            return Err(ChatError::Config(format!(
                "route '{}' has a blank utterance",
                route.name
            )));
        }
        if !(0.0..=1.0).contains(&route.threshold) {
            return Err(ChatError::Config(format!(
                "route '{}' threshold {} is outside [0, 1]",
                route.name, route.threshold
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::config::default_routes;
    use parley_vector::embedding::{LexicalEmbedding, MockEmbedding};

    fn lexical_for(routes: &[RouteConfig]) -> Arc<dyn DynEmbeddingService> {
        Arc::new(LexicalEmbedding::fit(
            routes.iter().flat_map(|r| r.utterances.iter()),
        ))
    }

    async fn default_router() -> IntentRouter {
        let routes = default_routes();
        IntentRouter::build(&routes, lexical_for(&routes), ScoreAggregation::Max)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_greeting_routes_to_small_talk() {
        let router = default_router().await;
        let result = router.classify("Hello").await.unwrap();
        assert_eq!(result.route.as_deref(), Some("small_talk"));
        assert!((result.score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_brand_question_routes_to_sql() {
        let router = default_router().await;
        let result = router
            .classify("Are there any Puma shoes on sale?")
            .await
            .unwrap();
        assert_eq!(result.route.as_deref(), Some("sql"));
    }

    #[tokio::test]
    async fn test_policy_question_routes_to_faq() {
        let router = default_router().await;
        let result = router.classify("What's your return policy?").await.unwrap();
        assert_eq!(result.route.as_deref(), Some("faq"));
        let result = router.classify("track my order").await.unwrap();
        assert_eq!(result.route.as_deref(), Some("faq"));
    }

    #[tokio::test]
    async fn test_gibberish_is_unmatched_with_best_score() {
        let router = default_router().await;
        let result = router.classify("asdkjfh qwer").await.unwrap();
        assert!(!result.is_matched());
        assert_eq!(result.label(), "unmatched");
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn test_empty_message_is_classification_error() {
        let router = default_router().await;
        let err = router.classify("   ").await.unwrap_err();
        assert!(matches!(err, ChatError::Classification(_)));
    }

    #[tokio::test]
    async fn test_exact_tie_goes_to_first_declared_route() {
        let routes = vec![
            RouteConfig::new("first", &["order status"], 0.1),
            RouteConfig::new("second", &["order status"], 0.1),
        ];
        let router = IntentRouter::build(&routes, lexical_for(&routes), ScoreAggregation::Max)
            .await
            .unwrap();
        let result = router.classify("order status").await.unwrap();
        assert_eq!(result.route.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_thresholds_are_per_route() {
        // "hi" scores 1/sqrt(2) against both routes; only the route with
        // the lower threshold accepts it.
        let routes = vec![
            RouteConfig::new("strict", &["hi friend"], 0.9),
            RouteConfig::new("lenient", &["hi pal"], 0.5),
        ];
        let router = IntentRouter::build(&routes, lexical_for(&routes), ScoreAggregation::Max)
            .await
            .unwrap();
        let result = router.classify("hi").await.unwrap();
        assert_eq!(result.route.as_deref(), Some("lenient"));
    }

    #[tokio::test]
    async fn test_score_equal_to_threshold_qualifies() {
        let exact = vec![RouteConfig::new("exact", &["alpha"], 1.0)];
        let router = IntentRouter::build(&exact, lexical_for(&exact), ScoreAggregation::Max)
            .await
            .unwrap();
        assert!(router.classify("alpha").await.unwrap().is_matched());
    }

    #[tokio::test]
    async fn test_mean_aggregation_dilutes_single_match() {
        let routes = vec![RouteConfig::new(
            "greeting",
            &["hello", "good morning", "good evening"],
            0.5,
        )];
        let embedder = lexical_for(&routes);
        let max = IntentRouter::build(&routes, embedder.clone(), ScoreAggregation::Max)
            .await
            .unwrap();
        let mean = IntentRouter::build(&routes, embedder, ScoreAggregation::Mean)
            .await
            .unwrap();

        let max_result = max.classify("hello").await.unwrap();
        let mean_result = mean.classify("hello").await.unwrap();
        assert!((max_result.score - 1.0).abs() < 1e-6);
        assert!((mean_result.score - 1.0 / 3.0).abs() < 1e-6);
        assert!(max_result.is_matched());
        assert!(!mean_result.is_matched());
    }

    #[tokio::test]
    async fn test_scores_cover_every_route_in_order() {
        let router = default_router().await;
        let scores = router.scores("Hello").await.unwrap();
        let names: Vec<&str> = scores.iter().map(|s| s.route.as_str()).collect();
        assert_eq!(names, vec!["faq", "sql", "small_talk"]);
        assert!(scores[2].qualifies);
        assert_eq!(scores[0].threshold, 0.2);
    }

    #[tokio::test]
    async fn test_pick_route_agrees_with_classify() {
        let router = default_router().await;
        for message in ["Hello", "Do you sell Nike shoes?", "What is the return policy?", "zzqx"] {
            let scores = router.scores(message).await.unwrap();
            assert_eq!(pick_route(&scores), router.classify(message).await.unwrap());
        }
    }

    #[test]
    fn test_pick_route_on_empty_and_tied_scores() {
        assert_eq!(pick_route(&[]), ClassificationResult::unmatched(0.0));

        let tied = |route: &str| RouteScore {
            route: route.to_string(),
            score: 0.6,
            threshold: 0.5,
            qualifies: true,
        };
        let result = pick_route(&[tied("first"), tied("second")]);
        assert_eq!(result.route.as_deref(), Some("first"));

        let below = RouteScore { qualifies: false, score: 0.3, ..tied("faq") };
        assert_eq!(pick_route(&[below]), ClassificationResult::unmatched(0.3));
    }

    #[tokio::test]
    async fn test_route_names_in_declaration_order() {
        let router = default_router().await;
        assert_eq!(router.route_names(), vec!["faq", "sql", "small_talk"]);
    }

    #[tokio::test]
    async fn test_qualifying_route_always_wins_over_unmatched() {
        let routes = default_routes();
        let router = default_router().await;
        for route in &routes {
            for utterance in &route.utterances {
                let result = router.classify(utterance).await.unwrap();
                assert!(result.is_matched(), "{:?} was unmatched", utterance);
            }
        }
    }

    #[tokio::test]
    async fn test_mock_embedder_builds() {
        let routes = default_routes();
        let router = IntentRouter::build(&routes, Arc::new(MockEmbedding::new()), ScoreAggregation::Max)
            .await
            .unwrap();
        // Utterances embed to themselves, so each scores 1.0 against its route.
        let result = router.classify("Good morning").await.unwrap();
        assert_eq!(result.route.as_deref(), Some("small_talk"));
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let dup = vec![
            RouteConfig::new("faq", &["a question"], 0.2),
            RouteConfig::new("faq", &["another"], 0.2),
        ];
        assert!(matches!(validate_routes(&dup), Err(ChatError::Config(m)) if m.contains("duplicate")));

        let empty = vec![RouteConfig::new("faq", &[], 0.2)];
        assert!(validate_routes(&empty).is_err());

        let blank = vec![RouteConfig::new("faq", &["  "], 0.2)];
        assert!(validate_routes(&blank).is_err());

        let high = vec![RouteConfig::new("faq", &["q"], 1.5)];
        assert!(validate_routes(&high).is_err());

        let nan = vec![RouteConfig::new("faq", &["q"], f32::NAN)];
        assert!(validate_routes(&nan).is_err());

        assert!(validate_routes(&[]).is_err());
        assert!(validate_routes(&default_routes()).is_ok());
    }
}
