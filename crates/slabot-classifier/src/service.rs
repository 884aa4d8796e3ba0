//! The classification cascade: cache → AI (behind the breaker) → keyword.

use std::time::Instant;

use tracing::{debug, warn};

use slabot_core::metrics::{
    CACHE_HITS, CACHE_MISSES, CLASSIFIER_ERRORS, CLASSIFIER_LATENCY_SECONDS, CLASSIFIER_REQUESTS,
};
use slabot_core::types::Category;

use crate::ai::AiClassifier;
use crate::breaker::CircuitBreaker;
use crate::cache::{ClassificationCache, MODEL_CACHE};
use crate::keyword::{classify_keywords, normalize, MODEL_KEYWORD};
use crate::types::Classification;

/// Cascade thresholds, read from `GlobalSettings` by the caller on each
/// classification so admin edits apply without a restart.
#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub ai_confidence_threshold: f64,
    pub keyword_confidence_threshold: f64,
    pub cache_ttl_minutes: i64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            ai_confidence_threshold: 0.7,
            keyword_confidence_threshold: 0.5,
            cache_ttl_minutes: 24 * 60,
        }
    }
}

pub struct ClassifierService {
    cache: ClassificationCache,
    ai: Option<AiClassifier>,
    breaker: CircuitBreaker,
}

impl ClassifierService {
    pub fn new(cache: ClassificationCache, ai: Option<AiClassifier>) -> Self {
        Self {
            cache,
            ai,
            breaker: CircuitBreaker::default(),
        }
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Classify one message. Never fails: the keyword step is a total
    /// fallback, and cache write errors only cost the next lookup.
    pub async fn classify(&self, text: &str, settings: &ClassifierSettings) -> Classification {
        let normalized = normalize(text);
        let key = ClassificationCache::key(&normalized);

        // 1. Cache.
        match self.cache.get(&key) {
            Ok(Some(hit)) => {
                CACHE_HITS.inc();
                CLASSIFIER_REQUESTS
                    .with_label_values(&[MODEL_CACHE, &hit.category.to_string()])
                    .inc();
                return hit;
            }
            Ok(None) => CACHE_MISSES.inc(),
            Err(e) => warn!("classification cache read failed: {e}"),
        }

        // 2. AI, if configured and admitted by the breaker. A sub-threshold
        //    verdict is kept aside for conflict resolution against the
        //    keyword step.
        let mut low_confidence_ai: Option<Classification> = None;
        if let Some(ai) = &self.ai {
            if self.breaker.can_request() {
                let started = Instant::now();
                match ai.classify(text).await {
                    Ok(verdict) => {
                        self.breaker.record_success();
                        CLASSIFIER_LATENCY_SECONDS
                            .with_label_values(&[ai.model()])
                            .observe(started.elapsed().as_secs_f64());
                        CLASSIFIER_REQUESTS
                            .with_label_values(&[ai.model(), &verdict.category.to_string()])
                            .inc();
                        if verdict.confidence >= settings.ai_confidence_threshold {
                            self.store(&key, &verdict, settings);
                            return verdict;
                        }
                        debug!(
                            confidence = verdict.confidence,
                            threshold = settings.ai_confidence_threshold,
                            "AI verdict below threshold"
                        );
                        low_confidence_ai = Some(verdict);
                    }
                    Err(e) => {
                        self.breaker.record_failure();
                        CLASSIFIER_ERRORS
                            .with_label_values(&[ai.model(), e.kind()])
                            .inc();
                        warn!(kind = e.kind(), "AI classification failed: {e}");
                    }
                }
            } else {
                debug!("circuit breaker open; skipping AI step");
            }
        }

        // 3. Keyword fallback.
        let keyword = classify_keywords(&normalized);
        CLASSIFIER_REQUESTS
            .with_label_values(&[MODEL_KEYWORD, &keyword.category.to_string()])
            .inc();

        // 4. Conflict resolution: a sub-threshold AI verdict survives only
        //    when the keyword verdict is not more confident.
        let mut result = match low_confidence_ai {
            Some(ai_verdict) if keyword.confidence > ai_verdict.confidence => keyword,
            Some(ai_verdict) => annotate_low_confidence(ai_verdict),
            None => keyword,
        };

        // Safety bias: a weak keyword verdict is promoted to REQUEST.
        // Better to track a non-request than to drop a real one.
        if result.model == MODEL_KEYWORD
            && result.confidence < settings.keyword_confidence_threshold
        {
            result = Classification::new(
                Category::Request,
                settings.keyword_confidence_threshold,
                MODEL_KEYWORD,
            )
            .with_reasoning("low-confidence fallback promoted to REQUEST");
        }

        self.store(&key, &result, settings);
        result
    }

    fn store(&self, key: &str, classification: &Classification, settings: &ClassifierSettings) {
        if let Err(e) = self
            .cache
            .put(key, classification, settings.cache_ttl_minutes)
        {
            warn!("classification cache write failed: {e}");
        }
    }
}

fn annotate_low_confidence(mut verdict: Classification) -> Classification {
    let note = "low-confidence AI verdict";
    verdict.reasoning = Some(match verdict.reasoning.take() {
        Some(r) => format!("{note}: {r}"),
        None => note.to_string(),
    });
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ClassifierService {
        ClassifierService::new(ClassificationCache::open_in_memory().unwrap(), None)
    }

    #[tokio::test]
    async fn cache_round_trip() {
        // The second call for identical text is a cache hit with the
        // same category and confidence.
        let svc = service();
        let settings = ClassifierSettings::default();

        let first = svc.classify("Где мой счёт?", &settings).await;
        assert_eq!(first.model, MODEL_KEYWORD);

        let second = svc.classify("Где мой счёт?", &settings).await;
        assert_eq!(second.model, MODEL_CACHE);
        assert_eq!(second.category, first.category);
        assert!((second.confidence - first.confidence).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn reformatted_text_shares_a_cache_entry() {
        let svc = service();
        let settings = ClassifierSettings::default();
        svc.classify("нужна   справка?", &settings).await;
        let hit = svc.classify("НУЖНА СПРАВКА?", &settings).await;
        assert_eq!(hit.model, MODEL_CACHE);
    }

    #[tokio::test]
    async fn weak_keyword_verdict_is_promoted_to_request() {
        let svc = service();
        let settings = ClassifierSettings::default();
        // No pattern matches: keyword says CLARIFICATION 0.3, which is
        // below the 0.5 keyword threshold.
        let c = svc.classify("трава зеленая", &settings).await;
        assert_eq!(c.category, Category::Request);
        assert!((c.confidence - settings.keyword_confidence_threshold).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn confident_keyword_verdict_is_kept() {
        let svc = service();
        let settings = ClassifierSettings::default();
        let c = svc.classify("Спасибо большое!", &settings).await;
        assert_eq!(c.category, Category::Gratitude);
    }

    #[tokio::test]
    async fn open_breaker_skips_ai_and_still_classifies() {
        // With the breaker open the cascade falls through to keywords
        // without touching the (unconfigured) AI step.
        let svc = service();
        for _ in 0..5 {
            svc.breaker().record_failure();
        }
        let c = svc
            .classify("Когда будет готов отчет?", &ClassifierSettings::default())
            .await;
        assert_eq!(c.category, Category::Request);
        assert_eq!(c.model, MODEL_KEYWORD);
    }
}
