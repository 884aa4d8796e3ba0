//! Deterministic keyword fallback.
//!
//! Patterns are tagged with a category and a priority; the highest
//! priority matching pattern wins and declaration order breaks ties.
//! REQUEST sits above SPAM/GRATITUDE so an ambiguous message is tracked
//! rather than dropped.

use once_cell::sync::Lazy;
use regex::Regex;

use slabot_core::types::Category;

use crate::types::Classification;

pub const MODEL_KEYWORD: &str = "keyword";

struct KeywordRule {
    pattern: Regex,
    category: Category,
    priority: u8,
    confidence: f64,
}

fn rule(pattern: &str, category: Category, priority: u8, confidence: f64) -> KeywordRule {
    KeywordRule {
        pattern: Regex::new(pattern).expect("keyword pattern must compile"),
        category,
        priority,
        confidence,
    }
}

static RULES: Lazy<Vec<KeywordRule>> = Lazy::new(|| {
    use Category::*;
    vec![
        // REQUEST — priority 3.
        rule(r"\?", Request, 3, 0.85),
        rule(r"сч[её]т", Request, 3, 0.8),
        rule(r"справк", Request, 3, 0.8),
        rule(r"(оплат|плат[её]ж)", Request, 3, 0.8),
        rule(r"налог", Request, 3, 0.8),
        rule(r"(отч[её]т|деклараци)", Request, 3, 0.8),
        rule(r"(договор|акт\s+сверки)", Request, 3, 0.75),
        rule(r"(нужн|надо|требуетс)", Request, 3, 0.75),
        rule(r"(когда|почему|сколько|можно ли)", Request, 3, 0.75),
        rule(r"(срочно|помогите)", Request, 3, 0.8),
        rule(r"(вышлите|пришлите|отправьте|подготовьте)", Request, 3, 0.8),
        // SPAM — priority 2.
        rule(r"https?://", Spam, 2, 0.7),
        rule(r"(подписывайтесь|подпишись)", Spam, 2, 0.75),
        rule(r"(реклама|промокод|скидк)", Spam, 2, 0.7),
        rule(r"(казино|ставк[иа]|криптовалют)", Spam, 2, 0.75),
        rule(r"заработ(ок|ай|ать)", Spam, 2, 0.7),
        // GRATITUDE — priority 2.
        rule(r"спасибо", Gratitude, 2, 0.75),
        rule(r"благодар", Gratitude, 2, 0.75),
        rule(r"(отлично|супер|здорово)", Gratitude, 2, 0.65),
        rule(r"👍", Gratitude, 2, 0.7),
        // CLARIFICATION — priority 1.
        rule(r"^(ок|ok|хорошо|понятно|ясно|угу|ага)\b", Clarification, 1, 0.6),
        rule(r"^(принял|принято|получил|получено)\b", Clarification, 1, 0.6),
        rule(r"^(добрый день|доброе утро|здравствуйте|привет)[.!\s]*$", Clarification, 1, 0.6),
    ]
});

/// Lowercase + collapse runs of whitespace. Applied before any matching
/// and before cache hashing so trivially reformatted text shares a key.
pub fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Evaluate the rule set against already-normalized text.
pub fn classify_keywords(normalized: &str) -> Classification {
    let mut best: Option<&KeywordRule> = None;
    for rule in RULES.iter() {
        if rule.pattern.is_match(normalized) {
            // Strictly-greater keeps the first declared rule on ties.
            if best.map_or(true, |b| rule.priority > b.priority) {
                best = Some(rule);
            }
        }
    }

    match best {
        Some(rule) => Classification::new(rule.category, rule.confidence, MODEL_KEYWORD),
        None => Classification::new(Category::Clarification, 0.3, MODEL_KEYWORD)
            .with_reasoning("no patterns matched"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Classification {
        classify_keywords(&normalize(text))
    }

    #[test]
    fn question_is_a_request() {
        let c = classify("Где мой счёт?");
        assert_eq!(c.category, Category::Request);
        assert_eq!(c.model, MODEL_KEYWORD);
    }

    #[test]
    fn request_priority_beats_spam() {
        // Matches both a SPAM pattern (link) and a REQUEST pattern (?).
        let c = classify("посмотрите https://example.com — когда будет счет?");
        assert_eq!(c.category, Category::Request);
    }

    #[test]
    fn equal_priority_first_declared_wins() {
        // Both SPAM (link) and GRATITUDE (спасибо) sit at priority 2;
        // the link rule is declared first.
        let c = classify("спасибо, вот ссылка https://example.com");
        assert_eq!(c.category, Category::Spam);
    }

    #[test]
    fn gratitude_without_question() {
        let c = classify("Спасибо большое!");
        assert_eq!(c.category, Category::Gratitude);
    }

    #[test]
    fn short_ack_is_clarification() {
        let c = classify("ок, понятно");
        assert_eq!(c.category, Category::Clarification);
    }

    #[test]
    fn no_match_falls_back_to_clarification() {
        let c = classify("трава зеленая");
        assert_eq!(c.category, Category::Clarification);
        assert!((c.confidence - 0.3).abs() < f64::EPSILON);
        assert_eq!(c.reasoning.as_deref(), Some("no patterns matched"));
    }

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize("  НУЖНА \n\t справка  "), "нужна справка");
    }

    #[test]
    fn normalization_makes_matching_case_insensitive() {
        let c = classify("СРОЧНО НУЖЕН ОТЧЕТ");
        assert_eq!(c.category, Category::Request);
    }
}
