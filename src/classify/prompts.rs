//! Prompt templates. Both stages see a bounded prefix of the record so the
//! cost of a call is bounded regardless of post length.

use crate::insight::{Category, ContentType};
use crate::prefilter::normalize_text;
use crate::record::RawRecord;

/// Take at most `max` chars, never splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn category_list() -> String {
    Category::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn content_type_list() -> String {
    ContentType::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn title_of(record: &RawRecord) -> String {
    record
        .title
        .as_deref()
        .map(normalize_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "No title".to_string())
}

/// Cheap relevance/content-type estimate over title + a short content window.
pub fn screening_prompt(record: &RawRecord, window_chars: usize) -> String {
    let body = normalize_text(&record.body);
    let content = truncate_chars(&body, window_chars);
    format!(
        r#"You screen merchant feedback for product research. Decide whether this content describes a real problem, need, or frustration a merchant has with running their store.

<content>
Title: {title}
Source: {source}
Content: {content}
</content>

Respond with ONLY valid JSON, no other text:
{{"relevant": true/false, "content_type": one of [{types}], "confidence": number between 0 and 1}}"#,
        title = title_of(record),
        source = record.source,
        content = content,
        types = content_type_list(),
    )
}

/// Full structured extraction over a larger content window.
pub fn deep_prompt(
    record: &RawRecord,
    content_type_hint: Option<ContentType>,
    window_chars: usize,
) -> String {
    let body = normalize_text(&record.body);
    let content = truncate_chars(&body, window_chars);
    let hint = content_type_hint
        .map(|h| format!("\nScreening suggested this is a `{h}`.\n"))
        .unwrap_or_default();
    format!(
        r#"Analyze this merchant feedback and extract structured insights.

<content>
Title: {title}
Source: {source}
Content: {content}
</content>
{hint}
Extract the following information in JSON format:

1. problem_statement: A concise 1-2 sentence description of the core problem or need
2. category: Primary category from: {categories}
3. secondary_categories: List of other relevant categories (can be empty)
4. content_type: One of: {types}
5. frustration_level: 1-5 scale (1=mild annoyance, 5=severe frustration)
6. clarity_score: 1-5 scale of how clearly the problem is described
7. urgency_score: 1-5 scale of how urgently the merchant needs a fix
8. willingness_to_pay: true/false - does this indicate they'd pay for a solution?
9. wtp_quotes: Any quotes that suggest willingness to pay (empty list if none)
10. price_sensitivity: "low", "medium", "high" or null if unknown
11. current_workaround: Any workaround they mention using (null if none)
12. competitor_mentions: Names of competing platforms or apps mentioned (empty list if none)
13. keywords: 3-5 key terms for clustering similar problems

Respond with ONLY valid JSON, no other text."#,
        title = title_of(record),
        source = record.source,
        content = content,
        hint = hint,
        categories = category_list(),
        types = content_type_list(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rec(body: &str) -> RawRecord {
        RawRecord {
            id: "r".into(),
            source: "reddit".into(),
            title: Some("Checkout woes".into()),
            body: body.into(),
            author: None,
            url: None,
            created_at: Utc::now(),
            engagement: Default::default(),
            fetched_at: Utc::now(),
            processed: false,
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("žluťoučký", 3), "žlu");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn screening_window_bounds_content() {
        let body = "x".repeat(5_000);
        let p = screening_prompt(&rec(&body), 500);
        assert!(p.contains(&"x".repeat(500)));
        assert!(!p.contains(&"x".repeat(501)));
        assert!(p.contains("Checkout woes"));
    }

    #[test]
    fn deep_prompt_carries_hint_and_taxonomy() {
        let p = deep_prompt(&rec("body"), Some(ContentType::FeatureRequest), 2000);
        assert!(p.contains("Screening suggested this is a `feature_request`"));
        assert!(p.contains("customer_support"));
        let p2 = deep_prompt(&rec("body"), None, 2000);
        assert!(!p2.contains("Screening suggested"));
    }
}
