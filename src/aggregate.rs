// src/aggregate.rs
//! Aggregator: read-only summary views recomputed from the insight set on
//! every call. Rows come out in a deterministic order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::StoreError;
use crate::insight::{Category, ClassifiedInsight, ContentType};
use crate::store::{InsightFilter, InsightStore};

/// Competitors also detected in snippet / workaround text when the model
/// did not list them.
pub const KNOWN_COMPETITORS: &[&str] = &[
    "woocommerce",
    "bigcommerce",
    "magento",
    "squarespace",
    "wix",
    "gorgias",
    "klaviyo",
    "mailchimp",
    "yotpo",
    "judge.me",
    "shipstation",
    "shippo",
    "easyship",
    "aftership",
    "oberlo",
    "dsers",
    "spocket",
    "printful",
    "quickbooks",
    "xero",
    "stripe",
    "paypal",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateView {
    CategoryContentType,
    WeeklyTrend,
    KeywordFrequency,
    CompetitorMentions,
}

impl AggregateView {
    pub const ALL: [AggregateView; 4] = [
        AggregateView::CategoryContentType,
        AggregateView::WeeklyTrend,
        AggregateView::KeywordFrequency,
        AggregateView::CompetitorMentions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateView::CategoryContentType => "category_content_type",
            AggregateView::WeeklyTrend => "weekly_trend",
            AggregateView::KeywordFrequency => "keyword_frequency",
            AggregateView::CompetitorMentions => "competitor_mentions",
        }
    }
}

impl fmt::Display for AggregateView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('-', "_");
        AggregateView::ALL
            .into_iter()
            .find(|v| v.as_str() == norm)
            .ok_or_else(|| format!("unknown view `{s}`"))
    }
}

/// Column-oriented result, serializable as-is for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub view: AggregateView,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| *c == name)
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn mean(sum: f64, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        round2(sum / n as f64)
    }
}

/// Monday of the ISO week containing `d`.
pub fn week_start(d: NaiveDate) -> NaiveDate {
    d - Duration::days(d.weekday().num_days_from_monday() as i64)
}

pub fn aggregate(
    view: AggregateView,
    insights: &[ClassifiedInsight],
    filter: &InsightFilter,
) -> Table {
    let selected: Vec<&ClassifiedInsight> = insights.iter().filter(|i| filter.matches(i)).collect();
    match view {
        AggregateView::CategoryContentType => category_content_type(&selected),
        AggregateView::WeeklyTrend => weekly_trend(&selected),
        AggregateView::KeywordFrequency => keyword_frequency(&selected),
        AggregateView::CompetitorMentions => competitor_mentions(&selected),
    }
}

pub async fn aggregate_from_store(
    store: &dyn InsightStore,
    view: AggregateView,
    filter: &InsightFilter,
) -> Result<Table, StoreError> {
    let insights = store.list_insights(filter).await?;
    Ok(aggregate(view, &insights, filter))
}

fn category_content_type(items: &[&ClassifiedInsight]) -> Table {
    #[derive(Default)]
    struct Acc {
        n: usize,
        frustration: f64,
        urgency: f64,
        wtp: usize,
    }
    let mut groups: BTreeMap<(Category, ContentType), Acc> = BTreeMap::new();
    for i in items {
        let a = groups.entry((i.category, i.content_type)).or_default();
        a.n += 1;
        a.frustration += i.frustration_level as f64;
        a.urgency += i.urgency_score as f64;
        if i.willingness_to_pay {
            a.wtp += 1;
        }
    }
    let rows = groups
        .into_iter()
        .map(|((c, t), a)| {
            vec![
                json!(c.as_str()),
                json!(t.as_str()),
                json!(a.n),
                json!(mean(a.frustration, a.n)),
                json!(mean(a.urgency, a.n)),
                json!(mean(a.wtp as f64, a.n)),
            ]
        })
        .collect();
    Table {
        view: AggregateView::CategoryContentType,
        columns: vec![
            "category",
            "content_type",
            "count",
            "mean_frustration",
            "mean_urgency",
            "wtp_rate",
        ],
        rows,
    }
}

fn weekly_trend(items: &[&ClassifiedInsight]) -> Table {
    let mut groups: BTreeMap<(NaiveDate, Category), usize> = BTreeMap::new();
    for i in items {
        let week = week_start(i.source_created_at.date_naive());
        *groups.entry((week, i.category)).or_insert(0) += 1;
    }
    let rows = groups
        .into_iter()
        .map(|((week, c), n)| {
            vec![
                json!(week.format("%Y-%m-%d").to_string()),
                json!(c.as_str()),
                json!(n),
            ]
        })
        .collect();
    Table {
        view: AggregateView::WeeklyTrend,
        columns: vec!["week_start", "category", "count"],
        rows,
    }
}

fn keyword_frequency(items: &[&ClassifiedInsight]) -> Table {
    let mut groups: BTreeMap<Category, BTreeMap<&str, usize>> = BTreeMap::new();
    for i in items {
        let counts = groups.entry(i.category).or_default();
        for k in &i.keywords {
            *counts.entry(k.as_str()).or_insert(0) += 1;
        }
    }
    let mut rows = Vec::new();
    for (c, counts) in groups {
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        for (k, n) in ranked {
            rows.push(vec![json!(c.as_str()), json!(k), json!(n)]);
        }
    }
    Table {
        view: AggregateView::KeywordFrequency,
        columns: vec!["category", "keyword", "count"],
        rows,
    }
}

/// Competitors an insight mentions: model-extracted names plus known names
/// found in the snippet or workaround text.
fn competitors_of(i: &ClassifiedInsight) -> BTreeSet<String> {
    let mut out = i.competitor_mentions.clone();
    let text = format!(
        "{} {}",
        i.content_snippet,
        i.current_workaround.as_deref().unwrap_or("")
    )
    .to_lowercase();
    for c in KNOWN_COMPETITORS {
        if text.contains(c) {
            out.insert((*c).to_string());
        }
    }
    out
}

fn competitor_mentions(items: &[&ClassifiedInsight]) -> Table {
    let mut groups: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for i in items {
        for c in competitors_of(i) {
            let e = groups.entry(c).or_insert((0, 0.0));
            e.0 += 1;
            e.1 += i.frustration_level as f64;
        }
    }
    let mut ranked: Vec<(String, usize, f64)> = groups
        .into_iter()
        .map(|(c, (n, f))| (c, n, mean(f, n)))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let rows = ranked
        .into_iter()
        .map(|(c, n, f)| vec![json!(c), json!(n), json!(f)])
        .collect();
    Table {
        view: AggregateView::CompetitorMentions,
        columns: vec!["competitor", "mentions", "mean_frustration"],
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::insight;
    use chrono::{TimeZone, Utc};

    #[test]
    fn view_names_parse() {
        assert_eq!(
            "weekly-trend".parse::<AggregateView>().unwrap(),
            AggregateView::WeeklyTrend
        );
        assert!("pie_chart".parse::<AggregateView>().is_err());
    }

    #[test]
    fn category_content_type_means() {
        let mut a = insight("a", Category::Payments);
        a.frustration_level = 5;
        a.willingness_to_pay = true;
        let mut b = insight("b", Category::Payments);
        b.frustration_level = 2;
        let c = insight("c", Category::Seo);

        let t = aggregate(AggregateView::CategoryContentType, &[a, b, c], &InsightFilter::default());
        assert_eq!(t.rows.len(), 2);
        let first = &t.rows[0];
        assert_eq!(first[0], json!("payments"));
        assert_eq!(first[2], json!(2));
        assert_eq!(first[3], json!(3.5));
        assert_eq!(first[5], json!(0.5));
    }

    #[test]
    fn weekly_buckets_start_on_monday() {
        let mut a = insight("a", Category::Inventory);
        // Sunday 2024-03-10 belongs to the week of Monday 2024-03-04.
        a.source_created_at = Utc.with_ymd_and_hms(2024, 3, 10, 23, 0, 0).unwrap();
        let mut b = insight("b", Category::Inventory);
        b.source_created_at = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        let mut c = insight("c", Category::Inventory);
        c.source_created_at = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap();

        let t = aggregate(AggregateView::WeeklyTrend, &[a, b, c], &InsightFilter::default());
        assert_eq!(
            t.rows,
            vec![
                vec![json!("2024-03-04"), json!("inventory"), json!(2)],
                vec![json!("2024-03-11"), json!("inventory"), json!(1)],
            ]
        );
    }

    #[test]
    fn keywords_sorted_by_count_within_category() {
        let a = insight("a", Category::Payments);
        let mut b = insight("b", Category::Payments);
        b.keywords = ["refund", "payout", "delay"].iter().map(|s| s.to_string()).collect();
        let t = aggregate(AggregateView::KeywordFrequency, &[a, b], &InsightFilter::default());
        assert_eq!(t.rows[0], vec![json!("payments"), json!("refund"), json!(2)]);
        assert_eq!(t.rows.len(), 5);
    }

    #[test]
    fn competitors_merge_extracted_and_detected() {
        let mut a = insight("a", Category::Payments);
        a.competitor_mentions.insert("stripe".into());
        a.frustration_level = 5;
        let mut b = insight("b", Category::Payments);
        b.current_workaround = Some("Moved refunds to Stripe and PayPal".into());
        b.frustration_level = 3;

        let t = aggregate(AggregateView::CompetitorMentions, &[a, b], &InsightFilter::default());
        assert_eq!(t.rows[0], vec![json!("stripe"), json!(2), json!(4.0)]);
        assert_eq!(t.rows[1], vec![json!("paypal"), json!(1), json!(3.0)]);
    }

    #[test]
    fn filter_applies_before_grouping() {
        let a = insight("a", Category::Payments);
        let b = insight("b", Category::Seo);
        let f = InsightFilter {
            category: Some(Category::Seo),
            ..InsightFilter::default()
        };
        let t = aggregate(AggregateView::CategoryContentType, &[a, b], &f);
        assert_eq!(t.rows.len(), 1);
        assert_eq!(t.rows[0][0], json!("seo"));
    }
}
