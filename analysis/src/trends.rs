use crate::text::Tokenizer;
use chrono::{DateTime, Utc};
use pulse_core::{
    AnalysisConfig, ItemReference, ItemsByResource, TrendDirection, TrendRecord,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const TOP_ITEMS_PER_TERM: usize = 5;

#[derive(Debug, Default)]
struct TermStats {
    frequency: u32,
    earliest: u32,
    recent: u32,
    resources: BTreeSet<String>,
    items: Vec<ItemReference>,
}

/// Term occurrences of every term inside each window.
#[derive(Debug, Default, Clone, Copy)]
struct WindowTotals {
    earliest: u32,
    recent: u32,
}

/// Earliest and most recent thirds of the observed time span.
#[derive(Debug, Clone, Copy)]
struct Windows {
    earliest_end: DateTime<Utc>,
    recent_start: DateTime<Utc>,
}

impl Windows {
    /// `None` when every item carries the same timestamp.
    fn from_items(items: &ItemsByResource) -> Option<Self> {
        let mut times = items.values().flatten().map(|item| item.created_at);
        let first = times.next()?;
        let (start, end) = times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));

        let span = end - start;
        if span <= chrono::Duration::zero() {
            return None;
        }

        let third = span / 3;
        Some(Self {
            earliest_end: start + third,
            recent_start: end - third,
        })
    }
}

fn share(count: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Ranks terms by frequency and classifies how each one moved between the
/// earliest and the most recent third of the period.
///
/// A term's share of a window is its occurrences over all term occurrences
/// in that window, so a busier recent window alone does not make a term rise.
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    tokenizer: Tokenizer,
    threshold: f64,
    min_occurrences: u32,
    max_terms: usize,
}

impl TrendAnalyzer {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            tokenizer: Tokenizer::new(),
            threshold: config.trend_threshold,
            min_occurrences: config.min_trend_occurrences,
            max_terms: config.max_terms,
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Trend records ordered by frequency, then term. Empty input gives an
    /// empty result.
    pub fn analyze(&self, items_by_resource: &ItemsByResource) -> Vec<TrendRecord> {
        let windows = Windows::from_items(items_by_resource);
        let mut stats: BTreeMap<String, TermStats> = BTreeMap::new();
        let mut totals = WindowTotals::default();

        for (resource, items) in items_by_resource {
            for item in items {
                let in_earliest = windows.map_or(false, |w| item.created_at <= w.earliest_end);
                let in_recent = windows.map_or(false, |w| item.created_at >= w.recent_start);

                let terms = self.tokenizer.tokenize(&item.text());
                let occurrences = terms.len() as u32;
                if in_earliest {
                    totals.earliest += occurrences;
                }
                if in_recent {
                    totals.recent += occurrences;
                }

                let mut seen_in_item = BTreeSet::new();
                for term in terms {
                    let first_in_item = seen_in_item.insert(term.clone());
                    let entry = stats.entry(term).or_default();
                    entry.frequency += 1;
                    if in_earliest {
                        entry.earliest += 1;
                    }
                    if in_recent {
                        entry.recent += 1;
                    }
                    if first_in_item {
                        entry.resources.insert(resource.clone());
                        entry.items.push(ItemReference::new(resource, item));
                    }
                }
            }
        }

        let mut records: Vec<TrendRecord> = stats
            .into_iter()
            .map(|(term, s)| {
                let earliest_share = share(s.earliest, totals.earliest);
                let recent_share = share(s.recent, totals.recent);
                TrendRecord {
                    direction: self.classify(s.frequency, earliest_share, recent_share),
                    term,
                    frequency: s.frequency,
                    supporting_resources: s.resources,
                    earliest_count: s.earliest,
                    recent_count: s.recent,
                    earliest_share,
                    recent_share,
                    top_items: top_items(s.items),
                }
            })
            .collect();

        records.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.term.cmp(&b.term)));
        records.truncate(self.max_terms);

        debug!(
            "Trend analysis produced {} terms ({} earliest / {} recent occurrences)",
            records.len(),
            totals.earliest,
            totals.recent
        );
        records
    }

    fn classify(&self, frequency: u32, earliest_share: f64, recent_share: f64) -> TrendDirection {
        if frequency == 0 || frequency < self.min_occurrences {
            return TrendDirection::Stable;
        }

        if recent_share > earliest_share * (1.0 + self.threshold) {
            TrendDirection::Rising
        } else if recent_share < earliest_share * (1.0 - self.threshold) {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        }
    }
}

/// Highest engagement first; resource then item id break ties.
fn top_items(mut items: Vec<ItemReference>) -> Vec<ItemReference> {
    items.sort_by(|a, b| {
        b.engagement_score()
            .cmp(&a.engagement_score())
            .then_with(|| a.resource.cmp(&b.resource))
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    items.truncate(TOP_ITEMS_PER_TERM);
    items
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(&AnalysisConfig::default())
    }
}
