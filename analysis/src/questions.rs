use crate::text::{is_question, normalize_question, split_sentences, token_set_ratio};
use pulse_core::{AnalysisConfig, AverageEngagement, ItemsByResource, QuestionRecord};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Output of a question pass, with the number of items that had nothing to read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionExtraction {
    pub records: Vec<QuestionRecord>,
    pub skipped_items: usize,
}

/// Every occurrence of one exact normalized question.
#[derive(Debug)]
struct Variant {
    count: u32,
    example_resource: String,
    example_item_id: String,
    resources: BTreeSet<String>,
    tokens: BTreeSet<String>,
    upvotes: u64,
    comments: u64,
}

#[derive(Debug)]
struct Group {
    seed_tokens: BTreeSet<String>,
    upvotes: u64,
    comments: u64,
    record: QuestionRecord,
}

impl Group {
    fn finish(mut self) -> QuestionRecord {
        let occurrences = f64::from(self.record.frequency.max(1));
        self.record.avg_engagement = AverageEngagement {
            avg_upvotes: self.upvotes as f64 / occurrences,
            avg_comments: self.comments as f64 / occurrences,
        };
        self.record
    }
}

/// Finds recurring questions and merges near-duplicates.
#[derive(Debug, Clone)]
pub struct QuestionExtractor {
    similarity: f64,
    max_questions: usize,
}

impl QuestionExtractor {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            similarity: config.question_similarity,
            max_questions: config.max_questions,
        }
    }

    pub fn extract(&self, items_by_resource: &ItemsByResource) -> Vec<QuestionRecord> {
        self.extract_counted(items_by_resource).records
    }

    /// Like [`QuestionExtractor::extract`], also counting items skipped for
    /// lack of readable text.
    pub fn extract_counted(&self, items_by_resource: &ItemsByResource) -> QuestionExtraction {
        let mut variants: BTreeMap<String, Variant> = BTreeMap::new();
        let mut skipped_items = 0;

        for (resource, items) in items_by_resource {
            for item in items {
                if !item.has_text() {
                    skipped_items += 1;
                    continue;
                }

                let text = item.text();
                let sentences = split_sentences(&text);
                if sentences.is_empty() {
                    skipped_items += 1;
                    continue;
                }

                for sentence in sentences.into_iter().filter(|s| is_question(s)) {
                    let normalized = normalize_question(sentence);
                    if normalized.is_empty() {
                        continue;
                    }

                    let variant = variants.entry(normalized).or_insert_with_key(|key| Variant {
                        count: 0,
                        example_resource: resource.clone(),
                        example_item_id: item.item_id.clone(),
                        resources: BTreeSet::new(),
                        tokens: key.split_whitespace().map(str::to_string).collect(),
                        upvotes: 0,
                        comments: 0,
                    });
                    variant.count += 1;
                    variant.upvotes += item.upvote_count;
                    variant.comments += item.child_count;
                    variant.resources.insert(resource.clone());
                }
            }
        }

        let records = self.group(variants);
        debug!(
            "Question extraction produced {} records ({} items skipped)",
            records.len(),
            skipped_items
        );

        QuestionExtraction {
            records,
            skipped_items,
        }
    }

    /// Greedy grouping: variants are visited most frequent first, so each
    /// group is represented by its most common wording.
    fn group(&self, variants: BTreeMap<String, Variant>) -> Vec<QuestionRecord> {
        let mut ordered: Vec<(String, Variant)> = variants.into_iter().collect();
        ordered.sort_by(|(a_text, a), (b_text, b)| b.count.cmp(&a.count).then_with(|| a_text.cmp(b_text)));

        let mut groups: Vec<Group> = Vec::new();
        for (text, variant) in ordered {
            let target = groups
                .iter_mut()
                .find(|g| token_set_ratio(&g.seed_tokens, &variant.tokens) >= self.similarity);

            match target {
                Some(group) => {
                    group.record.frequency += variant.count;
                    group.record.resources.extend(variant.resources);
                    group.upvotes += variant.upvotes;
                    group.comments += variant.comments;
                }
                None => groups.push(Group {
                    seed_tokens: variant.tokens,
                    upvotes: variant.upvotes,
                    comments: variant.comments,
                    record: QuestionRecord {
                        term: text,
                        frequency: variant.count,
                        example_resource: variant.example_resource,
                        example_item_id: variant.example_item_id,
                        resources: variant.resources,
                        avg_engagement: AverageEngagement::default(),
                    },
                }),
            }
        }

        let mut records: Vec<QuestionRecord> = groups.into_iter().map(Group::finish).collect();
        records.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.term.cmp(&b.term)));
        records.truncate(self.max_questions);
        records
    }
}

impl Default for QuestionExtractor {
    fn default() -> Self {
        Self::new(&AnalysisConfig::default())
    }
}
