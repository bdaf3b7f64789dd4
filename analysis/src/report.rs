use chrono::{DateTime, Utc};
use pulse_core::{
    AnalysisConfig, Diagnostics, ItemsByResource, QuestionRecord, RankedItem, Report,
    ReportSummary, TrendRecord,
};
use tracing::info;

/// Combines analyzer output and engagement rankings into a [`Report`].
#[derive(Debug, Clone)]
pub struct ReportAssembler {
    top_k: usize,
}

impl ReportAssembler {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            top_k: config.engagement_top_k,
        }
    }

    pub fn with_top_k(top_k: usize) -> Self {
        Self { top_k }
    }

    /// Items ordered by engagement score, highest first, cut to the top K.
    /// Equal scores fall back to resource name, then item id.
    pub fn rank_engagement(&self, items_by_resource: &ItemsByResource) -> Vec<RankedItem> {
        let mut ranked: Vec<RankedItem> = items_by_resource
            .iter()
            .flat_map(|(resource, items)| {
                items.iter().map(move |item| RankedItem {
                    resource: resource.clone(),
                    score: item.engagement_score(),
                    item: item.clone(),
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.resource.cmp(&b.resource))
                .then_with(|| a.item.item_id.cmp(&b.item.item_id))
        });
        ranked.truncate(self.top_k);
        ranked
    }

    pub fn assemble(
        &self,
        trend_records: Vec<TrendRecord>,
        question_records: Vec<QuestionRecord>,
        items_by_resource: &ItemsByResource,
        period_days: u32,
        diagnostics: Diagnostics,
    ) -> Report {
        self.assemble_at(
            trend_records,
            question_records,
            items_by_resource,
            period_days,
            diagnostics,
            Utc::now(),
        )
    }

    pub fn assemble_at(
        &self,
        trend_records: Vec<TrendRecord>,
        question_records: Vec<QuestionRecord>,
        items_by_resource: &ItemsByResource,
        period_days: u32,
        diagnostics: Diagnostics,
        generated_at: DateTime<Utc>,
    ) -> Report {
        let all_items = items_by_resource.values().flatten();
        let total_comments = all_items.clone().filter(|i| i.is_comment()).count();
        let total_posts = all_items.count() - total_comments;

        let summary = ReportSummary {
            total_posts,
            total_comments,
            resources_analyzed: items_by_resource.len(),
        };

        let engagement_rankings = self.rank_engagement(items_by_resource);

        info!(
            "Assembled report: {} resources, {} posts, {} comments, {} terms, {} questions",
            summary.resources_analyzed,
            summary.total_posts,
            summary.total_comments,
            trend_records.len(),
            question_records.len()
        );

        Report::new(
            generated_at,
            period_days,
            items_by_resource.keys().cloned().collect(),
            trend_records,
            question_records,
            engagement_rankings,
            summary,
            diagnostics,
        )
    }
}

impl Default for ReportAssembler {
    fn default() -> Self {
        Self::new(&AnalysisConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pulse_core::RawItem;

    fn item(id: &str, upvotes: u64, children: u64, parent: Option<&str>) -> RawItem {
        RawItem {
            item_id: id.to_string(),
            text_title: None,
            text_body: "text".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            upvote_count: upvotes,
            child_count: children,
            parent_item_id: parent.map(str::to_string),
        }
    }

    fn fixture() -> ItemsByResource {
        let mut items = ItemsByResource::new();
        items.insert(
            "running".to_string(),
            vec![item("r1", 10, 5, None), item("r2", 20, 0, None), item("rc", 3, 0, Some("r1"))],
        );
        items.insert(
            "nutrition".to_string(),
            vec![item("n1", 16, 2, None), item("n2", 1, 0, None)],
        );
        items.insert("empty".to_string(), Vec::new());
        items
    }

    #[test]
    fn test_engagement_ranking_order_and_ties() {
        let ranked = ReportAssembler::default().rank_engagement(&fixture());
        let order: Vec<(&str, u64)> = ranked
            .iter()
            .map(|r| (r.item.item_id.as_str(), r.score))
            .collect();

        // r1 = 10 + 2*5 = 20 ties with n1 = 16 + 2*2 and r2 = 20.
        assert_eq!(
            order,
            vec![("n1", 20), ("r1", 20), ("r2", 20), ("rc", 3), ("n2", 1)]
        );
    }

    #[test]
    fn test_top_k_limits_rankings() {
        let ranked = ReportAssembler::with_top_k(2).rank_engagement(&fixture());
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].resource, "nutrition");
    }

    #[test]
    fn test_assemble_builds_summary() {
        let generated_at = Utc.with_ymd_and_hms(2024, 4, 8, 6, 0, 0).unwrap();
        let report = ReportAssembler::default().assemble_at(
            Vec::new(),
            Vec::new(),
            &fixture(),
            7,
            Diagnostics::default(),
            generated_at,
        );

        assert_eq!(report.generated_at(), generated_at);
        assert_eq!(report.period_days(), 7);
        assert_eq!(report.covering_resources().len(), 3);
        assert_eq!(report.summary().total_posts, 4);
        assert_eq!(report.summary().total_comments, 1);
        assert_eq!(report.summary().resources_analyzed, 3);
        assert_eq!(report.engagement_rankings().len(), 5);
    }
}
