use crate::collector::{CollectOptions, Collector};
use crate::context::PipelineContext;
use crate::retention::{RetentionManager, RetentionReport};
use analysis::{QuestionExtractor, ReportAssembler, TrendAnalyzer};
use forum_client::ForumFetcher;
use pulse_core::{CoreError, Diagnostics, PipelineConfig, Report, ResourceHandle};
use std::path::PathBuf;
use std::sync::Arc;
use storage::ReportArchive;
use tracing::{info, warn};

/// One configured Collect → Cache → Analyze pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    resources: Vec<ResourceHandle>,
    context: PipelineContext,
    collector: Collector,
    archive: Arc<ReportArchive>,
    retention: RetentionManager,
    trends: TrendAnalyzer,
    questions: QuestionExtractor,
    assembler: ReportAssembler,
}

impl Pipeline {
    /// Validates `config` and opens the cache and report archive it names.
    pub async fn open(
        config: PipelineConfig,
        fetcher: Arc<dyn ForumFetcher>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let context = PipelineContext::from_config(&config).await?;
        let archive = Arc::new(ReportArchive::new(config.storage.reports_dir.clone()));
        let retention = RetentionManager::from_config(&config.retention)
            .with_target(context.cache().clone())
            .with_target(archive.clone());

        Ok(Self {
            resources: config.resource_handles(),
            collector: Collector::new(context.clone(), fetcher),
            trends: TrendAnalyzer::new(&config.analysis),
            questions: QuestionExtractor::new(&config.analysis),
            assembler: ReportAssembler::new(&config.analysis),
            context,
            archive,
            retention,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn archive(&self) -> &ReportArchive {
        &self.archive
    }

    /// Runs one full pass and archives the resulting report.
    ///
    /// Fails only on storage errors or rejected credentials. When every
    /// resource is skipped the report is still archived, with empty records
    /// and the failures listed in its diagnostics.
    pub async fn run(&self) -> Result<Report, CoreError> {
        self.prune().await?;
        let expired = self.context.cache().purge_expired().await?;
        if expired > 0 {
            info!("Dropped {} expired cache entries", expired);
        }
        self.context.metrics().reset().await;

        let options = CollectOptions::from(&self.config.collection);
        let collection = self.collector.collect(&self.resources, &options).await?;

        if collection.collected_count() == 0 {
            warn!(
                "None of {} resources could be collected, the report will be empty",
                collection.outcomes.len()
            );
        }

        let trend_records = self.trends.analyze(&collection.items);
        let questions = self.questions.extract_counted(&collection.items);

        let diagnostics = Diagnostics {
            resources: collection.outcomes,
            malformed_items: collection.malformed_items,
            skipped_question_items: questions.skipped_items,
            fetch: self.context.metrics().snapshot().await,
        };

        let report = self.assembler.assemble(
            trend_records,
            questions.records,
            &collection.items,
            options.period_days,
            diagnostics,
        );

        let path = self.archive.save(&report).await?;
        info!(
            "Run complete: report {} written to {}",
            report.id(),
            path.display()
        );
        Ok(report)
    }

    /// Applies the retention horizon to the cache and the report archive.
    pub async fn prune(&self) -> Result<RetentionReport, CoreError> {
        self.retention.enforce().await
    }

    pub async fn latest_report(&self) -> Result<Option<Report>, CoreError> {
        Ok(self.archive.latest().await?)
    }

    pub async fn report_paths(&self) -> Result<Vec<PathBuf>, CoreError> {
        let archived = self.archive.list().await?;
        Ok(archived.into_iter().map(|a| a.path).collect())
    }

    pub async fn close(&self) {
        self.context.cache().close().await;
    }
}

/// Opens a pipeline for `config`, runs it once and closes it again.
pub async fn run(
    config: PipelineConfig,
    fetcher: Arc<dyn ForumFetcher>,
) -> Result<Report, CoreError> {
    let pipeline = Pipeline::open(config, fetcher).await?;
    let result = pipeline.run().await;
    pipeline.close().await;
    result
}
