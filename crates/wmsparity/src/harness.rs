//! Harness orchestration.
//!
//! ```text
//! LayerStore ──► Extractor ──► for each case ─┬─► fetch source ─┐
//!                                             └─► fetch target ─┴─► compare ──► ResultStore ──► report
//! ```
//!
//! Cases run one after another and every case ends in exactly one record.

use crate::compare::ImageComparator;
use crate::config::HarnessConfig;
use crate::extract::{Extracted, ExtractionFailure, Extractor, TestCaseDescriptor};
use crate::fetch::{GetMapRequest, MapFetcher, RenderResponse};
use crate::layer::LayerStore;
use crate::report::{
    ensure_failure_image, FailureKind, ReportPaths, ReportRenderer, ResultRecord, ResultStore,
    FAILURE_IMAGE,
};
use crate::result::{ParityError, ParityResult};
use crate::style::{normalize_style, StyleTranslator};
use image::ImageFormat;

/// Totals of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Passing cases
    pub passed: usize,
    /// Failing cases
    pub failed: usize,
    /// Report documents
    pub report: ReportPaths,
}

impl RunSummary {
    /// All cases
    #[must_use]
    pub const fn total(&self) -> usize {
        self.passed + self.failed
    }

    /// Whether no case failed
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Drives both endpoints over every test case of a layer store
#[derive(Debug, Clone)]
pub struct Harness {
    config: HarnessConfig,
    fetcher: MapFetcher,
    comparator: ImageComparator,
    filter: Option<String>,
}

impl Harness {
    /// Create a harness from a validated configuration
    pub fn new(config: HarnessConfig) -> ParityResult<Self> {
        config.validate()?;
        let mut fetcher = MapFetcher::new()?;
        if let Some(project) = &config.server_project {
            fetcher = fetcher.with_project(project.as_str());
        }
        Ok(Self {
            config,
            fetcher,
            comparator: ImageComparator::new(),
            filter: None,
        })
    }

    /// Replace the map fetcher
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: MapFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Only run cases whose name contains `filter`
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        let filter: String = filter.into();
        self.filter = (!filter.is_empty()).then_some(filter);
        self
    }

    /// Resolved configuration
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Extract the selected test cases without touching the servers
    pub fn cases(
        &self,
        store: &dyn LayerStore,
        translator: &dyn StyleTranslator,
    ) -> Vec<Extracted> {
        self.select(Extractor::new(&self.config).extract(store, translator))
    }

    /// Run every selected case and write the report
    ///
    /// `observer` sees each final record as soon as it is known.
    pub async fn run<F>(
        &self,
        store: &dyn LayerStore,
        translator: &dyn StyleTranslator,
        mut observer: F,
    ) -> ParityResult<RunSummary>
    where
        F: FnMut(&ResultRecord),
    {
        let dir = &self.config.results_dir;
        std::fs::create_dir_all(dir)?;
        ensure_failure_image(dir, self.config.failure_image.as_deref())?;

        let extracted = self.select(
            Extractor::new(&self.config)
                .with_audit_dir(dir)
                .extract(store, translator),
        );
        tracing::info!(cases = extracted.len(), results = %dir.display(), "starting run");

        let mut results = ResultStore::new();
        for item in extracted {
            let record = match item {
                Ok(case) => self.run_case(&case).await,
                Err(failure) => self.extraction_record(&failure),
            };
            log_outcome(&record);
            observer(&record);
            results.record(record);
        }

        let report = ReportRenderer::from_dir(self.config.templates_dir.as_deref())?
            .with_labels(&self.config.source.label, &self.config.target.label)
            .write(&results, dir)?;
        tracing::info!(
            passed = results.passed_count(),
            failed = results.failed_count(),
            report = %report.html.display(),
            "run finished"
        );

        Ok(RunSummary {
            passed: results.passed_count(),
            failed: results.failed_count(),
            report,
        })
    }

    fn select(&self, extracted: Vec<Extracted>) -> Vec<Extracted> {
        let Some(filter) = &self.filter else {
            return extracted;
        };
        extracted
            .into_iter()
            .filter(|item| match item {
                Ok(case) => case.name.contains(filter.as_str()),
                Err(failure) => failure.layer_name.contains(filter.as_str()),
            })
            .collect()
    }

    fn extraction_record(&self, failure: &ExtractionFailure) -> ResultRecord {
        let defaults = &self.config.defaults;
        let mut record = ResultRecord::new(&failure.record_name, defaults.thresholds);
        record.bbox.clone_from(&defaults.bbox);
        record.width = defaults.width;
        record.height = defaults.height;
        record.with_failure(FailureKind::Extraction, failure.error.to_string())
    }

    async fn run_case(&self, case: &TestCaseDescriptor) -> ResultRecord {
        let dir = &self.config.results_dir;
        let (source_ep, target_ep) = (&self.config.source, &self.config.target);
        let source_file = format!("{}_{}_getmap.png", case.name, source_ep.label);
        let target_file = format!("{}_{}_getmap.png", case.name, target_ep.label);
        let diff_file = format!("{}_diffs.png", case.name);
        let style_file = format!("{}_sld_1.0.sld", case.name);

        let mut record = ResultRecord::new(&case.name, case.thresholds);
        record.bbox = case.bbox.to_string();
        record.width = case.width;
        record.height = case.height;
        record.style_text.clone_from(&case.style_text);

        let source_request =
            GetMapRequest::new(&case.source_layer_name, &case.bbox, case.width, case.height);
        let source = match self
            .fetcher
            .fetch(source_ep, &source_request, &dir.join(&source_file))
            .await
        {
            Ok(response) => response,
            Err(e) => return record.with_failure(failure_kind(&e), e.to_string()),
        };
        record.source_url = Some(source.url.clone());
        record.source_image = Some(image_or_placeholder(&source, source_file));

        let target_request =
            GetMapRequest::new(&case.target_layer_name, &case.bbox, case.width, case.height)
                .with_style(case.style_text.as_str());
        let target = match self
            .fetcher
            .fetch(target_ep, &target_request, &dir.join(&target_file))
            .await
        {
            Ok(response) => response,
            Err(e) => return record.with_failure(failure_kind(&e), e.to_string()),
        };
        record.target_url = Some(target.url.clone());
        record.target_image = Some(image_or_placeholder(&target, target_file));

        let mut style_error = None;
        if !case.style_text.is_empty() {
            let stored = match normalize_style(&case.style_text) {
                Ok(pretty) => {
                    record.style_text.clone_from(&pretty);
                    pretty
                }
                Err(e) => {
                    style_error = Some(e);
                    case.style_text.clone()
                }
            };
            let path = dir.join(&style_file);
            if let Err(e) = std::fs::write(&path, stored) {
                let message = format!("cannot write {}: {e}", path.display());
                return record.with_failure(FailureKind::LocalIo, message);
            }
            record.style_path = Some(style_file);
        }

        for (label, response) in [(&target_ep.label, &target), (&source_ep.label, &source)] {
            if !response.is_png() {
                record.error_body = Some(response.body_text());
                let message = format!(
                    "{label} answered with {}",
                    response.content_type.as_deref().unwrap_or("no content type")
                );
                return record.with_failure(FailureKind::NonImageResponse, message);
            }
        }

        if let Some(e) = style_error {
            return record.with_failure(FailureKind::InvalidStyle, e.to_string());
        }

        let scored = self
            .comparator
            .compare_files(&source.saved_to, &target.saved_to, None);
        let comparison = match scored {
            Ok(comparison) => comparison,
            Err(e) => return record.with_failure(FailureKind::Comparison, e.to_string()),
        };
        tracing::debug!(
            test = %case.name,
            ssim = comparison.score.ssim,
            mse = comparison.score.mse,
            template_match = comparison.score.template_match,
            scale = ?comparison.scale,
            "scored"
        );

        let diff_path = dir.join(&diff_file);
        if let Err(e) = comparison.diff.save_with_format(&diff_path, ImageFormat::Png) {
            let message = format!("cannot write {}: {e}", diff_path.display());
            return record.with_failure(FailureKind::LocalIo, message);
        }
        record.diff_image = Some(diff_file);
        record.with_score(comparison.score)
    }
}

fn image_or_placeholder(response: &RenderResponse, file: String) -> String {
    if response.is_png() {
        file
    } else {
        FAILURE_IMAGE.to_string()
    }
}

fn failure_kind(error: &ParityError) -> FailureKind {
    match error {
        ParityError::Transport { .. } | ParityError::InvalidEndpoint { .. } => {
            FailureKind::Transport
        }
        ParityError::Io(_) => FailureKind::LocalIo,
        ParityError::InvalidStyle { .. } => FailureKind::InvalidStyle,
        ParityError::MissingTypeName { .. } | ParityError::DuplicateName { .. } => {
            FailureKind::Extraction
        }
        _ => FailureKind::Comparison,
    }
}

fn log_outcome(record: &ResultRecord) {
    match (record.failure, &record.message) {
        (None, _) => tracing::info!(test = %record.name, "pass"),
        (Some(kind), message) => tracing::info!(
            test = %record.name,
            failure = %kind,
            message = message.as_deref().unwrap_or_default(),
            "fail"
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::layer::ProjectFile;
    use crate::style::ProjectStyleTranslator;

    const PROJECT: &str = r#"
layers:
  - name: test_roads
    kind: vector
    data_source: "http://h/wfs?TYPENAME=sf:roads"
  - name: test_streams
    kind: vector
    data_source: "http://h/wfs?TYPENAME=sf:streams"
  - name: test_broken
    kind: vector
    data_source: "http://h/wfs"
"#;

    #[test]
    fn test_cases_without_filter() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let harness = Harness::new(HarnessConfig::default()).unwrap();
        let cases = harness.cases(&project, &ProjectStyleTranslator::new(&project));
        assert_eq!(cases.len(), 3);
        assert!(cases[2].is_err());
    }

    #[test]
    fn test_filter_applies_to_failures_too() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let translator = ProjectStyleTranslator::new(&project);
        let harness = Harness::new(HarnessConfig::default()).unwrap().with_filter("str");
        let cases = harness.cases(&project, &translator);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].as_ref().unwrap().name, "test_streams");

        let harness = harness.with_filter("broken");
        assert!(harness.cases(&project, &translator)[0].is_err());
    }

    #[test]
    fn test_empty_filter_selects_all() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let harness = Harness::new(HarnessConfig::default()).unwrap().with_filter("");
        assert_eq!(harness.cases(&project, &ProjectStyleTranslator::new(&project)).len(), 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = HarnessConfig::default();
        config.defaults.width = 0;
        assert!(Harness::new(config).is_err());
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            failure_kind(&ParityError::InvalidStyle {
                message: String::new()
            }),
            FailureKind::InvalidStyle
        );
        assert_eq!(failure_kind(&ParityError::comparison("x")), FailureKind::Comparison);
        let io = std::io::Error::other("disk");
        assert_eq!(failure_kind(&ParityError::Io(io)), FailureKind::LocalIo);
    }

    #[test]
    fn test_summary_totals() {
        let summary = RunSummary {
            passed: 2,
            failed: 1,
            report: ReportPaths {
                html: "r.html".into(),
                json: "r.json".into(),
            },
        };
        assert_eq!(summary.total(), 3);
        assert!(!summary.all_passed());
    }
}
