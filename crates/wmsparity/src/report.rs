//! Result aggregation and the static HTML/JSON report.
//!
//! One [`ResultRecord`] exists per test case; the [`ResultStore`] keeps them
//! keyed by test name and a later record for the same name replaces the
//! earlier one. Rendering happens once, at the end of the run, over the
//! name-sorted snapshot.

use crate::compare::{ComparisonScore, Thresholds};
use crate::result::{ParityError, ParityResult};
use image::{ImageFormat, Rgba, RgbaImage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// File name of the HTML report
pub const REPORT_HTML: &str = "results.html";
/// File name of the JSON report
pub const REPORT_JSON: &str = "results.json";
/// File name of the failure placeholder image
pub const FAILURE_IMAGE: &str = "fail.png";
/// Shown in place of a score that could not be computed
pub const NOT_APPLICABLE: &str = "n/a";

const BUILTIN_ROW: &str = r#"<div class="card border-{alert_status} mb-4" id="{test_name}">
  <div class="card-header alert-{alert_status}">
    <h4>{test_title} <span class="badge">{test_status}</span></h4>
    <p class="failure">{failure}</p>
  </div>
  <div class="card-body">
    <table class="scores">
      <tr><th></th><th>SSIM</th><th>MSE</th><th>Match</th></tr>
      <tr><th>expected</th><td>&ge; {expected_ssim}</td><td>&le; {expected_mse}</td><td>&ge; {expected_match}</td></tr>
      <tr><th>actual</th><td>{ssim}</td><td>{mse}</td><td>{match}</td></tr>
    </table>
    <div class="images">
      <figure><a href="{source_url}"><img src="{source_image}" alt="{source_label}"></a><figcaption>{source_label}</figcaption></figure>
      <figure><a href="{target_url}"><img src="{target_image}" alt="{target_label}"></a><figcaption>{target_label}</figcaption></figure>
      <figure><img src="{diff_image}" alt="diff"><figcaption>diff</figcaption></figure>
    </div>
    <p class="geometry">bbox {bbox}, {width}&times;{height} &middot; style <a href="{style_path}">{style_path}</a></p>
    {error}
    <details><summary>style</summary><pre><code class="xml">{style}</code></pre></details>
  </div>
</div>
"#;

const BUILTIN_MAIN: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{source_label} vs {target_label}</title>
<style>
body { font-family: sans-serif; margin: 2em; }
.alert-success { background: #d4edda; }
.alert-danger { background: #f8d7da; }
.card { border: 1px solid #ccc; margin-bottom: 1.5em; }
.card-header, .card-body { padding: 0.5em 1em; }
.images { display: flex; gap: 1em; }
.images img { max-width: 320px; border: 1px solid #eee; }
pre { background: #f6f8fa; padding: 0.5em; overflow-x: auto; }
</style>
</head>
<body>
<h1>{source_label} vs {target_label}</h1>
<p class="summary">{passed} passed, {failed} failed, {total} total &middot; generated {generated}</p>
{rows}
</body>
</html>
"#;

/// Final outcome of a test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// All thresholds met
    Success,
    /// Anything else
    Fail,
}

impl TestStatus {
    /// Status word used in the report
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }

    /// Alert class used by the row template
    #[must_use]
    pub const fn alert_class(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "danger",
        }
    }
}

/// Why a test case failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The layer could not be turned into a test case
    Extraction,
    /// A map request did not complete
    Transport,
    /// A render, style or diff could not be written to the results directory
    LocalIo,
    /// A server answered with something other than a PNG
    NonImageResponse,
    /// The adapted style is not well-formed
    InvalidStyle,
    /// The two renders could not be compared
    Comparison,
    /// Compared, but at least one score is out of range
    Threshold,
}

impl FailureKind {
    /// Whether scores exist for this failure
    #[must_use]
    pub const fn was_compared(self) -> bool {
        matches!(self, Self::Threshold)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Extraction => "extraction failed",
            Self::Transport => "request failed",
            Self::LocalIo => "could not write results",
            Self::NonImageResponse => "server returned an error document",
            Self::InvalidStyle => "invalid style",
            Self::Comparison => "could not compare",
            Self::Threshold => "scores out of range",
        };
        f.write_str(text)
    }
}

/// Outcome of one test case
///
/// Artifact paths are relative to the results directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    /// Test name
    pub name: String,
    /// Human-readable title
    pub title: String,
    /// Outcome
    pub status: TestStatus,
    /// Failure category, absent on success
    pub failure: Option<FailureKind>,
    /// Failure detail
    pub message: Option<String>,
    /// Thresholds the case was judged against
    pub thresholds: Thresholds,
    /// Scores, absent when the comparison could not run
    pub score: Option<ComparisonScore>,
    /// Render extent
    pub bbox: String,
    /// Image width
    pub width: u32,
    /// Image height
    pub height: u32,
    /// First server's image
    pub source_image: Option<String>,
    /// Second server's image
    pub target_image: Option<String>,
    /// Difference image
    pub diff_image: Option<String>,
    /// Stored style document
    pub style_path: Option<String>,
    /// Style document, normalised when well-formed
    pub style_text: String,
    /// Error document returned by a server
    pub error_body: Option<String>,
    /// First server's request URL
    pub source_url: Option<String>,
    /// Second server's request URL
    pub target_url: Option<String>,
}

impl ResultRecord {
    /// Empty record for `name`; failed until scored
    #[must_use]
    pub fn new(name: impl Into<String>, thresholds: Thresholds) -> Self {
        let name = name.into();
        Self {
            title: name.replace('_', " "),
            name,
            status: TestStatus::Fail,
            failure: None,
            message: None,
            thresholds,
            score: None,
            bbox: String::new(),
            width: 0,
            height: 0,
            source_image: None,
            target_image: None,
            diff_image: None,
            style_path: None,
            style_text: String::new(),
            error_body: None,
            source_url: None,
            target_url: None,
        }
    }

    /// Mark as failed; any scores are kept only for threshold failures
    #[must_use]
    pub fn with_failure(mut self, kind: FailureKind, message: impl Into<String>) -> Self {
        self.status = TestStatus::Fail;
        self.failure = Some(kind);
        self.message = Some(message.into());
        if !kind.was_compared() {
            self.score = None;
        }
        self
    }

    /// Record scores and decide the outcome against the thresholds
    #[must_use]
    pub fn with_score(mut self, score: ComparisonScore) -> Self {
        let violations = self.thresholds.violations(&score);
        self.score = Some(score);
        if violations.is_empty() {
            self.status = TestStatus::Success;
            self.failure = None;
            self.message = None;
            self
        } else {
            self.with_failure(FailureKind::Threshold, violations.join("; "))
        }
    }

    /// Whether the case passed
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Success
    }
}

/// Test outcomes keyed by name
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    records: BTreeMap<String, ResultRecord>,
}

impl ResultStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record`, returning the one it replaced
    pub fn record(&mut self, record: ResultRecord) -> Option<ResultRecord> {
        self.records.insert(record.name.clone(), record)
    }

    /// Record for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResultRecord> {
        self.records.get(name)
    }

    /// All records, sorted by name
    #[must_use]
    pub fn snapshot(&self) -> Vec<&ResultRecord> {
        self.records.values().collect()
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of passing records
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.records.values().filter(|r| r.passed()).count()
    }

    /// Number of failing records
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.len() - self.passed_count()
    }
}

/// Where the report was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    /// HTML document
    pub html: PathBuf,
    /// JSON document
    pub json: PathBuf,
}

#[derive(Serialize)]
struct JsonSummary {
    total: usize,
    passed: usize,
    failed: usize,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: String,
    source: &'a str,
    target: &'a str,
    summary: JsonSummary,
    results: Vec<&'a ResultRecord>,
}

/// Renders a [`ResultStore`] into the report documents
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    row_template: String,
    main_template: String,
    source_label: String,
    target_label: String,
}

impl Default for ReportRenderer {
    fn default() -> Self {
        Self {
            row_template: BUILTIN_ROW.to_string(),
            main_template: BUILTIN_MAIN.to_string(),
            source_label: "source".to_string(),
            target_label: "target".to_string(),
        }
    }
}

impl ReportRenderer {
    /// Renderer with the built-in templates
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `row.html` and `main.html` from `dir` where present
    pub fn from_dir(dir: Option<&Path>) -> ParityResult<Self> {
        let mut renderer = Self::default();
        let Some(dir) = dir else {
            return Ok(renderer);
        };
        let row = dir.join("row.html");
        if row.is_file() {
            renderer.row_template = std::fs::read_to_string(&row)?;
        }
        let main = dir.join("main.html");
        if main.is_file() {
            renderer.main_template = std::fs::read_to_string(&main)?;
        }
        Ok(renderer)
    }

    /// Endpoint labels shown in the report
    #[must_use]
    pub fn with_labels(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_label = source.into();
        self.target_label = target.into();
        self
    }

    /// Render one record with the row template
    #[must_use]
    pub fn render_row(&self, record: &ResultRecord) -> String {
        let score = |f: fn(&ComparisonScore) -> f64| {
            record
                .score
                .as_ref()
                .map_or_else(|| NOT_APPLICABLE.to_string(), |s| format_score(f(s)))
        };
        let attr = |v: &Option<String>| escape_attr(v.as_deref().unwrap_or_default());
        let failure = match (record.failure, &record.message) {
            (Some(kind), Some(message)) => format!("{kind}: {}", escape(message)),
            (Some(kind), None) => kind.to_string(),
            (None, _) => String::new(),
        };
        let error = record.error_body.as_deref().map_or_else(String::new, |body| {
            format!(r#"<pre><code class="xml">{}</code></pre>"#, escape(body))
        });

        let values: BTreeMap<&str, String> = BTreeMap::from([
            ("test_name", escape_attr(&record.name)),
            ("test_title", escape(&record.title)),
            ("test_status", record.status.as_str().to_string()),
            ("alert_status", record.status.alert_class().to_string()),
            ("failure", failure),
            ("expected_ssim", format_score(record.thresholds.ssim)),
            ("expected_mse", format_score(record.thresholds.mse)),
            ("expected_match", format_score(record.thresholds.template_match)),
            ("ssim", score(|s| s.ssim)),
            ("mse", score(|s| s.mse)),
            ("match", score(|s| s.template_match)),
            ("bbox", escape(&record.bbox)),
            ("width", record.width.to_string()),
            ("height", record.height.to_string()),
            ("source_label", escape(&self.source_label)),
            ("target_label", escape(&self.target_label)),
            ("source_image", attr(&record.source_image)),
            ("target_image", attr(&record.target_image)),
            ("diff_image", attr(&record.diff_image)),
            ("style_path", attr(&record.style_path)),
            ("style", escape(&record.style_text)),
            ("error", error),
            ("source_url", attr(&record.source_url)),
            ("target_url", attr(&record.target_url)),
        ]);
        fill_template(&self.row_template, &values)
    }

    /// Render the whole HTML document
    #[must_use]
    pub fn render(&self, store: &ResultStore, generated: &str) -> String {
        let rows: String = store
            .snapshot()
            .into_iter()
            .map(|r| self.render_row(r))
            .collect();
        let values: BTreeMap<&str, String> = BTreeMap::from([
            ("rows", rows),
            ("source_label", escape(&self.source_label)),
            ("target_label", escape(&self.target_label)),
            ("passed", store.passed_count().to_string()),
            ("failed", store.failed_count().to_string()),
            ("total", store.len().to_string()),
            ("generated", escape(generated)),
        ]);
        fill_template(&self.main_template, &values)
    }

    /// Render the JSON document
    pub fn render_json(&self, store: &ResultStore, generated: &str) -> ParityResult<String> {
        let report = JsonReport {
            generated_at: generated.to_string(),
            source: &self.source_label,
            target: &self.target_label,
            summary: JsonSummary {
                total: store.len(),
                passed: store.passed_count(),
                failed: store.failed_count(),
            },
            results: store.snapshot(),
        };
        Ok(serde_json::to_string_pretty(&report)?)
    }

    /// Write both documents into `dir`
    pub fn write(&self, store: &ResultStore, dir: &Path) -> ParityResult<ReportPaths> {
        let generated = chrono::Utc::now().to_rfc3339();
        let paths = ReportPaths {
            html: dir.join(REPORT_HTML),
            json: dir.join(REPORT_JSON),
        };
        std::fs::write(&paths.html, self.render(store, &generated)).map_err(|e| {
            ParityError::report(format!("cannot write {}: {e}", paths.html.display()))
        })?;
        std::fs::write(&paths.json, self.render_json(store, &generated)?).map_err(|e| {
            ParityError::report(format!("cannot write {}: {e}", paths.json.display()))
        })?;
        Ok(paths)
    }
}

/// Substitute `{key}` placeholders in one pass
///
/// Unknown placeholders and stray braces are left as they are, and
/// substituted values are never rescanned.
#[must_use]
pub fn fill_template(template: &str, values: &BTreeMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let hit = after
            .find('}')
            .and_then(|end| values.get(&after[..end]).map(|v| (v, end)));
        match hit {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Put the failure placeholder image into `dir`
///
/// Copies `configured` when given, otherwise draws a plain placeholder.
pub fn ensure_failure_image(dir: &Path, configured: Option<&Path>) -> ParityResult<PathBuf> {
    let dest = dir.join(FAILURE_IMAGE);
    match configured {
        Some(src) if same_file(src, &dest) => {}
        Some(src) => {
            std::fs::copy(src, &dest).map_err(|e| {
                ParityError::config(format!("cannot copy failure image {}: {e}", src.display()))
            })?;
        }
        None if dest.is_file() => {}
        None => {
            let placeholder = RgbaImage::from_fn(64, 64, |x, y| {
                if x == y || x + y == 63 {
                    Rgba([200, 30, 30, 255])
                } else {
                    Rgba([245, 245, 245, 255])
                }
            });
            placeholder
                .save_with_format(&dest, ImageFormat::Png)
                .map_err(|e| ParityError::Image {
                    path: dest.display().to_string(),
                    message: e.to_string(),
                })?;
        }
    }
    Ok(dest)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn format_score(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        format!("{v:.4}")
    }
}

fn escape(text: &str) -> String {
    htmlize::escape_text(text).into_owned()
}

fn escape_attr(text: &str) -> String {
    htmlize::escape_attribute(text).into_owned()
}
