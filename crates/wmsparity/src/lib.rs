//! wmsparity: rendering parity harness for two WMS servers
//!
//! Derives one test case per styled test layer of a map definition, asks two
//! independently implemented map servers to render it with identical
//! parameters, and judges the pair with three independent similarity metrics
//! (SSIM, MSE, template match) against per-case thresholds.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      WMSPARITY pipeline                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ LayerStore │    │ Extractor  │    │ MapFetcher │ source (A) │
//! │   │ + Style    │───►│ test cases │───►│  GetMap    │ target (B) │
//! │   │ Translator │    │            │    │            │            │
//! │   └────────────┘    └────────────┘    └─────┬──────┘            │
//! │                                             ▼                   │
//! │                     ┌────────────┐    ┌────────────┐            │
//! │                     │ Report     │◄───│ Image      │            │
//! │                     │ html/json  │    │ Comparator │            │
//! │                     └────────────┘    └────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A case passes only when all three scores are within their thresholds.

#![warn(missing_docs)]

#[allow(clippy::many_single_char_names, clippy::suboptimal_flops)]
mod compare;
mod config;
mod extract;
mod fetch;
mod harness;
mod layer;
mod report;
mod result;
mod style;

pub use compare::{
    Comparison, ComparisonScore, ImageComparator, MatchScale, Thresholds, MATCH_MAX_HEIGHT,
    SSIM_WINDOW,
};
pub use config::{
    local_override_path, ConfigLayer, DefaultsLayer, EndpointConfig, EndpointLayer,
    HarnessConfig, RenderDefaults, DEFAULT_BBOX, DEFAULT_LAYER_PREFIX, DEFAULT_SIZE,
};
pub use extract::{
    parse_override, type_name, Bbox, Extracted, ExtractionFailure, Extractor,
    TestCaseDescriptor, TYPENAME_KEY, VAR_BBOX, VAR_EXPECTED_MATCH, VAR_EXPECTED_MSE,
    VAR_EXPECTED_SSIM, VAR_HEIGHT, VAR_WIDTH,
};
pub use fetch::{
    getmap_url, is_png_media_type, GetMapRequest, MapFetcher, RenderResponse, FIXED_PARAMS,
    PNG_MEDIA_TYPE,
};
pub use harness::{Harness, RunSummary};
pub use layer::{IconAsset, LayerKind, LayerStore, MapLayer, ProjectFile};
pub use report::{
    ensure_failure_image, fill_template, FailureKind, ReportPaths, ReportRenderer, ResultRecord,
    ResultStore, TestStatus, FAILURE_IMAGE, NOT_APPLICABLE, REPORT_HTML, REPORT_JSON,
};
pub use result::{ParityError, ParityResult};
pub use style::{
    normalize_style, ProjectStyleTranslator, StyleError, StyleTranslator, TranslatedStyle,
};
