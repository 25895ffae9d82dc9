//! List command handler

use super::{load_project, resolve_config};
use crate::commands::{ListArgs, OutputFormatArg};
use crate::config::CliConfig;
use crate::error::CliResult;
use crate::output::ProgressReporter;
use serde::Serialize;
use wmsparity::{Extracted, Harness, ProjectStyleTranslator, TestCaseDescriptor};

#[derive(Serialize)]
struct ListedFailure<'a> {
    name: &'a str,
    layer_id: &'a str,
    error: String,
}

#[derive(Serialize)]
struct Listing<'a> {
    cases: Vec<&'a TestCaseDescriptor>,
    failures: Vec<ListedFailure<'a>>,
}

/// Print the test cases of the configured project
///
/// Returns `false` when a test layer could not be extracted.
pub fn execute_list(config: &CliConfig, args: &ListArgs) -> CliResult<bool> {
    let harness_config = resolve_config(&args.source)?;
    let project = load_project(&harness_config)?;
    let translator = ProjectStyleTranslator::new(&project);
    let mut harness = Harness::new(harness_config)?;
    if let Some(filter) = &args.filter {
        harness = harness.with_filter(filter);
    }
    let extracted = harness.cases(&project, &translator);

    match args.format {
        OutputFormatArg::Json => println!("{}", render_json(&extracted)?),
        OutputFormatArg::Text => {
            let reporter = ProgressReporter::new(config.color.should_color(), false);
            for item in &extracted {
                match item {
                    Ok(case) => println!("{}", describe(case)),
                    Err(failure) => reporter.failure(&format!(
                        "{} [{}]: {}",
                        failure.record_name, failure.layer_id, failure.error
                    )),
                }
            }
        }
    }

    Ok(extracted.iter().all(Result::is_ok))
}

/// One line per test case
#[must_use]
pub fn describe(case: &TestCaseDescriptor) -> String {
    let t = &case.thresholds;
    format!(
        "{} -> {}  ssim>={} mse<={} match>={}  {}x{} [{}]{}",
        case.name,
        case.target_layer_name,
        t.ssim,
        t.mse,
        t.template_match,
        case.width,
        case.height,
        case.bbox,
        if case.style_text.is_empty() { "" } else { "  styled" }
    )
}

fn render_json(extracted: &[Extracted]) -> CliResult<String> {
    let listing = Listing {
        cases: extracted.iter().filter_map(|e| e.as_ref().ok()).collect(),
        failures: extracted
            .iter()
            .filter_map(|e| e.as_ref().err())
            .map(|f| ListedFailure {
                name: &f.record_name,
                layer_id: &f.layer_id,
                error: f.error.to_string(),
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&listing)?)
}
