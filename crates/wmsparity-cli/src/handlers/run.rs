//! Run command handler

use super::{load_project, resolve_config};
use crate::commands::RunArgs;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;
use std::time::Instant;
use wmsparity::{Harness, ProjectStyleTranslator};

/// Run the harness over every selected test case
///
/// Returns `false` when a case failed and `--fail-on-error` is set.
pub fn execute_run(config: &CliConfig, args: &RunArgs) -> CliResult<bool> {
    let harness_config = resolve_config(&args.source)?;
    let project = load_project(&harness_config)?;
    let translator = ProjectStyleTranslator::new(&project);

    let mut harness = Harness::new(harness_config)?;
    if let Some(filter) = &args.filter {
        harness = harness.with_filter(filter);
    }

    let mut reporter = ProgressReporter::new(
        config.color.should_color(),
        config.verbosity.is_quiet(),
    );
    let total = harness.cases(&project, &translator).len();
    reporter.info(&format!(
        "{} vs {}: {total} test case(s)",
        harness.config().source.label,
        harness.config().target.label
    ));
    reporter.start_progress(total as u64, "rendering");

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::runtime(format!("Failed to create async runtime: {e}")))?;
    let start = Instant::now();
    let summary =
        rt.block_on(harness.run(&project, &translator, |record| reporter.record(record)))?;
    reporter.finish();

    reporter.summary(summary.passed, summary.failed, start.elapsed());
    reporter.report_path(&summary.report.html);

    Ok(summary.all_passed() || !args.fail_on_error)
}
