//! Compare command handler

use crate::commands::CompareArgs;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;
use serde::Serialize;
use wmsparity::{Comparison, ImageComparator, MatchScale, Thresholds};

#[derive(Debug, Serialize)]
struct CompareOutput {
    ssim: f64,
    mse: f64,
    #[serde(rename = "match")]
    template_match: f64,
    downscaled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    passed: Option<bool>,
    violations: Vec<String>,
}

/// Thresholds from the flags; a metric without a flag always passes
pub fn thresholds_from(args: &CompareArgs) -> CliResult<Thresholds> {
    let flags = [
        ("--ssim", args.ssim),
        ("--mse", args.mse),
        ("--match", args.template_match),
    ];
    for (flag, value) in flags {
        if let Some(v) = value.filter(|v| !v.is_finite()) {
            return Err(CliError::invalid_argument(format!(
                "{flag} must be a finite number, got {v}"
            )));
        }
    }
    Ok(Thresholds {
        ssim: args.ssim.unwrap_or(f64::NEG_INFINITY),
        mse: args.mse.unwrap_or(f64::INFINITY),
        template_match: args.template_match.unwrap_or(f64::NEG_INFINITY),
    })
}

fn output(comparison: &Comparison, thresholds: Option<&Thresholds>) -> CompareOutput {
    let score = comparison.score;
    CompareOutput {
        ssim: score.ssim,
        mse: score.mse,
        template_match: score.template_match,
        downscaled: matches!(comparison.scale, MatchScale::Downscaled { .. }),
        passed: thresholds.map(|t| t.accepts(&score)),
        violations: thresholds.map(|t| t.violations(&score)).unwrap_or_default(),
    }
}

/// Score two local images
///
/// Returns `false` when thresholds were given and not met.
pub fn execute_compare(config: &CliConfig, args: &CompareArgs) -> CliResult<bool> {
    let thresholds = if args.has_thresholds() {
        Some(thresholds_from(args)?)
    } else {
        None
    };
    let comparison =
        ImageComparator::new().compare_files(&args.first, &args.second, args.diff.as_deref())?;
    let out = output(&comparison, thresholds.as_ref());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("ssim  {:.6}", out.ssim);
        println!("mse   {:.6}", out.mse);
        let note = if out.downscaled { " (downscaled)" } else { "" };
        println!("match {:.6}{note}", out.template_match);
        let reporter =
            ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
        match out.passed {
            Some(true) => reporter.success("within thresholds"),
            Some(false) => reporter.failure(&out.violations.join("; ")),
            None => {}
        }
    }

    Ok(out.passed.unwrap_or(true))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::path::PathBuf;

    fn args(ssim: Option<f64>, mse: Option<f64>) -> CompareArgs {
        CompareArgs {
            first: PathBuf::new(),
            second: PathBuf::new(),
            diff: None,
            ssim,
            mse,
            template_match: None,
            json: false,
        }
    }

    #[test]
    fn test_missing_flags_never_fail() {
        let comparison = ImageComparator::new()
            .compare(
                &DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, image::Rgb([0, 0, 0]))),
                &DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, image::Rgb([255; 3]))),
            )
            .unwrap();
        let t = thresholds_from(&args(None, Some(1e9))).unwrap();
        let out = output(&comparison, Some(&t));
        assert_eq!(out.passed, Some(true));
        assert!(out.violations.is_empty());

        let t = thresholds_from(&args(None, Some(1.0))).unwrap();
        let out = output(&comparison, Some(&t));
        assert_eq!(out.passed, Some(false));
        assert_eq!(out.violations.len(), 1);
    }

    #[test]
    fn test_non_finite_threshold_rejected() {
        let err = thresholds_from(&args(Some(f64::NAN), None)).unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument { .. }));
        assert!(err.to_string().contains("--ssim"));
        assert!(thresholds_from(&args(None, Some(f64::INFINITY))).is_err());
    }

    #[test]
    fn test_no_thresholds_no_verdict() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, image::Rgb([9, 9, 9])));
        let comparison = ImageComparator::new().compare(&img, &img).unwrap();
        let out = output(&comparison, None);
        assert_eq!(out.passed, None);
        assert!(!out.downscaled);
        let json = serde_json::to_value(&out).unwrap();
        assert!(json.get("passed").is_none());
        assert_eq!(json["match"], 1.0);
    }
}
