//! Progress derivation from the training log.
//!
//! The total epoch count is only written once, in the first record
//! (`script_args.num_epochs`, 1-indexed). The position within training comes
//! from the most recent record (`epoch`, 0-indexed, plus the cumulative
//! `samples_seen` and the per-epoch `total_samples`). Progress is
//!
//! ```text
//! ((epoch + 1) * total_samples + samples_seen % total_samples) / (num_epochs * total_samples)
//! ```
//!
//! clamped to `[0, 1]`. `epoch + 1` counts the epoch in progress as one of the
//! completed ones, so the final epoch saturates at 1.0 once `samples_seen`
//! wraps back to a multiple of `total_samples`.

use serde::Deserialize;

/// Outcome of one progress computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    /// Fraction in `[0, 1]`.
    Ready(f64),
    /// Not enough well-formed data yet; try again on the next tick.
    Pending,
    /// The log reports numbers that can never be valid.
    Invalid(InvalidReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    ZeroTotalSamples,
    NoEpochs,
    Negative(&'static str),
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidReason::ZeroTotalSamples => write!(f, "total_samples is 0"),
            InvalidReason::NoEpochs => write!(f, "num_epochs is less than 1"),
            InvalidReason::Negative(field) => write!(f, "{} is negative", field),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FirstRecord {
    script_args: ScriptArgs,
}

#[derive(Debug, Deserialize)]
struct ScriptArgs {
    num_epochs: i64,
}

/// Fields are optional: early lines carry other metrics before the first
/// reportable checkpoint.
#[derive(Debug, Deserialize)]
struct LatestRecord {
    epoch: Option<i64>,
    total_samples: Option<i64>,
    samples_seen: Option<i64>,
}

/// Compute progress from the full log text. Pure: same text, same result.
pub fn compute(text: &str) -> Progress {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let (Some(first), Some(last)) = (lines.next(), lines.next_back()) else {
        return Progress::Pending;
    };

    let Ok(first) = serde_json::from_str::<FirstRecord>(first) else {
        return Progress::Pending;
    };
    let Ok(latest) = serde_json::from_str::<LatestRecord>(last) else {
        return Progress::Pending;
    };
    let (Some(epoch), Some(total_samples), Some(samples_seen)) =
        (latest.epoch, latest.total_samples, latest.samples_seen)
    else {
        return Progress::Pending;
    };

    fraction(first.script_args.num_epochs, epoch, total_samples, samples_seen)
}

fn fraction(num_epochs: i64, epoch: i64, total_samples: i64, samples_seen: i64) -> Progress {
    if total_samples == 0 {
        return Progress::Invalid(InvalidReason::ZeroTotalSamples);
    }
    for (field, value) in [
        ("total_samples", total_samples),
        ("epoch", epoch),
        ("samples_seen", samples_seen),
    ] {
        if value < 0 {
            return Progress::Invalid(InvalidReason::Negative(field));
        }
    }
    if num_epochs < 1 {
        return Progress::Invalid(InvalidReason::NoEpochs);
    }

    let total = i128::from(total_samples);
    let done = (i128::from(epoch) + 1) * total + i128::from(samples_seen) % total;
    let whole = i128::from(num_epochs) * total;

    Progress::Ready((done as f64 / whole as f64).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = r#"{"script_args":{"num_epochs":2,"batch_size":8}}"#;

    fn log(lines: &[&str]) -> String {
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    #[test]
    fn empty_and_single_line_are_pending() {
        assert_eq!(compute(""), Progress::Pending);
        assert_eq!(compute(&log(&[HEADER])), Progress::Pending);
        assert_eq!(compute(&log(&[HEADER, "", "   "])), Progress::Pending);
    }

    #[test]
    fn mid_first_epoch() {
        let text = log(&[HEADER, r#"{"epoch":0,"total_samples":100,"samples_seen":50}"#]);
        assert_eq!(compute(&text), Progress::Ready(0.75));
    }

    #[test]
    fn final_epoch_saturates_when_samples_wrap() {
        let text = log(&[
            HEADER,
            r#"{"epoch":0,"total_samples":100,"samples_seen":50}"#,
            r#"{"epoch":1,"total_samples":100,"samples_seen":0}"#,
        ]);
        assert_eq!(compute(&text), Progress::Ready(1.0));
    }

    #[test]
    fn overshoot_is_clamped() {
        let text = log(&[HEADER, r#"{"epoch":1,"total_samples":100,"samples_seen":150}"#]);
        assert_eq!(compute(&text), Progress::Ready(1.0));

        let text = log(&[HEADER, r#"{"epoch":7,"total_samples":100,"samples_seen":720}"#]);
        assert_eq!(compute(&text), Progress::Ready(1.0));
    }

    #[test]
    fn general_formula() {
        let header = r#"{"script_args":{"num_epochs":4}}"#;
        let text = log(&[header, r#"{"epoch":1,"total_samples":40,"samples_seen":70}"#]);
        // (2 * 40 + 70 % 40) / (4 * 40) = 110 / 160
        assert_eq!(compute(&text), Progress::Ready(110.0 / 160.0));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let text = log(&[
            HEADER,
            r#"{"epoch":0,"step":3,"loss":0.42,"total_samples":100,"samples_seen":25,"lr":0.0001}"#,
        ]);
        assert_eq!(compute(&text), Progress::Ready(0.625));
    }

    #[test]
    fn truncated_last_line_is_pending() {
        let text = format!(
            "{}\n{}",
            HEADER, r#"{"epoch":0,"total_samples":100,"samp"#
        );
        assert_eq!(compute(&text), Progress::Pending);
    }

    #[test]
    fn missing_fields_are_pending() {
        let text = log(&[HEADER, r#"{"epoch":0,"loss":1.3}"#]);
        assert_eq!(compute(&text), Progress::Pending);

        let text = log(&[HEADER, r#"{"status":"loading model"}"#]);
        assert_eq!(compute(&text), Progress::Pending);
    }

    #[test]
    fn bad_first_record_is_pending() {
        let text = log(&[
            r#"{"script_args":{}}"#,
            r#"{"epoch":0,"total_samples":100,"samples_seen":50}"#,
        ]);
        assert_eq!(compute(&text), Progress::Pending);

        let text = log(&["not json", r#"{"epoch":0,"total_samples":100,"samples_seen":50}"#]);
        assert_eq!(compute(&text), Progress::Pending);
    }

    #[test]
    fn wrongly_typed_fields_are_pending() {
        let text = log(&[HEADER, r#"{"epoch":"0","total_samples":100,"samples_seen":50}"#]);
        assert_eq!(compute(&text), Progress::Pending);
    }

    #[test]
    fn zero_total_samples_is_invalid() {
        let text = log(&[HEADER, r#"{"epoch":0,"total_samples":0,"samples_seen":0}"#]);
        assert_eq!(compute(&text), Progress::Invalid(InvalidReason::ZeroTotalSamples));
    }

    #[test]
    fn negative_counts_are_invalid() {
        let text = log(&[HEADER, r#"{"epoch":0,"total_samples":100,"samples_seen":-5}"#]);
        assert_eq!(
            compute(&text),
            Progress::Invalid(InvalidReason::Negative("samples_seen"))
        );

        let text = log(&[
            r#"{"script_args":{"num_epochs":0}}"#,
            r#"{"epoch":0,"total_samples":100,"samples_seen":5}"#,
        ]);
        assert_eq!(compute(&text), Progress::Invalid(InvalidReason::NoEpochs));
    }

    #[test]
    fn compute_is_idempotent() {
        let text = log(&[HEADER, r#"{"epoch":0,"total_samples":300,"samples_seen":123}"#]);
        assert_eq!(compute(&text), compute(&text));
    }

    #[test]
    fn appended_run_is_monotonic() {
        let num_epochs = 3;
        let total_samples = 64;
        let batch = 16;
        let mut text = format!("{{\"script_args\":{{\"num_epochs\":{num_epochs}}}}}\n");
        let mut last = 0.0;

        for seen in (batch..=num_epochs * total_samples).step_by(batch as usize) {
            // The trainer reports a wrapped counter under the epoch it is entering.
            let epoch = (seen / total_samples).min(num_epochs - 1);
            text.push_str(&format!(
                "{{\"epoch\":{epoch},\"total_samples\":{total_samples},\"samples_seen\":{seen}}}\n"
            ));
            let Progress::Ready(p) = compute(&text) else {
                panic!("expected progress after {seen} samples");
            };
            assert!(p >= last, "progress went from {last} to {p}");
            assert!((0.0..=1.0).contains(&p));
            last = p;
        }
        assert_eq!(last, 1.0);
    }
}
