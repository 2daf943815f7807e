//! Confidence to severity mapping.
//!
//! One threshold table for every call site: Critical at 0.8 and above,
//! Warning at 0.5 and above, Info below that.

use crate::models::Severity;

pub const CRITICAL_THRESHOLD: f64 = 0.8;
pub const WARNING_THRESHOLD: f64 = 0.5;

/// Classify a confidence score. NaN classifies as Info.
pub fn classify(confidence: f64) -> Severity {
    if confidence >= CRITICAL_THRESHOLD {
        Severity::Critical
    } else if confidence >= WARNING_THRESHOLD {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Classify a record that may carry only an upstream tier.
///
/// The confidence wins whenever it is present; the tier is consulted only
/// when it is missing. With neither the record is Info.
pub fn classify_record(confidence: Option<f64>, tier: Option<&str>) -> Severity {
    match (confidence, tier.and_then(Severity::from_tier)) {
        (Some(c), _) => classify(c),
        (None, Some(severity)) => severity,
        (None, None) => Severity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries() {
        assert_eq!(classify(1.0), Severity::Critical);
        assert_eq!(classify(0.8), Severity::Critical);
        assert_eq!(classify(0.7999), Severity::Warning);
        assert_eq!(classify(0.5), Severity::Warning);
        assert_eq!(classify(0.4999), Severity::Info);
        assert_eq!(classify(0.0), Severity::Info);
        assert_eq!(classify(f64::NAN), Severity::Info);
    }

    #[test]
    fn monotonic_over_the_unit_interval() {
        let mut previous = Severity::Info;
        for step in 0..=1000 {
            let c = step as f64 / 1000.0;
            let severity = classify(c);
            assert!(severity >= previous, "classify({}) went down", c);
            match severity {
                Severity::Critical => assert!(c >= 0.8),
                Severity::Warning => assert!((0.5..0.8).contains(&c)),
                Severity::Info => assert!(c < 0.5),
            }
            previous = severity;
        }
    }

    #[test]
    fn confidence_beats_tier() {
        assert_eq!(classify_record(Some(0.3), Some("high")), Severity::Info);
        assert_eq!(classify_record(None, Some("medium")), Severity::Warning);
        assert_eq!(classify_record(None, Some("bogus")), Severity::Info);
        assert_eq!(classify_record(None, None), Severity::Info);
    }
}
