//! Dataset invariant checks shared by every component.

use crate::dataset::{Dataset, REQUIRED_ATTRIBUTES};

/// First dataset invariant found violated.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{fixes} fixes for {traces} trace columns")]
    FixCountMismatch { fixes: usize, traces: usize },
    #[error("missing attribute '{0}'")]
    MissingAttribute(String),
    #[error("attribute '{0}' is not numeric")]
    NonNumericAttribute(String),
    #[error("attribute '{key}' {reason}")]
    InvalidAttribute { key: String, reason: String },
}

/// Checks the dataset invariants in a fixed order without touching the data.
pub fn validate(dataset: &Dataset) -> Result<(), ValidationError> {
    let traces = dataset.trace_count();
    let fixes = dataset.fixes().len();
    if fixes != traces {
        return Err(ValidationError::FixCountMismatch { fixes, traces });
    }

    let attrs = dataset.attrs();
    for key in REQUIRED_ATTRIBUTES {
        attrs.get_f64(key)?;
    }

    let fs = attrs.fs()?;
    if !fs.is_finite() || fs <= 0.0 {
        return Err(ValidationError::InvalidAttribute {
            key: "fs".into(),
            reason: format!("must be positive, got {}", fs),
        });
    }

    let pre_trig = attrs.pre_trig()?;
    if pre_trig < 0 {
        return Err(ValidationError::InvalidAttribute {
            key: "pre_trig".into(),
            reason: format!("cannot be negative, got {}", pre_trig),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::sample_dataset;
    use crate::dataset::Attributes;

    #[test]
    fn validate_accepts_well_formed_dataset() {
        assert!(validate(&sample_dataset(8, 4)).is_ok());
    }

    #[test]
    fn validate_names_first_missing_attribute() {
        let (traces, fixes, attrs) = sample_dataset(8, 4).into_parts();
        let mut trimmed = Attributes::new();
        for (key, value) in attrs.iter().filter(|(key, _)| key.as_str() != "prf") {
            trimmed.insert(key.clone(), value.clone());
        }
        let err = crate::Dataset::new(traces, fixes, trimmed).unwrap_err();
        assert_eq!(err, ValidationError::MissingAttribute("prf".into()));
    }

    #[test]
    fn validate_rejects_non_positive_sampling_frequency() {
        let (traces, fixes, _) = sample_dataset(8, 4).into_parts();
        let attrs = Attributes::acquisition(0.0, 0, 2000, 8, 1, 50);
        let err = crate::Dataset::new(traces, fixes, attrs).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAttribute { ref key, .. } if key == "fs"));
    }

    #[test]
    fn validate_rejects_text_pre_trigger() {
        let (traces, fixes, mut attrs) = sample_dataset(8, 4).into_parts();
        attrs.insert("pre_trig", "eight");
        let err = crate::Dataset::new(traces, fixes, attrs).unwrap_err();
        assert_eq!(err, ValidationError::NonNumericAttribute("pre_trig".into()));
    }
}
