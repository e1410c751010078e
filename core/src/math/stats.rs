pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    pub fn max(values: &[f64]) -> Option<f64> {
        values
            .iter()
            .copied()
            .filter(|value| !value.is_nan())
            .fold(None, |acc, value| match acc {
                Some(current) if current >= value => Some(current),
                _ => Some(value),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_sequence_is_zero() {
        assert_eq!(StatsHelper::mean(&[]), 0.0);
        assert_eq!(StatsHelper::mean(&[1.0, 2.0, 6.0]), 3.0);
    }

    #[test]
    fn max_skips_nan_values() {
        assert_eq!(StatsHelper::max(&[1.0, f64::NAN, 3.0]), Some(3.0));
        assert_eq!(StatsHelper::max(&[]), None);
    }
}
