use crate::detect::DetectError;

/// Hold-time samples of one neighbor key, oldest first.
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn from_holdtimes(holdtimes: &[u32]) -> Self {
        Self::new(holdtimes.iter().map(|&value| f64::from(value)).collect())
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        sum_sq_diff / self.values.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// std_dev / mean. Needs two samples and a non-zero mean.
    pub fn coefficient_of_variation(&self) -> Result<f64, DetectError> {
        if self.values.len() < 2 {
            return Err(DetectError::InsufficientSamples {
                needed: 2,
                have: self.values.len(),
            });
        }
        let mean = self.mean();
        if mean.abs() < f64::EPSILON {
            return Err(DetectError::ZeroMean);
        }
        Ok(self.std_dev() / mean)
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::TimeSeries;
    use crate::detect::DetectError;

    #[test]
    fn population_statistics() {
        let ts = TimeSeries::new(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(ts.mean(), 3.0);
        assert_eq!(ts.variance(), 2.0);
        let cv = ts.coefficient_of_variation().expect("cv");
        assert!((cv - 2.0_f64.sqrt() / 3.0).abs() < 1e-9);
        assert_eq!(ts.min(), Some(1.0));
    }

    #[test]
    fn steady_holdtimes_have_no_variation() {
        let ts = TimeSeries::from_holdtimes(&[120, 120, 120]);
        assert_eq!(ts.coefficient_of_variation().expect("cv"), 0.0);
    }

    #[test]
    fn variation_needs_two_samples() {
        let ts = TimeSeries::from_holdtimes(&[90]);
        assert!(matches!(
            ts.coefficient_of_variation(),
            Err(DetectError::InsufficientSamples { needed: 2, have: 1 })
        ));
        let zeros = TimeSeries::from_holdtimes(&[0, 0]);
        assert!(matches!(zeros.coefficient_of_variation(), Err(DetectError::ZeroMean)));
    }
}
