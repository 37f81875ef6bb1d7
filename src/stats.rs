//! Descriptive statistics for predictive sample sets.
//!
//! The mean uses Kahan compensated summation; variances use Welford's
//! online update, so long runs of nearly equal stresses do not lose digits.

/// Kahan compensated sum
fn kahan_sum(data: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut compensation = 0.0;
    for &x in data {
        let y = x - compensation;
        let t = sum + y;
        compensation = (t - sum) - y;
        sum = t;
    }
    sum
}

/// Running mean and sum of squared deviations
struct Welford {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn from_slice(data: &[f64]) -> Welford {
        let mut acc = Welford {
            count: 0,
            mean: 0.0,
            m2: 0.0,
        };
        for &x in data {
            acc.count += 1;
            let delta = x - acc.mean;
            acc.mean += delta / acc.count as f64;
            acc.m2 += delta * (x - acc.mean);
        }
        acc
    }
}

/// Arithmetic mean, `None` for empty input
pub fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    Some(kahan_sum(data) / data.len() as f64)
}

/// Population standard deviation (denominator `n`)
///
/// # Returns
/// - `None` if `data` is empty
pub fn population_std_dev(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    let acc = Welford::from_slice(data);
    Some((acc.m2 / acc.count as f64).max(0.0).sqrt())
}

/// Sample standard deviation with Bessel's correction (denominator `n - 1`)
///
/// # Returns
/// - `None` if `data` has fewer than two entries
pub fn sample_std_dev(data: &[f64]) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    let acc = Welford::from_slice(data);
    Some((acc.m2 / (acc.count - 1) as f64).max(0.0).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert!((mean(&[1.0, 2.0, 3.0, 4.0]).unwrap() - 2.5).abs() < 1e-15);
    }

    #[test]
    fn test_population_std_dev() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((population_std_dev(&v).unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(population_std_dev(&[3.0]), Some(0.0));
        assert_eq!(population_std_dev(&[]), None);
    }

    #[test]
    fn test_sample_std_dev() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((sample_std_dev(&v).unwrap() - 2.138089935299395).abs() < 1e-10);
        assert_eq!(sample_std_dev(&[1.0]), None);
    }
}
