/*!
Numeric reductions over sample values.

Everything in here operates on plain `f64` slices pulled out of the result
table. The reductions are deliberately small and boring; the only slightly
interesting bit is the modified Z-score used for outlier detection, which is
robust against the outliers it is hunting because it is built on the median
and the median absolute deviation rather than the mean.
*/

/// The choice of aggregate statistic to compute over each group of samples.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stat {
    Min,
    Max,
    Mean,
    Median,
    /// Sample standard deviation, i.e., with the N-1 denominator.
    Std,
    /// The group's mean divided by the smallest mean among its peer groups,
    /// yielding a dimensionless "times slower than the best" ratio.
    Relative,
}

impl Stat {
    /// Compute this statistic for one group of values, without any peer
    /// context. `Relative` reduces to the group mean here; callers divide by
    /// the minimum peer mean afterward.
    pub fn aggregate(&self, xs: &[f64]) -> Option<f64> {
        match *self {
            Stat::Min => min(xs),
            Stat::Max => max(xs),
            Stat::Mean => mean(xs),
            Stat::Median => median(xs),
            Stat::Std => stddev(xs),
            Stat::Relative => mean(xs),
        }
    }
}

impl std::fmt::Display for Stat {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let nice = match *self {
            Stat::Min => "min",
            Stat::Max => "max",
            Stat::Mean => "mean",
            Stat::Median => "median",
            Stat::Std => "std",
            Stat::Relative => "relative",
        };
        write!(f, "{}", nice)
    }
}

impl std::str::FromStr for Stat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Stat> {
        let stat = match s {
            "min" => Stat::Min,
            "max" => Stat::Max,
            "mean" => Stat::Mean,
            "median" => Stat::Median,
            "std" => Stat::Std,
            "relative" => Stat::Relative,
            unknown => {
                anyhow::bail!(
                    "unrecognized statistic name '{}', must be \
                     one of min, max, mean, median, std or relative.",
                    unknown,
                )
            }
        };
        Ok(stat)
    }
}

pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        let sum: f64 = xs.iter().sum();
        Some(sum / (xs.len() as f64))
    }
}

/// Sample standard deviation. Returns `None` for fewer than two values,
/// where the N-1 denominator is undefined.
pub fn stddev(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let mean = mean(xs)?;
    let mut deviation_sum_squared = 0.0;
    for &x in xs.iter() {
        deviation_sum_squared += (x - mean).powi(2);
    }
    Some((deviation_sum_squared / ((xs.len() - 1) as f64)).sqrt())
}

pub fn median(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    // We have no NaNs, so the sort is fine.
    let mut xs = xs.to_vec();
    xs.sort_unstable_by(|x, y| x.partial_cmp(y).unwrap());
    if xs.len() % 2 == 1 {
        // Works because integer division rounds down
        Some(xs[xs.len() / 2])
    } else {
        let second = xs.len() / 2;
        let first = second - 1;
        mean(&[xs[first], xs[second]])
    }
}

/// Median absolute deviation from the median.
pub fn mad(xs: &[f64]) -> Option<f64> {
    let xmed = median(xs)?;
    let devs = xs.iter().map(|x| (x - xmed).abs()).collect::<Vec<f64>>();
    median(&devs)
}

pub fn min(xs: &[f64]) -> Option<f64> {
    let mut it = xs.iter().copied();
    let mut min = it.next()?;
    for x in it {
        if x < min {
            min = x;
        }
    }
    Some(min)
}

pub fn max(xs: &[f64]) -> Option<f64> {
    let mut it = xs.iter().copied();
    let mut max = it.next()?;
    for x in it {
        if x > max {
            max = x;
        }
    }
    Some(max)
}

/// The modified Z-score of every value: 0.6745 * (x - median) / MAD.
///
/// When the MAD is zero (at least half the values are identical) every score
/// is zero, so that nothing is flagged as an outlier.
pub fn modified_zscores(xs: &[f64]) -> Vec<f64> {
    let (xmed, xmad) = match (median(xs), mad(xs)) {
        (Some(xmed), Some(xmad)) => (xmed, xmad),
        _ => return vec![],
    };
    if xmad == 0.0 {
        return vec![0.0; xs.len()];
    }
    xs.iter().map(|x| 0.6745 * (x - xmed) / xmad).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basics() {
        let xs = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(Some(1.0), min(&xs));
        assert_eq!(Some(4.0), max(&xs));
        assert_eq!(Some(2.5), mean(&xs));
        assert_eq!(Some(2.5), median(&xs));
        assert_eq!(Some(3.0), median(&[5.0, 1.0, 3.0]));
        assert_eq!(Some(1.0), mad(&xs));
        assert_eq!(None, mean(&[]));
    }

    #[test]
    fn sample_stddev_uses_nminus1() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        // Population stddev of this set is exactly 2; the sample form is
        // sqrt(32/7).
        let got = stddev(&xs).unwrap();
        assert!((got - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(None, stddev(&[1.0]));
    }

    #[test]
    fn zscores_flag_the_obvious_outlier() {
        let xs = [10.0, 10.1, 9.9, 10.0, 50.0];
        let zs = modified_zscores(&xs);
        assert!(zs[4].abs() > 3.5, "expected outlier, got {:?}", zs);
        assert!(zs[..4].iter().all(|z| z.abs() <= 3.5));
    }

    #[test]
    fn zscores_invariant_under_offset_and_scale() {
        let xs = [10.0, 10.1, 9.9, 10.0, 50.0];
        let shifted: Vec<f64> = xs.iter().map(|x| 1000.0 + 7.0 * x).collect();
        let z1 = modified_zscores(&xs);
        let z2 = modified_zscores(&shifted);
        for (a, b) in z1.iter().zip(z2.iter()) {
            assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
        }
    }

    #[test]
    fn zero_mad_means_no_outliers() {
        let xs = [5.0, 5.0, 5.0, 5.0, 1000.0];
        assert!(modified_zscores(&xs).iter().all(|&z| z == 0.0));
    }
}
