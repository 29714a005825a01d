//! Descriptive statistics over a collected sample array
//!
//! Used to validate sensor output after a streaming capture. All moments
//! are population moments (divisor n), quantiles interpolate between the
//! two central elements when the percentile lands exactly on an element
//! boundary and take the nearest element otherwise.

use crate::error::{Error, Result};
use std::fmt;

/// Full-scale code of the 16-bit sample path, used as the SNR reference
pub const FULL_SCALE_CODE: f64 = 32768.0;

/// Quantile percentages reported in a [`StatisticsSummary`]
pub const QUANTILE_PERCENTS: [f64; 7] = [1.0, 5.0, 25.0, 50.0, 75.0, 95.0, 99.0];

/// Numeric reduction of one sample array
#[derive(Debug, Clone, Copy)]
pub struct StatisticsSummary {
    /// Number of samples
    pub count: usize,
    /// Smallest sample
    pub min: f64,
    /// Largest sample
    pub max: f64,
    /// 1st percentile
    pub p1: f64,
    /// 5th percentile
    pub p5: f64,
    /// 25th percentile
    pub p25: f64,
    /// Median
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// Population variance
    pub variance: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Third standardized moment
    pub skewness: f64,
    /// Fourth standardized moment
    pub kurtosis: f64,
    /// p95 - p5
    pub range_p5_p95: f64,
    /// p75 - p25 (interquartile range)
    pub range_p25_p75: f64,
    /// 20 * log10(std_dev / full scale), dB
    pub snr_db: f64,
}

impl StatisticsSummary {
    /// Reduce `samples` against the default full-scale code.
    ///
    /// Fails on an empty array.
    pub fn from_samples(samples: &[f64]) -> Result<Self> {
        Self::with_full_scale(samples, FULL_SCALE_CODE)
    }

    /// Reduce `samples` with an explicit full-scale reference for the SNR
    pub fn with_full_scale(samples: &[f64], full_scale: f64) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::InvalidParameter(
                "statistics require a non-empty sample array".to_string(),
            ));
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = sorted.len() as f64;

        let mean = sorted.iter().sum::<f64>() / n;
        let mut m2 = 0.0;
        let mut m3 = 0.0;
        let mut m4 = 0.0;
        for &x in &sorted {
            let d = x - mean;
            let d2 = d * d;
            m2 += d2;
            m3 += d2 * d;
            m4 += d2 * d2;
        }
        let variance = m2 / n;
        let std_dev = variance.sqrt();
        let (skewness, kurtosis) = if std_dev > 0.0 {
            ((m3 / n) / std_dev.powi(3), (m4 / n) / std_dev.powi(4))
        } else {
            (0.0, 0.0)
        };

        let p1 = quantile(&sorted, 1.0);
        let p5 = quantile(&sorted, 5.0);
        let p25 = quantile(&sorted, 25.0);
        let p50 = quantile(&sorted, 50.0);
        let p75 = quantile(&sorted, 75.0);
        let p95 = quantile(&sorted, 95.0);
        let p99 = quantile(&sorted, 99.0);

        Ok(StatisticsSummary {
            count: sorted.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p1,
            p5,
            p25,
            p50,
            p75,
            p95,
            p99,
            mean,
            variance,
            std_dev,
            skewness,
            kurtosis,
            range_p5_p95: p95 - p5,
            range_p25_p75: p75 - p25,
            snr_db: 20.0 * (std_dev / full_scale).log10(),
        })
    }
}

impl fmt::Display for StatisticsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} min={:.3} p5={:.3} p50={:.3} p95={:.3} max={:.3} mean={:.3} std={:.3} skew={:.3} kurt={:.3} snr={:.1}dB",
            self.count,
            self.min,
            self.p5,
            self.p50,
            self.p95,
            self.max,
            self.mean,
            self.std_dev,
            self.skewness,
            self.kurtosis,
            self.snr_db
        )
    }
}

/// Percentile of a sorted array.
///
/// When `pct/100 * n` lands exactly on an element boundary the result is
/// the average of the elements on both sides; otherwise the containing
/// element is taken directly.
fn quantile(sorted: &[f64], pct: f64) -> f64 {
    let n = sorted.len();
    let position = pct / 100.0 * n as f64;
    let floor = position.floor();

    let on_boundary = position == floor;
    let index = floor as usize;
    if on_boundary && index > 0 && index < n {
        (sorted[index - 1] + sorted[index]) / 2.0
    } else {
        sorted[index.min(n - 1)]
    }
}
