//! Overlap statistics: the hypergeometric tail sum and a sided
//! Mann-Whitney U test with a per-run memo cache.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::function::factorial::ln_binomial;

use crate::StatisticsError;

/// Probability of drawing `k` or more successes, i.e. `P(X >= k)` for
/// `X ~ Hypergeometric(population = u, successes = m, draws = n)`.
///
/// Terms below `min_k` are never included, so the sum starts at
/// `max(k, min_k)`. Each term is evaluated from log binomial coefficients and
/// the tail is accumulated with log-sum-exp, which keeps the result finite
/// for universes in the tens of thousands.
///
/// # Errors
///
/// Returns [`StatisticsError::InvalidValue`] when the sample or the success
/// count is larger than the universe.
pub fn hyper_geom_pvalue_sum(
    u: usize,
    n: usize,
    m: usize,
    k: usize,
    min_k: usize,
) -> Result<f64, StatisticsError> {
    if n > u || m > u {
        return Err(StatisticsError::InvalidValue(format!(
            "hypergeometric sample ({n}) and successes ({m}) must not exceed universe ({u})"
        )));
    }
    let lowest_possible = (n + m).saturating_sub(u);
    let start = k.max(min_k).max(lowest_possible);
    let end = n.min(m);
    if start > end {
        return Ok(0.0);
    }

    let (u, n, m) = (u as u64, n as u64, m as u64);
    let log_total = ln_binomial(u, n);
    let log_terms: Vec<f64> = (start as u64..=end as u64)
        .map(|i| ln_binomial(m, i) + ln_binomial(u - m, n - i) - log_total)
        .collect();

    let max_log = log_terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max_log == f64::NEG_INFINITY {
        return Ok(0.0);
    }
    let sum: f64 = log_terms.iter().map(|t| (t - max_log).exp()).sum();
    let p = (max_log + sum.ln()).exp();
    if p.is_nan() {
        return Err(StatisticsError::FoundNANValue);
    }
    Ok(p.min(1.0))
}

/// Which alternative a Mann-Whitney test reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MannWhitneySide {
    TwoSided,
    /// The sample tends to score higher than the background.
    Greater,
    /// The sample tends to score lower than the background.
    Less,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MannWhitneyResult {
    pub two_sided: f64,
    pub greater: f64,
    pub less: f64,
}

impl MannWhitneyResult {
    /// Result used when a test carries no information.
    pub fn no_signal() -> Self {
        MannWhitneyResult {
            two_sided: 1.0,
            greater: 1.0,
            less: 1.0,
        }
    }

    pub fn p_value(&self, side: MannWhitneySide) -> f64 {
        match side {
            MannWhitneySide::TwoSided => self.two_sided,
            MannWhitneySide::Greater => self.greater,
            MannWhitneySide::Less => self.less,
        }
    }
}

/// Mann-Whitney U test of `sample` against `background`, all three sides at once.
///
/// Ties get average ranks and the p-values use the normal approximation of
/// U without continuity or tie correction.
///
/// # Errors
///
/// Returns [`StatisticsError::InvalidValue`] if either input is empty and
/// [`StatisticsError::FoundNANValue`] if an input contains NaN.
pub fn mann_whitney_u_test(sample: &[f64], background: &[f64]) -> Result<MannWhitneyResult, StatisticsError> {
    if sample.is_empty() || background.is_empty() {
        return Err(StatisticsError::InvalidValue(
            "mann-whitney: both samples must be non-empty".to_owned(),
        ));
    }
    if sample.iter().chain(background.iter()).any(|x| x.is_nan()) {
        return Err(StatisticsError::FoundNANValue);
    }

    let n1 = sample.len();
    let n2 = background.len();
    let mut combined: Vec<(f64, bool)> = sample
        .iter()
        .map(|x| (*x, true))
        .chain(background.iter().map(|x| (*x, false)))
        .collect();
    combined.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Rank sum of the sample, ties share their average rank.
    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < combined.len() {
        let mut j = i + 1;
        while j < combined.len() && combined[j].0 == combined[i].0 {
            j += 1;
        }
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        let in_sample = combined[i..j].iter().filter(|(_, s)| *s).count();
        rank_sum += avg_rank * in_sample as f64;
        i = j;
    }

    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let u1 = rank_sum - n1f * (n1f + 1.0) / 2.0;
    let mean = n1f * n2f / 2.0;
    let sd = (n1f * n2f * (n1f + n2f + 1.0) / 12.0).sqrt();
    if sd == 0.0 {
        return Ok(MannWhitneyResult::no_signal());
    }

    let normal = Normal::new(0.0, 1.0).map_err(|e| StatisticsError::InvalidValue(e.to_string()))?;
    let z = (u1 - mean) / sd;
    let less = normal.cdf(z);
    let greater = 1.0 - less;
    let two_sided = (2.0 * less.min(greater)).min(1.0);
    Ok(MannWhitneyResult {
        two_sided,
        greater,
        less,
    })
}

struct CacheKey {
    sample: Vec<u64>,
    background: Arc<[f64]>,
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.sample == other.sample
            && (Arc::ptr_eq(&self.background, &other.background)
                || self
                    .background
                    .iter()
                    .map(|x| x.to_bits())
                    .eq(other.background.iter().map(|x| x.to_bits())))
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sample.hash(state);
        self.background.len().hash(state);
        for x in self.background.iter().take(8) {
            x.to_bits().hash(state);
        }
    }
}

/// Memoised Mann-Whitney results for one engine run.
///
/// Keyed by the exact sample and background values. Safe to share between
/// worker threads; a result is computed at most a few times per key and is
/// never replaced once stored.
#[derive(Default)]
pub struct MannWhitneyCache {
    results: DashMap<CacheKey, MannWhitneyResult, ahash::RandomState>,
}

impl MannWhitneyCache {
    pub fn new() -> Self {
        MannWhitneyCache::default()
    }

    /// Runs [`mann_whitney_u_test`], reusing a stored result for identical inputs.
    pub fn test(&self, sample: &[f64], background: &Arc<[f64]>) -> Result<MannWhitneyResult, StatisticsError> {
        let mut bits: Vec<u64> = sample.iter().map(|x| x.to_bits()).collect();
        bits.sort_unstable();
        let key = CacheKey {
            sample: bits,
            background: Arc::clone(background),
        };
        if let Some(found) = self.results.get(&key) {
            return Ok(*found);
        }
        let result = mann_whitney_u_test(sample, background)?;
        Ok(*self.results.entry(key).or_insert(result))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
