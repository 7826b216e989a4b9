//! Look-ahead greedy coverage planner.
//!
//! Turns a market liquidity histogram into at most `n` contiguous target
//! segments. Each round seeds at the bin with the largest remaining gap,
//! expands the segment left/right while the net score improves, then
//! subtracts the chosen height from the covered span.

use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive, Zero};

/// One histogram bin of market liquidity.
#[derive(Debug, Clone)]
pub struct Bin {
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: BigInt,
    pub is_current: bool,
}

/// Planner knobs. Defaults match the production tuning.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of segments.
    pub n: usize,
    /// Quantile of positive gaps used as the segment height.
    pub quantile: f64,
    /// Width-penalty coefficient.
    pub lambda: f64,
    /// Waste-penalty coefficient.
    pub beta: f64,
    /// Multiplicative bonus when a segment covers the current tick.
    pub current_bonus: f64,
    /// Maximum bins an expansion may jump per side and iteration.
    pub look_ahead: usize,
    /// Drop segments whose total amount falls below max/(2n).
    pub enable_min_liq: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            n: 5,
            quantile: 0.6,
            lambda: 50.0,
            beta: 0.5,
            current_bonus: 0.0,
            look_ahead: 3,
            enable_min_liq: false,
        }
    }
}

/// A proposed target range with its liquidity height.
#[derive(Debug, Clone)]
pub struct Segment {
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity_added: BigInt,
}

/// Coverage quality against the original histogram.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics {
    pub covered: f64,
    pub gap: f64,
    pub over: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CoverageResult {
    pub segments: Vec<Segment>,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Copy)]
struct SpanSegment {
    left: usize,
    right: usize,
    height: f64,
}

/// Runs the planner. Never fails: empty input yields zero segments.
pub fn run(bins: &[Bin], cfg: &Config) -> CoverageResult {
    if bins.is_empty() {
        return CoverageResult::default();
    }

    let target: Vec<f64> = bins
        .iter()
        .map(|bin| bin.liquidity.to_f64().unwrap_or(0.0).max(0.0))
        .collect();
    let mut gaps = target.clone();

    let mut spans: Vec<SpanSegment> = Vec::new();
    while spans.len() < cfg.n {
        // Seed: bin with the largest remaining gap; lowest index wins ties.
        let mut seed = None;
        let mut max_gap = 0.0;
        for (i, &gap) in gaps.iter().enumerate() {
            if gap > max_gap {
                max_gap = gap;
                seed = Some(i);
            }
        }
        let Some(seed) = seed else { break };

        let span = expand_with_look_ahead(&gaps, bins, seed, cfg);
        tracing::debug!(
            round = spans.len() + 1,
            seed,
            left = span.left,
            right = span.right,
            height = span.height,
            "coverage segment chosen"
        );
        if span.height <= 0.0 {
            break;
        }

        for gap in &mut gaps[span.left..=span.right] {
            *gap = (*gap - span.height).max(0.0);
        }
        spans.push(span);
    }

    if cfg.enable_min_liq {
        spans = enforce_min_liquidity(spans, cfg.n);
    }

    to_result(bins, &spans, &target)
}

/// Expands [seed, seed] while any look-ahead step on either side improves
/// the net score. Equal scores keep the smaller span.
fn expand_with_look_ahead(gaps: &[f64], bins: &[Bin], seed: usize, cfg: &Config) -> SpanSegment {
    let total_bins = gaps.len();
    let (mut left, mut right) = (seed, seed);

    let height = segment_height(gaps, left, right, cfg.quantile);
    let mut current_score = net_score(gaps, bins, left, right, height, cfg, total_bins);

    loop {
        let (mut best_left, mut best_right) = (left, right);
        let mut best_score = current_score;

        for steps in 1..=cfg.look_ahead {
            if steps > left {
                break;
            }
            let new_left = left - steps;
            let new_height = segment_height(gaps, new_left, right, cfg.quantile);
            let score = net_score(gaps, bins, new_left, right, new_height, cfg, total_bins);
            if score > best_score {
                best_score = score;
                best_left = new_left;
                best_right = right;
            }
        }

        for steps in 1..=cfg.look_ahead {
            let new_right = right + steps;
            if new_right >= total_bins {
                break;
            }
            let new_height = segment_height(gaps, left, new_right, cfg.quantile);
            let score = net_score(gaps, bins, left, new_right, new_height, cfg, total_bins);
            if score > best_score {
                best_score = score;
                best_left = left;
                best_right = new_right;
            }
        }

        if best_left == left && best_right == right {
            break;
        }
        left = best_left;
        right = best_right;
        current_score = best_score;
    }

    let height = segment_height(gaps, left, right, cfg.quantile);
    SpanSegment { left, right, height }
}

/// Segment height: the q-quantile of the positive gaps in the span.
fn segment_height(gaps: &[f64], left: usize, right: usize, q: f64) -> f64 {
    let positive: Vec<f64> = gaps[left..=right].iter().copied().filter(|&g| g > 0.0).collect();
    if positive.is_empty() {
        return 0.0;
    }
    quantile(positive, q)
}

/// score = captured - (underCover + beta * waste + widthPenalty)
/// widthPenalty = lambda * max(0, numBins/idealWidth - 1) * avgGap.
/// avgGap deliberately averages over every bin in the span, zero gaps
/// included.
fn net_score(
    gaps: &[f64],
    bins: &[Bin],
    left: usize,
    right: usize,
    height: f64,
    cfg: &Config,
    total_bins: usize,
) -> f64 {
    let mut captured = 0.0;
    let mut under_cover = 0.0;
    let mut waste = 0.0;
    let mut sum_gap = 0.0;
    let mut contains_current = false;

    for i in left..=right {
        captured += gaps[i].min(height);
        under_cover += (gaps[i] - height).max(0.0);
        waste += (height - gaps[i]).max(0.0);
        sum_gap += gaps[i];
        if bins[i].is_current {
            contains_current = true;
        }
    }

    let num_bins = (right - left + 1) as f64;
    let ideal_width = total_bins as f64 / cfg.n as f64;
    let excess = (num_bins / ideal_width - 1.0).max(0.0);
    let avg_gap = sum_gap / num_bins;
    let width_penalty = cfg.lambda * excess * avg_gap;

    if contains_current && cfg.current_bonus > 0.0 {
        captured *= 1.0 + cfg.current_bonus;
    }

    captured - (under_cover + cfg.beta * waste + width_penalty)
}

/// Drops segments whose amount (height x width) is below max_amount / (2n).
fn enforce_min_liquidity(spans: Vec<SpanSegment>, n: usize) -> Vec<SpanSegment> {
    if spans.is_empty() {
        return spans;
    }

    let amount = |span: &SpanSegment| span.height * (span.right - span.left + 1) as f64;
    let max_amount = spans.iter().map(amount).fold(0.0, f64::max);
    let threshold = max_amount / (n * 2) as f64;

    spans.into_iter().filter(|span| amount(span) >= threshold).collect()
}

fn to_result(bins: &[Bin], spans: &[SpanSegment], target: &[f64]) -> CoverageResult {
    let mut predicted = vec![0.0; bins.len()];
    for span in spans {
        for value in &mut predicted[span.left..=span.right] {
            *value += span.height;
        }
    }

    let segments = spans
        .iter()
        .map(|span| Segment {
            tick_lower: bins[span.left].tick_lower,
            tick_upper: bins[span.right].tick_upper,
            liquidity_added: BigInt::from_f64(span.height).unwrap_or_else(BigInt::zero),
        })
        .collect();

    CoverageResult {
        segments,
        metrics: calc_metrics(target, &predicted),
    }
}

/// covered + gap always equals the total target liquidity;
/// covered + over always equals the total predicted liquidity.
fn calc_metrics(target: &[f64], predicted: &[f64]) -> Metrics {
    let mut metrics = Metrics::default();
    for (&t, &p) in target.iter().zip(predicted) {
        metrics.covered += t.min(p);
        metrics.gap += (t - p).max(0.0);
        metrics.over += (p - t).max(0.0);
    }
    metrics
}

/// q-th quantile with linear interpolation between adjacent order statistics.
fn quantile(mut data: Vec<f64>, q: f64) -> f64 {
    data.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    if q <= 0.0 {
        return data[0];
    }
    if q >= 1.0 {
        return data[data.len() - 1];
    }

    let index = q * (data.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    if lower == upper {
        return data[lower];
    }

    let weight = index - lower as f64;
    data[lower] * (1.0 - weight) + data[upper] * weight
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bins(liquidities: &[f64], tick_width: i32, current_idx: usize) -> Vec<Bin> {
        liquidities
            .iter()
            .enumerate()
            .map(|(i, &liq)| {
                let lower = i as i32 * tick_width;
                Bin {
                    tick_lower: lower,
                    tick_upper: lower + tick_width,
                    liquidity: BigInt::from_f64(liq).unwrap_or_else(BigInt::zero),
                    is_current: i == current_idx,
                }
            })
            .collect()
    }

    fn almost_equal(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn empty_input_yields_no_segments() {
        let result = run(&[], &Config::default());
        assert!(result.segments.is_empty());
    }

    #[test]
    fn single_bin_becomes_single_segment() {
        let bins = make_bins(&[1000.0], 100, 0);
        let cfg = Config { n: 3, ..Config::default() };

        let result = run(&bins, &cfg);

        assert_eq!(result.segments.len(), 1);
        let seg = &result.segments[0];
        assert_eq!((seg.tick_lower, seg.tick_upper), (0, 100));
        assert_eq!(seg.liquidity_added, BigInt::from(1000));
    }

    #[test]
    fn uniform_liquidity_covered_by_one_wide_segment() {
        let bins = make_bins(&[500.0, 500.0, 500.0, 500.0, 500.0], 100, 2);
        let cfg = Config { n: 1, ..Config::default() };

        let result = run(&bins, &cfg);

        assert_eq!(result.segments.len(), 1);
        let seg = &result.segments[0];
        assert_eq!((seg.tick_lower, seg.tick_upper), (0, 500));
    }

    #[test]
    fn two_peaks_produce_two_segments() {
        let liqs = [0.0, 1000.0, 1000.0, 0.0, 0.0, 0.0, 800.0, 800.0, 0.0, 0.0];
        let bins = make_bins(&liqs, 100, 1);
        let cfg = Config {
            n: 5,
            look_ahead: 2,
            lambda: 50.0,
            ..Config::default()
        };

        let result = run(&bins, &cfg);

        assert!(
            result.segments.len() >= 2,
            "expected at least 2 segments, got {}",
            result.segments.len()
        );

        // One segment spans bins 1-2 and one spans bins 6-7.
        let covers = |lower: i32, upper: i32| {
            result
                .segments
                .iter()
                .any(|s| s.tick_lower <= lower && s.tick_upper >= upper)
        };
        assert!(covers(100, 300), "no segment covering the first peak");
        assert!(covers(600, 800), "no segment covering the second peak");
    }

    #[test]
    fn respects_max_segment_count() {
        let liqs: Vec<f64> = (1..=10).map(|i| i as f64 * 100.0).collect();
        let bins = make_bins(&liqs, 100, 5);
        let cfg = Config { n: 3, ..Config::default() };

        let result = run(&bins, &cfg);

        assert!(result.segments.len() <= 3);
        for seg in &result.segments {
            assert!(seg.tick_lower < seg.tick_upper);
            assert!(seg.liquidity_added > BigInt::zero());
        }
    }

    #[test]
    fn covered_plus_gap_equals_total_target() {
        let liqs = [73.0, 150.0, 220.0, 10.0, 0.0, 330.0];
        let bins = make_bins(&liqs, 100, 1);
        let cfg = Config { n: 2, ..Config::default() };

        let result = run(&bins, &cfg);

        let total: f64 = liqs.iter().sum();
        assert!(
            almost_equal(result.metrics.covered + result.metrics.gap, total, 0.01),
            "covered {} + gap {} != {}",
            result.metrics.covered,
            result.metrics.gap,
            total
        );
    }

    #[test]
    fn min_liquidity_filter_drops_dust_segments() {
        let liqs = [1000.0, 1000.0, 0.0, 0.0, 1.0, 0.0];
        let bins = make_bins(&liqs, 100, 0);
        let cfg = Config {
            n: 5,
            enable_min_liq: true,
            ..Config::default()
        };

        let result = run(&bins, &cfg);

        for seg in &result.segments {
            assert!(seg.liquidity_added > BigInt::from(1));
        }
    }

    #[test]
    fn look_ahead_zero_still_produces_segments() {
        let bins = make_bins(&[100.0, 200.0, 300.0], 100, 1);
        let cfg = Config { look_ahead: 0, ..Config::default() };

        let result = run(&bins, &cfg);
        assert!(!result.segments.is_empty());
    }

    #[test]
    fn zero_histogram_yields_no_segments() {
        let bins = make_bins(&[0.0, 0.0, 0.0], 100, 0);
        let result = run(&bins, &Config::default());
        assert!(result.segments.is_empty());
    }

    #[test]
    fn current_bonus_pulls_segment_onto_current_bin() {
        // Two equal peaks; the bonus should make the current-tick peak win
        // the first round.
        let liqs = [900.0, 0.0, 0.0, 900.0];
        let bins = make_bins(&liqs, 100, 3);
        let cfg = Config {
            n: 1,
            current_bonus: 0.5,
            ..Config::default()
        };

        let result = run(&bins, &cfg);

        assert_eq!(result.segments.len(), 1);
        let seg = &result.segments[0];
        assert!(
            seg.tick_lower <= 300 && seg.tick_upper >= 400,
            "segment [{}, {}] misses the current bin",
            seg.tick_lower,
            seg.tick_upper
        );
    }

    #[test]
    fn quantile_interpolates_between_order_statistics() {
        let data = vec![10.0, 20.0, 30.0, 40.0];
        assert!(almost_equal(quantile(data.clone(), 0.0), 10.0, 1e-9));
        assert!(almost_equal(quantile(data.clone(), 1.0), 40.0, 1e-9));
        assert!(almost_equal(quantile(data.clone(), 0.5), 25.0, 1e-9));
        assert!(almost_equal(quantile(data, 1.0 / 3.0), 20.0, 1e-9));
    }

    #[test]
    fn metrics_track_over_coverage() {
        let m = calc_metrics(&[100.0, 200.0], &[150.0, 300.0]);
        assert!(almost_equal(m.covered, 300.0, 0.01));
        assert!(almost_equal(m.gap, 0.0, 0.01));
        assert!(almost_equal(m.over, 150.0, 0.01));
    }
}
