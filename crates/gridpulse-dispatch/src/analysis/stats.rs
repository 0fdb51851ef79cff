//! In-process statistics capabilities: trend analysis and anomaly detection.
//!
//! Bound rules are strict inequalities: a value sitting exactly on
//! `mean ± k·σ` (or the IQR fence) is NOT an anomaly.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use gridpulse_core::error::{GridPulseError, Result};

use crate::registry::CapabilityProvider;
use crate::task::Capability;

/// Percent-change band treated as flat.
const STABLE_THRESHOLD_PCT: f64 = 5.0;

/// Default deviation multiplier for anomaly bounds.
const DEFAULT_ANOMALY_THRESHOLD: f64 = 2.0;

/// Statistics provider — always available, no external dependencies.
pub struct StatisticsProvider;

const CAPABILITIES: [Capability; 2] = [Capability::TrendAnalysis, Capability::AnomalyDetection];

#[async_trait]
impl CapabilityProvider for StatisticsProvider {
    fn name(&self) -> &str {
        "statistics"
    }

    fn description(&self) -> &str {
        "Closed-form trend and anomaly analysis over numeric series"
    }

    fn capabilities(&self) -> &[Capability] {
        &CAPABILITIES
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn execute(&self, capability: Capability, params: &Value) -> Result<Value> {
        match capability {
            Capability::TrendAnalysis => analyze_trend(params),
            Capability::AnomalyDetection => detect_anomalies(params),
            other => Err(GridPulseError::NotFound(format!(
                "capability '{other}' on provider 'statistics'"
            ))),
        }
    }
}

// ─── Trend analysis ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Trend over a timestamped series.
///
/// Params: `data` = array of `{timestamp, value}` objects (timestamp is an
/// RFC3339 string or an epoch number; the value key can be renamed via
/// `value_field`), optional `window` for a simple moving average.
pub fn analyze_trend(params: &Value) -> Result<Value> {
    let value_field = params
        .get("value_field")
        .and_then(|v| v.as_str())
        .unwrap_or("value");
    let rows = params
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| GridPulseError::Validation("'data' must be an array".into()))?;
    if rows.is_empty() {
        return Err(GridPulseError::Validation(
            "'data' must be a non-empty array".into(),
        ));
    }

    let mut points: Vec<(f64, f64)> = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let ts = row
            .get("timestamp")
            .and_then(parse_timestamp)
            .ok_or_else(|| {
                GridPulseError::Validation(format!("data[{i}] has no usable 'timestamp'"))
            })?;
        let value = row.get(value_field).and_then(|v| v.as_f64()).ok_or_else(|| {
            GridPulseError::Validation(format!("data[{i}] has no numeric '{value_field}'"))
        })?;
        points.push((ts, value));
    }
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let values: Vec<f64> = points.iter().map(|p| p.1).collect();
    let first = values[0];
    let last = values[values.len() - 1];
    let change_percent = percent_change(first, last);

    let direction = if change_percent > STABLE_THRESHOLD_PCT {
        TrendDirection::Increasing
    } else if change_percent < -STABLE_THRESHOLD_PCT {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };

    let m = mean(&values);
    let var = variance(&values, m);
    let std_dev = var.sqrt();
    let coefficient_of_variation = if m != 0.0 {
        Some(std_dev / m.abs())
    } else {
        None
    };

    let window = params.get("window").and_then(|v| v.as_u64()).map(|w| w as usize);
    let moving_average = match window {
        Some(w) if w >= 1 && w <= values.len() => Some(simple_moving_average(&values, w)),
        Some(w) => {
            return Err(GridPulseError::Validation(format!(
                "'window' must be between 1 and {} (got {w})",
                values.len()
            )));
        }
        None => None,
    };

    Ok(json!({
        "samples": values.len(),
        "first": first,
        "last": last,
        "change_percent": change_percent,
        "direction": direction,
        "mean": m,
        "variance": var,
        "std_dev": std_dev,
        "coefficient_of_variation": coefficient_of_variation,
        "moving_average": moving_average,
    }))
}

/// Percent change from first to last. A zero baseline reports 100% magnitude
/// instead of dividing by zero.
fn percent_change(first: f64, last: f64) -> f64 {
    if first == 0.0 {
        if last == 0.0 {
            0.0
        } else if last > 0.0 {
            100.0
        } else {
            -100.0
        }
    } else {
        (last - first) / first.abs() * 100.0
    }
}

fn parse_timestamp(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    let s = v.as_str()?;
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.timestamp_millis() as f64)
}

fn simple_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
fn variance(values: &[f64], mean: f64) -> f64 {
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

// ─── Anomaly detection ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    High,
    Low,
}

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub index: usize,
    pub value: f64,
    pub kind: AnomalyKind,
    /// Deviation score: distance from center over the spread measure.
    pub score: f64,
}

/// Out-of-bound points in a numeric series.
///
/// Params: `data` = array of numbers, `method` = "std_dev" (default) or
/// "iqr", `threshold` = bound multiplier k (default 2.0).
pub fn detect_anomalies(params: &Value) -> Result<Value> {
    let rows = params
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| GridPulseError::Validation("'data' must be an array".into()))?;
    if rows.is_empty() {
        return Err(GridPulseError::Validation(
            "'data' must be a non-empty array".into(),
        ));
    }
    let mut values = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let v = row.as_f64().ok_or_else(|| {
            GridPulseError::Validation(format!("data[{i}] is not a number"))
        })?;
        values.push(v);
    }

    let method = params
        .get("method")
        .and_then(|v| v.as_str())
        .unwrap_or("std_dev");
    let threshold = params
        .get("threshold")
        .and_then(|v| v.as_f64())
        .unwrap_or(DEFAULT_ANOMALY_THRESHOLD);
    if threshold <= 0.0 {
        return Err(GridPulseError::Validation(
            "'threshold' must be positive".into(),
        ));
    }

    let anomalies = match method {
        "std_dev" => std_dev_anomalies(&values, threshold),
        "iqr" => iqr_anomalies(&values, threshold),
        other => {
            return Err(GridPulseError::Validation(format!(
                "unknown method '{other}' (expected 'std_dev' or 'iqr')"
            )));
        }
    };

    Ok(json!({
        "method": method,
        "threshold": threshold,
        "samples": values.len(),
        "anomaly_count": anomalies.len(),
        "anomalies": anomalies,
    }))
}

/// Standard-deviation rule: anomalous iff strictly outside `mean ± k·σ`
/// (population σ).
pub fn std_dev_anomalies(values: &[f64], k: f64) -> Vec<Anomaly> {
    let m = mean(values);
    let sigma = variance(values, m).sqrt();
    let high = m + k * sigma;
    let low = m - k * sigma;

    values
        .iter()
        .enumerate()
        .filter_map(|(index, &value)| {
            let kind = if value > high {
                AnomalyKind::High
            } else if value < low {
                AnomalyKind::Low
            } else {
                return None;
            };
            let score = if sigma > 0.0 {
                (value - m).abs() / sigma
            } else {
                (value - m).abs()
            };
            Some(Anomaly {
                index,
                value,
                kind,
                score,
            })
        })
        .collect()
}

/// Interquartile-range rule: anomalous iff strictly outside
/// `[Q1 − k·IQR, Q3 + k·IQR]`, quartiles linearly interpolated.
pub fn iqr_anomalies(values: &[f64], k: f64) -> Vec<Anomaly> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let median = quantile(&sorted, 0.5);
    let iqr = q3 - q1;
    let high = q3 + k * iqr;
    let low = q1 - k * iqr;

    values
        .iter()
        .enumerate()
        .filter_map(|(index, &value)| {
            let kind = if value > high {
                AnomalyKind::High
            } else if value < low {
                AnomalyKind::Low
            } else {
                return None;
            };
            let score = if iqr > 0.0 {
                (value - median).abs() / iqr
            } else {
                (value - median).abs()
            };
            Some(Anomaly {
                index,
                value,
                kind,
                score,
            })
        })
        .collect()
}

/// Linear-interpolated quantile of a sorted slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = (sorted.len() - 1) as f64 * q;
    let base = pos.floor() as usize;
    let frac = pos - base as f64;
    if base + 1 < sorted.len() {
        sorted[base] + frac * (sorted[base + 1] - sorted[base])
    } else {
        sorted[base]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trend_params(values: &[f64]) -> Value {
        let data: Vec<Value> = values
            .iter()
            .enumerate()
            .map(|(i, v)| json!({"timestamp": i as f64, "value": v}))
            .collect();
        json!({"data": data})
    }

    #[test]
    fn test_trend_increasing() {
        let out = analyze_trend(&trend_params(&[100.0, 110.0, 125.0, 140.0])).unwrap();
        assert_eq!(out["direction"], json!("increasing"));
        assert_eq!(out["first"], json!(100.0));
        assert_eq!(out["last"], json!(140.0));
        assert!((out["change_percent"].as_f64().unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_trend_flat_is_stable_with_zero_change() {
        let out = analyze_trend(&trend_params(&[42.0, 42.0, 42.0])).unwrap();
        assert_eq!(out["direction"], json!("stable"));
        assert_eq!(out["change_percent"].as_f64().unwrap(), 0.0);
        assert_eq!(out["variance"].as_f64().unwrap(), 0.0);
    }

    #[test]
    fn test_trend_small_change_within_band_is_stable() {
        // +4% stays inside the ±5% band
        let out = analyze_trend(&trend_params(&[100.0, 104.0])).unwrap();
        assert_eq!(out["direction"], json!("stable"));
        let out = analyze_trend(&trend_params(&[100.0, 94.0])).unwrap();
        assert_eq!(out["direction"], json!("decreasing"));
    }

    #[test]
    fn test_trend_sorts_by_timestamp() {
        let params = json!({"data": [
            {"timestamp": "2026-08-07T12:00:00Z", "value": 300.0},
            {"timestamp": "2026-08-07T10:00:00Z", "value": 100.0},
            {"timestamp": "2026-08-07T11:00:00Z", "value": 200.0},
        ]});
        let out = analyze_trend(&params).unwrap();
        assert_eq!(out["first"], json!(100.0));
        assert_eq!(out["last"], json!(300.0));
        assert_eq!(out["direction"], json!("increasing"));
    }

    #[test]
    fn test_trend_zero_baseline() {
        let out = analyze_trend(&trend_params(&[0.0, 50.0])).unwrap();
        assert_eq!(out["change_percent"].as_f64().unwrap(), 100.0);
        assert_eq!(out["direction"], json!("increasing"));
    }

    #[test]
    fn test_trend_moving_average() {
        let mut params = trend_params(&[1.0, 2.0, 3.0, 4.0]);
        params["window"] = json!(2);
        let out = analyze_trend(&params).unwrap();
        assert_eq!(out["moving_average"], json!([1.5, 2.5, 3.5]));

        params["window"] = json!(9);
        assert!(matches!(
            analyze_trend(&params),
            Err(GridPulseError::Validation(_))
        ));
    }

    #[test]
    fn test_trend_custom_value_field() {
        let params = json!({
            "data": [
                {"timestamp": 0, "kwh": 10.0},
                {"timestamp": 1, "kwh": 20.0},
            ],
            "value_field": "kwh",
        });
        let out = analyze_trend(&params).unwrap();
        assert_eq!(out["last"], json!(20.0));
    }

    #[test]
    fn test_trend_rejects_empty_and_malformed() {
        assert!(matches!(
            analyze_trend(&json!({"data": []})),
            Err(GridPulseError::Validation(_))
        ));
        assert!(matches!(
            analyze_trend(&json!({"data": [{"value": 1.0}]})),
            Err(GridPulseError::Validation(_))
        ));
    }

    #[test]
    fn test_std_dev_boundary_value_is_not_anomalous() {
        // mean 28, σ 36 — 100 sits exactly on mean + 2σ, strict > excludes it
        let anomalies = std_dev_anomalies(&[10.0, 10.0, 10.0, 10.0, 100.0], 2.0);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_std_dev_flags_high_outlier() {
        let anomalies = std_dev_anomalies(&[10.0, 10.0, 10.0, 10.0, 10.0, 100.0], 2.0);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].index, 5);
        assert_eq!(anomalies[0].kind, AnomalyKind::High);
        assert!(anomalies[0].score > 2.0);
    }

    #[test]
    fn test_std_dev_flags_low_outlier() {
        let anomalies = std_dev_anomalies(&[10.0, 10.0, 10.0, 10.0, 10.0, -80.0], 2.0);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].index, 5);
        assert_eq!(anomalies[0].kind, AnomalyKind::Low);
    }

    #[test]
    fn test_std_dev_constant_series_has_no_anomalies() {
        assert!(std_dev_anomalies(&[7.0, 7.0, 7.0], 2.0).is_empty());
    }

    #[test]
    fn test_quantile_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&sorted, 0.25) - 1.75).abs() < 1e-9);
        assert!((quantile(&sorted, 0.5) - 2.5).abs() < 1e-9);
        assert!((quantile(&sorted, 0.75) - 3.25).abs() < 1e-9);
        assert_eq!(quantile(&[5.0], 0.75), 5.0);
    }

    #[test]
    fn test_iqr_flags_outlier() {
        // q1=2, q3=4, iqr=2 → fences at -1 and 7 with k=1.5
        let anomalies = iqr_anomalies(&[1.0, 2.0, 3.0, 4.0, 100.0], 1.5);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].index, 4);
        assert_eq!(anomalies[0].kind, AnomalyKind::High);
    }

    #[test]
    fn test_detect_anomalies_params() {
        let out = detect_anomalies(&json!({
            "data": [10.0, 10.0, 10.0, 10.0, 10.0, 100.0],
        }))
        .unwrap();
        assert_eq!(out["method"], json!("std_dev"));
        assert_eq!(out["threshold"], json!(2.0));
        assert_eq!(out["anomaly_count"], json!(1));
        assert_eq!(out["anomalies"][0]["index"], json!(5));
        assert_eq!(out["anomalies"][0]["kind"], json!("high"));

        assert!(matches!(
            detect_anomalies(&json!({"data": [1.0], "method": "mad"})),
            Err(GridPulseError::Validation(_))
        ));
        assert!(matches!(
            detect_anomalies(&json!({"data": [1.0], "threshold": 0.0})),
            Err(GridPulseError::Validation(_))
        ));
        assert!(matches!(
            detect_anomalies(&json!({"data": ["x"]})),
            Err(GridPulseError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_dispatch() {
        let provider = StatisticsProvider;
        assert!(provider.is_available().await);
        let out = provider
            .execute(
                Capability::AnomalyDetection,
                &json!({"data": [1.0, 1.0, 1.0]}),
            )
            .await
            .unwrap();
        assert_eq!(out["anomaly_count"], json!(0));

        let err = provider
            .execute(Capability::Summarization, &json!({"text": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, GridPulseError::NotFound(_)));
    }
}
