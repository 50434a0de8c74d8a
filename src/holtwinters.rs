//! Holt-Winters triple exponential smoothing with a daily season, used by
//! `holtWintersForecast`. The caller fetches a seven-day bootstrap window
//! ahead of the render window so the seasonal state is warm before the
//! first sample anyone sees.

const ALPHA: f64 = 0.1;
const BETA: f64 = 0.0035;
const GAMMA: f64 = 0.1;

fn intercept(actual: f64, last_seasonal: f64, last_intercept: f64, last_slope: f64) -> f64 {
    ALPHA * (actual - last_seasonal) + (1.0 - ALPHA) * (last_intercept + last_slope)
}

fn slope(intercept: f64, last_intercept: f64, last_slope: f64) -> f64 {
    BETA * (intercept - last_intercept) + (1.0 - BETA) * last_slope
}

fn seasonal(actual: f64, intercept: f64, last_seasonal: f64) -> f64 {
    GAMMA * (actual - intercept) + (1.0 - GAMMA) * last_seasonal
}

fn deviation(actual: f64, prediction: f64, last_deviation: f64) -> f64 {
    let prediction = if prediction.is_nan() { 0.0 } else { prediction };
    GAMMA * (actual - prediction).abs() + (1.0 - GAMMA) * last_deviation
}

/// One-step-ahead predictions for every input sample. Absent inputs are
/// passed as NaN; a gap forfeits the prediction for the sample after it
/// and the smoothing state rides through. The season is one day's worth
/// of steps.
pub fn analysis(values: &[f64], step: i32) -> Vec<f64> {
    let season_length = (86400 / step.max(1)).max(1) as usize;

    let mut intercepts: Vec<f64> = Vec::with_capacity(values.len());
    let mut slopes: Vec<f64> = Vec::with_capacity(values.len());
    let mut seasonals: Vec<f64> = Vec::with_capacity(values.len());
    let mut predictions: Vec<f64> = Vec::with_capacity(values.len());
    let mut deviations: Vec<f64> = Vec::with_capacity(values.len());

    let season_at = |table: &Vec<f64>, i: usize| -> f64 {
        if i >= season_length { table[i - season_length] } else { 0.0 }
    };

    let mut next_pred = f64::NAN;

    for (i, &actual) in values.iter().enumerate() {
        if actual.is_nan() {
            // missing input breaks the math; carry what we can and move on
            intercepts.push(f64::NAN);
            slopes.push(0.0);
            seasonals.push(0.0);
            predictions.push(next_pred);
            deviations.push(0.0);
            next_pred = f64::NAN;
            continue;
        }

        let (last_intercept, last_slope, prediction) = if i == 0 {
            (actual, 0.0, actual)
        } else {
            let li = if intercepts[i - 1].is_nan() { actual } else { intercepts[i - 1] };
            (li, slopes[i - 1], next_pred)
        };

        let last_seasonal = season_at(&seasonals, i);
        let last_seasonal_dev = season_at(&deviations, i);

        let inter = intercept(actual, last_seasonal, last_intercept, last_slope);
        let sl = slope(inter, last_intercept, last_slope);
        let seas = seasonal(actual, inter, last_seasonal);
        let dev = deviation(actual, prediction, last_seasonal_dev);

        seasonals.push(seas);
        next_pred = inter + sl + season_at(&seasonals, i + 1);

        intercepts.push(inter);
        slopes.push(sl);
        predictions.push(prediction);
        deviations.push(dev);
    }

    predictions
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════
