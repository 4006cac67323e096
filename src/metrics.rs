use std::fmt;

/// 評価データ全体で集計した誤差指標。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Metrics {
    /// 平均絶対誤差
    pub l2_abs_err: f64,
    /// `‖ŷ − y‖₂ / ‖y‖₂`
    pub l2_rel_err: f64,
    pub max_error: f64,
    /// 説明分散スコア `1 − Var(y − ŷ) / Var(y)`
    pub variance_score: f64,
}

impl Metrics {
    /// 正解値 `truth` と予測値 `prediction` から指標を計算します。空の入力では `None` です。
    pub fn compute(truth: &[f64], prediction: &[f64]) -> Option<Self> {
        if truth.is_empty() || truth.len() != prediction.len() {
            return None;
        }
        let n = truth.len() as f64;
        let errors: Vec<f64> = prediction.iter().zip(truth).map(|(p, y)| p - y).collect();

        let l2_abs_err = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
        let error_norm = errors.iter().map(|e| e * e).sum::<f64>().sqrt();
        let truth_norm = truth.iter().map(|y| y * y).sum::<f64>().sqrt();
        let max_error = errors.iter().fold(0.0_f64, |acc, e| acc.max(e.abs()));

        let residual_var = variance(&errors);
        let truth_var = variance(truth);
        let variance_score = if truth_var > 0.0 {
            1.0 - residual_var / truth_var
        } else if residual_var == 0.0 {
            1.0
        } else {
            0.0
        };

        Some(Self {
            l2_abs_err,
            l2_rel_err: error_norm / truth_norm,
            max_error,
            variance_score,
        })
    }
}

fn variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "L2_abs_err: {:.6e} | L2_rel_err: {:.6e} | Max_error: {:.6e} | Variance_score: {:.6}",
            self.l2_abs_err, self.l2_rel_err, self.max_error, self.variance_score
        )
    }
}
