//! 対流・拡散・反応方程式の定義と、学習データの正解値を与える参照解ソルバ。
//!
//! 対象とする方程式は周期境界条件付きの
//! `u_t + β u_x − ν u_xx − ρ u (1 − u) = 0` （`x ∈ [0, 2π)`, `t ∈ [0, 1]`）です。

use clap::ValueEnum;
use nalgebra::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// 空間領域の右端 (2π)。
pub const X_MAX: f64 = 2.0 * PI;
/// 時間領域の終端。
pub const T_MAX: f64 = 1.0;

/// 反応項を含む場合の、出力時刻あたりの分割ステップ数。
const REACTION_SUBSTEPS: usize = 8;

/// 方程式の係数 (β, ν, ρ)。ネットワークへの方程式入力としても使われます。
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    pub beta: f64,
    pub nu: f64,
    pub rho: f64,
}

impl Coefficients {
    pub fn new(beta: f64, nu: f64, rho: f64) -> Self {
        Self { beta, nu, rho }
    }

    /// ネットワークに与える方程式ベクトル `[β, ν, ρ]`。
    pub fn to_array(self) -> [f32; 3] {
        [self.beta as f32, self.nu as f32, self.rho as f32]
    }
}

impl fmt::Display for Coefficients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Beta {} | Nu {} | Rho {}", self.beta, self.nu, self.rho)
    }
}

/// 方程式の種類。どの係数が有効かを決めます。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PdeType {
    Convection,
    Diffusion,
    Reaction,
    ConvectionDiffusion,
    ReactionDiffusion,
    Cdr,
}

impl PdeType {
    pub const ALL: [PdeType; 6] = [
        PdeType::Convection,
        PdeType::Diffusion,
        PdeType::Reaction,
        PdeType::ConvectionDiffusion,
        PdeType::ReactionDiffusion,
        PdeType::Cdr,
    ];

    /// 有効な係数をすべて `k` にした係数を返します。
    pub fn coefficients(self, k: f64) -> Coefficients {
        match self {
            PdeType::Convection => Coefficients::new(k, 0.0, 0.0),
            PdeType::Diffusion => Coefficients::new(0.0, k, 0.0),
            PdeType::Reaction => Coefficients::new(0.0, 0.0, k),
            PdeType::ConvectionDiffusion => Coefficients::new(k, k, 0.0),
            PdeType::ReactionDiffusion => Coefficients::new(0.0, k, k),
            PdeType::Cdr => Coefficients::new(k, k, k),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PdeType::Convection => "convection",
            PdeType::Diffusion => "diffusion",
            PdeType::Reaction => "reaction",
            PdeType::ConvectionDiffusion => "convection-diffusion",
            PdeType::ReactionDiffusion => "reaction-diffusion",
            PdeType::Cdr => "cdr",
        }
    }
}

impl fmt::Display for PdeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 初期条件 `u(x, 0)`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum InitialCondition {
    /// `1 + sin(x)`
    #[value(name = "sin_1")]
    #[serde(rename = "sin_1")]
    Sin1,
    /// 中心 π のガウス分布
    #[value(name = "gauss")]
    #[serde(rename = "gauss")]
    Gauss,
    /// 中心 π/2 のガウス分布
    #[value(name = "gauss_pi_2")]
    #[serde(rename = "gauss_pi_2")]
    GaussPi2,
}

impl InitialCondition {
    pub fn eval(self, x: f64) -> f64 {
        let sigma = PI / 4.0;
        match self {
            InitialCondition::Sin1 => 1.0 + x.sin(),
            InitialCondition::Gauss => (-(x - PI).powi(2) / (2.0 * sigma * sigma)).exp(),
            InitialCondition::GaussPi2 => {
                (-(x - PI / 2.0).powi(2) / (2.0 * sigma * sigma)).exp()
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InitialCondition::Sin1 => "sin_1",
            InitialCondition::Gauss => "gauss",
            InitialCondition::GaussPi2 => "gauss_pi_2",
        }
    }
}

impl fmt::Display for InitialCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `nx × nt` の等間隔格子上の参照解。`u[j * nx + i]` が `u(x_i, t_j)` です。
#[derive(Clone, Debug)]
pub struct ReferenceGrid {
    pub xs: Vec<f64>,
    pub ts: Vec<f64>,
    pub u: Vec<f64>,
}

impl ReferenceGrid {
    pub fn value(&self, t_index: usize, x_index: usize) -> f64 {
        self.u[t_index * self.xs.len() + x_index]
    }

    pub fn len(&self) -> usize {
        self.u.len()
    }

    pub fn is_empty(&self) -> bool {
        self.u.is_empty()
    }
}

/// 参照解を Strang 分割で計算します。
///
/// 対流・拡散ステップはフーリエ空間で厳密に、反応ステップはロジスティック方程式の
/// 閉形式で進めます。`ρ = 0` の場合は分割誤差がないため、出力時刻ごとに 1 ステップです。
pub fn reference_solution(
    coeffs: Coefficients,
    ic: InitialCondition,
    nx: usize,
    nt: usize,
) -> ReferenceGrid {
    let xs: Vec<f64> = (0..nx).map(|i| X_MAX * i as f64 / nx as f64).collect();
    let ts: Vec<f64> = if nt > 1 {
        (0..nt).map(|j| T_MAX * j as f64 / (nt - 1) as f64).collect()
    } else {
        vec![0.0; nt]
    };

    let mut u: Vec<f64> = xs.iter().map(|&x| ic.eval(x)).collect();
    let mut grid = Vec::with_capacity(nx * nt);
    if nt == 0 {
        return ReferenceGrid { xs, ts, u: grid };
    }
    grid.extend_from_slice(&u);

    let substeps = if coeffs.rho == 0.0 { 1 } else { REACTION_SUBSTEPS };
    let dt = if nt > 1 {
        T_MAX / (nt - 1) as f64 / substeps as f64
    } else {
        0.0
    };
    let transport = (coeffs.beta != 0.0 || coeffs.nu != 0.0)
        .then(|| SpectralPropagator::new(nx, coeffs.beta, coeffs.nu, dt));

    for _ in 1..nt {
        for _ in 0..substeps {
            react(&mut u, coeffs.rho, dt / 2.0);
            if let Some(transport) = &transport {
                transport.step(&mut u);
            }
            react(&mut u, coeffs.rho, dt / 2.0);
        }
        grid.extend_from_slice(&u);
    }

    ReferenceGrid { xs, ts, u: grid }
}

/// ロジスティック反応 `u_t = ρ u (1 − u)` を `dt` だけ進めます。
fn react(u: &mut [f64], rho: f64, dt: f64) {
    if rho == 0.0 {
        return;
    }
    let growth = (rho * dt).exp();
    for value in u.iter_mut() {
        let scaled = *value * growth;
        *value = scaled / (scaled + 1.0 - *value);
    }
}

/// 周期領域上の対流・拡散を 1 ステップ厳密に進める演算子。
struct SpectralPropagator {
    twiddles: Vec<Complex<f64>>,
    factors: Vec<Complex<f64>>,
}

impl SpectralPropagator {
    fn new(n: usize, beta: f64, nu: f64, dt: f64) -> Self {
        let twiddles = (0..n)
            .map(|m| Complex::from_polar(1.0, -2.0 * PI * m as f64 / n as f64))
            .collect();
        let factors = (0..n)
            .map(|k| {
                let wavenumber = if k <= n / 2 {
                    k as f64
                } else {
                    k as f64 - n as f64
                };
                Complex::from_polar(
                    (-nu * wavenumber * wavenumber * dt).exp(),
                    -beta * wavenumber * dt,
                )
            })
            .collect();
        Self { twiddles, factors }
    }

    fn step(&self, u: &mut [f64]) {
        let n = u.len();
        let spectrum: Vec<Complex<f64>> = (0..n)
            .map(|k| {
                let coefficient: Complex<f64> = u
                    .iter()
                    .enumerate()
                    .map(|(j, &value)| self.twiddles[(j * k) % n] * value)
                    .sum();
                coefficient * self.factors[k]
            })
            .collect();
        for (j, value) in u.iter_mut().enumerate() {
            let sum: Complex<f64> = spectrum
                .iter()
                .enumerate()
                .map(|(k, &c)| c * self.twiddles[(j * k) % n].conj())
                .sum();
            *value = sum.re / n as f64;
        }
    }
}
