//! 学習・評価用データセットの生成とテンソルへのバッチ化。

use crate::config::DataConfig;
use crate::pde::{Coefficients, InitialCondition, PdeType, T_MAX, X_MAX, reference_solution};
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 時空間上の 1 点とその点の解の値。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointSample {
    pub x: f64,
    pub t: f64,
    pub u: f64,
    pub coeffs: Coefficients,
}

/// 時刻 `t` における境界の組 `x = 0` と `x = 2π`。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundarySample {
    pub t: f64,
    pub coeffs: Coefficients,
}

/// コロケーション・初期条件・境界条件・評価の 4 つのデータセット。
#[derive(Clone, Debug, Default)]
pub struct PinnDatasets {
    pub collocation: Vec<PointSample>,
    pub initial: Vec<PointSample>,
    pub boundary: Vec<BoundarySample>,
    pub test: Vec<PointSample>,
}

impl PinnDatasets {
    /// 1 本の方程式についてデータセットを作ります。評価用には参照解の全格子を使います。
    pub fn single(
        ic: InitialCondition,
        coeffs: Coefficients,
        config: &DataConfig,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut datasets = Self::default();
        datasets.push_training(ic, coeffs, config, &mut rng);
        datasets.test = test_grid(ic, coeffs, config);
        datasets
    }

    /// すべての方程式の種類と係数 `1..=load_range` の組み合わせで学習データを作ります。
    ///
    /// 事前学習用のため評価データは空です。
    pub fn all(ic: InitialCondition, load_range: usize, config: &DataConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut datasets = Self::default();
        for pde_type in PdeType::ALL {
            for k in 1..=load_range {
                datasets.push_training(ic, pde_type.coefficients(k as f64), config, &mut rng);
            }
        }
        datasets
    }

    fn push_training(
        &mut self,
        ic: InitialCondition,
        coeffs: Coefficients,
        config: &DataConfig,
        rng: &mut StdRng,
    ) {
        self.collocation
            .extend((0..config.n_collocation).map(|_| {
                let x = rng.random_range(0.0..X_MAX);
                let t = rng.random_range(0.0..T_MAX);
                PointSample {
                    x,
                    t,
                    u: 0.0,
                    coeffs,
                }
            }));

        self.initial.extend((0..config.n_initial).map(|i| {
            let x = X_MAX * i as f64 / config.n_initial as f64;
            PointSample {
                x,
                t: 0.0,
                u: ic.eval(x),
                coeffs,
            }
        }));

        self.boundary.extend((0..config.n_boundary).map(|_| BoundarySample {
            t: rng.random_range(0.0..T_MAX),
            coeffs,
        }));
    }
}

/// 参照解の全格子を評価用サンプルにします。
pub fn test_grid(
    ic: InitialCondition,
    coeffs: Coefficients,
    config: &DataConfig,
) -> Vec<PointSample> {
    let grid = reference_solution(coeffs, ic, config.nx, config.nt);
    let mut samples = Vec::with_capacity(grid.len());
    for (j, &t) in grid.ts.iter().enumerate() {
        for (i, &x) in grid.xs.iter().enumerate() {
            samples.push(PointSample {
                x,
                t,
                u: grid.value(j, i),
                coeffs,
            });
        }
    }
    samples
}

/// 点サンプルのバッチ。すべて `[N, 1]`、方程式ベクトルのみ `[N, 3]` です。
#[derive(Clone, Debug)]
pub struct PointBatch<B: Backend> {
    pub x: Tensor<B, 2>,
    pub t: Tensor<B, 2>,
    pub u: Tensor<B, 2>,
    pub eq: Tensor<B, 2>,
}

impl<B: Backend> PointBatch<B> {
    pub fn new(samples: &[PointSample], device: &B::Device) -> Self {
        Self {
            x: column(samples.iter().map(|s| s.x), device),
            t: column(samples.iter().map(|s| s.t), device),
            u: column(samples.iter().map(|s| s.u), device),
            eq: equations(samples.iter().map(|s| s.coeffs), device),
        }
    }

    pub fn len(&self) -> usize {
        self.x.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `β`, `ν`, `ρ` をそれぞれ `[N, 1]` の列として取り出します。
    pub fn coefficient_columns(&self) -> [Tensor<B, 2>; 3] {
        let n = self.len();
        [0, 1, 2].map(|k| self.eq.clone().slice([0..n, k..k + 1]))
    }
}

/// 境界サンプルのバッチ。
#[derive(Clone, Debug)]
pub struct BoundaryBatch<B: Backend> {
    pub x_lb: Tensor<B, 2>,
    pub t_lb: Tensor<B, 2>,
    pub x_ub: Tensor<B, 2>,
    pub t_ub: Tensor<B, 2>,
    pub eq: Tensor<B, 2>,
}

impl<B: Backend> BoundaryBatch<B> {
    pub fn new(samples: &[BoundarySample], device: &B::Device) -> Self {
        let t = column(samples.iter().map(|s| s.t), device);
        Self {
            x_lb: Tensor::zeros_like(&t),
            x_ub: Tensor::ones_like(&t).mul_scalar(X_MAX),
            t_lb: t.clone(),
            t_ub: t,
            eq: equations(samples.iter().map(|s| s.coeffs), device),
        }
    }
}

fn column<B: Backend>(values: impl Iterator<Item = f64>, device: &B::Device) -> Tensor<B, 2> {
    let values: Vec<f32> = values.map(|v| v as f32).collect();
    let n = values.len();
    Tensor::from_data(TensorData::new(values, [n, 1]), device)
}

fn equations<B: Backend>(
    coeffs: impl Iterator<Item = Coefficients>,
    device: &B::Device,
) -> Tensor<B, 2> {
    let values: Vec<f32> = coeffs.flat_map(Coefficients::to_array).collect();
    let n = values.len() / 3;
    Tensor::from_data(TensorData::new(values, [n, 3]), device)
}
