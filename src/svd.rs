//! 事前学習済みの重み行列を特異値分解し、`U·diag(S ⊙ m)·Vᵗ` の積として表す全結合層。

use crate::error::{Error, Result};
use crate::jet::DenseLayer;
use burn::module::{Module, Param};
use burn::nn::Linear;
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use nalgebra::{DMatrix, linalg::SVD};
use std::cmp::Ordering;

/// 重み行列 `W = U · diag(S) · Vᵗ` の因子。
#[derive(Debug)]
pub struct SvdFactors<B: Backend> {
    /// `[d_input, rank]`
    pub u: Tensor<B, 2>,
    /// `[rank]`、降順
    pub s: Tensor<B, 1>,
    /// `[rank, d_output]`
    pub v_t: Tensor<B, 2>,
}

/// 重み行列を特異値分解します。
///
/// `rank` を指定した場合は上位 `rank` 個の特異値だけを残します。
pub fn factorize<B: Backend>(weight: Tensor<B, 2>, rank: Option<usize>) -> Result<SvdFactors<B>> {
    let device = weight.device();
    let [rows, cols] = weight.dims();
    let full_rank = rows.min(cols);
    let rank = rank.unwrap_or(full_rank);
    if rank == 0 || rank > full_rank {
        return Err(Error::Svd(format!(
            "ランク {rank} は 1..={full_rank} の範囲外です (重みの形状: {rows}x{cols})"
        )));
    }

    let values = weight
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::Data(format!("{e:?}")))?;
    let matrix = DMatrix::from_row_iterator(rows, cols, values.into_iter().map(f64::from));

    let svd = SVD::new(matrix, true, true);
    let u = svd
        .u
        .ok_or_else(|| Error::Svd("左特異ベクトルを計算できませんでした".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| Error::Svd("右特異ベクトルを計算できませんでした".to_string()))?;
    let singular_values = svd.singular_values;

    let mut order: Vec<usize> = (0..singular_values.len()).collect();
    order.sort_by(|&a, &b| {
        singular_values[b]
            .partial_cmp(&singular_values[a])
            .unwrap_or(Ordering::Equal)
    });
    order.truncate(rank);

    let mut u_data = Vec::with_capacity(rows * rank);
    for row in 0..rows {
        u_data.extend(order.iter().map(|&k| u[(row, k)] as f32));
    }
    let s_data: Vec<f32> = order.iter().map(|&k| singular_values[k] as f32).collect();
    let mut v_t_data = Vec::with_capacity(rank * cols);
    for &k in &order {
        v_t_data.extend((0..cols).map(|col| v_t[(k, col)] as f32));
    }

    Ok(SvdFactors {
        u: Tensor::from_data(TensorData::new(u_data, [rows, rank]), &device),
        s: Tensor::from_data(TensorData::new(s_data, [rank]), &device),
        v_t: Tensor::from_data(TensorData::new(v_t_data, [rank, cols]), &device),
    })
}

/// 特異値分解で再パラメータ化された全結合層。
///
/// `y = x · U · diag(S ⊙ m) · Vᵗ + b`。変調ベクトル `m` は 1 で初期化されるため、
/// 変換直後は元の層と同じ出力になります。
#[derive(Module, Debug)]
pub struct SvdLinear<B: Backend> {
    pub u: Param<Tensor<B, 2>>,
    pub s: Param<Tensor<B, 1>>,
    pub v_t: Param<Tensor<B, 2>>,
    pub modvec: Param<Tensor<B, 1>>,
    pub bias: Param<Tensor<B, 1>>,
}

impl<B: Backend> SvdLinear<B> {
    /// 既存の全結合層を分解して作ります。
    pub fn from_linear(linear: Linear<B>, rank: Option<usize>) -> Result<Self> {
        let [_, d_output] = linear.weight.dims();
        let device = linear.weight.device();
        let factors = factorize(linear.weight.val(), rank)?;
        let bias = match linear.bias {
            Some(bias) => bias.val(),
            None => Tensor::zeros([d_output], &device),
        };
        Ok(Self::from_factors(factors, bias))
    }

    pub fn from_factors(factors: SvdFactors<B>, bias: Tensor<B, 1>) -> Self {
        let modvec = Tensor::ones_like(&factors.s);
        Self {
            u: Param::from_tensor(factors.u),
            s: Param::from_tensor(factors.s),
            v_t: Param::from_tensor(factors.v_t),
            modvec: Param::from_tensor(modvec),
            bias: Param::from_tensor(bias),
        }
    }

    /// 読み込み用のゼロ初期化された層。
    pub fn zeros(d_input: usize, d_output: usize, rank: usize, device: &B::Device) -> Self {
        Self::from_factors(
            SvdFactors {
                u: Tensor::zeros([d_input, rank], device),
                s: Tensor::zeros([rank], device),
                v_t: Tensor::zeros([rank, d_output], device),
            },
            Tensor::zeros([d_output], device),
        )
    }

    pub fn rank(&self) -> usize {
        self.s.dims()[0]
    }

    /// 再構成された重み行列 `[d_input, d_output]`。
    pub fn weight(&self) -> Tensor<B, 2> {
        let scale = self.s.val().mul(self.modvec.val()).unsqueeze::<2>();
        self.u.val().mul(scale).matmul(self.v_t.val())
    }

    /// 変調ベクトルと特異値以外を凍結します。
    pub fn freeze_factors(self) -> Self {
        Self {
            u: self.u.no_grad(),
            v_t: self.v_t.no_grad(),
            bias: self.bias.no_grad(),
            ..self
        }
    }
}

impl<B: Backend> DenseLayer<B> for SvdLinear<B> {
    fn affine(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear(x) + self.bias.val().unsqueeze()
    }

    fn linear(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        x.matmul(self.weight())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::LinearConfig;

    type TestBackend = NdArray<f32>;

    fn values<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn full_rank_factors_reconstruct_the_weight() {
        let device = Default::default();
        let weight = Tensor::<TestBackend, 2>::from_floats(
            [[1.0, 2.0, 0.5], [-1.0, 0.0, 3.0], [0.25, -2.0, 1.0], [4.0, 1.0, -0.5]],
            &device,
        );
        let factors = factorize(weight.clone(), None).unwrap();

        assert_eq!(factors.u.dims(), [4, 3]);
        assert_eq!(factors.s.dims(), [3]);
        assert_eq!(factors.v_t.dims(), [3, 3]);

        let singular = values(factors.s.clone());
        assert!(singular.windows(2).all(|w| w[0] >= w[1]));

        let rebuilt = factors
            .u
            .mul(factors.s.unsqueeze::<2>())
            .matmul(factors.v_t);
        for (a, b) in values(rebuilt).iter().zip(values(weight)) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn truncation_keeps_the_largest_singular_values() {
        let device = Default::default();
        let weight = Tensor::<TestBackend, 2>::from_floats(
            [[3.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 1.0]],
            &device,
        );
        let factors = factorize(weight, Some(2)).unwrap();

        assert_eq!(factors.u.dims(), [3, 2]);
        assert_eq!(factors.v_t.dims(), [2, 3]);
        let singular = values(factors.s);
        assert!((singular[0] - 5.0).abs() < 1e-5);
        assert!((singular[1] - 3.0).abs() < 1e-5);
    }

    #[test]
    fn invalid_rank_is_rejected() {
        let weight = Tensor::<TestBackend, 2>::ones([3, 2], &Default::default());
        assert!(matches!(factorize(weight.clone(), Some(0)), Err(Error::Svd(_))));
        assert!(matches!(factorize(weight, Some(3)), Err(Error::Svd(_))));
    }

    #[test]
    fn svd_linear_matches_the_original_layer() {
        let device = Default::default();
        TestBackend::seed(11);
        let linear = LinearConfig::new(6, 4).init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 2>::ones([5, 6], &device).mul_scalar(0.3);
        let expected = values(linear.forward(input.clone()));

        let svd_linear = SvdLinear::from_linear(linear, None).unwrap();
        assert_eq!(svd_linear.rank(), 4);
        let actual = values(svd_linear.affine(input));
        for (a, b) in actual.iter().zip(expected) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
