//! 座標 `(x, t)` に関する微分をネットワークの順伝播とともに運ぶ「ジェット」。
//!
//! `burn` の自動微分は一階微分のみを扱うため、PDE 残差に必要な
//! `u_x`, `u_t`, `u_xx` を通常のテンソル演算で前向きに伝播させます。
//! 得られた残差はパラメータについて通常どおり逆伝播できます。

use burn::nn::Linear;
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// 全結合層の共通インターフェース。
pub trait DenseLayer<B: Backend> {
    /// `x W + b`
    fn affine(&self, x: Tensor<B, 2>) -> Tensor<B, 2>;
    /// バイアスを除いた線形部分 `x W`。微分の伝播に使います。
    fn linear(&self, x: Tensor<B, 2>) -> Tensor<B, 2>;
}

impl<B: Backend> DenseLayer<B> for Linear<B> {
    fn affine(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.forward(x)
    }

    fn linear(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        x.matmul(self.weight.val())
    }
}

/// 値と、その `x`・`t` に関する一階微分および `x` に関する二階微分。
#[derive(Clone, Debug)]
pub struct Jet<B: Backend> {
    pub value: Tensor<B, 2>,
    pub d_x: Tensor<B, 2>,
    pub d_t: Tensor<B, 2>,
    pub d_xx: Tensor<B, 2>,
}

impl<B: Backend> Jet<B> {
    /// 座標入力 `[x, t]` (形状 `[N, 2]`) のジェットを作ります。
    pub fn coordinates(x: Tensor<B, 2>, t: Tensor<B, 2>) -> Self {
        let zeros = Tensor::zeros_like(&x);
        let ones = Tensor::ones_like(&x);
        Self {
            value: Tensor::cat(vec![x, t], 1),
            d_x: Tensor::cat(vec![ones.clone(), zeros.clone()], 1),
            d_t: Tensor::cat(vec![zeros.clone(), ones], 1),
            d_xx: Tensor::cat(vec![zeros.clone(), zeros], 1),
        }
    }

    /// 座標に依存しない定数値 (方程式の埋め込み) を左側に連結します。
    pub fn prepend_constant(self, constant: Tensor<B, 2>) -> Self {
        let zeros = Tensor::zeros_like(&constant);
        Self {
            value: Tensor::cat(vec![constant, self.value], 1),
            d_x: Tensor::cat(vec![zeros.clone(), self.d_x], 1),
            d_t: Tensor::cat(vec![zeros.clone(), self.d_t], 1),
            d_xx: Tensor::cat(vec![zeros, self.d_xx], 1),
        }
    }

    pub fn dense<L: DenseLayer<B>>(self, layer: &L) -> Self {
        Self {
            value: layer.affine(self.value),
            d_x: layer.linear(self.d_x),
            d_t: layer.linear(self.d_t),
            d_xx: layer.linear(self.d_xx),
        }
    }

    /// `σ = tanh(z)` について `σ' = 1 − σ²`, `σ'' = −2σσ'` を用います。
    pub fn tanh(self) -> Self {
        let sigma = self.value.tanh();
        let slope = sigma.clone().powf_scalar(2.0).neg().add_scalar(1.0);
        let curvature = sigma.clone().mul(slope.clone()).mul_scalar(-2.0);
        Self {
            d_xx: slope.clone().mul(self.d_xx) + curvature.mul(self.d_x.clone().powf_scalar(2.0)),
            d_x: slope.clone().mul(self.d_x),
            d_t: slope.mul(self.d_t),
            value: sigma,
        }
    }
}
