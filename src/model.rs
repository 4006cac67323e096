use crate::jet::{DenseLayer, Jet};
use crate::svd::SvdLinear;
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig, Tanh};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// 方程式ベクトル `[β, ν, ρ]` の次元
pub const EQUATION_DIM: usize = 3;
/// 座標 `(x, t)` の次元
pub const COORDINATE_DIM: usize = 2;

/// 座標と方程式係数から解を予測するモデルの共通インターフェース。
pub trait PinnModel<B: Backend> {
    /// `eq: [N, 3]`, `x: [N, 1]`, `t: [N, 1]` から `u: [N, 1]` を予測します。
    fn forward(&self, eq: Tensor<B, 2>, x: Tensor<B, 2>, t: Tensor<B, 2>) -> Tensor<B, 2>;

    /// 予測値とともに `u_x`, `u_t`, `u_xx` を返します。
    fn forward_jet(&self, eq: Tensor<B, 2>, x: Tensor<B, 2>, t: Tensor<B, 2>) -> Jet<B>;
}

#[derive(Config, Debug)]
pub struct P2innConfig {
    #[config(default = 50)]
    pub hidden: usize,
    /// 方程式・座標エンコーダそれぞれの層数
    #[config(default = 3)]
    pub encoder_layers: usize,
    /// `dec_layer_1` を含むデコーダの隠れ層数
    #[config(default = 6)]
    pub decoder_layers: usize,
}

impl P2innConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> P2inn<B> {
        let h = self.hidden;
        P2inn {
            eq_encoder: mlp(EQUATION_DIM, h, self.encoder_layers, device),
            coord_encoder: mlp(COORDINATE_DIM, h, self.encoder_layers, device),
            dec_layer_1: LinearConfig::new(2 * h, h).init(device),
            dec_layers: (1..self.decoder_layers)
                .map(|_| LinearConfig::new(h, h).init(device))
                .collect(),
            last_layer: LinearConfig::new(h, 1).init(device),
            activation: Tanh::new(),
        }
    }

    /// 保存済みの SVD モデルを読み込むための骨組みを作ります。
    pub fn init_svd<B: Backend>(&self, rank: Option<usize>, device: &B::Device) -> P2innSvd<B> {
        let h = self.hidden;
        let rank = rank.unwrap_or(h);
        let base = self.init(device);
        P2innSvd {
            eq_encoder: base.eq_encoder,
            coord_encoder: base.coord_encoder,
            dec_layer_1: base.dec_layer_1,
            dec_layers: (1..self.decoder_layers)
                .map(|_| SvdLinear::zeros(h, h, rank, device))
                .collect(),
            last_layer: base.last_layer,
            activation: base.activation,
        }
    }
}

fn mlp<B: Backend>(
    d_input: usize,
    hidden: usize,
    layers: usize,
    device: &B::Device,
) -> Vec<Linear<B>> {
    (0..layers)
        .map(|i| {
            let d_in = if i == 0 { d_input } else { hidden };
            LinearConfig::new(d_in, hidden).init(device)
        })
        .collect()
}

/// 事前学習 (phase 1) のパラメータ化 PINN。
///
/// 方程式エンコーダと座標エンコーダの出力を連結し、デコーダで解 `u` を予測します。
#[derive(Module, Debug)]
pub struct P2inn<B: Backend> {
    pub eq_encoder: Vec<Linear<B>>,
    pub coord_encoder: Vec<Linear<B>>,
    pub dec_layer_1: Linear<B>,
    /// `dec_layer_2` 以降
    pub dec_layers: Vec<Linear<B>>,
    pub last_layer: Linear<B>,
    activation: Tanh,
}

/// デコーダ本体を特異値分解した微調整 (phase 2) 用のモデル。
#[derive(Module, Debug)]
pub struct P2innSvd<B: Backend> {
    pub eq_encoder: Vec<Linear<B>>,
    pub coord_encoder: Vec<Linear<B>>,
    pub dec_layer_1: Linear<B>,
    pub dec_layers: Vec<SvdLinear<B>>,
    pub last_layer: Linear<B>,
    activation: Tanh,
}

/// 微調整時にどのパラメータを学習させるか。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FreezePolicy {
    /// SVD 層のすべての因子・バイアス・変調ベクトルを学習します
    Factors,
    /// 変調ベクトルと特異値のみを学習します
    Modulation,
    /// `Factors` に加えて `dec_layer_1` と `last_layer` も学習します
    DecoderEnds,
}

impl<B: Backend> P2inn<B> {
    fn encode(&self, eq: Tensor<B, 2>, x: Tensor<B, 2>, t: Tensor<B, 2>) -> Tensor<B, 2> {
        encode(&self.eq_encoder, &self.coord_encoder, &self.activation, eq, x, t)
    }
}

impl<B: Backend> PinnModel<B> for P2inn<B> {
    fn forward(&self, eq: Tensor<B, 2>, x: Tensor<B, 2>, t: Tensor<B, 2>) -> Tensor<B, 2> {
        let h = self.encode(eq, x, t);
        decode(&self.dec_layer_1, &self.dec_layers, &self.last_layer, &self.activation, h)
    }

    fn forward_jet(&self, eq: Tensor<B, 2>, x: Tensor<B, 2>, t: Tensor<B, 2>) -> Jet<B> {
        let jet = encode_jet(&self.eq_encoder, &self.coord_encoder, &self.activation, eq, x, t);
        decode_jet(&self.dec_layer_1, &self.dec_layers, &self.last_layer, jet)
    }
}

impl<B: Backend> P2innSvd<B> {
    /// 事前学習済みモデルのデコーダ本体を特異値分解して変換します。
    ///
    /// エンコーダ、`dec_layer_1`、`last_layer` はそのまま引き継ぎます。
    pub fn from_pretrained(model: P2inn<B>, rank: Option<usize>) -> crate::Result<Self> {
        let dec_layers = model
            .dec_layers
            .into_iter()
            .map(|layer| SvdLinear::from_linear(layer, rank))
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Self {
            eq_encoder: model.eq_encoder,
            coord_encoder: model.coord_encoder,
            dec_layer_1: model.dec_layer_1,
            dec_layers,
            last_layer: model.last_layer,
            activation: model.activation,
        })
    }

    /// 凍結方針に従って勾配を無効化します。
    pub fn freeze(self, policy: FreezePolicy) -> Self {
        let train_ends = policy == FreezePolicy::DecoderEnds;
        let dec_layers = match policy {
            FreezePolicy::Modulation => self
                .dec_layers
                .into_iter()
                .map(SvdLinear::freeze_factors)
                .collect(),
            _ => self.dec_layers,
        };
        Self {
            eq_encoder: self.eq_encoder.no_grad(),
            coord_encoder: self.coord_encoder.no_grad(),
            dec_layer_1: if train_ends {
                self.dec_layer_1
            } else {
                self.dec_layer_1.no_grad()
            },
            dec_layers,
            last_layer: if train_ends {
                self.last_layer
            } else {
                self.last_layer.no_grad()
            },
            activation: self.activation,
        }
    }

    /// 凍結方針のもとで学習されるパラメータ数。
    pub fn num_trainable_params(&self, policy: FreezePolicy) -> usize {
        let svd_params: usize = match policy {
            FreezePolicy::Modulation => self
                .dec_layers
                .iter()
                .map(|layer| layer.s.num_params() + layer.modvec.num_params())
                .sum(),
            _ => self.dec_layers.iter().map(|layer| layer.num_params()).sum(),
        };
        match policy {
            FreezePolicy::DecoderEnds => {
                svd_params + self.dec_layer_1.num_params() + self.last_layer.num_params()
            }
            _ => svd_params,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.dec_layers.first().map(SvdLinear::rank)
    }
}

impl<B: Backend> PinnModel<B> for P2innSvd<B> {
    fn forward(&self, eq: Tensor<B, 2>, x: Tensor<B, 2>, t: Tensor<B, 2>) -> Tensor<B, 2> {
        let h = encode(&self.eq_encoder, &self.coord_encoder, &self.activation, eq, x, t);
        decode(&self.dec_layer_1, &self.dec_layers, &self.last_layer, &self.activation, h)
    }

    fn forward_jet(&self, eq: Tensor<B, 2>, x: Tensor<B, 2>, t: Tensor<B, 2>) -> Jet<B> {
        let jet = encode_jet(&self.eq_encoder, &self.coord_encoder, &self.activation, eq, x, t);
        decode_jet(&self.dec_layer_1, &self.dec_layers, &self.last_layer, jet)
    }
}

fn run_mlp<B: Backend>(
    layers: &[Linear<B>],
    activation: &Tanh,
    input: Tensor<B, 2>,
) -> Tensor<B, 2> {
    layers
        .iter()
        .fold(input, |x, layer| activation.forward(layer.forward(x)))
}

fn encode<B: Backend>(
    eq_encoder: &[Linear<B>],
    coord_encoder: &[Linear<B>],
    activation: &Tanh,
    eq: Tensor<B, 2>,
    x: Tensor<B, 2>,
    t: Tensor<B, 2>,
) -> Tensor<B, 2> {
    let eq_emb = run_mlp(eq_encoder, activation, eq);
    let coord_emb = run_mlp(coord_encoder, activation, Tensor::cat(vec![x, t], 1));
    Tensor::cat(vec![eq_emb, coord_emb], 1)
}

fn decode<B: Backend, L: DenseLayer<B>>(
    dec_layer_1: &Linear<B>,
    dec_layers: &[L],
    last_layer: &Linear<B>,
    activation: &Tanh,
    h: Tensor<B, 2>,
) -> Tensor<B, 2> {
    let h = activation.forward(dec_layer_1.forward(h));
    let h = dec_layers
        .iter()
        .fold(h, |x, layer| activation.forward(layer.affine(x)));
    last_layer.forward(h)
}

fn encode_jet<B: Backend>(
    eq_encoder: &[Linear<B>],
    coord_encoder: &[Linear<B>],
    activation: &Tanh,
    eq: Tensor<B, 2>,
    x: Tensor<B, 2>,
    t: Tensor<B, 2>,
) -> Jet<B> {
    let eq_emb = run_mlp(eq_encoder, activation, eq);
    coord_encoder
        .iter()
        .fold(Jet::coordinates(x, t), |jet, layer| jet.dense(layer).tanh())
        .prepend_constant(eq_emb)
}

fn decode_jet<B: Backend, L: DenseLayer<B>>(
    dec_layer_1: &Linear<B>,
    dec_layers: &[L],
    last_layer: &Linear<B>,
    jet: Jet<B>,
) -> Jet<B> {
    let jet = jet.dense(dec_layer_1).tanh();
    dec_layers
        .iter()
        .fold(jet, |jet, layer| jet.dense(layer).tanh())
        .dense(last_layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    fn inputs(device: &<TestBackend as Backend>::Device) -> [Tensor<TestBackend, 2>; 3] {
        let eq = Tensor::from_data(
            TensorData::new(vec![1.0_f32, 0.0, 0.0, 2.0, 1.0, 0.5, 0.0, 3.0, 3.0], [3, 3]),
            device,
        );
        let x = Tensor::from_data(TensorData::new(vec![0.1_f32, 2.0, 5.5], [3, 1]), device);
        let t = Tensor::from_data(TensorData::new(vec![0.0_f32, 0.4, 1.0], [3, 1]), device);
        [eq, x, t]
    }

    fn values(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn pretrained_model_has_expected_shapes() {
        let device = Default::default();
        let model = P2innConfig::new().with_hidden(8).init::<TestBackend>(&device);
        let [eq, x, t] = inputs(&device);

        assert_eq!(model.eq_encoder.len(), 3);
        assert_eq!(model.dec_layers.len(), 5);
        assert_eq!(model.dec_layer_1.weight.dims(), [16, 8]);
        assert_eq!(model.forward(eq, x, t).dims(), [3, 1]);
    }

    #[test]
    fn svd_model_reproduces_pretrained_output() {
        let device = Default::default();
        TestBackend::seed(3);
        let model = P2innConfig::new().with_hidden(8).init::<TestBackend>(&device);
        let [eq, x, t] = inputs(&device);
        let expected = values(model.forward(eq.clone(), x.clone(), t.clone()));

        let svd = P2innSvd::from_pretrained(model, None).unwrap();
        assert_eq!(svd.rank(), Some(8));
        let actual = values(svd.forward(eq.clone(), x.clone(), t.clone()));
        for (a, b) in actual.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-4);
        }

        let jet_value = values(svd.forward_jet(eq, x, t).value);
        for (a, b) in jet_value.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn trainable_parameter_counts_follow_policy() {
        let device = Default::default();
        let h = 8;
        let model = P2innConfig::new().with_hidden(h).init::<TestBackend>(&device);
        let svd = P2innSvd::from_pretrained(model, Some(4)).unwrap();

        let per_layer = h * 4 + 4 + 4 * h + 4 + h;
        assert_eq!(svd.num_trainable_params(FreezePolicy::Factors), 5 * per_layer);
        assert_eq!(svd.num_trainable_params(FreezePolicy::Modulation), 5 * 8);
        assert_eq!(
            svd.num_trainable_params(FreezePolicy::DecoderEnds),
            5 * per_layer + (2 * h * h + h) + (h + 1)
        );
    }

    #[test]
    fn frozen_parameters_receive_no_gradient() {
        type AutodiffBackend = Autodiff<TestBackend>;
        let device = Default::default();
        let model = P2innConfig::new().with_hidden(8).init::<AutodiffBackend>(&device);
        let svd = P2innSvd::from_pretrained(model, None)
            .unwrap()
            .freeze(FreezePolicy::Modulation);

        let eq = Tensor::<AutodiffBackend, 2>::ones([4, 3], &device);
        let x = Tensor::<AutodiffBackend, 2>::ones([4, 1], &device);
        let t = Tensor::<AutodiffBackend, 2>::zeros([4, 1], &device);
        let grads = svd.forward(eq, x, t).sum().backward();

        assert!(svd.dec_layers[0].modvec.grad(&grads).is_some());
        assert!(svd.dec_layers[0].s.grad(&grads).is_some());
        assert!(svd.dec_layers[0].u.grad(&grads).is_none());
        assert!(svd.last_layer.weight.grad(&grads).is_none());
        assert!(svd.eq_encoder[0].weight.grad(&grads).is_none());
    }

    #[test]
    fn svd_skeleton_matches_saved_shapes() {
        let device = Default::default();
        let skeleton = P2innConfig::new()
            .with_hidden(8)
            .init_svd::<TestBackend>(Some(3), &device);
        assert_eq!(skeleton.rank(), Some(3));
        assert_eq!(skeleton.dec_layers.len(), 5);
        assert_eq!(skeleton.dec_layers[0].u.dims(), [8, 3]);
    }
}
