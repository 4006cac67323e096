use crate::data::{BoundaryBatch, PointBatch};
use crate::model::PinnModel;
use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// PDE 残差 `u_t + β u_x − ν u_xx − ρ u (1 − u)` を点ごとに計算します。
///
/// 微分はジェットとして順伝播で得るため、残差はモデルのパラメータについて微分可能です。
pub fn residual<B: Backend, M: PinnModel<B>>(model: &M, batch: &PointBatch<B>) -> Tensor<B, 2> {
    let [beta, nu, rho] = batch.coefficient_columns();
    let jet = model.forward_jet(batch.eq.clone(), batch.x.clone(), batch.t.clone());
    let u = jet.value;
    let logistic = u.clone().mul(u.neg().add_scalar(1.0));
    jet.d_t + beta.mul(jet.d_x) - nu.mul(jet.d_xx) - rho.mul(logistic)
}

/// コロケーション点での物理損失 `MSE(residual, 0)`。
pub fn collocation_loss<B: Backend, M: PinnModel<B>>(
    model: &M,
    batch: &PointBatch<B>,
) -> Tensor<B, 1> {
    let residual = residual(model, batch);
    MseLoss::new().forward(residual.clone(), Tensor::zeros_like(&residual), Reduction::Mean)
}

/// 初期条件点での損失。物理残差の項と正解値との誤差の項を分けて返します。
pub fn initial_loss<B: Backend, M: PinnModel<B>>(
    model: &M,
    batch: &PointBatch<B>,
) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let residual = residual(model, batch);
    let cost_u =
        MseLoss::new().forward(residual.clone(), Tensor::zeros_like(&residual), Reduction::Mean);
    let u_pred = model.forward(batch.eq.clone(), batch.x.clone(), batch.t.clone());
    let cost_gt = MseLoss::new().forward(batch.u.clone(), u_pred, Reduction::Mean);
    (cost_u, cost_gt)
}

/// 周期境界条件の損失 `mean((u(0, t) − u(2π, t))²)`。
pub fn boundary_loss<B: Backend, M: PinnModel<B>>(
    model: &M,
    batch: &BoundaryBatch<B>,
) -> Tensor<B, 1> {
    let u_lb = model.forward(batch.eq.clone(), batch.x_lb.clone(), batch.t_lb.clone());
    let u_ub = model.forward(batch.eq.clone(), batch.x_ub.clone(), batch.t_ub.clone());
    (u_lb - u_ub).powf_scalar(2.0).mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BoundarySample, PointSample};
    use crate::jet::Jet;
    use crate::pde::Coefficients;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    /// 解析解 `u = 1 + sin(x − βt)` を返すモデル。
    struct TravellingWave {
        beta: f32,
    }

    impl PinnModel<TestBackend> for TravellingWave {
        fn forward(
            &self,
            _eq: Tensor<TestBackend, 2>,
            x: Tensor<TestBackend, 2>,
            t: Tensor<TestBackend, 2>,
        ) -> Tensor<TestBackend, 2> {
            (x - t.mul_scalar(self.beta)).sin().add_scalar(1.0)
        }

        fn forward_jet(
            &self,
            _eq: Tensor<TestBackend, 2>,
            x: Tensor<TestBackend, 2>,
            t: Tensor<TestBackend, 2>,
        ) -> Jet<TestBackend> {
            let phase = x - t.mul_scalar(self.beta);
            let cos = phase.clone().cos();
            Jet {
                value: phase.clone().sin().add_scalar(1.0),
                d_x: cos.clone(),
                d_t: cos.mul_scalar(-self.beta),
                d_xx: phase.sin().neg(),
            }
        }
    }

    fn samples(coeffs: Coefficients) -> Vec<PointSample> {
        [(0.5, 0.1), (2.0, 0.7), (4.0, 0.3)]
            .into_iter()
            .map(|(x, t)| PointSample {
                x,
                t,
                u: 1.0 + (x - coeffs.beta * t).sin(),
                coeffs,
            })
            .collect()
    }

    #[test]
    fn exact_convection_solution_has_zero_losses() {
        let device = Default::default();
        let coeffs = Coefficients::new(2.0, 0.0, 0.0);
        let model = TravellingWave { beta: 2.0 };
        let batch = PointBatch::<TestBackend>::new(&samples(coeffs), &device);

        let loss_f = collocation_loss(&model, &batch).into_scalar();
        let (cost_u, cost_gt) = initial_loss(&model, &batch);
        assert!(loss_f < 1e-10);
        assert!(cost_u.into_scalar() < 1e-10);
        assert!(cost_gt.into_scalar() < 1e-10);

        let boundary = BoundaryBatch::<TestBackend>::new(
            &[BoundarySample { t: 0.25, coeffs }, BoundarySample { t: 0.8, coeffs }],
            &device,
        );
        assert!(boundary_loss(&model, &boundary).into_scalar() < 1e-8);
    }

    #[test]
    fn wrong_coefficients_leave_a_residual() {
        let device = Default::default();
        let model = TravellingWave { beta: 2.0 };
        let coeffs = Coefficients::new(2.0, 1.0, 1.0);
        let batch = PointBatch::<TestBackend>::new(&samples(coeffs), &device);

        let residual = residual(&model, &batch).into_data().to_vec::<f32>().unwrap();
        // 残差は ν sin(φ) − ρ u (1 − u)
        for (sample, r) in samples(coeffs).iter().zip(residual) {
            let phase = sample.x - 2.0 * sample.t;
            let u = 1.0 + phase.sin();
            let expected = phase.sin() - u * (1.0 - u);
            assert!((r as f64 - expected).abs() < 1e-4);
        }
    }
}
