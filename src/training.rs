//! 事前学習と微調整で共有する学習ループの部品。

use crate::data::{BoundaryBatch, PinnDatasets, PointBatch, PointSample};
use crate::metrics::Metrics;
use crate::model::PinnModel;
use crate::pinn::{boundary_loss, collocation_loss, initial_loss};
use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use std::path::Path;

/// 学習に使うバックエンド
pub type TrainBackend = Autodiff<NdArray<f32>>;
/// 評価・推論に使うバックエンド
pub type EvalBackend = NdArray<f32>;

/// 1 エポックで各データセットについて合計した損失の値。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LossReport {
    pub loss_f: f32,
    /// 初期条件の物理残差と正解値誤差の合計
    pub loss_u: f32,
    pub loss_bd: f32,
}

impl LossReport {
    pub fn training_loss(&self) -> f32 {
        self.loss_f + self.loss_u + self.loss_bd
    }
}

/// 逆伝播用の損失と、表示用の値。
pub struct EpochLosses<B: Backend> {
    pub total: Tensor<B, 1>,
    pub report: LossReport,
}

/// 3 つのデータセットをバッチごとに走査して損失を計算します。
///
/// 逆伝播される各項はバッチ損失の平均、表示用の値はバッチ損失の合計です。
pub fn compute_losses<B: Backend, M: PinnModel<B>>(
    model: &M,
    datasets: &PinnDatasets,
    batch_size: usize,
    device: &B::Device,
) -> EpochLosses<B> {
    let batch_size = batch_size.max(1);
    let mut report = LossReport::default();

    let mut costs_f = Vec::new();
    for chunk in datasets.collocation.chunks(batch_size) {
        let batch = PointBatch::new(chunk, device);
        let cost_f = collocation_loss(model, &batch);
        report.loss_f += scalar(&cost_f);
        costs_f.push(cost_f);
    }

    let mut costs_u = Vec::new();
    let mut costs_gt = Vec::new();
    for chunk in datasets.initial.chunks(batch_size) {
        let batch = PointBatch::new(chunk, device);
        let (cost_u, cost_gt) = initial_loss(model, &batch);
        report.loss_u += scalar(&cost_u) + scalar(&cost_gt);
        costs_u.push(cost_u);
        costs_gt.push(cost_gt);
    }

    let mut costs_bd = Vec::new();
    for chunk in datasets.boundary.chunks(batch_size) {
        let batch = BoundaryBatch::new(chunk, device);
        let cost_bd = boundary_loss(model, &batch);
        report.loss_bd += scalar(&cost_bd);
        costs_bd.push(cost_bd);
    }

    let total = [costs_f, costs_u, costs_gt, costs_bd]
        .into_iter()
        .map(|costs| mean_of(costs, device))
        .reduce(|a, b| a + b)
        .unwrap_or_else(|| Tensor::zeros([1], device));

    EpochLosses { total, report }
}

fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f32 {
    tensor.clone().into_scalar().elem::<f32>()
}

fn mean_of<B: Backend>(costs: Vec<Tensor<B, 1>>, device: &B::Device) -> Tensor<B, 1> {
    if costs.is_empty() {
        return Tensor::zeros([1], device);
    }
    Tensor::cat(costs, 0).mean()
}

/// 損失の計算、逆伝播、オプティマイザの 1 ステップを実行します。
pub fn fit_epoch<B, M, O>(
    model: M,
    optim: &mut O,
    learning_rate: f64,
    datasets: &PinnDatasets,
    batch_size: usize,
    device: &B::Device,
) -> (M, LossReport)
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + PinnModel<B>,
    O: Optimizer<M, B>,
{
    let losses = compute_losses(&model, datasets, batch_size, device);
    let grads = losses.total.backward();
    let grads = GradientsParams::from_grads(grads, &model);
    let model = optim.step(learning_rate, model, grads);
    (model, losses.report)
}

/// バッチごとの予測を連結し、`[N, 1]` のテンソルとして返します。
pub fn predict_tensor<B: Backend, M: PinnModel<B>>(
    model: &M,
    samples: &[PointSample],
    batch_size: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let outputs: Vec<Tensor<B, 2>> = samples
        .chunks(batch_size.max(1))
        .map(|chunk| {
            let batch = PointBatch::<B>::new(chunk, device);
            model.forward(batch.eq, batch.x, batch.t)
        })
        .collect();
    if outputs.is_empty() {
        return Tensor::zeros([0, 1], device);
    }
    Tensor::cat(outputs, 0)
}

/// 予測テンソルを `f64` の列に変換します。
pub fn tensor_values<B: Backend>(tensor: Tensor<B, 2>) -> crate::Result<Vec<f64>> {
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| crate::Error::Data(format!("{e:?}")))?;
    Ok(values.into_iter().map(f64::from).collect())
}

/// 評価データ全体で予測し、`(正解値, 予測値)` を返します。
pub fn predict<B: Backend, M: PinnModel<B>>(
    model: &M,
    samples: &[PointSample],
    batch_size: usize,
    device: &B::Device,
) -> crate::Result<(Vec<f64>, Vec<f64>)> {
    if samples.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let prediction = tensor_values(predict_tensor(model, samples, batch_size, device))?;
    let truth = samples.iter().map(|s| s.u).collect();
    Ok((truth, prediction))
}

/// 評価データに対する誤差指標を計算します。
pub fn evaluate<B: Backend, M: PinnModel<B>>(
    model: &M,
    samples: &[PointSample],
    batch_size: usize,
    device: &B::Device,
) -> crate::Result<Metrics> {
    let (truth, prediction) = predict(model, samples, batch_size, device)?;
    Metrics::compute(&truth, &prediction)
        .ok_or_else(|| crate::Error::Data("評価データが空です".to_string()))
}

/// デバイス情報を表示します。
pub fn print_device_info() {
    println!("=============[Device Info]==============");
    println!("- Use Device : {:?}", <EvalBackend as Backend>::Device::default());
    println!("- Backend : NdArray (CPU)");
    println!("========================================\n");
}

/// 損失の履歴を対数スケールのグラフとして PNG ファイルに出力します。
pub fn plot_loss_history(
    path: &Path,
    x_desc: &str,
    series: &[(&str, &[f32], RGBColor)],
) -> crate::Result<()> {
    let logs: Vec<f32> = series
        .iter()
        .flat_map(|(_, values, _)| values.iter())
        .filter(|v| v.is_finite() && **v > 0.0)
        .map(|v| v.log10())
        .collect();
    let max_log_loss = logs.iter().copied().fold(f32::MIN, f32::max);
    let min_log_loss = logs.iter().copied().fold(f32::MAX, f32::min) - 0.5;
    let (min_log_loss, max_log_loss) = if logs.is_empty() {
        (-6.0, 0.0)
    } else {
        (min_log_loss, max_log_loss + 0.5)
    };
    let len = series.iter().map(|(_, values, _)| values.len()).max().unwrap_or(0);

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0..len.max(1), min_log_loss..max_log_loss)
        .map_err(plot_error)?;
    chart
        .configure_mesh()
        .y_desc("Loss (log10 scale)")
        .x_desc(x_desc)
        .draw()
        .map_err(plot_error)?;
    for &(label, values, color) in series {
        chart
            .draw_series(LineSeries::new(
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_finite() && **v > 0.0)
                    .map(|(i, &val)| (i, val.log10())),
                &color,
            ))
            .map_err(plot_error)?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_error)?;
    root.present().map_err(plot_error)?;
    Ok(())
}

fn plot_error<E: std::error::Error + Send + Sync>(e: DrawingAreaErrorKind<E>) -> crate::Error {
    crate::Error::Plot(e.to_string())
}
