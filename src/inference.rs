use crate::config::{MODEL_FILENAME, load_finetune_config, record_file, run_dir};
use crate::data::test_grid;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::pde::{Coefficients, InitialCondition, PdeType};
use crate::training::{EvalBackend, predict_tensor, tensor_values};
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use std::time::Instant;

/// 推論対象の微調整済みモデルを特定する情報。
#[derive(Clone, Debug)]
pub struct InferenceTarget {
    pub param_dir: String,
    pub init_cond: InitialCondition,
    pub pde_type: PdeType,
    pub coefficients: Coefficients,
    pub seed: u64,
}

/// 推論結果の概要。
#[derive(Clone, Debug)]
pub struct InferenceReport {
    /// 予測テンソルの形状 `[N, 1]`
    pub prediction_dims: [usize; 2],
    pub metrics: Metrics,
}

/// `infer` サブコマンドを実行します。
///
/// 微調整済みモデルを読み込み、参照解の全格子で予測して誤差指標を表示します。
pub fn run(target: InferenceTarget) -> Result<InferenceReport> {
    let device = Default::default();
    let dir = run_dir(
        &target.param_dir,
        target.init_cond,
        target.pde_type,
        target.coefficients,
        target.seed,
    );
    let model_path = dir.join(MODEL_FILENAME);
    if !record_file(&model_path).exists() {
        return Err(Error::MissingCheckpoint {
            path: record_file(&model_path),
        });
    }
    let config = load_finetune_config(&dir)?;

    println!("\n推論を実行します - バックエンド: NdArray (CPU)");
    let inference_start = Instant::now();

    println!("保存済みモデルを '{}' からロード中...", record_file(&model_path).display());
    let model = config
        .model
        .init_svd::<EvalBackend>(config.rank, &device)
        .load_file(
            model_path,
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            &device,
        )?;

    let samples = test_grid(config.init_cond, config.coefficients, &config.data);
    let u_pred = predict_tensor(&model, &samples, config.data.batch_size, &device);
    let prediction_dims = u_pred.dims();
    let prediction = tensor_values(u_pred)?;
    let truth: Vec<f64> = samples.iter().map(|s| s.u).collect();
    let metrics = Metrics::compute(&truth, &prediction)
        .ok_or_else(|| Error::Data("評価データが空です".to_string()))?;
    let inference_duration = inference_start.elapsed();

    println!(
        "推論が完了しました。入力グリッド数: {}x{}={}, 予測値の形状: {:?}",
        config.data.nt,
        config.data.nx,
        samples.len(),
        prediction_dims
    );
    println!("=> {metrics}");
    println!("=> 推論時間: {:.2?}", inference_duration);

    Ok(InferenceReport {
        prediction_dims,
        metrics,
    })
}
