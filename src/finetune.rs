//! 事前学習済みモデルのデコーダを特異値分解し、少数のパラメータだけを微調整します。

use crate::config::{FinetuneConfig, LOSS_GRAPH_FILENAME, MODEL_FILENAME, record_file, save_config};
use crate::data::PinnDatasets;
use crate::error::{Error, Result};
use crate::model::P2innSvd;
use crate::training::{TrainBackend, evaluate, fit_epoch, plot_loss_history, print_device_info};
use burn::module::{AutodiffModule, Module};
use burn::optim::AdamConfig;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use plotters::style::{BLUE, RED};
use std::time::Instant;
use tracing::{debug, info, warn};

/// `finetune` サブコマンドを実行します。
pub fn run(config: FinetuneConfig) -> Result<()> {
    let device = Default::default();
    TrainBackend::seed(config.seed);
    print_device_info();

    let checkpoint = config.pretrained_checkpoint();
    if !record_file(&checkpoint).exists() {
        return Err(Error::MissingCheckpoint {
            path: record_file(&checkpoint),
        });
    }
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let pretrained = config
        .model
        .init::<TrainBackend>(&device)
        .load_file(checkpoint.clone(), &recorder, &device)?;
    info!("事前学習済みモデルを '{}' からロードしました", checkpoint.display());

    let mut model = P2innSvd::from_pretrained(pretrained, config.rank)?.freeze(config.freeze);
    for (i, layer) in model.dec_layers.iter().enumerate() {
        let singular = layer.s.val().into_data().to_vec::<f32>().unwrap_or_default();
        debug!(
            layer = i + 2,
            rank = layer.rank(),
            largest = singular.first().copied().unwrap_or_default(),
            smallest = singular.last().copied().unwrap_or_default(),
            "特異値分解"
        );
    }

    println!("=============[Train Info]===============");
    println!("- PDE type : {}", config.pde_type);
    println!("- Initial condition : {}", config.init_cond);
    println!("- Coefficient : {}", config.coefficients);
    println!("- Model size : {}", model.num_params());
    println!(
        "- Trainable parameters : {}",
        model.num_trainable_params(config.freeze)
    );
    println!("========================================\n");

    println!("=============[Model Info]===============\n");
    println!("{model}");
    println!("========================================\n");

    let datasets = PinnDatasets::single(
        config.init_cond,
        config.coefficients,
        &config.data,
        config.seed,
    );
    let mut optim = AdamConfig::new().init();

    let mut total_loss_history = Vec::new();
    let mut rel_err_history = Vec::new();
    let training_start = Instant::now();

    for epoch in 0..config.epochs {
        let (next, report) = fit_epoch(
            model,
            &mut optim,
            config.learning_rate,
            &datasets,
            config.data.batch_size,
            &device,
        );
        model = next;

        let metrics = evaluate(
            &model.valid(),
            &datasets.test,
            config.data.batch_size,
            &device,
        )?;
        info!(
            l2_abs_err = metrics.l2_abs_err,
            l2_rel_err = metrics.l2_rel_err,
            max_error = metrics.max_error,
            variance_score = metrics.variance_score,
            "評価"
        );
        info!(
            epoch,
            training_loss = report.training_loss(),
            loss_f = report.loss_f,
            loss_u = report.loss_u,
            loss_bd = report.loss_bd,
            "微調整"
        );

        total_loss_history.push(report.training_loss());
        rel_err_history.push(metrics.l2_rel_err as f32);
    }
    info!("微調整が完了しました (学習時間: {:.2?})", training_start.elapsed());

    let run_dir = config.run_dir();
    save_config(&config, &run_dir)?;
    let model_path = run_dir.join(MODEL_FILENAME);
    model.save_file(model_path.clone(), &recorder)?;
    info!("モデルを '{}' に保存しました", record_file(&model_path).display());

    let graph = run_dir.join(LOSS_GRAPH_FILENAME);
    match plot_loss_history(
        &graph,
        "Epochs",
        &[
            ("Total Loss", total_loss_history.as_slice(), RED),
            ("L2 Relative Error", rel_err_history.as_slice(), BLUE),
        ],
    ) {
        Ok(()) => info!("損失グラフを '{}' に保存しました", graph.display()),
        Err(e) => warn!("{e}"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataConfig, PretrainConfig, load_finetune_config};
    use crate::model::{FreezePolicy, P2innConfig};
    use crate::pde::{Coefficients, InitialCondition, PdeType};

    fn tiny_data() -> DataConfig {
        DataConfig::new()
            .with_nx(8)
            .with_nt(3)
            .with_n_collocation(8)
            .with_n_initial(8)
            .with_n_boundary(4)
    }

    #[test]
    fn missing_checkpoint_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = FinetuneConfig::new(
            InitialCondition::Sin1,
            PdeType::Convection,
            Coefficients::new(1.0, 0.0, 0.0),
        )
        .with_param_dir(dir.path().display().to_string());

        assert!(matches!(run(config), Err(Error::MissingCheckpoint { .. })));
    }

    #[test]
    fn finetune_runs_from_a_pretrained_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let param_dir = dir.path().display().to_string();
        let model = P2innConfig::new().with_hidden(6);

        crate::pretrain::run(
            PretrainConfig::new(InitialCondition::Sin1)
                .with_model(model.clone())
                .with_data(tiny_data())
                .with_load_range(1)
                .with_epochs(2)
                .with_param_dir(param_dir.clone()),
        )
        .unwrap();

        let config = FinetuneConfig::new(
            InitialCondition::Sin1,
            PdeType::Convection,
            Coefficients::new(1.0, 0.0, 0.0),
        )
        .with_model(model)
        .with_data(tiny_data())
        .with_load_range(1)
        .with_load_epoch(2)
        .with_epochs(2)
        .with_rank(Some(3))
        .with_freeze(FreezePolicy::Modulation)
        .with_param_dir(param_dir);
        run(config.clone()).unwrap();

        let run_dir = config.run_dir();
        assert!(record_file(&run_dir.join(MODEL_FILENAME)).exists());
        assert_eq!(load_finetune_config(&run_dir).unwrap().rank, Some(3));

        let report = crate::inference::run(crate::inference::InferenceTarget {
            param_dir: config.param_dir.clone(),
            init_cond: config.init_cond,
            pde_type: config.pde_type,
            coefficients: config.coefficients,
            seed: config.seed,
        })
        .unwrap();
        assert_eq!(report.prediction_dims, [3 * 8, 1]);
        assert!(report.metrics.l2_rel_err.is_finite());
    }
}
