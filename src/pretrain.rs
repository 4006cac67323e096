use crate::config::{LOSS_GRAPH_FILENAME, PretrainConfig, save_config};
use crate::data::PinnDatasets;
use crate::error::Result;
use crate::training::{TrainBackend, fit_epoch, plot_loss_history, print_device_info};
use burn::module::Module;
use burn::optim::AdamConfig;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use plotters::style::{BLUE, RED};
use std::time::Instant;
use tracing::{info, warn};

/// `pretrain` サブコマンドを実行します。
///
/// すべての方程式と係数 `1..=load_range` の組み合わせで P2INN を学習し、
/// 一定エポックごとにチェックポイントを保存します。
pub fn run(config: PretrainConfig) -> Result<()> {
    let device = Default::default();
    TrainBackend::seed(config.seed);
    print_device_info();

    let checkpoint_dir = config.checkpoint_dir();
    save_config(&config, &checkpoint_dir)?;

    let datasets = PinnDatasets::all(
        config.init_cond,
        config.load_range,
        &config.data,
        config.seed,
    );
    let mut model = config.model.init::<TrainBackend>(&device);
    let mut optim = AdamConfig::new().init();
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

    println!("=============[Pretrain Info]============");
    println!("- Initial condition : {}", config.init_cond);
    println!("- Coefficient range : 1..={}", config.load_range);
    println!(
        "- Collocation / Initial / Boundary points : {} / {} / {}",
        datasets.collocation.len(),
        datasets.initial.len(),
        datasets.boundary.len()
    );
    println!("- Model size : {}", model.num_params());
    println!("========================================\n");

    let mut total_loss_history = Vec::new();
    let mut phys_loss_history = Vec::new();
    let training_start = Instant::now();

    for epoch in 1..=config.epochs {
        let (next, report) = fit_epoch(
            model,
            &mut optim,
            config.learning_rate,
            &datasets,
            config.data.batch_size,
            &device,
        );
        model = next;

        let last = epoch == config.epochs;
        if last || (config.log_every > 0 && epoch % config.log_every == 0) {
            total_loss_history.push(report.training_loss());
            phys_loss_history.push(report.loss_f);
            info!(
                epoch,
                training_loss = report.training_loss(),
                loss_f = report.loss_f,
                loss_u = report.loss_u,
                loss_bd = report.loss_bd,
                "事前学習"
            );
        }

        if last || (config.checkpoint_every > 0 && epoch % config.checkpoint_every == 0) {
            let path = config.checkpoint_path(epoch);
            model.clone().save_file(path.clone(), &recorder)?;
            info!("チェックポイントを '{}' に保存しました", path.display());
        }
    }
    info!("事前学習が完了しました (学習時間: {:.2?})", training_start.elapsed());

    let graph = checkpoint_dir.join(LOSS_GRAPH_FILENAME);
    match plot_loss_history(
        &graph,
        &format!("Epochs (x{})", config.log_every.max(1)),
        &[
            ("Total Loss", total_loss_history.as_slice(), RED),
            ("Physics Loss", phys_loss_history.as_slice(), BLUE),
        ],
    ) {
        Ok(()) => info!("損失グラフを '{}' に保存しました", graph.display()),
        Err(e) => warn!("{e}"),
    }

    Ok(())
}
