//! # SVD 変調 PINN 微調整プログラム
//!
//! `clap` クレートを利用して、コマンドラインから事前学習・微調整・推論を
//! 個別に実行できます。
//!
//! ## 使い方
//!
//! ### 事前学習
//! ```bash
//! cargo run --release -- pretrain --init-cond sin_1 --load-range 5
//! ```
//!
//! ### 微調整
//! ```bash
//! cargo run --release -- finetune --pde-type convection --beta 5
//! ```
//!
//! ### 推論
//! ```bash
//! cargo run --release -- infer --pde-type convection --beta 5
//! ```

use clap::Parser;
use svd_pinn::cli::{Cli, Commands};
use svd_pinn::{finetune, inference, pretrain};
use tracing::Level;

/// プログラムのエントリーポイント。
///
/// コマンドライン引数を解析し、各サブコマンドの処理に振り分けます。
fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let result = match cli.command {
        Commands::Pretrain(args) => pretrain::run(args.into_config()),
        Commands::Finetune(args) => finetune::run(args.into_config()),
        Commands::Infer(args) => inference::run(args.into_target()).map(|_| ()),
    };

    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}
