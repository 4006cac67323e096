use crate::config::{FinetuneConfig, PretrainConfig};
use crate::inference::InferenceTarget;
use crate::model::FreezePolicy;
use crate::pde::{Coefficients, InitialCondition, PdeType};
use clap::{Args, Parser, Subcommand};

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "SVD-modulated parameterized PINN fine-tuning with Burn",
    long_about = None
)]
pub struct Cli {
    /// デバッグログを表示します
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// すべての方程式で P2INN を事前学習し、チェックポイントを保存します
    Pretrain(PretrainArgs),
    /// 事前学習済みモデルのデコーダを特異値分解し、1 本の方程式に微調整します
    Finetune(FinetuneArgs),
    /// 微調整済みモデルを使い、推論と評価を実行します
    Infer(InferArgs),
}

#[derive(Args, Debug)]
pub struct CommonArgs {
    #[arg(long, value_enum, default_value_t = InitialCondition::Sin1)]
    pub init_cond: InitialCondition,
    /// 事前学習の係数範囲 (1..=load_range)
    #[arg(long, default_value_t = 5)]
    pub load_range: usize,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    #[arg(long, default_value = "./param")]
    pub param_dir: String,
}

#[derive(Args, Debug)]
pub struct EquationArgs {
    #[arg(long, value_enum, default_value_t = PdeType::Convection)]
    pub pde_type: PdeType,
    /// 対流係数。省略時は方程式の種類に応じて 1 または 0
    #[arg(long)]
    pub beta: Option<f64>,
    /// 拡散係数
    #[arg(long)]
    pub nu: Option<f64>,
    /// 反応係数
    #[arg(long)]
    pub rho: Option<f64>,
}

impl EquationArgs {
    pub fn coefficients(&self) -> Coefficients {
        let defaults = self.pde_type.coefficients(1.0);
        Coefficients::new(
            self.beta.unwrap_or(defaults.beta),
            self.nu.unwrap_or(defaults.nu),
            self.rho.unwrap_or(defaults.rho),
        )
    }
}

#[derive(Args, Debug)]
pub struct PretrainArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[arg(long, default_value_t = 20000)]
    pub epochs: usize,
    #[arg(long, default_value_t = 5000)]
    pub checkpoint_every: usize,
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,
}

impl PretrainArgs {
    pub fn into_config(self) -> PretrainConfig {
        PretrainConfig::new(self.common.init_cond)
            .with_load_range(self.common.load_range)
            .with_seed(self.common.seed)
            .with_param_dir(self.common.param_dir)
            .with_epochs(self.epochs)
            .with_checkpoint_every(self.checkpoint_every)
            .with_learning_rate(self.lr)
    }
}

#[derive(Args, Debug)]
pub struct FinetuneArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(flatten)]
    pub equation: EquationArgs,
    #[arg(long, default_value_t = 15)]
    pub epochs: usize,
    /// 読み込む事前学習チェックポイントのエポック
    #[arg(long, default_value_t = 20000)]
    pub load_epoch: usize,
    /// 特異値分解の打ち切りランク
    #[arg(long)]
    pub rank: Option<usize>,
    #[arg(long, value_enum, default_value = "factors")]
    pub freeze: FreezePolicy,
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,
}

impl FinetuneArgs {
    pub fn into_config(self) -> FinetuneConfig {
        FinetuneConfig::new(
            self.common.init_cond,
            self.equation.pde_type,
            self.equation.coefficients(),
        )
        .with_load_range(self.common.load_range)
        .with_seed(self.common.seed)
        .with_param_dir(self.common.param_dir)
        .with_epochs(self.epochs)
        .with_load_epoch(self.load_epoch)
        .with_rank(self.rank)
        .with_freeze(self.freeze)
        .with_learning_rate(self.lr)
    }
}

#[derive(Args, Debug)]
pub struct InferArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(flatten)]
    pub equation: EquationArgs,
}

impl InferArgs {
    pub fn into_target(self) -> InferenceTarget {
        InferenceTarget {
            coefficients: self.equation.coefficients(),
            param_dir: self.common.param_dir,
            init_cond: self.common.init_cond,
            pde_type: self.equation.pde_type,
            seed: self.common.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finetune_arguments_build_a_config() {
        let cli = Cli::parse_from([
            "svd-pinn",
            "finetune",
            "--init-cond",
            "gauss",
            "--pde-type",
            "reaction-diffusion",
            "--rho",
            "4",
            "--rank",
            "10",
            "--freeze",
            "modulation",
        ]);
        let Commands::Finetune(args) = cli.command else {
            panic!("finetune サブコマンドが期待されます");
        };
        let config = args.into_config();

        assert_eq!(config.init_cond, InitialCondition::Gauss);
        assert_eq!(config.pde_type, PdeType::ReactionDiffusion);
        assert_eq!(config.coefficients, Coefficients::new(0.0, 1.0, 4.0));
        assert_eq!(config.rank, Some(10));
        assert_eq!(config.freeze, FreezePolicy::Modulation);
        assert_eq!(config.epochs, 15);
        assert_eq!(config.load_epoch, 20000);
    }

    #[test]
    fn pretrain_defaults_match_checkpoint_layout() {
        let cli = Cli::parse_from(["svd-pinn", "pretrain", "--seed", "7"]);
        let Commands::Pretrain(args) = cli.command else {
            panic!("pretrain サブコマンドが期待されます");
        };
        let config = args.into_config();
        assert_eq!(config.epochs, 20000);
        assert_eq!(
            config.checkpoint_path(20000),
            std::path::PathBuf::from("./param/sin_1/checkpoint_all_5_7/P2INN_20000")
        );
    }
}
