//! 学習・推論の設定。`burn` の `Config` で JSON として保存・復元できます。

use crate::error::Error;
use crate::model::{FreezePolicy, P2innConfig};
use crate::pde::{Coefficients, InitialCondition, PdeType};
use burn::config::Config;
use std::path::{Path, PathBuf};

/// 学習済みモデルを保存するファイル名（拡張子はレコーダが付与します）
pub const MODEL_FILENAME: &str = "model";
/// 実行時の設定を保存するファイル名
pub const CONFIG_FILENAME: &str = "config.json";
/// 損失グラフのファイル名
pub const LOSS_GRAPH_FILENAME: &str = "loss_graph.png";

/// データセットの点数と評価格子の解像度。
#[derive(Config, Debug)]
pub struct DataConfig {
    /// 空間方向の格子点数
    #[config(default = 256)]
    pub nx: usize,
    /// 時間方向の格子点数
    #[config(default = 100)]
    pub nt: usize,
    /// 方程式 1 本あたりのコロケーション点数
    #[config(default = 1000)]
    pub n_collocation: usize,
    /// 方程式 1 本あたりの初期条件点数
    #[config(default = 256)]
    pub n_initial: usize,
    /// 方程式 1 本あたりの境界条件点数
    #[config(default = 100)]
    pub n_boundary: usize,
    #[config(default = 100_000)]
    pub batch_size: usize,
}

/// 事前学習 (phase 1) の設定。
#[derive(Config, Debug)]
pub struct PretrainConfig {
    pub init_cond: InitialCondition,
    #[config(default = "P2innConfig::new()")]
    pub model: P2innConfig,
    #[config(default = "DataConfig::new()")]
    pub data: DataConfig,
    /// 係数 `1..=load_range` のすべての方程式で学習します
    #[config(default = 5)]
    pub load_range: usize,
    #[config(default = 0)]
    pub seed: u64,
    #[config(default = 20000)]
    pub epochs: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 5000)]
    pub checkpoint_every: usize,
    #[config(default = 200)]
    pub log_every: usize,
    #[config(default = "String::from(\"./param\")")]
    pub param_dir: String,
}

impl PretrainConfig {
    /// `{param_dir}/{init_cond}/checkpoint_all_{load_range}_{seed}`
    pub fn checkpoint_dir(&self) -> PathBuf {
        checkpoint_dir(&self.param_dir, self.init_cond, self.load_range, self.seed)
    }

    /// 拡張子なしのチェックポイントパス `.../P2INN_{epoch}`。
    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.checkpoint_dir().join(format!("P2INN_{epoch}"))
    }
}

/// SVD 変調による微調整 (phase 2) の設定。
#[derive(Config, Debug)]
pub struct FinetuneConfig {
    pub init_cond: InitialCondition,
    pub pde_type: PdeType,
    pub coefficients: Coefficients,
    #[config(default = "P2innConfig::new()")]
    pub model: P2innConfig,
    #[config(default = "DataConfig::new()")]
    pub data: DataConfig,
    #[config(default = 5)]
    pub load_range: usize,
    #[config(default = 0)]
    pub seed: u64,
    /// 読み込む事前学習チェックポイントのエポック
    #[config(default = 20000)]
    pub load_epoch: usize,
    #[config(default = 15)]
    pub epochs: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// 特異値分解の打ち切りランク。`None` なら全ランクを保持します
    #[config(default = "None")]
    pub rank: Option<usize>,
    #[config(default = "FreezePolicy::Factors")]
    pub freeze: FreezePolicy,
    #[config(default = "String::from(\"./param\")")]
    pub param_dir: String,
}

impl FinetuneConfig {
    /// 拡張子なしの事前学習チェックポイントパス。
    pub fn pretrained_checkpoint(&self) -> PathBuf {
        checkpoint_dir(&self.param_dir, self.init_cond, self.load_range, self.seed)
            .join(format!("P2INN_{}", self.load_epoch))
    }

    /// `{param_dir}/{init_cond}/svd_{pde}_{β}_{ν}_{ρ}_{seed}`
    pub fn run_dir(&self) -> PathBuf {
        run_dir(
            &self.param_dir,
            self.init_cond,
            self.pde_type,
            self.coefficients,
            self.seed,
        )
    }
}

fn checkpoint_dir(
    param_dir: &str,
    ic: InitialCondition,
    load_range: usize,
    seed: u64,
) -> PathBuf {
    Path::new(param_dir)
        .join(ic.name())
        .join(format!("checkpoint_all_{load_range}_{seed}"))
}

/// 微調整の成果物ディレクトリ。`infer` からも同じ規則で参照します。
pub fn run_dir(
    param_dir: &str,
    ic: InitialCondition,
    pde_type: PdeType,
    coeffs: Coefficients,
    seed: u64,
) -> PathBuf {
    Path::new(param_dir).join(ic.name()).join(format!(
        "svd_{}_{}_{}_{}_{}",
        pde_type, coeffs.beta, coeffs.nu, coeffs.rho, seed
    ))
}

/// 拡張子を補ったレコーダファイルのパス。
pub fn record_file(path: &Path) -> PathBuf {
    path.with_extension("mpk")
}

/// 設定を `dir/config.json` に保存します。
pub fn save_config<C: Config>(config: &C, dir: &Path) -> crate::Result<()> {
    std::fs::create_dir_all(dir)?;
    config
        .save(dir.join(CONFIG_FILENAME))
        .map_err(|e| Error::Config(e.to_string()))
}

pub fn load_finetune_config(dir: &Path) -> crate::Result<FinetuneConfig> {
    FinetuneConfig::load(dir.join(CONFIG_FILENAME))
        .map_err(|e| Error::Config(format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_checkpoint_layout() {
        let config = FinetuneConfig::new(
            InitialCondition::Sin1,
            PdeType::Convection,
            Coefficients::new(5.0, 0.0, 0.0),
        )
        .with_seed(3)
        .with_param_dir("param".to_string());

        assert_eq!(
            config.pretrained_checkpoint(),
            PathBuf::from("param/sin_1/checkpoint_all_5_3/P2INN_20000")
        );
        assert_eq!(
            config.run_dir(),
            PathBuf::from("param/sin_1/svd_convection_5_0_0_3")
        );
        assert_eq!(
            record_file(&config.pretrained_checkpoint()),
            PathBuf::from("param/sin_1/checkpoint_all_5_3/P2INN_20000.mpk")
        );
    }

    #[test]
    fn finetune_config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = FinetuneConfig::new(
            InitialCondition::Gauss,
            PdeType::Cdr,
            Coefficients::new(1.0, 2.0, 3.0),
        )
        .with_rank(Some(12))
        .with_freeze(FreezePolicy::Modulation);

        save_config(&config, dir.path()).unwrap();
        let loaded = load_finetune_config(dir.path()).unwrap();

        assert_eq!(loaded.rank, Some(12));
        assert_eq!(loaded.freeze, FreezePolicy::Modulation);
        assert_eq!(loaded.pde_type, PdeType::Cdr);
        assert_eq!(loaded.coefficients, Coefficients::new(1.0, 2.0, 3.0));
        assert_eq!(loaded.model.hidden, 50);
    }
}
