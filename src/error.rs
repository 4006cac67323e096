use burn::record::RecorderError;
use std::path::PathBuf;
use thiserror::Error;

/// クレート全体で使用するエラー型。
#[derive(Debug, Error)]
pub enum Error {
    /// モデルの保存・読み込みに失敗しました。
    #[error("モデルファイルの入出力に失敗しました: {0}")]
    Recorder(#[from] RecorderError),

    /// 設定ファイルの保存・読み込みに失敗しました。
    #[error("設定ファイルの入出力に失敗しました: {0}")]
    Config(String),

    #[error("I/O エラー: {0}")]
    Io(#[from] std::io::Error),

    /// 事前学習済みチェックポイントが存在しません。
    #[error(
        "チェックポイント '{}' が見つかりません。最初に 'pretrain' コマンドで事前学習を実行してください。",
        path.display()
    )]
    MissingCheckpoint { path: PathBuf },

    /// 特異値分解に失敗しました。
    #[error("特異値分解に失敗しました: {0}")]
    Svd(String),

    /// テンソルの形状やデータが不正です。
    #[error("データエラー: {0}")]
    Data(String),

    #[error("グラフの描画に失敗しました: {0}")]
    Plot(String),
}

pub type Result<T> = std::result::Result<T, Error>;
