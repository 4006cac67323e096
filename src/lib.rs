//! # SVD 変調によるパラメータ化 PINN の微調整ライブラリ
//!
//! `burn` フレームワークを使用して、対流・拡散・反応方程式の係数を入力とする
//! 物理情報ニューラルネットワーク（P2INN）を事前学習し、デコーダの重み行列を
//! 特異値分解した `U·S·Vᵗ` の形で少数のパラメータだけを微調整します。

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod finetune;
pub mod inference;
pub mod jet;
pub mod metrics;
pub mod model;
pub mod pde;
pub mod pinn;
pub mod pretrain;
pub mod svd;
pub mod training;

pub use error::{Error, Result};
