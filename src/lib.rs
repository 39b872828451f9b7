//! # swarmsim
//!
//! ドローン群制御シミュレーション
//!
//! 固定時間刻みの物理ワールド上で、操舵コントローラー（シーク・障害物回避・分離・高度維持）、
//! ミッション状態機械、スウォームコーディネーターによる編隊割り当てをシミュレートします。

pub mod logging;
pub mod models;
pub mod scenario;
pub mod simulation;
pub mod telemetry;
