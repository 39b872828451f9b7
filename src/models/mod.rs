// 基本的なデータ型と数学ユーティリティ
pub mod common;

// ワールド・物理・射撃通知のインターフェース（trait）定義
pub mod traits;

// ワールド（物理状態と障害物）と射撃ログ
pub mod world;
pub mod fire;

// 各エージェントモデルの実装
pub mod steering;
pub mod mission;
pub mod agent;
pub mod coordinator;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use world::{BodyState, Obstacle, ProbeHit, World};
pub use fire::{FireEvent, FireLog};
pub use steering::{ControllerParams, SteeringController, SteeringForce, avoidance_weight};
pub use mission::{Mission, MissionAgent, MissionError, MissionParams, MissionTick};
pub use agent::DroneAgent;
pub use coordinator::{AssignmentError, FormationConfig, SwarmConfig, SwarmCoordinator};
