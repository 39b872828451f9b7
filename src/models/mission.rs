//! # Mission モジュール
//!
//! 1機分のミッション状態機械を提供します。
//!
//! ミッションはミッション種別ごとに必要なフィールドだけを持つタグ付き共用体
//! [`Mission`] で表現され、「半分だけ設定されたミッション」は構築できません。
//! 毎ティック、現在のミッションから目標点を導出して操舵コントローラーに渡します。
//! 参照先が解決できない場合は目標点をクリアし、分離・高度保持のみで位置を保ちます。

use glam::DVec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::common::{FIRE_RANGE_M, MissionType, math_utils};
use crate::models::steering::SteeringController;
use crate::models::traits::{IFireSink, IWorldQuery};
use crate::models::world::BodyState;

/// ミッション状態
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Mission {
    /// 待機（初期状態および明示的な解除状態）
    #[default]
    None,
    /// 目的地へ飛行（オフセットはワールド座標系）
    FlyToLocation { target: String, offset: DVec3 },
    /// 護衛（オフセットは護衛対象のローカル座標系）
    Escort { leader: String, offset: DVec3 },
    /// 射撃目標の周囲へ展開し、交戦距離内で射撃
    ShootingSquad { target: String, offset: DVec3 },
    /// リーダー追従（オフセットはリーダーのローカル座標系）
    FollowLeader { leader: String, offset: DVec3 },
    /// ウェイポイントの巡回（循環し、終了しない）
    ObstacleRun { waypoints: Vec<String>, index: usize },
}

impl Mission {
    /// 巡回ミッションを先頭のウェイポイントから開始
    pub fn obstacle_run(waypoints: Vec<String>) -> Self {
        Mission::ObstacleRun { waypoints, index: 0 }
    }

    pub fn mission_type(&self) -> MissionType {
        match self {
            Mission::None => MissionType::None,
            Mission::FlyToLocation { .. } => MissionType::FlyToLocation,
            Mission::Escort { .. } => MissionType::Escort,
            Mission::ShootingSquad { .. } => MissionType::ShootingSquad,
            Mission::FollowLeader { .. } => MissionType::FollowLeader,
            Mission::ObstacleRun { .. } => MissionType::ObstacleRun,
        }
    }

    /// 編隊オフセット（巡回・待機ミッションはNone）
    pub fn formation_offset(&self) -> Option<DVec3> {
        match self {
            Mission::FlyToLocation { offset, .. }
            | Mission::Escort { offset, .. }
            | Mission::ShootingSquad { offset, .. }
            | Mission::FollowLeader { offset, .. } => Some(*offset),
            Mission::None | Mission::ObstacleRun { .. } => None,
        }
    }
}

/// ミッション設定の誤用
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MissionError {
    #[error("{field} は {mission} ミッションには適用できません")]
    NotApplicable { mission: MissionType, field: &'static str },
}

/// ミッション固有のパラメータ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionParams {
    /// ウェイポイント到達判定半径（m、水平距離）
    pub waypoint_reach_radius_m: f64,
}

impl Default for MissionParams {
    fn default() -> Self {
        Self { waypoint_reach_radius_m: 2.0 }
    }
}

/// 1ティック分のミッション処理結果
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MissionTick {
    /// 目標点を導出できたか
    pub has_target: bool,
    /// 射撃イベントを発行したか
    pub fired: bool,
    /// 参照先が解決できなかったか
    pub reference_lost: bool,
}

/// ミッションエージェント
#[derive(Debug, Clone, Default)]
pub struct MissionAgent {
    pub params: MissionParams,
    mission: Mission,
    last_tick: MissionTick,
}

impl MissionAgent {
    pub fn new(params: MissionParams) -> Self {
        Self {
            params,
            mission: Mission::None,
            last_tick: MissionTick::default(),
        }
    }

    pub fn mission(&self) -> &Mission {
        &self.mission
    }

    pub fn mission_type(&self) -> MissionType {
        self.mission.mission_type()
    }

    pub fn last_tick(&self) -> MissionTick {
        self.last_tick
    }

    /// 現在のウェイポイント番号（巡回ミッション以外はNone）
    pub fn waypoint_index(&self) -> Option<usize> {
        match &self.mission {
            Mission::ObstacleRun { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// ミッション全体を置き換え
    pub fn set_mission(&mut self, mission: Mission) {
        self.mission = match mission {
            Mission::ObstacleRun { waypoints, index } => {
                let index = if waypoints.is_empty() { 0 } else { index % waypoints.len() };
                Mission::ObstacleRun { waypoints, index }
            }
            other => other,
        };
        self.last_tick = MissionTick::default();
    }

    /// 目標参照の差し替え（目的地飛行・射撃ミッションのみ）
    pub fn set_mission_target(&mut self, target_id: impl Into<String>) -> Result<(), MissionError> {
        match &mut self.mission {
            Mission::FlyToLocation { target, .. } | Mission::ShootingSquad { target, .. } => {
                *target = target_id.into();
                Ok(())
            }
            other => Err(MissionError::NotApplicable {
                mission: other.mission_type(),
                field: "mission_target",
            }),
        }
    }

    /// リーダー参照と編隊オフセットの差し替え（護衛・リーダー追従のみ）
    pub fn set_leader(&mut self, leader_id: impl Into<String>, formation_offset: DVec3) -> Result<(), MissionError> {
        match &mut self.mission {
            Mission::Escort { leader, offset } | Mission::FollowLeader { leader, offset } => {
                *leader = leader_id.into();
                *offset = formation_offset;
                Ok(())
            }
            other => Err(MissionError::NotApplicable {
                mission: other.mission_type(),
                field: "leader",
            }),
        }
    }

    /// 編隊オフセットの差し替え
    pub fn set_formation_offset(&mut self, formation_offset: DVec3) -> Result<(), MissionError> {
        match &mut self.mission {
            Mission::FlyToLocation { offset, .. }
            | Mission::Escort { offset, .. }
            | Mission::ShootingSquad { offset, .. }
            | Mission::FollowLeader { offset, .. } => {
                *offset = formation_offset;
                Ok(())
            }
            other => Err(MissionError::NotApplicable {
                mission: other.mission_type(),
                field: "formation_offset",
            }),
        }
    }

    /// 巡回経路の設定（巡回ミッションへ切り替え、先頭から再開）
    pub fn set_obstacle_path(&mut self, waypoints: Vec<String>) {
        self.set_mission(Mission::obstacle_run(waypoints));
    }

    /// 1ティック分のミッション処理
    ///
    /// 目標点を導出して `controller` に設定し、射撃ミッションでは交戦距離内なら
    /// 毎ティック射撃イベントを発行します。
    pub fn update(
        &mut self,
        self_id: &str,
        body: &BodyState,
        world: &dyn IWorldQuery,
        controller: &mut SteeringController,
        sink: &mut dyn IFireSink,
    ) -> MissionTick {
        let mut tick = MissionTick::default();
        let reach_radius = self.params.waypoint_reach_radius_m;

        let target = match &mut self.mission {
            Mission::None => None,
            Mission::FlyToLocation { target, offset } => {
                world.pose(target.as_str()).map(|pose| pose.position + *offset)
            }
            Mission::Escort { leader, offset } | Mission::FollowLeader { leader, offset } => world
                .pose(leader.as_str())
                .map(|pose| pose.position + pose.transform_direction(*offset)),
            Mission::ShootingSquad { target, offset } => match world.pose(target.as_str()) {
                Some(pose) => {
                    if math_utils::planar_distance(body.position, pose.position) < FIRE_RANGE_M {
                        controller.fire_at(self_id, &body.pose(), target.as_str(), &pose, sink);
                        tick.fired = true;
                    }
                    Some(pose.position + pose.transform_direction(*offset))
                }
                None => None,
            },
            Mission::ObstacleRun { waypoints, index } if !waypoints.is_empty() => {
                match world.pose(waypoints[*index].as_str()) {
                    Some(pose) => {
                        if math_utils::planar_distance(body.position, pose.position) < reach_radius {
                            let next = (*index + 1) % waypoints.len();
                            debug!(
                                agent_id = %self_id,
                                waypoint = %waypoints[*index],
                                from_index = *index,
                                to_index = next,
                                "WAYPOINT_ADVANCE: ウェイポイントに到達しました"
                            );
                            *index = next;
                        }
                        Some(pose.position)
                    }
                    None => None,
                }
            }
            Mission::ObstacleRun { .. } => None,
        };

        match target {
            Some(point) => {
                controller.set_target(point);
                tick.has_target = true;
            }
            None => {
                controller.clear_target();
                tick.reference_lost = self.mission != Mission::None;
            }
        }

        if tick.reference_lost != self.last_tick.reference_lost {
            if tick.reference_lost {
                debug!(agent_id = %self_id, mission = %self.mission_type(), "AGENT_REFERENCE_LOST: 参照先を解決できないため位置保持に移行します");
            } else if tick.has_target {
                debug!(agent_id = %self_id, mission = %self.mission_type(), "AGENT_REFERENCE_RESTORED: 参照先が再び解決されました");
            }
        }

        self.last_tick = tick;
        tick
    }
}
