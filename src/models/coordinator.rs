//! # Coordinator モジュール
//!
//! 群全体へのミッション割り当てと編隊配置の計算を行うスウォームコーディネーターを提供します。
//!
//! 割り当てはティックごとではなく、割り当てイベント発生時にのみ実行されます。
//! 各割り当て操作は、まずミッションに必要な参照（目的地、護衛対象、射撃目標、
//! リーダー、ウェイポイント列）が設定されているかを検証し、未設定なら警告を出して
//! どのエージェントも変更しません。検証後のエージェントへの適用はロスター順に行い、
//! 空きスロットは読み飛ばします。

use glam::DVec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::agent::DroneAgent;
use crate::models::common::MissionType;
use crate::models::mission::Mission;
use crate::models::traits::IWorldQuery;
use crate::telemetry::AgentTelemetry;

/// 編隊形状
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormationConfig {
    /// 機体間隔（m）
    pub spacing_m: f64,
    /// 1列あたりの機数
    pub columns: u32,
}

impl Default for FormationConfig {
    fn default() -> Self {
        Self { spacing_m: 3.0, columns: 3 }
    }
}

impl FormationConfig {
    /// 格子編隊のオフセット
    ///
    /// 各行を編隊軸の左右中央に揃え、行はリーダー軸の後方（-Z）へ積み重ねます。
    /// `index`、`columns`、`spacing_m` のみで決まる純粋関数です。
    pub fn offset(&self, index: usize) -> DVec3 {
        let columns = self.columns.max(1) as usize;
        let row = index / columns;
        let col = index % columns;

        let x = (col as f64 - (columns as f64 - 1.0) / 2.0) * self.spacing_m;
        let z = -(row as f64) * self.spacing_m;
        DVec3::new(x, 0.0, z)
    }
}

/// 群レベルのミッション設定（割り当て時にのみ参照）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// 目的地飛行の目的地
    pub destination: Option<String>,
    /// 護衛対象
    pub escort_target: Option<String>,
    /// 射撃目標
    pub shooting_target: Option<String>,
    /// リーダー
    pub leader: Option<String>,
    /// 巡回ウェイポイント列
    pub waypoints: Vec<String>,
    pub formation: FormationConfig,
}

/// 割り当て時の設定不足
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssignmentError {
    #[error("{mission} の割り当てに必要な {reference} が設定されていません")]
    MissingReference { mission: MissionType, reference: &'static str },
}

/// スウォームコーディネーター
///
/// ロスター（インデックスで参照できるエージェント列）を排他的に所有し、
/// 割り当て操作のみを変更の入口として公開します。
#[derive(Debug, Default)]
pub struct SwarmCoordinator {
    roster: Vec<Option<DroneAgent>>,
    pub config: SwarmConfig,
}

impl SwarmCoordinator {
    pub fn new(config: SwarmConfig) -> Self {
        Self { roster: Vec::new(), config }
    }

    /// 外部から与えられたロスターで作成（順序はそのまま保持）
    pub fn with_roster(config: SwarmConfig, agents: Vec<DroneAgent>) -> Self {
        Self {
            roster: agents.into_iter().map(Some).collect(),
            config,
        }
    }

    /// ロスターが空の場合のみ、候補をすべて登録
    ///
    /// 既にロスターがある場合は何もしないため、重複登録は起こりません。
    /// 登録した機数を返します。
    pub fn auto_register(&mut self, candidates: impl IntoIterator<Item = DroneAgent>) -> usize {
        if !self.roster.is_empty() {
            return 0;
        }
        self.roster.extend(candidates.into_iter().map(Some));
        info!(count = self.roster.len(), "SWARM_AUTO_REGISTER: {}機のドローンを自動登録しました", self.roster.len());
        self.roster.len()
    }

    /// エージェントをロスターの末尾に追加
    pub fn register(&mut self, agent: DroneAgent) -> usize {
        self.roster.push(Some(agent));
        self.roster.len() - 1
    }

    /// エージェントのスロットを空にする（外部での破棄）
    ///
    /// 他のエージェントのインデックスと編隊オフセットは変わりません。
    pub fn unregister(&mut self, id: &str) -> Option<DroneAgent> {
        let slot = self
            .roster
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|agent| agent.id == id))?;
        slot.take()
    }

    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    pub fn agent(&self, index: usize) -> Option<&DroneAgent> {
        self.roster.get(index).and_then(Option::as_ref)
    }

    pub fn find(&self, id: &str) -> Option<&DroneAgent> {
        self.agents().find(|agent| agent.id == id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &DroneAgent> {
        self.roster.iter().flatten()
    }

    pub(crate) fn agents_mut(&mut self) -> impl Iterator<Item = &mut DroneAgent> {
        self.roster.iter_mut().flatten()
    }

    pub fn formation_offset(&self, index: usize) -> DVec3 {
        self.config.formation.offset(index)
    }

    /// ミッション種別に応じた割り当て
    pub fn assign(&mut self, mission: MissionType) -> Result<usize, AssignmentError> {
        match mission {
            MissionType::None => Ok(self.stand_down()),
            MissionType::FlyToLocation => self.assign_fly_to(),
            MissionType::Escort => self.assign_escort(),
            MissionType::ShootingSquad => self.assign_shooting_squad(),
            MissionType::FollowLeader => self.assign_follow_leader(),
            MissionType::ObstacleRun => self.assign_obstacle_run(),
        }
    }

    /// 全機に待機を割り当て
    pub fn stand_down(&mut self) -> usize {
        self.apply(MissionType::None, |_, _| Mission::None)
    }

    /// 目的地飛行の割り当て
    pub fn assign_fly_to(&mut self) -> Result<usize, AssignmentError> {
        let target = require(MissionType::FlyToLocation, "destination", &self.config.destination)?;
        let formation = self.config.formation;
        Ok(self.apply(MissionType::FlyToLocation, |index, _| Mission::FlyToLocation {
            target: target.clone(),
            offset: formation.offset(index),
        }))
    }

    /// 護衛の割り当て
    pub fn assign_escort(&mut self) -> Result<usize, AssignmentError> {
        let leader = require(MissionType::Escort, "escort_target", &self.config.escort_target)?;
        let formation = self.config.formation;
        Ok(self.apply(MissionType::Escort, |index, _| Mission::Escort {
            leader: leader.clone(),
            offset: formation.offset(index),
        }))
    }

    /// 射撃ミッションの割り当て
    pub fn assign_shooting_squad(&mut self) -> Result<usize, AssignmentError> {
        let target = require(MissionType::ShootingSquad, "shooting_target", &self.config.shooting_target)?;
        let formation = self.config.formation;
        Ok(self.apply(MissionType::ShootingSquad, |index, _| Mission::ShootingSquad {
            target: target.clone(),
            offset: formation.offset(index),
        }))
    }

    /// リーダー追従の割り当て
    pub fn assign_follow_leader(&mut self) -> Result<usize, AssignmentError> {
        let leader = require(MissionType::FollowLeader, "leader", &self.config.leader)?;
        let formation = self.config.formation;
        Ok(self.apply(MissionType::FollowLeader, |index, _| Mission::FollowLeader {
            leader: leader.clone(),
            offset: formation.offset(index),
        }))
    }

    /// 巡回の割り当て（全機が同じウェイポイント列を共有し、編隊オフセットは使わない）
    pub fn assign_obstacle_run(&mut self) -> Result<usize, AssignmentError> {
        if self.config.waypoints.is_empty() {
            return Err(missing(MissionType::ObstacleRun, "waypoints"));
        }
        let waypoints = self.config.waypoints.clone();
        Ok(self.apply(MissionType::ObstacleRun, |_, _| Mission::obstacle_run(waypoints.clone())))
    }

    fn apply(&mut self, kind: MissionType, mut mission_for: impl FnMut(usize, &DroneAgent) -> Mission) -> usize {
        let mut assigned = 0;
        for (index, slot) in self.roster.iter_mut().enumerate() {
            let Some(agent) = slot else {
                continue;
            };
            let mission = mission_for(index, agent);
            debug!(
                agent_id = %agent.id,
                index,
                mission = %kind,
                offset = ?mission.formation_offset(),
                "SWARM_ASSIGN_AGENT: エージェントにミッションを設定しました"
            );
            agent.mission.set_mission(mission);
            assigned += 1;
        }
        info!(mission = %kind, assigned, roster = self.roster.len(), "SWARM_ASSIGN: ミッションを割り当てました");
        assigned
    }

    /// ロスター上の全エージェントのテレメトリ
    pub fn telemetry(&self, world: &dyn IWorldQuery, time_s: f64) -> Vec<AgentTelemetry> {
        self.agents()
            .filter_map(|agent| agent.telemetry(world, time_s))
            .collect()
    }
}

fn missing(mission: MissionType, reference: &'static str) -> AssignmentError {
    let error = AssignmentError::MissingReference { mission, reference };
    warn!(mission = %mission, reference, "SWARM_CONFIG_MISSING: {}", error);
    error
}

fn require(mission: MissionType, reference: &'static str, value: &Option<String>) -> Result<String, AssignmentError> {
    value.clone().ok_or_else(|| missing(mission, reference))
}
