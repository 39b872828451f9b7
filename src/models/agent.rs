use glam::DVec3;

use crate::models::common::{AgentStatus, MissionType, math_utils};
use crate::models::mission::{MissionAgent, MissionParams, MissionTick};
use crate::models::steering::{ControllerParams, SteeringController};
use crate::models::traits::{IFireSink, IPhysics, IWorldQuery};
use crate::models::world::BodyState;
use crate::telemetry::AgentTelemetry;

/// ドローンエージェント
///
/// ミッション状態機械と操舵コントローラーを束ねた1機分の制御単位です。
/// 物理状態はワールドが所有し、ここではIDで参照するだけです。
///
/// ミッションの変更はスウォームコーディネーターの割り当て操作からのみ行われます。
#[derive(Debug, Clone)]
pub struct DroneAgent {
    pub id: String,
    pub(crate) controller: SteeringController,
    pub(crate) mission: MissionAgent,
}

impl DroneAgent {
    pub fn new(id: impl Into<String>, controller: ControllerParams, mission: MissionParams) -> Self {
        Self {
            id: id.into(),
            controller: SteeringController::new(controller),
            mission: MissionAgent::new(mission),
        }
    }

    pub fn controller(&self) -> &SteeringController {
        &self.controller
    }

    pub fn mission(&self) -> &MissionAgent {
        &self.mission
    }

    pub fn mission_type(&self) -> MissionType {
        self.mission.mission_type()
    }

    /// ミッション処理と操舵力計算
    ///
    /// 物理状態を解決できない（ワールドから削除済み）場合はNoneを返します。
    pub fn plan(&mut self, world: &dyn IWorldQuery, sink: &mut dyn IFireSink) -> Option<DVec3> {
        let body = world.body(&self.id)?;
        self.mission
            .update(&self.id, &body, world, &mut self.controller, sink);
        Some(self.controller.steering_force(&self.id, &body, world).total())
    }

    /// 積分後の速度制限と姿勢更新
    pub fn settle(&self, physics: &mut dyn IPhysics) {
        if let Some(body) = physics.body_mut(&self.id) {
            self.controller.settle(body);
        }
    }

    /// ミッション状態から導出した状態
    pub fn status(&self, body: &BodyState) -> AgentStatus {
        let MissionTick { fired, reference_lost, .. } = self.mission.last_tick();
        if self.mission_type() == MissionType::None {
            AgentStatus::Idle
        } else if reference_lost {
            AgentStatus::Holding
        } else if fired {
            AgentStatus::Engaging
        } else if self.is_on_station(body) {
            AgentStatus::OnStation
        } else {
            AgentStatus::EnRoute
        }
    }

    /// テレメトリ（物理状態を解決できない場合はNone）
    pub fn telemetry(&self, world: &dyn IWorldQuery, time_s: f64) -> Option<AgentTelemetry> {
        let body = world.body(&self.id)?;
        Some(AgentTelemetry {
            time_s,
            id: self.id.clone(),
            position: body.position.to_array(),
            heading_deg: math_utils::heading_deg(body.rotation),
            speed: body.velocity.length(),
            mission: self.mission_type(),
            status: self.status(&body),
        })
    }

    // 高度維持中は目標点の高さを無視して判定する
    fn is_on_station(&self, body: &BodyState) -> bool {
        let params = &self.controller.params;
        let probe_point = match self.controller.target() {
            Some(target) if params.maintain_altitude => DVec3::new(body.position.x, target.y, body.position.z),
            _ => body.position,
        };
        self.controller.is_near_target(probe_point, params.arrive_radius)
    }
}
