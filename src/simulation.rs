//! # Simulation モジュール
//!
//! 群制御シミュレーションの中核となるシミュレーションエンジンを提供します。
//!
//! 固定時間刻み（Δt）でワールドを進め、全ドローンのミッション処理と操舵力計算、
//! およびスウォームコーディネーターへの割り当てトリガーを管理します。
//!
//! ## シミュレーション処理順序
//!
//! 各時間刻みにおいて、以下の順序で処理が実行されます：
//!
//! 1. **割り当て処理**: 時刻に達したミッション割り当てを実行（ティックの間で完結）
//! 2. **消滅処理**: 時刻に達したドローン・マーカーを削除
//! 3. **エージェント処理**: 全機が同じワールド状態を参照して目標点と操舵力を計算
//! 4. **物理積分**: 操舵力を加速度として積分
//! 5. **積分後補正**: 水平速度の制限と機首方向の更新
//! 6. **テレメトリ**: 指定間隔でスナップショットを取得
//!
//! ## 使用例
//!
//! ```no_run
//! use swarmsim::scenario::ScenarioConfig;
//! use swarmsim::simulation::SimulationEngine;
//!
//! let config = ScenarioConfig::from_file("scenarios/fly_to.yaml")?;
//! let mut engine = SimulationEngine::new(config, 1);
//! engine.initialize()?;
//! engine.run()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use glam::{DQuat, DVec3};
use tracing::{debug, info, trace, warn};

use crate::models::*;
use crate::scenario::*;
use crate::telemetry::{AgentTelemetry, TelemetryWriter};

/// 予定された消滅
#[derive(Debug, Clone)]
struct Despawn {
    time_s: f64,
    id: String,
}

pub struct SimulationEngine {
    pub current_time: f64,
    pub dt: f64,
    pub max_time: f64,
    pub step_count: u64,

    pub world: World,
    pub coordinator: SwarmCoordinator,
    /// ロスター外のドローン（待機のままホバリング）
    pub unmanaged: Vec<DroneAgent>,
    pub fire_log: FireLog,

    pending_missions: Vec<MissionTrigger>,
    pending_despawns: Vec<Despawn>,
    telemetry_writer: Option<TelemetryWriter<BufWriter<File>>>,
    next_telemetry_time: f64,
    last_telemetry: Vec<AgentTelemetry>,

    pub scenario_config: ScenarioConfig,
    pub verbose_level: u8,
}

impl SimulationEngine {
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Self {
        let world = World::new(scenario.world.gravity_mps2, scenario.world.ground_y_m);
        let coordinator = SwarmCoordinator::new(scenario.swarm.missions.clone());

        Self {
            current_time: 0.0,
            dt: scenario.sim.dt_s,
            max_time: scenario.sim.t_max_s,
            step_count: 0,
            world,
            coordinator,
            unmanaged: Vec::new(),
            fire_log: FireLog::new(),
            pending_missions: Vec::new(),
            pending_despawns: Vec::new(),
            telemetry_writer: None,
            next_telemetry_time: 0.0,
            last_telemetry: Vec::new(),
            scenario_config: scenario,
            verbose_level,
        }
    }

    /// テレメトリの出力先ファイルを設定
    pub fn with_telemetry_output<P: AsRef<Path>>(mut self, path: P) -> std::io::Result<Self> {
        self.telemetry_writer = Some(TelemetryWriter::create(path)?);
        Ok(self)
    }

    pub fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }

        self.initialize_obstacles();
        self.initialize_markers();
        self.initialize_drones()?;
        self.initialize_timeline();

        if self.verbose_level > 0 {
            info!("初期化完了:");
            info!("  ドローン: {}機 (ロスター: {}, ロスター外: {})",
                  self.scenario_config.drones.len(),
                  self.coordinator.roster_len(),
                  self.unmanaged.len());
            info!("  マーカー: {}個", self.scenario_config.markers.len());
            info!("  障害物: {}個", self.world.obstacles().len());
            info!("  ミッション割り当て: {}件", self.pending_missions.len());
        }

        Ok(())
    }

    fn initialize_obstacles(&mut self) {
        for obstacle in &self.scenario_config.world.obstacles {
            let obstacle = match obstacle {
                ObstacleConfig::Sphere { center, radius_m, layer } => Obstacle::Sphere {
                    center: center.to_vec3(),
                    radius: *radius_m,
                    layer: *layer,
                },
                ObstacleConfig::Box { min, max, layer } => Obstacle::Box {
                    min: min.to_vec3(),
                    max: max.to_vec3(),
                    layer: *layer,
                },
            };
            self.world.add_obstacle(obstacle);
        }
    }

    fn initialize_markers(&mut self) {
        for marker in &self.scenario_config.markers {
            let velocity = marker.velocity.map_or(DVec3::ZERO, |v| v.to_vec3());
            let body = BodyState::new(EntityKind::Marker, marker.pos.to_vec3())
                .with_velocity(velocity)
                .with_rotation(DQuat::from_rotation_y(marker.yaw_deg.to_radians()));
            self.world.spawn(marker.id.clone(), body);

            if let Some(time_s) = marker.despawn_time_s {
                self.pending_despawns.push(Despawn { time_s, id: marker.id.clone() });
            }

            if self.verbose_level > 1 {
                debug!("マーカー初期化: {} (位置: {:.1}, {:.1}, {:.1})",
                       marker.id, marker.pos.x_m, marker.pos.y_m, marker.pos.z_m);
            }
        }
    }

    fn initialize_drones(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let defaults = &self.scenario_config.drone_defaults;
        let mut agents = Vec::new();

        for drone in &self.scenario_config.drones {
            let body = BodyState::new(EntityKind::Drone, drone.pos.to_vec3())
                .with_rotation(DQuat::from_rotation_y(drone.yaw_deg.to_radians()));
            self.world.spawn(drone.id.clone(), body);

            if let Some(time_s) = drone.despawn_time_s {
                self.pending_despawns.push(Despawn { time_s, id: drone.id.clone() });
            }

            agents.push(DroneAgent::new(
                drone.id.clone(),
                drone.controller_params(&defaults.controller),
                defaults.mission,
            ));

            if self.verbose_level > 1 {
                debug!("ドローン初期化: {} (位置: {:.1}, {:.1}, {:.1})",
                       drone.id, drone.pos.x_m, drone.pos.y_m, drone.pos.z_m);
            }
        }

        let roster = &self.scenario_config.swarm.roster;
        if roster.is_empty() {
            self.coordinator.auto_register(agents);
        } else {
            for id in roster {
                let position = agents
                    .iter()
                    .position(|agent| &agent.id == id)
                    .ok_or_else(|| ScenarioError::ValidationError(format!("roster entry {} is listed twice or unknown", id)))?;
                self.coordinator.register(agents.remove(position));
            }
            for agent in &agents {
                warn!(agent_id = %agent.id, "SWARM_UNMANAGED: ロスター外のドローンは待機状態のまま動作します");
            }
            self.unmanaged = agents;
        }

        Ok(())
    }

    fn initialize_timeline(&mut self) {
        self.pending_missions = self.scenario_config.missions.clone();
        // 同時刻のトリガーは記述順を保つ
        self.pending_missions.sort_by(|a, b| a.time_s.total_cmp(&b.time_s));
        self.pending_despawns.sort_by(|a, b| a.time_s.total_cmp(&b.time_s));
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("=== シミュレーション実行開始 ===");

        while self.current_time < self.max_time {
            self.step()?;

            if self.verbose_level > 2 {
                trace!("時刻: {:.2}秒 (ステップ: {})", self.current_time, self.step_count);
            }

            if self.step_count % 500 == 0 && self.verbose_level > 0 {
                let progress = (self.current_time / self.max_time) * 100.0;
                info!("進行状況: {:.1}% ({:.1}/{:.1}秒)", progress, self.current_time, self.max_time);
            }
        }

        if let Some(writer) = self.telemetry_writer.as_mut() {
            writer.flush()?;
            info!("テレメトリ出力: {}件", writer.records());
        }

        info!("=== シミュレーション完了 ===");
        info!("実行時間: {:.1}秒", self.current_time);
        info!("総ステップ数: {}", self.step_count);
        info!("射撃イベント: {}件", self.fire_log.total());
        self.log_summary();

        Ok(())
    }

    /// 1ステップ進める
    pub fn step(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.process_missions();
        self.process_despawns();
        self.process_agents();
        self.world.step(self.dt);
        self.settle_agents();

        self.current_time += self.dt;
        self.step_count += 1;

        self.process_telemetry()?;
        Ok(())
    }

    fn process_missions(&mut self) {
        let due = self
            .pending_missions
            .iter()
            .take_while(|trigger| trigger.time_s <= self.current_time + 1e-9)
            .count();

        for trigger in self.pending_missions.drain(..due) {
            match self.coordinator.assign(trigger.mission) {
                Ok(assigned) => {
                    if self.verbose_level > 0 {
                        info!("{:.2}秒: {} を{}機に割り当てました", self.current_time, trigger.mission, assigned);
                    }
                }
                Err(e) => {
                    // 設定不足は警告のみで続行
                    debug!("{:.2}秒: 割り当てをスキップしました: {}", self.current_time, e);
                }
            }
        }
    }

    fn process_despawns(&mut self) {
        let due = self
            .pending_despawns
            .iter()
            .take_while(|despawn| despawn.time_s <= self.current_time + 1e-9)
            .count();

        for despawn in self.pending_despawns.drain(..due) {
            if self.world.despawn(&despawn.id).is_some() {
                info!(entity_id = %despawn.id, time_s = self.current_time, "ENTITY_DESPAWN: エンティティが消滅しました");
            }
            if self.coordinator.unregister(&despawn.id).is_none() {
                self.unmanaged.retain(|agent| agent.id != despawn.id);
            }
        }
    }

    fn process_agents(&mut self) {
        let mut forces = Vec::with_capacity(self.coordinator.roster_len() + self.unmanaged.len());

        for agent in self.coordinator.agents_mut().chain(self.unmanaged.iter_mut()) {
            if let Some(force) = agent.plan(&self.world, &mut self.fire_log) {
                forces.push((agent.id.clone(), force));
            }
        }

        for (id, force) in forces {
            self.world.add_acceleration(&id, force);
        }
    }

    fn settle_agents(&mut self) {
        for agent in self.coordinator.agents().chain(self.unmanaged.iter()) {
            agent.settle(&mut self.world);
        }
    }

    fn process_telemetry(&mut self) -> std::io::Result<()> {
        if self.current_time + 1e-9 < self.next_telemetry_time {
            return Ok(());
        }
        self.next_telemetry_time += self.scenario_config.sim.telemetry_interval_s;

        self.last_telemetry = self.snapshot();
        if let Some(writer) = self.telemetry_writer.as_mut() {
            writer.write_snapshot(&self.last_telemetry)?;
        }
        Ok(())
    }

    /// ロスター順、続いてロスター外のドローンのテレメトリ
    fn snapshot(&self) -> Vec<AgentTelemetry> {
        self.coordinator
            .agents()
            .chain(self.unmanaged.iter())
            .filter_map(|agent| agent.telemetry(&self.world, self.current_time))
            .collect()
    }

    /// 直近に取得したテレメトリ
    pub fn telemetry(&self) -> &[AgentTelemetry] {
        &self.last_telemetry
    }

    fn log_summary(&self) {
        for snapshot in self.snapshot() {
            info!(
                agent_id = %snapshot.id,
                x = snapshot.position[0],
                y = snapshot.position[1],
                z = snapshot.position[2],
                heading_deg = snapshot.heading_deg,
                speed = snapshot.speed,
                mission = %snapshot.mission,
                status = ?snapshot.status,
                shots = self.fire_log.shots_by(&snapshot.id),
                "AGENT_SUMMARY: 最終状態"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::math_utils::planar_distance;

    fn run_for(engine: &mut SimulationEngine, seconds: f64) {
        let steps = (seconds / engine.dt).round() as usize;
        for _ in 0..steps {
            engine.step().unwrap();
        }
    }

    fn body(engine: &SimulationEngine, id: &str) -> BodyState {
        engine.world.body(id).unwrap()
    }

    #[test]
    fn test_demo_initializes_roster_by_auto_registration() {
        let mut engine = SimulationEngine::new(ScenarioConfig::demo(), 0);
        engine.initialize().unwrap();
        assert_eq!(engine.coordinator.roster_len(), 6);
        assert!(engine.unmanaged.is_empty());
        assert_eq!(engine.world.len(), 7);
    }

    #[test]
    fn test_demo_first_step_assigns_formation_targets() {
        let mut engine = SimulationEngine::new(ScenarioConfig::demo(), 0);
        engine.initialize().unwrap();
        engine.step().unwrap();

        let target = |i: usize| engine.coordinator.agent(i).unwrap().controller.target().unwrap();
        assert_eq!(target(0), DVec3::new(97.0, 0.0, 100.0));
        assert_eq!(target(4), DVec3::new(100.0, 0.0, 97.0));
        assert!(engine.coordinator.agents().all(|a| a.mission_type() == MissionType::FlyToLocation));
    }

    #[test]
    fn test_demo_converges_to_formation_at_altitude() {
        let mut engine = SimulationEngine::new(ScenarioConfig::demo(), 0);
        engine.initialize().unwrap();
        run_for(&mut engine, 30.0);

        for (index, agent) in engine.coordinator.agents().enumerate() {
            let slot = DVec3::new(100.0, 0.0, 100.0) + engine.coordinator.formation_offset(index);
            let state = body(&engine, &agent.id);
            assert!(planar_distance(state.position, slot) < 1.5, "{} at {:?}", agent.id, state.position);
            assert!((state.position.y - 5.0).abs() < 1.0);
            assert!(state.velocity.length() < 1.0);
        }
    }

    #[test]
    fn test_horizontal_speed_never_exceeds_max() {
        let mut engine = SimulationEngine::new(ScenarioConfig::demo(), 0);
        engine.initialize().unwrap();
        for _ in 0..300 {
            engine.step().unwrap();
            for agent in engine.coordinator.agents() {
                let state = body(&engine, &agent.id);
                assert!(math_utils::horizontal(state.velocity).length() <= 10.0 + 1e-9);
            }
        }
    }

    #[test]
    fn test_despawned_drone_leaves_empty_roster_slot() {
        let mut config = ScenarioConfig::demo();
        config.drones[1].despawn_time_s = Some(1.0);
        config.missions.push(MissionTrigger { time_s: 2.0, mission: MissionType::FlyToLocation });
        let mut engine = SimulationEngine::new(config, 0);
        engine.initialize().unwrap();
        run_for(&mut engine, 3.0);

        assert!(engine.coordinator.agent(1).is_none());
        assert!(engine.world.body("D002").is_none());
        assert_eq!(engine.coordinator.roster_len(), 6);
        assert_eq!(
            engine.coordinator.agent(4).unwrap().controller.target(),
            Some(DVec3::new(100.0, 0.0, 97.0))
        );
    }

    #[test]
    fn test_destination_despawn_degrades_to_hold() {
        let mut config = ScenarioConfig::demo();
        config.markers[0].despawn_time_s = Some(2.0);
        let mut engine = SimulationEngine::new(config, 0);
        engine.initialize().unwrap();
        run_for(&mut engine, 3.0);

        for agent in engine.coordinator.agents() {
            assert_eq!(agent.controller.target(), None);
            assert_eq!(agent.mission_type(), MissionType::FlyToLocation);
        }
        assert!(engine.telemetry().iter().all(|t| t.status == AgentStatus::Holding));
    }

    #[test]
    fn test_missing_reference_trigger_keeps_previous_mission() {
        let mut config = ScenarioConfig::demo();
        config.missions.push(MissionTrigger { time_s: 1.0, mission: MissionType::Escort });
        let mut engine = SimulationEngine::new(config, 0);
        engine.initialize().unwrap();
        run_for(&mut engine, 2.0);

        assert!(engine.coordinator.agents().all(|a| a.mission_type() == MissionType::FlyToLocation));
    }

    #[test]
    fn test_explicit_roster_keeps_order_and_unmanaged_hover() {
        let mut config = ScenarioConfig::demo();
        config.swarm.roster = vec!["D003".to_string(), "D001".to_string()];
        let mut engine = SimulationEngine::new(config, 0);
        engine.initialize().unwrap();

        assert_eq!(engine.coordinator.roster_len(), 2);
        assert_eq!(engine.coordinator.agent(0).unwrap().id, "D003");
        assert_eq!(engine.unmanaged.len(), 4);

        run_for(&mut engine, 10.0);
        assert!(engine.unmanaged.iter().all(|a| a.mission_type() == MissionType::None));
        assert!(engine.unmanaged.iter().all(|a| a.controller().target().is_none()));
        let hover = body(&engine, "D002");
        assert!((hover.position.y - 5.0).abs() < 1.0);

        let ids: Vec<&str> = engine.telemetry().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["D003", "D001", "D002", "D004", "D005", "D006"]);
        let idle = engine.telemetry().iter().find(|t| t.id == "D002").unwrap();
        assert_eq!(idle.mission, MissionType::None);
        assert_eq!(idle.status, AgentStatus::Idle);
    }

    #[test]
    fn test_shooting_squad_emits_fire_events() {
        let mut config = ScenarioConfig::demo();
        config.markers[0].pos = Position3D::new(0.0, 0.0, 20.0);
        config.swarm.missions.shooting_target = Some("DEST".to_string());
        config.missions = vec![MissionTrigger { time_s: 0.0, mission: MissionType::ShootingSquad }];
        let mut engine = SimulationEngine::new(config, 0);
        engine.initialize().unwrap();
        run_for(&mut engine, 5.0);

        assert!(engine.fire_log.total() > 0);
        assert!(engine.fire_log.shots_by("D001") > 0);
    }

    #[test]
    fn test_bundled_obstacle_run_keeps_patrolling() {
        let config = ScenarioConfig::from_yaml_str(include_str!("../scenarios/obstacle_run.yaml")).unwrap();
        let mut engine = SimulationEngine::new(config, 0);
        engine.initialize().unwrap();
        run_for(&mut engine, 20.0);

        for agent in engine.coordinator.agents() {
            assert_eq!(agent.mission_type(), MissionType::ObstacleRun);
            let index = agent.mission.waypoint_index().unwrap();
            assert!(index < 4);
            assert!(agent.controller.target().is_some());
        }
    }

    #[test]
    fn test_telemetry_written_at_interval() {
        let path = std::env::temp_dir().join(format!("swarmsim_engine_{}.jsonl", std::process::id()));
        let mut config = ScenarioConfig::demo();
        config.sim.t_max_s = 2.0;
        config.sim.telemetry_interval_s = 0.5;
        let mut engine = SimulationEngine::new(config, 0).with_telemetry_output(&path).unwrap();
        engine.initialize().unwrap();
        engine.run().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines = contents.lines().count();
        // 0.02秒〜2.0秒の間に 0.5秒間隔で5回 × 6機
        assert_eq!(lines % 6, 0);
        assert!((4 * 6..=5 * 6).contains(&lines), "{} lines", lines);
        std::fs::remove_file(&path).ok();
    }
}
