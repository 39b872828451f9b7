//! # Scenario モジュール
//!
//! シナリオファイル（YAML）の読み込みと検証を行います。
//!
//! シナリオは1回の実行全体を記述します: 時間設定、ワールド（重力・地面・障害物）、
//! ドローンの既定パラメータと初期配置、参照用マーカー、群のミッション設定、
//! およびミッション割り当てのタイムライン。

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use glam::DVec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ControllerParams, FormationConfig, MissionParams, MissionType, SwarmConfig};

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub dt_s: f64,
    pub t_max_s: f64,
    /// テレメトリ取得間隔（秒）
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_s: f64,
}

fn default_telemetry_interval() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Position3D {
    pub x_m: f64,
    pub y_m: f64,
    pub z_m: f64,
}

impl Position3D {
    pub fn new(x_m: f64, y_m: f64, z_m: f64) -> Self {
        Self { x_m, y_m, z_m }
    }

    pub fn to_vec3(&self) -> DVec3 {
        DVec3::new(self.x_m, self.y_m, self.z_m)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Velocity3D {
    pub x_mps: f64,
    pub y_mps: f64,
    pub z_mps: f64,
}

impl Velocity3D {
    pub fn to_vec3(&self) -> DVec3 {
        DVec3::new(self.x_mps, self.y_mps, self.z_mps)
    }
}

/// 静的障害物の設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObstacleConfig {
    Sphere {
        center: Position3D,
        radius_m: f64,
        #[serde(default)]
        layer: u32,
    },
    Box {
        min: Position3D,
        max: Position3D,
        #[serde(default)]
        layer: u32,
    },
}

impl ObstacleConfig {
    pub fn layer(&self) -> u32 {
        match self {
            ObstacleConfig::Sphere { layer, .. } | ObstacleConfig::Box { layer, .. } => *layer,
        }
    }
}

/// ワールド設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorldConfig {
    pub gravity_mps2: f64,
    /// 地面の高さ（null で地面なし）
    pub ground_y_m: Option<f64>,
    pub obstacles: Vec<ObstacleConfig>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity_mps2: 9.81,
            ground_y_m: Some(0.0),
            obstacles: Vec::new(),
        }
    }
}

/// ドローンの既定パラメータ
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DroneDefaults {
    #[serde(flatten)]
    pub controller: ControllerParams,
    #[serde(flatten)]
    pub mission: MissionParams,
}

/// ドローン設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DroneConfig {
    pub id: String,
    pub pos: Position3D,
    #[serde(default)]
    pub yaw_deg: f64,
    /// 目標高度の個別設定
    #[serde(default)]
    pub target_altitude_m: Option<f64>,
    /// 最大水平速度の個別設定
    #[serde(default)]
    pub max_speed_mps: Option<f64>,
    /// 消滅時刻（秒）
    #[serde(default)]
    pub despawn_time_s: Option<f64>,
}

impl DroneConfig {
    /// 既定パラメータに個別設定を適用したコントローラーパラメータ
    pub fn controller_params(&self, defaults: &ControllerParams) -> ControllerParams {
        let mut params = *defaults;
        if let Some(altitude) = self.target_altitude_m {
            params.target_altitude = altitude;
        }
        if let Some(speed) = self.max_speed_mps {
            params.max_speed = speed;
        }
        params
    }
}

/// 参照用マーカー設定（目的地、護衛対象、射撃目標、ウェイポイントなど）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarkerConfig {
    pub id: String,
    pub pos: Position3D,
    #[serde(default)]
    pub velocity: Option<Velocity3D>,
    #[serde(default)]
    pub yaw_deg: f64,
    #[serde(default)]
    pub despawn_time_s: Option<f64>,
}

/// 群設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SwarmScenarioConfig {
    /// 明示的なロスター（空の場合は全ドローンを自動登録）
    #[serde(default)]
    pub roster: Vec<String>,
    #[serde(flatten)]
    pub missions: SwarmConfig,
}

/// ミッション割り当てのトリガー
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MissionTrigger {
    pub time_s: f64,
    pub mission: MissionType,
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub drone_defaults: DroneDefaults,
    pub drones: Vec<DroneConfig>,
    #[serde(default)]
    pub markers: Vec<MarkerConfig>,
    #[serde(default)]
    pub swarm: SwarmScenarioConfig,
    #[serde(default)]
    pub missions: Vec<MissionTrigger>,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        let config: ScenarioConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ScenarioError::ParseError(path.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// YAML文字列から読み込み
    pub fn from_yaml_str(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig = serde_yaml::from_str(contents)
            .map_err(|e| ScenarioError::ParseError(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 組み込みデモシナリオ
    ///
    /// 6機のドローンを (100, 0, 100) の目的地へ3列・間隔3mの格子編隊で飛行させます。
    pub fn demo() -> Self {
        let drones = (0..6)
            .map(|i| DroneConfig {
                id: format!("D{:03}", i + 1),
                pos: Position3D::new(i as f64 * 4.0, 0.0, 0.0),
                yaw_deg: 0.0,
                target_altitude_m: None,
                max_speed_mps: None,
                despawn_time_s: None,
            })
            .collect();

        Self {
            meta: ScenarioMeta {
                version: "1.0".to_string(),
                name: "demo_fly_to".to_string(),
                description: "6機の格子編隊による目的地飛行".to_string(),
            },
            sim: SimulationConfig {
                dt_s: 0.02,
                t_max_s: 30.0,
                telemetry_interval_s: 1.0,
            },
            world: WorldConfig::default(),
            drone_defaults: DroneDefaults::default(),
            drones,
            markers: vec![MarkerConfig {
                id: "DEST".to_string(),
                pos: Position3D::new(100.0, 0.0, 100.0),
                velocity: None,
                yaw_deg: 0.0,
                despawn_time_s: None,
            }],
            swarm: SwarmScenarioConfig {
                roster: Vec::new(),
                missions: SwarmConfig {
                    destination: Some("DEST".to_string()),
                    formation: FormationConfig { spacing_m: 3.0, columns: 3 },
                    ..SwarmConfig::default()
                },
            },
            missions: vec![MissionTrigger { time_s: 0.0, mission: MissionType::FlyToLocation }],
        }
    }

    /// 設定の基本的な検証
    ///
    /// 群設定の参照（目的地など）が未設定であることはエラーにしません。
    /// 割り当て時に警告として扱われます。
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.sim.dt_s <= 0.0 {
            return Err(validation("dt_s must be positive"));
        }
        if self.sim.t_max_s <= 0.0 {
            return Err(validation("t_max_s must be positive"));
        }
        if self.sim.telemetry_interval_s <= 0.0 {
            return Err(validation("telemetry_interval_s must be positive"));
        }

        let formation = &self.swarm.missions.formation;
        if formation.columns == 0 {
            return Err(validation("formation.columns must be at least 1"));
        }
        if formation.spacing_m < 0.0 {
            return Err(validation("formation.spacing_m must not be negative"));
        }

        let controller = &self.drone_defaults.controller;
        validate_controller("drone_defaults", controller)?;
        if self.drone_defaults.mission.waypoint_reach_radius_m <= 0.0 {
            return Err(validation("drone_defaults: waypoint_reach_radius_m must be positive"));
        }
        for drone in &self.drones {
            validate_controller(&drone.id, &drone.controller_params(controller))?;
        }

        let mut ids = HashSet::new();
        let entity_ids = self.drones.iter().map(|d| &d.id).chain(self.markers.iter().map(|m| &m.id));
        for id in entity_ids {
            if !ids.insert(id.as_str()) {
                return Err(validation(format!("duplicate entity id {}", id)));
            }
        }

        let drone_ids: HashSet<&str> = self.drones.iter().map(|d| d.id.as_str()).collect();
        for id in &self.swarm.roster {
            if !drone_ids.contains(id.as_str()) {
                return Err(validation(format!("roster entry {} is not a drone", id)));
            }
        }

        for obstacle in &self.world.obstacles {
            if obstacle.layer() >= 32 {
                return Err(validation(format!("obstacle layer {} is out of range (0-31)", obstacle.layer())));
            }
            if let ObstacleConfig::Box { min, max, .. } = obstacle {
                if min.x_m > max.x_m || min.y_m > max.y_m || min.z_m > max.z_m {
                    return Err(validation("obstacle box min must not exceed max"));
                }
            }
        }

        for trigger in &self.missions {
            if trigger.time_s < 0.0 || trigger.time_s >= self.sim.t_max_s {
                return Err(validation(format!(
                    "mission {} at {} is outside simulation time {}",
                    trigger.mission, trigger.time_s, self.sim.t_max_s
                )));
            }
        }

        Ok(())
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間刻み: {:.3}秒", self.sim.dt_s);
        println!("最大時間: {:.1}秒 ({:.1}分)", self.sim.t_max_s, self.sim.t_max_s / 60.0);
        println!("テレメトリ間隔: {:.1}秒", self.sim.telemetry_interval_s);
        println!();

        println!("=== ワールド ===");
        println!("重力: {:.2}m/s²", self.world.gravity_mps2);
        println!("障害物: {}個", self.world.obstacles.len());
        println!("マーカー: {}個", self.markers.len());
        println!();

        println!("=== 群 ===");
        println!("ドローン: {}機", self.drones.len());
        if self.swarm.roster.is_empty() {
            println!("ロスター: 自動登録");
        } else {
            println!("ロスター: {}機（明示指定）", self.swarm.roster.len());
        }
        let formation = &self.swarm.missions.formation;
        println!("編隊: {}列 / 間隔 {:.1}m", formation.columns, formation.spacing_m);

        for trigger in &self.missions {
            println!("  {:.1}秒: {}", trigger.time_s, trigger.mission);
        }
    }
}

// 個別設定を適用した後のパラメータも同じ規則で検証する
fn validate_controller(owner: &str, params: &ControllerParams) -> Result<(), ScenarioError> {
    let positive = [
        ("max_speed_mps", params.max_speed),
        ("arrive_radius_m", params.arrive_radius),
        ("avoid_distance_m", params.avoid_distance),
        ("neighbor_radius_m", params.neighbor_radius),
    ];
    for (name, value) in positive {
        if value <= 0.0 || !value.is_finite() {
            return Err(validation(format!("{}: {} must be positive", owner, name)));
        }
    }
    if params.avoid_radius < 0.0 {
        return Err(validation(format!("{}: avoid_radius_m must not be negative", owner)));
    }
    if !params.target_altitude.is_finite() {
        return Err(validation(format!("{}: target_altitude_m must be finite", owner)));
    }
    Ok(())
}

fn validation(message: impl Into<String>) -> ScenarioError {
    ScenarioError::ValidationError(message.into())
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),
    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),
    #[error("設定検証エラー: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
meta:
  version: "1.0"
  name: minimal
  description: minimal scenario
sim:
  dt_s: 0.02
  t_max_s: 10.0
drones:
  - id: D001
    pos: { x_m: 0.0, y_m: 0.0, z_m: 0.0 }
"#;

    #[test]
    fn test_minimal_scenario_uses_defaults() {
        let config = ScenarioConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.drone_defaults.controller, ControllerParams::default());
        assert_eq!(config.drone_defaults.mission, MissionParams::default());
        assert_eq!(config.swarm.missions.formation, FormationConfig::default());
        assert_eq!(config.world.ground_y_m, Some(0.0));
        assert_eq!(config.sim.telemetry_interval_s, 1.0);
        assert!(config.swarm.roster.is_empty());
        assert!(config.missions.is_empty());
    }

    #[test]
    fn test_bundled_scenarios_parse() {
        for (name, contents) in [
            ("fly_to.yaml", include_str!("../scenarios/fly_to.yaml")),
            ("escort.yaml", include_str!("../scenarios/escort.yaml")),
            ("shooting_squad.yaml", include_str!("../scenarios/shooting_squad.yaml")),
            ("obstacle_run.yaml", include_str!("../scenarios/obstacle_run.yaml")),
        ] {
            let config = ScenarioConfig::from_yaml_str(contents);
            assert!(config.is_ok(), "{}: {:?}", name, config.err());
        }
    }

    #[test]
    fn test_obstacle_run_scenario_contents() {
        let config = ScenarioConfig::from_yaml_str(include_str!("../scenarios/obstacle_run.yaml")).unwrap();
        assert_eq!(config.swarm.missions.waypoints.len(), 4);
        assert_eq!(config.world.obstacles.len(), 3);
        assert_eq!(config.drone_defaults.controller.avoid_gain, 40.0);
        assert_eq!(config.missions[0].mission, MissionType::ObstacleRun);
    }

    #[test]
    fn test_demo_is_valid() {
        let demo = ScenarioConfig::demo();
        demo.validate().unwrap();
        assert_eq!(demo.drones.len(), 6);
        assert_eq!(demo.swarm.missions.destination.as_deref(), Some("DEST"));
    }

    #[test]
    fn test_validation_rejects_bad_configs() {
        let mut config = ScenarioConfig::demo();
        config.swarm.missions.formation.columns = 0;
        assert!(matches!(config.validate(), Err(ScenarioError::ValidationError(_))));

        let mut config = ScenarioConfig::demo();
        config.markers[0].id = "D001".to_string();
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::demo();
        config.swarm.roster = vec!["DEST".to_string()];
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::demo();
        config.missions[0].time_s = config.sim.t_max_s;
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::demo();
        config.world.obstacles.push(ObstacleConfig::Sphere {
            center: Position3D::new(0.0, 0.0, 0.0),
            radius_m: 1.0,
            layer: 32,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_checks_drone_overrides() {
        let mut config = ScenarioConfig::demo();
        config.drones[1].max_speed_mps = Some(-5.0);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("D002"), "{}", err);
        assert!(err.contains("max_speed_mps"), "{}", err);

        let mut config = ScenarioConfig::demo();
        config.drones[0].max_speed_mps = Some(0.0);
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::demo();
        config.drones[0].target_altitude_m = Some(f64::NAN);
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::demo();
        config.drone_defaults.controller.max_speed = 0.0;
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::demo();
        config.drones[0].max_speed_mps = Some(4.0);
        config.drones[0].target_altitude_m = Some(-2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_swarm_references_are_not_validation_errors() {
        let mut config = ScenarioConfig::demo();
        config.swarm.missions.destination = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_drone_overrides() {
        let drone = DroneConfig {
            id: "D1".to_string(),
            pos: Position3D::new(0.0, 0.0, 0.0),
            yaw_deg: 0.0,
            target_altitude_m: Some(12.0),
            max_speed_mps: None,
            despawn_time_s: None,
        };
        let params = drone.controller_params(&ControllerParams::default());
        assert_eq!(params.target_altitude, 12.0);
        assert_eq!(params.max_speed, 10.0);
    }

    #[test]
    fn test_missing_file() {
        let result = ScenarioConfig::from_file("does/not/exist.yaml");
        assert!(matches!(result, Err(ScenarioError::FileNotFound(_))));
    }
}
