use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 移動中とみなす速度の二乗しきい値（m²/s²）
///
/// 障害物プローブの方向選択と機首方向の更新で共通に使用します。
pub const MOVING_SPEED_SQ: f64 = 0.1;

/// 機首方向の補間係数（1ティックあたりの固定割合）
pub const FACING_LERP_FRACTION: f64 = 0.1;

/// 分離計算で無視する近接距離（m）
pub const MIN_SEPARATION_DISTANCE: f64 = 0.001;

/// 射撃ミッションの交戦距離（m、水平距離）
pub const FIRE_RANGE_M: f64 = 15.0;

/// エンティティの姿勢（位置と回転）
///
/// ミッションの参照先（目的地、護衛対象、リーダー、ウェイポイント）を
/// 解決した結果として使用されます。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: DVec3,
    pub rotation: DQuat,
}

impl Pose {
    pub fn new(position: DVec3, rotation: DQuat) -> Self {
        Self { position, rotation }
    }

    /// ローカル座標系のオフセットをワールド座標系の方向に変換
    pub fn transform_direction(&self, local: DVec3) -> DVec3 {
        self.rotation * local
    }

    /// 前方ベクトル（ローカル +Z）
    pub fn forward(&self) -> DVec3 {
        self.rotation * DVec3::Z
    }
}

/// ワールド内のエンティティ種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// 群制御の対象となるドローン
    Drone,
    /// 参照専用のエンティティ（目的地、護衛対象、射撃目標、ウェイポイント）
    Marker,
}

/// ミッション種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionType {
    None,
    FlyToLocation,
    Escort,
    ShootingSquad,
    FollowLeader,
    ObstacleRun,
}

impl MissionType {
    pub const ALL: [MissionType; 6] = [
        MissionType::None,
        MissionType::FlyToLocation,
        MissionType::Escort,
        MissionType::ShootingSquad,
        MissionType::FollowLeader,
        MissionType::ObstacleRun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MissionType::None => "none",
            MissionType::FlyToLocation => "fly_to_location",
            MissionType::Escort => "escort",
            MissionType::ShootingSquad => "shooting_squad",
            MissionType::FollowLeader => "follow_leader",
            MissionType::ObstacleRun => "obstacle_run",
        }
    }
}

impl fmt::Display for MissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ミッション状態から導出されるエージェントの状態（テレメトリ用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// ミッション未割り当て
    Idle,
    /// 目標点に向けて移動中
    EnRoute,
    /// 目標点の到達半径内
    OnStation,
    /// 射撃中
    Engaging,
    /// 参照先を解決できず位置保持中
    Holding,
}

/// 数学ユーティリティ関数
pub mod math_utils {
    use glam::{DQuat, DVec3};

    /// 水平成分（X-Z平面）のみを取り出す
    pub fn horizontal(v: DVec3) -> DVec3 {
        DVec3::new(v.x, 0.0, v.z)
    }

    /// X-Z平面での2次元距離を計算
    pub fn planar_distance(a: DVec3, b: DVec3) -> f64 {
        horizontal(a - b).length()
    }

    /// 法線 `normal` を持つ平面へベクトルを射影
    pub fn project_on_plane(v: DVec3, normal: DVec3) -> DVec3 {
        let n = normal.normalize_or_zero();
        v - n * v.dot(n)
    }

    /// 水平方向を向くヨーのみの回転（+Zを `dir` に合わせる）
    pub fn yaw_rotation(dir: DVec3) -> DQuat {
        DQuat::from_rotation_y(dir.x.atan2(dir.z))
    }

    /// 回転の前方ベクトルから方位角を計算（度、+Zから+X方向へ 0〜360）
    pub fn heading_deg(rotation: DQuat) -> f64 {
        let forward = rotation * DVec3::Z;
        forward.x.atan2(forward.z).to_degrees().rem_euclid(360.0)
    }
}

#[cfg(test)]
mod tests {
    use super::math_utils::*;
    use super::*;

    #[test]
    fn test_transform_direction_follows_rotation() {
        let pose = Pose::new(DVec3::ZERO, DQuat::from_rotation_y(std::f64::consts::FRAC_PI_2));
        let world = pose.transform_direction(DVec3::new(0.0, 0.0, 1.0));
        assert!((world - DVec3::X).length() < 1e-9);
    }

    #[test]
    fn test_planar_distance_ignores_altitude() {
        let a = DVec3::new(0.0, 50.0, 0.0);
        let b = DVec3::new(3.0, -10.0, 4.0);
        assert!((planar_distance(a, b) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_project_on_plane_removes_normal_component() {
        let projected = project_on_plane(DVec3::new(1.0, 0.0, 1.0), DVec3::new(-2.0, 0.0, 0.0));
        assert!((projected - DVec3::Z).length() < 1e-12);
    }

    #[test]
    fn test_heading_deg() {
        assert!(heading_deg(DQuat::IDENTITY).abs() < 1e-9);
        let east = yaw_rotation(DVec3::X);
        assert!((heading_deg(east) - 90.0).abs() < 1e-9);
        let west = yaw_rotation(-DVec3::X);
        assert!((heading_deg(west) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_mission_type_names() {
        assert_eq!(MissionType::FlyToLocation.to_string(), "fly_to_location");
        let parsed: MissionType = serde_yaml::from_str("obstacle_run").unwrap();
        assert_eq!(parsed, MissionType::ObstacleRun);
    }
}
