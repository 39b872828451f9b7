//! # Steering モジュール
//!
//! 1機分の操舵コントローラーを提供します。
//!
//! 毎ティック、（任意の）目標点と周囲の空間状態から4つの独立した行動の
//! 合成力を計算し、加速度として物理積分に渡します。
//!
//! 1. **シーク**: 目標点への接近（到達半径内では線形に減速）
//! 2. **障害物回避**: 球掃引プローブのヒット面に沿った接線方向への偏向
//! 3. **分離**: 近傍ドローンからの距離反比例の反発
//! 4. **高度保持**: 鉛直方向のPD制御
//!
//! 積分後は水平速度を最大速度で制限し、機首を水平速度方向（停止中は水平姿勢）へ
//! 固定割合で補間します。

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::models::common::{
    EntityKind, FACING_LERP_FRACTION, MIN_SEPARATION_DISTANCE, MOVING_SPEED_SQ, Pose, math_utils,
};
use crate::models::fire::FireEvent;
use crate::models::traits::{IFireSink, IWorldQuery};
use crate::models::world::BodyState;

/// 操舵コントローラーのパラメータ（機体ごとに一定）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerParams {
    /// 最大水平速度（m/s）
    #[serde(rename = "max_speed_mps")]
    pub max_speed: f64,
    /// 操舵ゲイン
    pub steering_gain: f64,
    /// 到達半径（m）
    #[serde(rename = "arrive_radius_m")]
    pub arrive_radius: f64,
    /// 障害物プローブ距離（m）
    #[serde(rename = "avoid_distance_m")]
    pub avoid_distance: f64,
    /// 障害物回避ゲイン
    pub avoid_gain: f64,
    /// 障害物プローブ半径（m）
    #[serde(rename = "avoid_radius_m")]
    pub avoid_radius: f64,
    /// 障害物として扱うレイヤーのビットマスク
    pub obstacle_mask: u32,
    /// 近傍半径（m）
    #[serde(rename = "neighbor_radius_m")]
    pub neighbor_radius: f64,
    /// 分離ゲイン
    pub separation_gain: f64,
    /// 高度保持の有効化
    pub maintain_altitude: bool,
    /// 目標高度（m）
    #[serde(rename = "target_altitude_m")]
    pub target_altitude: f64,
    /// 高度P制御ゲイン
    pub altitude_gain: f64,
    /// 高度D制御ゲイン
    pub altitude_damping: f64,
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            max_speed: 10.0,
            steering_gain: 5.0,
            arrive_radius: 1.5,
            avoid_distance: 8.0,
            avoid_gain: 30.0,
            avoid_radius: 0.7,
            obstacle_mask: u32::MAX,
            neighbor_radius: 4.0,
            separation_gain: 8.0,
            maintain_altitude: true,
            target_altitude: 5.0,
            altitude_gain: 20.0,
            altitude_damping: 5.0,
        }
    }
}

/// 1ティック分の操舵力の内訳
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SteeringForce {
    pub seek: DVec3,
    pub avoidance: DVec3,
    pub separation: DVec3,
    pub altitude: DVec3,
}

impl SteeringForce {
    pub fn total(&self) -> DVec3 {
        self.seek + self.avoidance + self.separation + self.altitude
    }
}

/// 障害物回避の重み（近いほど強く、プローブ距離で0になる線形減衰）
pub fn avoidance_weight(hit_distance: f64, probe_distance: f64) -> f64 {
    if probe_distance <= 0.0 {
        return 0.0;
    }
    (1.0 - hit_distance / probe_distance).clamp(0.0, 1.0)
}

/// 操舵コントローラー
#[derive(Debug, Clone)]
pub struct SteeringController {
    pub params: ControllerParams,
    target: Option<DVec3>,
}

impl SteeringController {
    pub fn new(params: ControllerParams) -> Self {
        Self { params, target: None }
    }

    pub fn set_target(&mut self, point: DVec3) {
        self.target = Some(point);
    }

    pub fn clear_target(&mut self) {
        self.target = None;
    }

    pub fn target(&self) -> Option<DVec3> {
        self.target
    }

    /// 目標点との3次元距離がしきい値以下かどうか（目標未設定ならfalse）
    pub fn is_near_target(&self, position: DVec3, threshold: f64) -> bool {
        self.target
            .is_some_and(|target| position.distance(target) <= threshold)
    }

    /// 到達則による希望速さ
    ///
    /// 到達半径未満では `distance / arrive_radius` に比例して0から最大速度まで線形に変化し、
    /// それ以上では最大速度となります。
    pub fn desired_speed(&self, distance: f64) -> f64 {
        let p = &self.params;
        if distance < p.arrive_radius {
            p.max_speed * (distance / p.arrive_radius)
        } else {
            p.max_speed
        }
    }

    /// 1ティック分の合成操舵力を計算
    pub fn steering_force(&self, self_id: &str, body: &BodyState, world: &dyn IWorldQuery) -> SteeringForce {
        SteeringForce {
            seek: self.target.map_or(DVec3::ZERO, |target| self.seek(body, target)),
            avoidance: self.obstacle_avoidance(body, world),
            separation: self.separation(self_id, body, world),
            altitude: self.altitude_hold(body),
        }
    }

    fn seek(&self, body: &BodyState, mut target: DVec3) -> DVec3 {
        if self.params.maintain_altitude {
            // 水平方向のシークを高度制御から切り離す
            target.y = body.position.y;
        }

        let to_target = target - body.position;
        let distance = to_target.length();
        let desired_velocity = to_target.normalize_or_zero() * self.desired_speed(distance);

        (desired_velocity - body.velocity) * self.params.steering_gain
    }

    fn obstacle_avoidance(&self, body: &BodyState, world: &dyn IWorldQuery) -> DVec3 {
        let p = &self.params;
        let dir = if body.velocity.length_squared() > MOVING_SPEED_SQ {
            body.velocity.normalize()
        } else {
            body.forward()
        };

        match world.probe(body.position, dir, p.avoid_radius, p.avoid_distance, p.obstacle_mask) {
            Some(hit) => {
                let weight = avoidance_weight(hit.distance, p.avoid_distance);
                let avoid_dir = math_utils::project_on_plane(dir, hit.normal).normalize_or_zero();
                avoid_dir * p.avoid_gain * weight
            }
            None => DVec3::ZERO,
        }
    }

    fn separation(&self, self_id: &str, body: &BodyState, world: &dyn IWorldQuery) -> DVec3 {
        let mut force = DVec3::ZERO;
        let mut count = 0usize;

        for id in world.neighbors_within(body.position, self.params.neighbor_radius, Some(EntityKind::Drone)) {
            if id == self_id {
                continue;
            }
            let Some(neighbor) = world.body(&id) else {
                continue;
            };

            let away = body.position - neighbor.position;
            let distance = away.length();
            if distance <= MIN_SEPARATION_DISTANCE {
                continue;
            }

            force += away / distance / distance;
            count += 1;
        }

        if count == 0 {
            return DVec3::ZERO;
        }
        force / count as f64 * self.params.separation_gain
    }

    fn altitude_hold(&self, body: &BodyState) -> DVec3 {
        let p = &self.params;
        if !p.maintain_altitude {
            return DVec3::ZERO;
        }

        let error = p.target_altitude - body.position.y;
        let vertical_velocity = body.velocity.dot(DVec3::Y);
        DVec3::Y * (error * p.altitude_gain - vertical_velocity * p.altitude_damping)
    }

    /// 積分後の補正: 水平速度の制限と機首方向の更新
    ///
    /// 鉛直速度は高度制御に委ねるため制限しません。
    pub fn settle(&self, body: &mut BodyState) {
        let horizontal = math_utils::horizontal(body.velocity);
        if horizontal.length() > self.params.max_speed {
            let clamped = horizontal.normalize() * self.params.max_speed;
            body.velocity = DVec3::new(clamped.x, body.velocity.y, clamped.z);
        }

        let horizontal = math_utils::horizontal(body.velocity);
        let desired = if horizontal.length_squared() > MOVING_SPEED_SQ {
            math_utils::yaw_rotation(horizontal)
        } else {
            let up = body.rotation * DVec3::Y;
            DQuat::from_rotation_arc(up.normalize(), DVec3::Y) * body.rotation
        };
        body.rotation = body.rotation.lerp(desired, FACING_LERP_FRACTION).normalize();
    }

    /// 射撃イベントの発行（状態変化なし）
    pub fn fire_at(&self, source_id: &str, source: &Pose, target_id: &str, target: &Pose, sink: &mut dyn IFireSink) {
        sink.on_fire(FireEvent {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            source_position: source.position,
            target_position: target.position,
        });
    }
}
