//! # World モジュール
//!
//! 物理積分と空間クエリを担う外部協調者の簡易実装です。
//!
//! 群制御のコアは操舵力を「生成」するだけで、位置・速度の積分や障害物の検出は
//! [`IWorldQuery`] / [`IPhysics`] を通してこのモジュールに委ねます。
//! 衝突解決は行わず、地面（水平面）によるクランプのみを扱います。

use std::collections::BTreeMap;

use glam::{DQuat, DVec3};

use crate::models::common::{EntityKind, Pose, math_utils};
use crate::models::traits::{IPhysics, IWorldQuery};

/// 剛体の物理状態
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub kind: EntityKind,
    pub position: DVec3,
    pub velocity: DVec3,
    pub rotation: DQuat,
    /// 次の積分で適用される加速度（m/s²）
    pub pending_acceleration: DVec3,
}

impl BodyState {
    pub fn new(kind: EntityKind, position: DVec3) -> Self {
        Self {
            kind,
            position,
            velocity: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
            pending_acceleration: DVec3::ZERO,
        }
    }

    pub fn with_velocity(mut self, velocity: DVec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_rotation(mut self, rotation: DQuat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }

    pub fn forward(&self) -> DVec3 {
        self.pose().forward()
    }
}

/// 障害物プローブのヒット情報
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeHit {
    /// プローブ原点からの掃引距離（m）
    pub distance: f64,
    /// ヒット面の外向き法線
    pub normal: DVec3,
}

/// 静的障害物
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Obstacle {
    Sphere { center: DVec3, radius: f64, layer: u32 },
    Box { min: DVec3, max: DVec3, layer: u32 },
}

impl Obstacle {
    pub fn layer(&self) -> u32 {
        match self {
            Obstacle::Sphere { layer, .. } | Obstacle::Box { layer, .. } => *layer,
        }
    }

    /// 半径 `radius` の球を `origin` から `dir`（単位ベクトル）方向へ掃引したときの最初の接触
    fn sweep(&self, origin: DVec3, dir: DVec3, radius: f64) -> Option<ProbeHit> {
        match *self {
            Obstacle::Sphere { center, radius: r, .. } => sweep_sphere(origin, dir, radius, center, r),
            Obstacle::Box { min, max, .. } => {
                let margin = DVec3::splat(radius);
                sweep_box(origin, dir, min - margin, max + margin)
            }
        }
    }
}

fn sweep_sphere(origin: DVec3, dir: DVec3, probe_radius: f64, center: DVec3, radius: f64) -> Option<ProbeHit> {
    let combined = radius + probe_radius;
    let oc = origin - center;
    let c = oc.length_squared() - combined * combined;
    if c <= 0.0 {
        // 開始時点で重なっている障害物は検出しない
        return None;
    }

    let b = oc.dot(dir);
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }

    let t = -b - discriminant.sqrt();
    if t < 0.0 {
        return None;
    }

    let contact_center = origin + dir * t;
    let normal = (contact_center - center) / combined;
    Some(ProbeHit { distance: t, normal })
}

fn axis_unit(axis: usize) -> DVec3 {
    match axis {
        0 => DVec3::X,
        1 => DVec3::Y,
        _ => DVec3::Z,
    }
}

/// 開始点が箱の内側にある場合は t_enter < 0 となり検出しない
fn sweep_box(origin: DVec3, dir: DVec3, min: DVec3, max: DVec3) -> Option<ProbeHit> {
    let mut t_enter = f64::NEG_INFINITY;
    let mut t_exit = f64::INFINITY;
    let mut normal = DVec3::ZERO;

    for axis in 0..3 {
        let o = origin[axis];
        let d = dir[axis];
        if d.abs() < 1e-12 {
            if o < min[axis] || o > max[axis] {
                return None;
            }
            continue;
        }

        let (t0, t1, face) = if d > 0.0 {
            ((min[axis] - o) / d, (max[axis] - o) / d, -axis_unit(axis))
        } else {
            ((max[axis] - o) / d, (min[axis] - o) / d, axis_unit(axis))
        };

        if t0 > t_enter {
            t_enter = t0;
            normal = face;
        }
        t_exit = t_exit.min(t1);
    }

    if t_enter > t_exit || t_enter < 0.0 {
        return None;
    }

    Some(ProbeHit { distance: t_enter, normal })
}

/// シミュレーション空間
///
/// エンティティはID順（BTreeMap）で保持されるため、積分と近傍クエリの
/// 結果は常に決定的です。
#[derive(Debug, Clone)]
pub struct World {
    bodies: BTreeMap<String, BodyState>,
    obstacles: Vec<Obstacle>,
    /// 重力加速度（m/s²、下向き正）
    pub gravity: f64,
    /// 地面の高さ（None の場合は地面なし）
    pub ground_y: Option<f64>,
}

impl Default for World {
    fn default() -> Self {
        Self::new(9.81, Some(0.0))
    }
}

impl World {
    pub fn new(gravity: f64, ground_y: Option<f64>) -> Self {
        Self {
            bodies: BTreeMap::new(),
            obstacles: Vec::new(),
            gravity,
            ground_y,
        }
    }

    /// 重力と地面のない空間（単体テスト向け）
    pub fn empty() -> Self {
        Self::new(0.0, None)
    }

    pub fn spawn(&mut self, id: impl Into<String>, body: BodyState) {
        self.bodies.insert(id.into(), body);
    }

    /// エンティティを削除（以降、このIDへの参照は解決できない）
    pub fn despawn(&mut self, id: &str) -> Option<BodyState> {
        self.bodies.remove(id)
    }

    pub fn add_obstacle(&mut self, obstacle: Obstacle) {
        self.obstacles.push(obstacle);
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bodies.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

impl IWorldQuery for World {
    fn body(&self, id: &str) -> Option<BodyState> {
        self.bodies.get(id).copied()
    }

    fn probe(
        &self,
        origin: DVec3,
        direction: DVec3,
        radius: f64,
        max_distance: f64,
        layer_mask: u32,
    ) -> Option<ProbeHit> {
        let dir = direction.try_normalize()?;
        self.obstacles
            .iter()
            .filter(|obstacle| 1u32.checked_shl(obstacle.layer()).is_some_and(|bit| layer_mask & bit != 0))
            .filter_map(|obstacle| obstacle.sweep(origin, dir, radius))
            .filter(|hit| hit.distance <= max_distance)
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    fn neighbors_within(&self, point: DVec3, radius: f64, kind: Option<EntityKind>) -> Vec<String> {
        let radius_sq = radius * radius;
        self.bodies
            .iter()
            .filter(|(_, body)| kind.is_none_or(|k| body.kind == k))
            .filter(|(_, body)| body.position.distance_squared(point) <= radius_sq)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl IPhysics for World {
    fn add_acceleration(&mut self, id: &str, acceleration: DVec3) {
        if let Some(body) = self.bodies.get_mut(id) {
            body.pending_acceleration += acceleration;
        }
    }

    fn step(&mut self, dt: f64) {
        let gravity = DVec3::new(0.0, -self.gravity, 0.0);
        for body in self.bodies.values_mut() {
            match body.kind {
                EntityKind::Drone => {
                    body.velocity += (body.pending_acceleration + gravity) * dt;
                    body.position += body.velocity * dt;
                    if let Some(ground) = self.ground_y {
                        if body.position.y < ground {
                            body.position.y = ground;
                            body.velocity.y = body.velocity.y.max(0.0);
                        }
                    }
                }
                EntityKind::Marker => {
                    body.position += body.velocity * dt;
                    let horizontal = math_utils::horizontal(body.velocity);
                    if horizontal.length_squared() > f64::EPSILON {
                        body.rotation = math_utils::yaw_rotation(horizontal);
                    }
                }
            }
            body.pending_acceleration = DVec3::ZERO;
        }
    }

    fn body_mut(&mut self, id: &str) -> Option<&mut BodyState> {
        self.bodies.get_mut(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_LAYERS: u32 = u32::MAX;

    #[test]
    fn test_probe_hits_sphere_head_on() {
        let mut world = World::empty();
        world.add_obstacle(Obstacle::Sphere { center: DVec3::new(0.0, 0.0, 10.0), radius: 2.0, layer: 0 });

        let hit = world.probe(DVec3::ZERO, DVec3::Z, 0.5, 20.0, ALL_LAYERS).unwrap();
        assert!((hit.distance - 7.5).abs() < 1e-9);
        assert!((hit.normal + DVec3::Z).length() < 1e-9);
    }

    #[test]
    fn test_probe_respects_distance_and_layers() {
        let mut world = World::empty();
        world.add_obstacle(Obstacle::Sphere { center: DVec3::new(0.0, 0.0, 10.0), radius: 2.0, layer: 3 });

        assert!(world.probe(DVec3::ZERO, DVec3::Z, 0.5, 5.0, ALL_LAYERS).is_none());
        assert!(world.probe(DVec3::ZERO, DVec3::Z, 0.5, 20.0, 1 << 0).is_none());
        assert!(world.probe(DVec3::ZERO, DVec3::Z, 0.5, 20.0, 1 << 3).is_some());
        assert!(world.probe(DVec3::ZERO, -DVec3::Z, 0.5, 20.0, ALL_LAYERS).is_none());
    }

    #[test]
    fn test_probe_hits_nearest_box_face() {
        let mut world = World::empty();
        world.add_obstacle(Obstacle::Box {
            min: DVec3::new(-1.0, -1.0, 5.0),
            max: DVec3::new(1.0, 1.0, 6.0),
            layer: 0,
        });
        world.add_obstacle(Obstacle::Sphere { center: DVec3::new(0.0, 0.0, 20.0), radius: 1.0, layer: 0 });

        let hit = world.probe(DVec3::ZERO, DVec3::Z, 0.5, 30.0, ALL_LAYERS).unwrap();
        assert!((hit.distance - 4.5).abs() < 1e-9);
        assert_eq!(hit.normal, -DVec3::Z);
    }

    #[test]
    fn test_probe_ignores_obstacles_overlapping_origin() {
        let mut world = World::empty();
        world.add_obstacle(Obstacle::Sphere { center: DVec3::ZERO, radius: 2.0, layer: 0 });
        world.add_obstacle(Obstacle::Box {
            min: DVec3::new(10.0, -1.0, -1.0),
            max: DVec3::new(12.0, 1.0, 1.0),
            layer: 0,
        });

        assert!(world.probe(DVec3::new(1.0, 0.0, 0.0), DVec3::Z, 0.5, 8.0, ALL_LAYERS).is_none());
        assert!(world.probe(DVec3::new(11.0, 0.0, 0.0), DVec3::Z, 0.5, 8.0, ALL_LAYERS).is_none());
        // 箱の外側 0.5m 以内（掃引半径の範囲内）でも同様
        assert!(world.probe(DVec3::new(12.3, 0.0, 0.0), DVec3::X, 0.5, 8.0, ALL_LAYERS).is_none());
    }

    #[test]
    fn test_neighbors_within_filters_kind_and_radius() {
        let mut world = World::empty();
        world.spawn("D1", BodyState::new(EntityKind::Drone, DVec3::ZERO));
        world.spawn("D2", BodyState::new(EntityKind::Drone, DVec3::new(3.0, 0.0, 0.0)));
        world.spawn("D3", BodyState::new(EntityKind::Drone, DVec3::new(10.0, 0.0, 0.0)));
        world.spawn("M1", BodyState::new(EntityKind::Marker, DVec3::new(1.0, 0.0, 0.0)));

        let drones = world.neighbors_within(DVec3::ZERO, 4.0, Some(EntityKind::Drone));
        assert_eq!(drones, vec!["D1".to_string(), "D2".to_string()]);

        let all = world.neighbors_within(DVec3::ZERO, 4.0, None);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_step_integrates_drone_and_clamps_to_ground() {
        let mut world = World::new(10.0, Some(0.0));
        world.spawn("D1", BodyState::new(EntityKind::Drone, DVec3::new(0.0, 0.05, 0.0)));

        world.add_acceleration("D1", DVec3::new(1.0, 0.0, 0.0));
        world.step(0.1);

        let body = world.body("D1").unwrap();
        assert!((body.velocity.x - 0.1).abs() < 1e-12);
        assert_eq!(body.position.y, 0.0);
        assert_eq!(body.velocity.y, 0.0);
        assert_eq!(body.pending_acceleration, DVec3::ZERO);
    }

    #[test]
    fn test_marker_moves_kinematically_and_faces_velocity() {
        let mut world = World::default();
        world.spawn(
            "M1",
            BodyState::new(EntityKind::Marker, DVec3::new(0.0, 2.0, 0.0)).with_velocity(DVec3::new(2.0, 0.0, 0.0)),
        );

        world.step(0.5);

        let body = world.body("M1").unwrap();
        assert!((body.position - DVec3::new(1.0, 2.0, 0.0)).length() < 1e-12);
        assert!((body.forward() - DVec3::X).length() < 1e-9);
    }

    #[test]
    fn test_despawned_entity_no_longer_resolves() {
        let mut world = World::empty();
        world.spawn("M1", BodyState::new(EntityKind::Marker, DVec3::ZERO));
        assert!(world.contains("M1"));
        assert!(world.pose("M1").is_some());
        world.despawn("M1");
        assert!(!world.contains("M1"));
        assert!(world.pose("M1").is_none());
        assert!(world.is_empty());
    }
}
