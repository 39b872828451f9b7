use glam::DVec3;

use crate::models::common::{EntityKind, Pose};
use crate::models::fire::FireEvent;
use crate::models::world::{BodyState, ProbeHit};

/// ワールドへの読み取り専用クエリ
///
/// 操舵計算とミッション処理はこのインターフェースのみを通して周囲の状態を参照します。
/// 各ティックで新しく問い合わせ、結果をティックをまたいでキャッシュしません。
pub trait IWorldQuery {
    /// 物理状態の取得（解決できない場合はNone）
    fn body(&self, id: &str) -> Option<BodyState>;

    /// 姿勢の取得（解決できない場合はNone）
    fn pose(&self, id: &str) -> Option<Pose> {
        self.body(id).map(|body| body.pose())
    }

    /// 球を掃引するレイによる障害物プローブ
    fn probe(
        &self,
        origin: DVec3,
        direction: DVec3,
        radius: f64,
        max_distance: f64,
        layer_mask: u32,
    ) -> Option<ProbeHit>;

    /// 半径内のエンティティIDを取得（自身も含む）
    fn neighbors_within(&self, point: DVec3, radius: f64, kind: Option<EntityKind>) -> Vec<String>;
}

/// 力ベースの運動積分
pub trait IPhysics {
    /// 加速度モードで力を加える（次のstepで積分される）
    fn add_acceleration(&mut self, id: &str, acceleration: DVec3);

    /// 1ティック分の積分
    fn step(&mut self, dt: f64);

    /// 積分後の補正（速度制限、姿勢更新）用の可変参照
    fn body_mut(&mut self, id: &str) -> Option<&mut BodyState>;
}

/// 射撃イベントの受け口
pub trait IFireSink {
    fn on_fire(&mut self, event: FireEvent);
}
