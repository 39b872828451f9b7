use std::collections::{BTreeMap, VecDeque};

use glam::DVec3;
use tracing::debug;

use crate::models::traits::IFireSink;

/// 保持する射撃イベント履歴の上限
pub const FIRE_HISTORY_LIMIT: usize = 1024;

/// 射撃イベント
///
/// 状態変化やダメージモデルを伴わない、外部の可視化・ログ向けの離散イベントです。
#[derive(Debug, Clone, PartialEq)]
pub struct FireEvent {
    pub source_id: String,
    pub target_id: String,
    pub source_position: DVec3,
    pub target_position: DVec3,
}

impl FireEvent {
    pub fn distance(&self) -> f64 {
        self.source_position.distance(self.target_position)
    }
}

/// 射撃イベントを記録する標準の受け口
///
/// 射撃元ごとの発射回数と、直近 [`FIRE_HISTORY_LIMIT`] 件の履歴を保持します。
#[derive(Debug, Default)]
pub struct FireLog {
    history: VecDeque<FireEvent>,
    shots_by_source: BTreeMap<String, u64>,
    total: u64,
}

impl FireLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn shots_by(&self, source_id: &str) -> u64 {
        self.shots_by_source.get(source_id).copied().unwrap_or(0)
    }

    pub fn recent(&self) -> impl Iterator<Item = &FireEvent> {
        self.history.iter()
    }
}

impl IFireSink for FireLog {
    fn on_fire(&mut self, event: FireEvent) {
        debug!(
            source_id = %event.source_id,
            target_id = %event.target_id,
            source_x = event.source_position.x,
            source_y = event.source_position.y,
            source_z = event.source_position.z,
            target_x = event.target_position.x,
            target_y = event.target_position.y,
            target_z = event.target_position.z,
            distance = event.distance(),
            "AGENT_FIRE: {} が {} に向けて射撃しました",
            event.source_id,
            event.target_id
        );

        *self.shots_by_source.entry(event.source_id.clone()).or_insert(0) += 1;
        self.total += 1;

        if self.history.len() == FIRE_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }
}
