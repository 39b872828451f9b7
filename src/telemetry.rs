//! # Telemetry モジュール
//!
//! 外部の監視アプリケーション向けの読み取り専用テレメトリを提供します。
//!
//! コアはテレメトリを能動的に送信せず、シミュレーションエンジンが一定間隔で
//! スナップショットを取得して JSON Lines 形式で書き出します。

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::common::{AgentStatus, MissionType};

/// 1機分のテレメトリ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTelemetry {
    /// シミュレーション時刻（秒）
    pub time_s: f64,
    pub id: String,
    /// 位置 [x, y, z]（m、yが高度）
    pub position: [f64; 3],
    /// 方位角（度、0〜360）
    pub heading_deg: f64,
    /// 速さ（m/s）
    pub speed: f64,
    pub mission: MissionType,
    pub status: AgentStatus,
}

/// テレメトリの JSON Lines 出力
pub struct TelemetryWriter<W: Write> {
    writer: W,
    records: u64,
}

impl TelemetryWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> TelemetryWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, records: 0 }
    }

    pub fn write_snapshot(&mut self, snapshot: &[AgentTelemetry]) -> std::io::Result<()> {
        for record in snapshot {
            serde_json::to_writer(&mut self.writer, record)?;
            self.writer.write_all(b"\n")?;
            self.records += 1;
        }
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> AgentTelemetry {
        AgentTelemetry {
            time_s: 2.0,
            id: id.to_string(),
            position: [1.0, 5.0, -2.0],
            heading_deg: 90.0,
            speed: 4.5,
            mission: MissionType::Escort,
            status: AgentStatus::OnStation,
        }
    }

    #[test]
    fn test_write_snapshot_as_json_lines() {
        let mut writer = TelemetryWriter::new(Vec::new());
        writer.write_snapshot(&[record("D001"), record("D002")]).unwrap();
        assert_eq!(writer.records(), 2);

        let output = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"mission\":\"escort\""));
        assert!(lines[0].contains("\"status\":\"on_station\""));

        let parsed: AgentTelemetry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, record("D002"));
    }

    #[test]
    fn test_create_writes_to_file() {
        let path = std::env::temp_dir().join(format!("swarmsim_telemetry_{}.jsonl", std::process::id()));
        {
            let mut writer = TelemetryWriter::create(&path).unwrap();
            writer.write_snapshot(&[record("D001")]).unwrap();
            writer.flush().unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        std::fs::remove_file(&path).ok();
    }
}
