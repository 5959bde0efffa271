use async_trait::async_trait;
use harvester_core::{HarvesterError, ProgressStore, Result};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 基于本地文件的批次进度存储
///
/// 每个批次一个 `<batch_id>.json` 文件，内容为 `{"processed": [...]}`，
/// 数组按升序排列。写入通过临时文件加重命名完成。
pub struct FileProgressStore {
    base_dir: PathBuf,
    lock: Mutex<()>,
}

impl FileProgressStore {
    /// 目录在第一次写入时创建
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// 批次文件路径，`[A-Za-z0-9._-]` 以外的字符替换为 `_`
    pub fn file_path(&self, batch_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", sanitize_batch_id(batch_id)))
    }

    /// 文件不存在时返回 None
    async fn read_file(&self, batch_id: &str) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.file_path(batch_id)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 内容损坏时按空集合处理
    fn decode(batch_id: &str, content: &[u8]) -> HashSet<i64> {
        match serde_json::from_slice::<Value>(content) {
            Ok(value) => parse_processed(&value),
            Err(e) => {
                warn!(batch_id, error = %e, "进度文件内容损坏，按未处理对待");
                HashSet::new()
            }
        }
    }

    /// 删除超过 `max_age` 未更新的进度文件，返回删除的数量
    ///
    /// 超时中止的批次会留下进度文件，若之后再没有相同 `batch_id` 的任务，
    /// 这些文件只能靠这里清理。
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let _guard = self.lock.lock().await;

        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(HarvesterError::Persistence(format!(
                    "读取进度目录 {} 失败: {e}",
                    self.base_dir.display()
                )))
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HarvesterError::Persistence(format!("遍历进度目录失败: {e}")))?
        {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.ends_with(".json") || name.ends_with(".json.tmp")) {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "读取进度文件时间失败");
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < max_age {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), age_secs = age.as_secs(), "删除过期进度文件");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "删除过期进度文件失败"),
            }
        }

        if removed > 0 {
            info!(removed, "已清理过期的批次进度文件");
        }
        Ok(removed)
    }

    async fn write_processed(&self, batch_id: &str, processed: &HashSet<i64>) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            HarvesterError::Persistence(format!(
                "创建进度目录 {} 失败: {e}",
                self.base_dir.display()
            ))
        })?;

        let sorted: BTreeSet<i64> = processed.iter().copied().collect();
        let payload = serde_json::to_vec(&json!({ "processed": sorted }))
            .map_err(|e| HarvesterError::Serialization(format!("序列化进度失败: {e}")))?;

        let path = self.file_path(batch_id);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &payload)
            .await
            .map_err(|e| HarvesterError::Persistence(format!("写入进度文件失败: {e}")))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| HarvesterError::Persistence(format!("替换进度文件失败: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn load(&self, batch_id: &str) -> HashSet<i64> {
        match self.read_file(batch_id).await {
            Ok(Some(content)) => Self::decode(batch_id, &content),
            Ok(None) => HashSet::new(),
            Err(e) => {
                warn!(batch_id, error = %e, "读取进度文件失败，按未处理对待");
                HashSet::new()
            }
        }
    }

    /// 读取失败时不覆盖已有文件，只有内容损坏的文件会被重写
    async fn mark_processed(&self, batch_id: &str, channel_id: i64) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut processed = match self.read_file(batch_id).await {
            Ok(Some(content)) => Self::decode(batch_id, &content),
            Ok(None) => HashSet::new(),
            Err(e) => {
                return Err(HarvesterError::Persistence(format!(
                    "读取进度文件失败: {e}"
                )))
            }
        };
        if !processed.insert(channel_id) {
            return Ok(());
        }

        self.write_processed(batch_id, &processed).await?;
        debug!(batch_id, channel_id, total = processed.len(), "频道已记录为完成");
        Ok(())
    }

    async fn clear(&self, batch_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        match tokio::fs::remove_file(self.file_path(batch_id)).await {
            Ok(()) => {
                debug!(batch_id, "批次进度已清除");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HarvesterError::Persistence(format!(
                "删除进度文件失败: {e}"
            ))),
        }
    }
}

fn sanitize_batch_id(batch_id: &str) -> String {
    batch_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// 不符合格式的条目直接跳过
fn parse_processed(value: &Value) -> HashSet<i64> {
    let Some(items) = value.get("processed").and_then(Value::as_array) else {
        return HashSet::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .collect()
}
