use std::path::{Path, PathBuf};

/// 会话开始前备份上一份快照：`<backup_dir>/<UTC %Y%m%d %H%M%S>.bak`
///
/// 快照不存在时什么都不做，返回 `Ok(None)`。备份只用于人工回滚。
pub fn backup_snapshot(state_path: &Path, backup_dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    backup_snapshot_at(state_path, backup_dir, chrono::Utc::now())
}

pub fn backup_snapshot_at(
    state_path: &Path,
    backup_dir: &Path,
    now: chrono::DateTime<chrono::Utc>,
) -> anyhow::Result<Option<PathBuf>> {
    if !state_path.exists() {
        return Ok(None);
    }
    std::fs::create_dir_all(backup_dir)?;

    let stamp = now.format("%Y%m%d %H%M%S").to_string();
    let mut target = backup_dir.join(format!("{}.bak", stamp));
    // 同一秒内多次启动：追加序号，不覆盖旧备份
    let mut n = 1;
    while target.exists() {
        target = backup_dir.join(format!("{}-{}.bak", stamp, n));
        n += 1;
    }

    std::fs::copy(state_path, &target)?;
    tracing::info!("State backed up to {:?}", target);
    Ok(Some(target))
}
