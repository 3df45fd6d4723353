use std::ffi::OsString;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use xxhash_rust::xxh3::Xxh3;

use crate::error::StateError;
use crate::storage::state::{PersistedState, StateStore};

/// 状态文件 Header
const MAGIC: u32 = 0x5453_4301;
const VERSION_CURRENT: u32 = 1;
const STATE_COMMITTED: u32 = 0x0000_0001;
const STATE_INCOMPLETE: u32 = 0xFFFF_FFFF;
const HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 4; // magic + version + state + data_len + checksum

/// 原子快照存储（atomic replacement）
///
/// 落盘流程：
/// 1) 写 state.db.tmp 的 INCOMPLETE header（len/checksum 先置 0）
/// 2) `bincode::serialize_into(file)` 流式写 body，并边写边计算 checksum / data_len
/// 3) seek 回开头覆盖 COMMITTED header（写入真实 len/checksum）
/// 4) fsync(tmpfile)
/// 5) rename(tmp, target)：原子替换（POSIX 保证）
/// 6) fsync(dir)
///
/// 任一步骤前崩溃，target 仍是上一份完整快照。
/// 加载时校验 magic + version + state + data_len + checksum，任何不一致都是致命错误：
/// 不自动修复，由运维从备份恢复。
pub struct SnapshotStore {
    path: PathBuf,
}

struct ChecksumWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: Xxh3,
    bytes: u64,
}

impl<'a, W: Write> ChecksumWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            hasher: Xxh3::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (u64, u32) {
        (self.bytes, fold_checksum(self.hasher.digest()))
    }
}

impl<'a, W: Write> Write for ChecksumWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// 读取并校验快照
    pub fn load_checked(&self) -> Result<Option<PersistedState>, StateError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let data = std::fs::read(&self.path)?;
        if data.len() < HEADER_SIZE {
            return Err(StateError::Corrupt(format!(
                "{} bytes is smaller than the header",
                data.len()
            )));
        }

        let magic = read_u32(&data, 0);
        let version = read_u32(&data, 4);
        let state = read_u32(&data, 8);
        let data_len = read_u32(&data, 12) as usize;
        let stored_checksum = read_u32(&data, 16);

        if magic != MAGIC {
            return Err(StateError::Corrupt(format!(
                "magic mismatch: {:#x} != {:#x}",
                magic, MAGIC
            )));
        }
        if version != VERSION_CURRENT {
            return Err(StateError::Corrupt(format!(
                "unsupported version {} (expected {})",
                version, VERSION_CURRENT
            )));
        }
        if state != STATE_COMMITTED {
            return Err(StateError::Corrupt("snapshot never committed".into()));
        }

        let body = &data[HEADER_SIZE..];
        if body.len() != data_len {
            return Err(StateError::Corrupt(format!(
                "data length mismatch: {} != {}",
                body.len(),
                data_len
            )));
        }

        let computed = fold_checksum(xxhash_rust::xxh3::xxh3_64(body));
        if computed != stored_checksum {
            return Err(StateError::Corrupt(format!(
                "checksum mismatch: {:#x} != {:#x}",
                computed, stored_checksum
            )));
        }

        bincode::deserialize::<PersistedState>(body)
            .map(Some)
            .map_err(|e| StateError::Corrupt(format!("decode failed: {}", e)))
    }

    /// 原子写入快照
    pub fn write_atomic(&self, snap: &PersistedState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.tmp_path();

        // 1) INCOMPLETE header，随后流式写 body
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&encode_header(STATE_INCOMPLETE, 0, 0))?;

        // 2) 流式写 body 并计算长度/校验
        let (data_len_u64, checksum) = {
            let mut cw = ChecksumWriter::new(&mut file);
            bincode::serialize_into(&mut cw, snap)
                .map_err(|e| StateError::Encode(e.to_string()))?;
            cw.finish()
        };

        let data_len: u32 = data_len_u64.try_into().map_err(|_| {
            StateError::Encode(format!("snapshot too large (>{} bytes)", u32::MAX))
        })?;

        // 3) seek 回开头覆盖 COMMITTED header
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&encode_header(STATE_COMMITTED, data_len, checksum))?;

        // 4) fsync
        file.sync_all()?;
        drop(file);

        // 5) rename 原子替换
        std::fs::rename(&tmp_path, &self.path)?;

        // 6) fsync(dir)
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        tracing::debug!(
            "State written: {} tags, {} queued, {} cached combinations, {} bytes",
            snap.tag_scores.len(),
            snap.download_queue.len(),
            snap.cache.len(),
            HEADER_SIZE + data_len as usize
        );
        Ok(())
    }
}

impl StateStore for SnapshotStore {
    fn load(&self) -> Result<Option<PersistedState>, StateError> {
        self.load_checked()
    }

    fn save_atomic(&self, state: &PersistedState) -> Result<(), StateError> {
        self.write_atomic(state)
    }
}

fn encode_header(state: u32, data_len: u32, checksum: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&VERSION_CURRENT.to_le_bytes());
    header[8..12].copy_from_slice(&state.to_le_bytes());
    header[12..16].copy_from_slice(&data_len.to_le_bytes());
    header[16..20].copy_from_slice(&checksum.to_le_bytes());
    header
}

fn read_u32(data: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[off..off + 4]);
    u32::from_le_bytes(b)
}

/// xxh3-64 折叠为 32 位（非加密，仅用于完整性检测）
fn fold_checksum(h: u64) -> u32 {
    (h ^ (h >> 32)) as u32
}
