use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::core::tag::{Tag, TagCombination};
use crate::error::StateError;
use crate::storage::session::SessionState;
use crate::storage::state::PersistedState;

/// 默认最大组合宽度
pub const DEFAULT_MAX_WIDTH: usize = 6;

/// 每个点踩条目标签的固定衰减
const ITEM_TAG_DECAY: f64 = 0.1;
/// 组合标签衰减系数：0.1 * streak^1.5
const STREAK_DECAY_FACTOR: f64 = 0.1;
const STREAK_DECAY_EXPONENT: f64 = 1.5;

/// Tag → 分值，保留插入顺序（作为同分时的稳定次序）。
///
/// 序列化为 `(tag, score)` 列表；反序列化时重建索引。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<(Tag, f64)>", into = "Vec<(Tag, f64)>")]
pub struct TagScores {
    entries: Vec<(Tag, f64)>,
    index: HashMap<Tag, usize>,
}

impl From<Vec<(Tag, f64)>> for TagScores {
    fn from(pairs: Vec<(Tag, f64)>) -> Self {
        let mut scores = TagScores::default();
        for (tag, score) in pairs {
            scores.adjust(&tag, score);
        }
        scores
    }
}

impl From<TagScores> for Vec<(Tag, f64)> {
    fn from(scores: TagScores) -> Self {
        scores.entries
    }
}

impl TagScores {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, tag: &str) -> Option<f64> {
        self.index.get(tag).map(|&i| self.entries[i].1)
    }

    /// 未出现的标签先以 0 插入，再加上 delta
    pub fn adjust(&mut self, tag: &str, delta: f64) {
        match self.index.get(tag) {
            Some(&i) => self.entries[i].1 += delta,
            None => {
                self.index.insert(tag.to_string(), self.entries.len());
                self.entries.push((tag.to_string(), delta));
            }
        }
    }

    /// 按分值降序；同分保持插入顺序（sort_by 是稳定排序）
    pub fn ranked(&self) -> Vec<(Tag, f64)> {
        let mut ranked = self.entries.clone();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    pub fn ranked_tags(&self) -> Vec<Tag> {
        self.ranked().into_iter().map(|(tag, _)| tag).collect()
    }

    pub fn all_finite(&self) -> bool {
        self.entries.iter().all(|(_, s)| s.is_finite())
    }
}

/// 某一时刻的排名快照：排名标签 + 当前宽度。
///
/// 引擎在每次反馈后比较新旧快照；不相等即放弃当前组合，从头重新选择。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ranking {
    pub tags: Vec<Tag>,
    pub width: usize,
}

impl Ranking {
    pub fn combinations(&self) -> Combinations {
        Combinations {
            ranking: self.clone(),
            next: 0,
        }
    }
}

/// 惰性组合序列：宽度为 0 时只产出一个空组合；
/// 否则从排名顶部开始，窗口每次下滑一位。
pub struct Combinations {
    ranking: Ranking,
    next: usize,
}

impl Iterator for Combinations {
    type Item = TagCombination;

    fn next(&mut self) -> Option<Self::Item> {
        let width = self.ranking.width;
        if width == 0 {
            if self.next > 0 {
                return None;
            }
            self.next = 1;
            return Some(TagCombination::unfiltered());
        }
        let end = self.next + width;
        if end > self.ranking.tags.len() {
            return None;
        }
        let window = self.ranking.tags[self.next..end].to_vec();
        self.next += 1;
        Some(TagCombination::new(window))
    }
}

/// 偏好模型：标签分值 + 组合宽度，数据落在 SessionState 里。
///
/// `apply_*` 是纯状态变换（便于引擎把一次反馈合并成一次 checkpoint）；
/// `record_*` 在锁内执行变换并原子落盘。
#[derive(Clone)]
pub struct PreferenceModel {
    session: Arc<SessionState>,
    max_width: usize,
}

impl PreferenceModel {
    pub fn new(session: Arc<SessionState>, max_width: usize) -> Self {
        Self { session, max_width }
    }

    pub fn max_width(&self) -> usize {
        self.max_width
    }

    pub fn ranked_tags(&self) -> Vec<Tag> {
        self.session.read(|s| s.tag_scores.ranked_tags())
    }

    pub fn current_width(&self) -> usize {
        self.session.read(|s| s.width)
    }

    pub fn ranking(&self) -> Ranking {
        self.session.read(|s| Ranking {
            tags: s.tag_scores.ranked_tags(),
            width: s.width,
        })
    }

    pub fn candidate_combinations(&self) -> Combinations {
        self.ranking().combinations()
    }

    pub fn record_like(&self, tags: &BTreeSet<Tag>) -> Result<usize, StateError> {
        self.session.update(|s| self.apply_like(s, tags))
    }

    pub fn record_dislike(
        &self,
        combination: &[Tag],
        item_tags: &BTreeSet<Tag>,
        dislike_streak: u32,
    ) -> Result<(), StateError> {
        self.session
            .update(|s| Self::apply_dislike(s, combination, item_tags, dislike_streak))
    }

    pub fn shrink_width(&self) -> Result<usize, StateError> {
        self.session.update(Self::apply_shrink)
    }

    /// 每个标签 +1，宽度 +1（不超过 max_width）。返回新宽度。
    pub fn apply_like(&self, state: &mut PersistedState, tags: &BTreeSet<Tag>) -> usize {
        for tag in tags {
            state.tag_scores.adjust(tag, 1.0);
        }
        if state.width < self.max_width {
            state.width += 1;
        }
        state.width
    }

    /// 组合标签按连续点踩次数加速衰减，条目标签固定衰减 0.1
    pub fn apply_dislike(
        state: &mut PersistedState,
        combination: &[Tag],
        item_tags: &BTreeSet<Tag>,
        dislike_streak: u32,
    ) {
        let streak_decay =
            STREAK_DECAY_FACTOR * f64::from(dislike_streak).powf(STREAK_DECAY_EXPONENT);
        for tag in combination {
            state.tag_scores.adjust(tag, -streak_decay);
        }
        for tag in item_tags {
            state.tag_scores.adjust(tag, -ITEM_TAG_DECAY);
        }
    }

    pub fn apply_shrink(state: &mut PersistedState) -> usize {
        state.width = state.width.saturating_sub(1);
        state.width
    }
}
