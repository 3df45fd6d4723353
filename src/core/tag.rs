use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 标签：不透明字符串
pub type Tag = String;

/// 远端条目 ID（远端内唯一）
pub type ItemId = u64;

/// 远端检索结果（抓取后不可变）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub tags: BTreeSet<Tag>,
    pub preview_url: String,
    pub download_url: String,
}

/// 一次检索所用的标签组合：排名列表上长度为 width 的连续窗口。
///
/// 空组合表示“不过滤”，即检索未过滤的 feed。
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagCombination(Vec<Tag>);

impl TagCombination {
    pub fn new(tags: Vec<Tag>) -> Self {
        Self(tags)
    }

    pub fn unfiltered() -> Self {
        Self(Vec::new())
    }

    pub fn tags(&self) -> &[Tag] {
        &self.0
    }

    pub fn width(&self) -> usize {
        self.0.len()
    }

    pub fn is_unfiltered(&self) -> bool {
        self.0.is_empty()
    }

    /// 组合内标签必须互不相同
    pub fn is_well_formed(&self) -> bool {
        let distinct: BTreeSet<&Tag> = self.0.iter().collect();
        distinct.len() == self.0.len()
    }
}

impl fmt::Display for TagCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(unfiltered)");
        }
        write!(f, "({})", self.0.join(", "))
    }
}
