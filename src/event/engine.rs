use std::sync::Arc;
use std::time::Duration;

use crate::core::{Item, PreferenceModel, TagCombination};
use crate::download::DownloadQueue;
use crate::error::DiscoveryError;
use crate::event::feedback::{FeedbackSource, Verdict};
use crate::index::SearchCache;
use crate::stats::SessionStats;
use crate::storage::{LocalFileIndex, SessionState};

/// 一轮选择（按当前排名遍历全部候选组合）的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// 反馈改变了排名或宽度：放弃剩余组合，从头重新选择
    RankingChanged,
    /// 所有候选组合都已走完
    Completed { presented: usize, likes: usize },
    /// 有组合因检索暂时失败而中断，且本轮没有喜欢：不能据此收缩宽度
    Interrupted { holes: usize },
    /// 远端拦截，需人工介入后重来
    Blocked(String),
}

/// 发现引擎：选组合 → 拉取并过滤 → 展示 → 应用反馈。
///
/// 没有终止状态，`run` 只会因为反馈源或持久化出错而返回。
pub struct DiscoveryEngine {
    session: Arc<SessionState>,
    preferences: PreferenceModel,
    cache: SearchCache,
    queue: DownloadQueue,
    feedback: Arc<dyn FeedbackSource>,
    local_files: LocalFileIndex,
    stats: Arc<SessionStats>,
    dislike_streak: u32,
    idle_backoff: Duration,
}

impl DiscoveryEngine {
    pub fn new(
        session: Arc<SessionState>,
        preferences: PreferenceModel,
        cache: SearchCache,
        queue: DownloadQueue,
        feedback: Arc<dyn FeedbackSource>,
        local_files: LocalFileIndex,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            session,
            preferences,
            cache,
            queue,
            feedback,
            local_files,
            stats,
            dislike_streak: 0,
            idle_backoff: Duration::from_secs(30),
        }
    }

    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    pub fn dislike_streak(&self) -> u32 {
        self.dislike_streak
    }

    pub fn local_files(&self) -> &LocalFileIndex {
        &self.local_files
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        tracing::info!(
            "Discovery started: width {}, {} tags, {} local files",
            self.preferences.current_width(),
            self.preferences.ranked_tags().len(),
            self.local_files.len()
        );
        loop {
            let outcome = self.run_pass().await?;
            self.handle_outcome(outcome).await?;
        }
    }

    /// 按进入时的排名快照走一轮；每次反馈后重新比较排名
    pub async fn run_pass(&mut self) -> anyhow::Result<PassOutcome> {
        let ranking = self.preferences.ranking();
        tracing::debug!("Pass start: width {}, {} ranked tags", ranking.width, ranking.tags.len());

        let mut presented = 0usize;
        let mut likes = 0usize;
        let mut holes = 0usize;

        for combination in ranking.combinations() {
            tracing::debug!("Trying {}", combination);
            let mut stream = self.cache.stream(combination.clone());

            loop {
                let item = match stream.next().await {
                    Ok(Some(item)) => item,
                    Ok(None) => {
                        if stream.hit_hole() {
                            holes += 1;
                        }
                        break;
                    }
                    Err(DiscoveryError::Blocked(reason)) => return Ok(PassOutcome::Blocked(reason)),
                    Err(DiscoveryError::State(e)) => return Err(e.into()),
                };

                if self.is_filtered(&item) {
                    SessionStats::bump(&self.stats.filtered);
                    continue;
                }

                presented += 1;
                SessionStats::bump(&self.stats.presented);
                match self.feedback.present(&item).await? {
                    Verdict::Like => {
                        likes += 1;
                        self.on_like(&item).await?;
                    }
                    Verdict::Dislike => self.on_dislike(&combination, &item).await?,
                }

                if self.preferences.ranking() != ranking {
                    tracing::debug!("Ranking changed while streaming {}, reselecting", combination);
                    return Ok(PassOutcome::RankingChanged);
                }
            }
        }

        if holes > 0 && likes == 0 {
            return Ok(PassOutcome::Interrupted { holes });
        }
        Ok(PassOutcome::Completed { presented, likes })
    }

    pub async fn handle_outcome(&mut self, outcome: PassOutcome) -> anyhow::Result<()> {
        match outcome {
            PassOutcome::RankingChanged => {
                SessionStats::bump(&self.stats.restarts);
            }
            PassOutcome::Blocked(reason) => {
                tracing::error!("Search blocked: {}", reason);
                self.feedback.intervention(&reason).await?;
                SessionStats::bump(&self.stats.restarts);
                tracing::info!("Operator acknowledged, restarting selection");
            }
            PassOutcome::Interrupted { holes } => {
                tracing::warn!(
                    "{} combinations hit search failures, keeping width and retrying in {:?}",
                    holes,
                    self.idle_backoff
                );
                tokio::time::sleep(self.idle_backoff).await;
            }
            PassOutcome::Completed { likes, .. } if likes > 0 => {}
            PassOutcome::Completed { presented, .. } => {
                let width = self.preferences.current_width();
                if width > 0 {
                    let width = self.preferences.shrink_width()?;
                    SessionStats::bump(&self.stats.width_shrinks);
                    tracing::info!("No likes this pass, width shrunk to {}", width);
                } else if presented == 0 {
                    tracing::info!(
                        "Unfiltered feed has nothing new, sleeping {:?}",
                        self.idle_backoff
                    );
                    tokio::time::sleep(self.idle_backoff).await;
                }
            }
        }
        Ok(())
    }

    fn is_filtered(&self, item: &Item) -> bool {
        if self.local_files.contains(item.id) {
            tracing::debug!("Skipping {}: already local", item.id);
            return true;
        }
        if self.session.read(|s| s.disliked_ids.contains(&item.id)) {
            tracing::debug!("Skipping {}: disliked", item.id);
            return true;
        }
        if item.download_url.is_empty() {
            tracing::debug!("Skipping {}: no download url", item.id);
            return true;
        }
        false
    }

    /// 分值 + 宽度 + 入队合并为一次 checkpoint
    async fn on_like(&mut self, item: &Item) -> anyhow::Result<()> {
        let preferences = self.preferences.clone();
        let tags = item.tags.clone();
        let url = item.download_url.clone();
        let width = self
            .session
            .update_blocking(move |s| {
                let width = preferences.apply_like(s, &tags);
                DownloadQueue::push(s, url);
                width
            })
            .await?;
        self.queue.notify_worker();
        self.local_files.insert(item.id);
        self.dislike_streak = 0;
        SessionStats::bump(&self.stats.likes);
        tracing::info!("Liked {} ({} tags), width now {}", item.id, item.tags.len(), width);
        Ok(())
    }

    async fn on_dislike(
        &mut self,
        combination: &TagCombination,
        item: &Item,
    ) -> anyhow::Result<()> {
        let streak = self.dislike_streak;
        let id = item.id;
        let combination_tags = combination.tags().to_vec();
        let item_tags = item.tags.clone();
        self.session
            .update_blocking(move |s| {
                s.disliked_ids.insert(id);
                PreferenceModel::apply_dislike(s, &combination_tags, &item_tags, streak);
            })
            .await?;
        self.dislike_streak += 1;
        SessionStats::bump(&self.stats.dislikes);
        tracing::debug!("Disliked {} under {}, streak {}", item.id, combination, self.dislike_streak);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RetryPolicy;
    use crate::error::SearchError;
    use crate::storage::{MemoryStateStore, PersistedState, StateStore};
    use crate::testkit::{item, items, ScriptedFeedback, ScriptedSearch};
    use std::sync::atomic::Ordering;

    struct Harness {
        engine: DiscoveryEngine,
        session: Arc<SessionState>,
        store: Arc<MemoryStateStore>,
        feedback: Arc<ScriptedFeedback>,
        stats: Arc<SessionStats>,
    }

    fn harness(
        initial: PersistedState,
        search: ScriptedSearch,
        feedback: ScriptedFeedback,
        local: &[u64],
    ) -> Harness {
        let store = Arc::new(MemoryStateStore::default());
        store.save_atomic(&initial).unwrap();
        let session = Arc::new(SessionState::open(store.clone(), 6).unwrap());
        let stats = Arc::new(SessionStats::default());
        let feedback = Arc::new(feedback);
        let cache = SearchCache::new(
            session.clone(),
            Arc::new(search),
            50,
            RetryPolicy::bounded(1, Duration::ZERO),
            stats.clone(),
        );
        let engine = DiscoveryEngine::new(
            session.clone(),
            PreferenceModel::new(session.clone(), 6),
            cache,
            DownloadQueue::new(session.clone()),
            feedback.clone(),
            local.iter().copied().collect(),
            stats.clone(),
        )
        .with_idle_backoff(Duration::ZERO);
        Harness {
            engine,
            session,
            store,
            feedback,
            stats,
        }
    }

    fn scored(scores: &[(&str, f64)], width: usize) -> PersistedState {
        let mut state = PersistedState {
            width,
            ..Default::default()
        };
        for (tag, score) in scores {
            state.tag_scores.adjust(tag, *score);
        }
        state
    }

    #[tokio::test]
    async fn never_presents_local_disliked_or_undownloadable_items() {
        let mut no_url = item(5, &[]);
        no_url.download_url.clear();
        let mut page = items(1..5, &[]);
        page.push(no_url);

        let mut initial = PersistedState::default();
        initial.disliked_ids.insert(2);
        let mut h = harness(
            initial,
            ScriptedSearch::default().page(&[], 0, page),
            ScriptedFeedback::new([], 10),
            &[1],
        );

        let outcome = h.engine.run_pass().await.unwrap();
        assert_eq!(
            outcome,
            PassOutcome::Completed {
                presented: 2,
                likes: 0
            }
        );
        assert_eq!(h.feedback.presented(), vec![3, 4]);
        assert_eq!(h.stats.filtered.load(Ordering::Relaxed), 3);

        let saved = h.store.load().unwrap().unwrap();
        assert!(saved.disliked_ids.contains(&3) && saved.disliked_ids.contains(&4));
        assert!(saved.cache[&TagCombination::unfiltered()].exhausted);
    }

    #[tokio::test]
    async fn like_grows_width_enqueues_and_abandons_stale_combination() {
        // a:5 b:3 c:1，宽度 2 → (a,b) 然后 (b,c)
        let initial = scored(&[("a", 5.0), ("b", 3.0), ("c", 1.0)], 2);
        let search = ScriptedSearch::default()
            .page(&["a", "b"], 0, vec![item(1, &["a", "d"]), item(2, &["a", "b"])])
            .page(&["b", "c"], 0, items(10..12, &["b", "c"]));
        let mut h = harness(initial, search, ScriptedFeedback::new([1], 10), &[]);

        let outcome = h.engine.run_pass().await.unwrap();
        assert_eq!(outcome, PassOutcome::RankingChanged);
        assert_eq!(h.feedback.presented(), vec![1]);

        let (a, d, width, queue) = h.session.read(|s| {
            (
                s.tag_scores.get("a"),
                s.tag_scores.get("d"),
                s.width,
                s.download_queue.clone(),
            )
        });
        assert_eq!(a, Some(6.0));
        assert_eq!(d, Some(1.0));
        assert_eq!(width, 3);
        assert_eq!(queue, vec![item(1, &[]).download_url]);
        assert!(h.engine.local_files().contains(1));

        let next: Vec<TagCombination> = h.engine.preferences.candidate_combinations().collect();
        assert_eq!(next[0].tags(), ["a", "b", "c"]);
        assert_eq!(next[1].tags(), ["b", "c", "d"]);

        // 同一次 checkpoint 同时包含分值、宽度与队列
        let saved = h.store.load().unwrap().unwrap();
        assert_eq!(saved.width, 3);
        assert_eq!(saved.download_queue.len(), 1);
    }

    #[tokio::test]
    async fn dislike_decay_scales_with_streak() {
        let initial = scored(&[("a", 5.0), ("b", 3.0)], 1);
        let search = ScriptedSearch::default().page(&["a"], 0, items(1..4, &[]));
        let mut h = harness(initial, search, ScriptedFeedback::new([], 10), &[]);

        let outcome = h.engine.run_pass().await.unwrap();
        assert_eq!(
            outcome,
            PassOutcome::Completed {
                presented: 3,
                likes: 0
            }
        );
        // 连续点踩 0,1,2 次：0 + 0.1 + 0.1 * 2^1.5
        let expected = 5.0 - 0.1 - 0.1 * 2f64.powf(1.5);
        let a = h.session.read(|s| s.tag_scores.get("a")).unwrap();
        assert!((a - expected).abs() < 1e-9);
        assert_eq!(h.engine.dislike_streak(), 3);
    }

    #[tokio::test]
    async fn like_resets_dislike_streak() {
        let initial = scored(&[("a", 5.0)], 1);
        let search = ScriptedSearch::default().page(&["a"], 0, items(1..3, &[]));
        let mut h = harness(initial, search, ScriptedFeedback::new([2], 10), &[]);

        h.engine.run_pass().await.unwrap();
        assert_eq!(h.feedback.presented(), vec![1, 2]);
        assert_eq!(h.engine.dislike_streak(), 0);
    }

    #[tokio::test]
    async fn fruitless_pass_shrinks_width_down_to_unfiltered() {
        let initial = scored(&[("a", 2.0), ("b", 1.0)], 2);
        let mut h = harness(initial, ScriptedSearch::default(), ScriptedFeedback::new([], 10), &[]);

        for expected in [1, 0, 0] {
            let outcome = h.engine.run_pass().await.unwrap();
            assert_eq!(
                outcome,
                PassOutcome::Completed {
                    presented: 0,
                    likes: 0
                }
            );
            h.engine.handle_outcome(outcome).await.unwrap();
            assert_eq!(h.engine.preferences.current_width(), expected);
        }
        assert_eq!(h.stats.width_shrinks.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn rejected_candidates_shrink_width() {
        let initial = scored(&[("a", 5.0)], 1);
        let search = ScriptedSearch::default().page(&["a"], 0, items(1..3, &[]));
        let mut h = harness(initial, search, ScriptedFeedback::new([], 10), &[]);

        let outcome = h.engine.run_pass().await.unwrap();
        assert_eq!(
            outcome,
            PassOutcome::Completed {
                presented: 2,
                likes: 0
            }
        );
        h.engine.handle_outcome(outcome).await.unwrap();
        assert_eq!(h.engine.preferences.current_width(), 0);
    }

    #[tokio::test]
    async fn search_outage_keeps_width() {
        let initial = scored(&[("a", 3.0), ("b", 2.0), ("c", 1.0)], 2);
        let search = ScriptedSearch::default()
            .respond(&["a", "b"], 0, vec![Err(SearchError::Timeout)])
            .respond(&["b", "c"], 0, vec![Err(SearchError::Timeout)]);
        let mut h = harness(initial, search, ScriptedFeedback::new([], 10), &[]);

        for _ in 0..3 {
            let outcome = h.engine.run_pass().await.unwrap();
            assert_eq!(outcome, PassOutcome::Interrupted { holes: 2 });
            h.engine.handle_outcome(outcome).await.unwrap();
            assert_eq!(h.engine.preferences.current_width(), 2);
        }
        assert_eq!(h.stats.width_shrinks.load(Ordering::Relaxed), 0);
        assert!(h.session.read(|s| s.cache.is_empty()));
    }

    #[tokio::test]
    async fn partial_outage_with_rejections_does_not_shrink() {
        let initial = scored(&[("a", 3.0), ("b", 2.0)], 1);
        let search = ScriptedSearch::default()
            .page(&["a"], 0, items(1..3, &[]))
            .respond(&["b"], 0, vec![Err(SearchError::Connection("reset".into()))]);
        let mut h = harness(initial, search, ScriptedFeedback::new([], 10), &[]);

        let outcome = h.engine.run_pass().await.unwrap();
        assert_eq!(outcome, PassOutcome::Interrupted { holes: 1 });
        h.engine.handle_outcome(outcome).await.unwrap();
        assert_eq!(h.engine.preferences.current_width(), 1);
    }

    #[tokio::test]
    async fn rejected_or_local_ids_stay_hidden_under_other_combinations() {
        let initial = scored(&[("a", 5.0), ("b", 3.0)], 1);
        let search = ScriptedSearch::default()
            .page(&["a"], 0, vec![item(7, &[])])
            .page(&["b"], 0, vec![item(7, &[]), item(9, &[]), item(8, &[])]);
        let mut h = harness(initial, search, ScriptedFeedback::new([], 10), &[9]);

        let outcome = h.engine.run_pass().await.unwrap();
        assert_eq!(
            outcome,
            PassOutcome::Completed {
                presented: 2,
                likes: 0
            }
        );
        assert_eq!(h.feedback.presented(), vec![7, 8]);
        // 7 与 9 在 ("b") 下仍是新条目，只是被过滤
        let b = h.session.read(|s| s.cache[&TagCombination::new(vec!["b".into()])].clone());
        assert!(b.seen.contains(&7) && b.seen.contains(&9));
    }

    #[tokio::test]
    async fn abandoned_short_page_is_not_marked_exhausted() {
        let initial = scored(&[("a", 5.0)], 1);
        let search = ScriptedSearch::default().page(&["a"], 0, items(1..4, &[]));
        let mut h = harness(initial, search, ScriptedFeedback::new([1], 10), &[]);

        let outcome = h.engine.run_pass().await.unwrap();
        assert_eq!(outcome, PassOutcome::RankingChanged);
        assert_eq!(h.feedback.presented(), vec![1]);

        let a = TagCombination::new(vec!["a".into()]);
        let entry = h.session.read(|s| s.cache[&a].clone());
        assert!(!entry.exhausted);
        assert_eq!(entry.seen.len(), 1);
    }

    #[tokio::test]
    async fn blocked_search_requests_intervention_then_retries() {
        let search = ScriptedSearch::default().respond(
            &[],
            0,
            vec![
                Err(SearchError::Blocked("captcha".into())),
                Ok(vec![item(7, &[])]),
            ],
        );
        let mut h = harness(
            PersistedState::default(),
            search,
            ScriptedFeedback::new([], 10),
            &[],
        );

        let outcome = h.engine.run_pass().await.unwrap();
        assert_eq!(outcome, PassOutcome::Blocked("captcha".into()));
        h.engine.handle_outcome(outcome).await.unwrap();
        assert_eq!(h.feedback.interventions(), vec!["captcha".to_string()]);

        h.engine.run_pass().await.unwrap();
        assert_eq!(h.feedback.presented(), vec![7]);
    }

    #[tokio::test]
    async fn run_returns_when_feedback_fails() {
        let search = ScriptedSearch::default().page(&[], 0, items(1..4, &[]));
        let mut h = harness(
            PersistedState::default(),
            search,
            ScriptedFeedback::new([], 1),
            &[],
        );
        assert!(h.engine.run().await.is_err());
        assert_eq!(h.feedback.presented(), vec![1]);
    }
}
