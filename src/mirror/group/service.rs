//! 群镜像缓存：TTL 全量重建 + 事件增量维护
//!
//! 本地群列表有两条更新路径：到期（或首次使用）时向上游整体重拉，
//! 平时靠群信息事件做增量。增量依赖成员版本栅栏，版本断档就放弃
//! 增量改走整体重拉，绝不把对不上号的差量硬套上去。

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::mirror::ephemeral::{setting_from_group, EphemeralSyncer, SettingSource};
use crate::mirror::events::GroupInfoEvent;
use crate::mirror::group::dao::GroupStore;
use crate::mirror::group::models::GroupSnapshot;
use crate::mirror::group::participants::update_group_info;
use crate::mirror::types::{Page, Sort, VersionConflict};

/// 整体刷新间隔
const REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// 全量拉取群列表的上游接口
#[async_trait]
pub trait GroupFetcher: Send + Sync {
    async fn fetch_joined_groups(&self) -> Result<Vec<GroupSnapshot>>;
}

struct CacheState {
    last_refreshed: Option<Instant>,
}

pub struct GroupCache {
    store: Arc<GroupStore>,
    ephemeral: Arc<EphemeralSyncer>,
    fetcher: Arc<dyn GroupFetcher>,
    state: Mutex<CacheState>,
    refresh_interval: Duration,
}

impl GroupCache {
    pub fn new(
        store: Arc<GroupStore>,
        ephemeral: Arc<EphemeralSyncer>,
        fetcher: Arc<dyn GroupFetcher>,
    ) -> Self {
        Self {
            store,
            ephemeral,
            fetcher,
            state: Mutex::new(CacheState {
                last_refreshed: None,
            }),
            refresh_interval: REFRESH_INTERVAL,
        }
    }

    /// 到期（或从未刷新过）时整体重拉；返回本次是否刷新了
    async fn refresh_if_needed(&self, state: &mut CacheState) -> Result<bool> {
        let due = match state.last_refreshed {
            None => true,
            Some(t) => t.elapsed() >= self.refresh_interval,
        };
        if !due {
            return Ok(false);
        }
        self.refresh_unlocked(state).await?;
        Ok(true)
    }

    /// 全量刷新：拉取成功才清空重建，单个群写失败不拖累其他群
    async fn refresh_unlocked(&self, state: &mut CacheState) -> Result<()> {
        let groups = self
            .fetcher
            .fetch_joined_groups()
            .await
            .context("拉取群列表失败")?;
        self.store.delete_all().await?;
        for group in &groups {
            if let Err(e) = self.write_group_unlocked(group).await {
                error!("[GroupSync] ❌ 写入群 {} 失败: {:?}", group.id, e);
            }
        }
        state.last_refreshed = Some(Instant::now());
        info!("[GroupSync] 🔄 群列表整体刷新完成，共 {} 个群", groups.len());
        Ok(())
    }

    /// 落一个群快照，顺手同步它携带的阅后即焚设置（设置失败不拦群）
    async fn write_group_unlocked(&self, group: &GroupSnapshot) -> Result<()> {
        if let Err(e) = self
            .ephemeral
            .apply(setting_from_group(group), SettingSource::GroupMetadata)
            .await
        {
            warn!(
                "[GroupSync] ⚠️ 同步群 {} 的阅后即焚设置失败: {:?}",
                group.id, e
            );
        }
        self.store.upsert(group).await
    }

    /// 不看缓存年龄，立刻整体重拉一次
    pub async fn force_refresh(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.refresh_unlocked(&mut state).await
    }

    /// 新加入的群：整个快照直接入库
    pub async fn upsert_one(&self, group: &GroupSnapshot) -> Result<()> {
        let mut state = self.state.lock().await;
        self.refresh_if_needed(&mut state).await?;
        self.write_group_unlocked(group).await?;
        info!(
            "[GroupSync] ✅ 群 {} 快照入库 (成员 {} 人)",
            group.id,
            group.participants.len()
        );
        Ok(())
    }

    /// 套用一条群信息增量
    ///
    /// 本次调用恰好触发了整体刷新的话，快照已是上游最新，增量直接
    /// 跳过。版本对不上时丢弃差量、整体重拉一次，不重试差量本身。
    pub async fn apply_diff(&self, update: &GroupInfoEvent) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.refresh_if_needed(&mut state).await? {
            info!(
                "[GroupSync] 群列表刚整体刷新，跳过本次增量 (群 {})",
                update.group_id
            );
            return Ok(());
        }

        let Some(mut group) = self.store.get(&update.group_id).await? else {
            bail!("群 {} 不在本地镜像中", update.group_id);
        };
        if let Err(e) = update_group_info(&mut group, update) {
            if e.downcast_ref::<VersionConflict>().is_some() {
                warn!(
                    "[GroupSync] ⚠️ 群 {} 成员版本断档，丢弃差量整体重拉: {}",
                    update.group_id, e
                );
                return self.refresh_unlocked(&mut state).await;
            }
            return Err(e);
        }

        if update.ephemeral.is_some() {
            if let Err(e) = self
                .ephemeral
                .apply(setting_from_group(&group), SettingSource::GroupMetadata)
                .await
            {
                warn!(
                    "[GroupSync] ⚠️ 同步群 {} 的阅后即焚设置失败: {:?}",
                    update.group_id, e
                );
            }
        }
        self.store.upsert(&group).await?;
        Ok(())
    }

    /// 离开/解散群：按当前时间清设置，再删群
    pub async fn delete(&self, group_id: &str) -> Result<()> {
        let _guard = self.state.lock().await;
        let now = chrono::Utc::now().timestamp();
        if let Err(e) = self.ephemeral.delete_before(group_id, now).await {
            warn!(
                "[GroupSync] ⚠️ 清理群 {} 的阅后即焚设置失败: {:?}",
                group_id, e
            );
        }
        self.store.delete(group_id).await?;
        info!("[GroupSync] 🗑️ 群 {} 已从镜像移除", group_id);
        Ok(())
    }

    pub async fn get(&self, group_id: &str) -> Result<Option<GroupSnapshot>> {
        let mut state = self.state.lock().await;
        self.refresh_if_needed(&mut state).await?;
        self.store.get(group_id).await
    }

    pub async fn list(&self, sort: Option<Sort>, page: Page) -> Result<Vec<GroupSnapshot>> {
        let mut state = self.state.lock().await;
        self.refresh_if_needed(&mut state).await?;
        self.store.list(sort, page).await
    }
}
