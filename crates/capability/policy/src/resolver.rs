use crate::source::PolicySource;
use crate::table::{BOOTSTRAP_POLICY_FILE, PolicyTable};
use crate::PolicyError;
use arc_swap::ArcSwap;
use domain::DevicePolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 策略解析器
///
/// 读路径无锁：`resolve` 只做一次原子加载。重载在后台构建整张新表后
/// 原子替换，读者看到的要么是旧表，要么是新表。
pub struct PolicyResolver {
    table: ArcSwap<PolicyTable>,
    source: Arc<dyn PolicySource>,
}

impl PolicyResolver {
    /// 使用给定表创建（不读来源）。
    pub fn with_table(source: Arc<dyn PolicySource>, table: PolicyTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
            source,
        }
    }

    /// 启动时加载。来源缺失时写入初始文件；任何失败都回落到内置默认表。
    pub async fn bootstrap(source: Arc<dyn PolicySource>) -> Self {
        let resolver = Self::with_table(source, PolicyTable::builtin());
        match resolver.source.load().await {
            Ok(Some(contents)) => resolver.install(&contents),
            Ok(None) => {
                info!(
                    target: "wavy.policy",
                    source = %resolver.source.describe(),
                    "policy_source_missing_bootstrapping"
                );
                if let Err(err) = resolver.source.persist(BOOTSTRAP_POLICY_FILE).await {
                    warn!(target: "wavy.policy", error = %err, "policy_bootstrap_persist_failed");
                }
                resolver.install(BOOTSTRAP_POLICY_FILE);
            }
            Err(err) => {
                warn!(target: "wavy.policy", error = %err, "policy_source_unavailable_using_builtin");
            }
        }
        resolver
    }

    /// 永不失败。
    pub fn resolve(&self, device_id: &str) -> DevicePolicy {
        self.table.load().resolve(device_id).clone()
    }

    pub fn is_override(&self, device_id: &str) -> bool {
        self.table.load().has_override(device_id)
    }

    /// 当前表的快照。
    pub fn snapshot(&self) -> Arc<PolicyTable> {
        self.table.load_full()
    }

    /// 从来源重载。失败时保留上一张可用的表。
    pub async fn reload(&self) -> Result<(), PolicyError> {
        match self.source.load().await? {
            Some(contents) => {
                self.install(&contents);
                Ok(())
            }
            None => Err(PolicyError::SourceUnavailable(format!(
                "{} not found",
                self.source.describe()
            ))),
        }
    }

    fn install(&self, contents: &str) {
        let (table, stats) = PolicyTable::parse(contents);
        info!(
            target: "wavy.policy",
            records = stats.records,
            skipped = stats.skipped,
            default_from_source = stats.default_set,
            overrides = table.overrides.len(),
            batch_size = table.default_policy.batch_size,
            transform = %table.default_policy.transform,
            destination = %table.default_policy.destination,
            "policy_table_installed"
        );
        self.table.store(Arc::new(table));
    }

    /// 周期性重载，直到取消。`on_result` 用于计数。
    pub async fn run_reload_loop<F>(&self, every: Duration, cancel: CancellationToken, on_result: F)
    where
        F: Fn(&Result<(), PolicyError>) + Send + Sync,
    {
        let mut ticker = tokio::time::interval(every);
        // 第一次 tick 立即完成，启动时已加载过
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(target: "wavy.policy", "policy_reload_stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let result = self.reload().await;
                    if let Err(err) = &result {
                        warn!(target: "wavy.policy", error = %err, "policy_reload_failed_keeping_last");
                    }
                    on_result(&result);
                }
            }
        }
    }
}
