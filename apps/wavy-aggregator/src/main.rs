//! WAVY 聚合器：接入传感器读数，按设备策略变换、分批，转发到存储服务。

mod ingest;
mod status;
mod tasks;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wavy_config::AppConfig;
use wavy_forward::{ForwardClient, ForwardConfig};
use wavy_normalize::{HttpPreprocessor, Normalizer};
use wavy_pipeline::{BatchEngine, BatchKeyMode, DeliveryPool, Pipeline};
use wavy_policy::{FilePolicySource, PolicyResolver};
use wavy_telemetry::{init_tracing, record_policy_reload, record_policy_reload_failure};

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    let cancel = CancellationToken::new();
    let mut background = Vec::new();

    // 设备策略：来源缺失时写入默认文件
    let policy_source = Arc::new(FilePolicySource::new(&config.policy_path));
    let policies = Arc::new(PolicyResolver::bootstrap(policy_source).await);

    // 投递 worker 池与存储转发客户端
    let forward = ForwardClient::new(ForwardConfig {
        port: config.storage_port,
        timeout: Duration::from_millis(config.delivery_timeout_ms),
        pacing: Duration::from_millis(config.delivery_pacing_ms),
    });
    let (queue, pool) = DeliveryPool::spawn(
        Arc::new(forward),
        config.delivery_workers,
        config.delivery_queue_capacity,
    );
    let mode = if config.batch_by_sensor_type {
        BatchKeyMode::DeviceAndSensorType
    } else {
        BatchKeyMode::Device
    };
    let pipeline = Pipeline::new(Arc::new(BatchEngine::new(mode)), queue);

    // 规范化器；配置了预处理服务时优先走远端变换
    let mut normalizer = Normalizer::default();
    if let Some(url) = config.preprocess_url.as_deref() {
        let preprocessor =
            HttpPreprocessor::new(url, Duration::from_millis(config.delivery_timeout_ms))?;
        info!("preprocessor: {}", url);
        normalizer = normalizer.with_preprocessor(Arc::new(preprocessor));
    }

    // 1. 策略定时重载
    {
        let policies = policies.clone();
        let cancel = cancel.clone();
        let every = Duration::from_secs(config.policy_reload_seconds);
        background.push(tokio::spawn(async move {
            policies
                .run_reload_loop(every, cancel, |result| match result {
                    Ok(()) => record_policy_reload(),
                    Err(_) => record_policy_reload_failure(),
                })
                .await;
        }));
    }

    // 2. 定时刷出与状态日志
    background.push(tokio::spawn(tasks::run_flush_timer(
        pipeline.clone(),
        policies.clone(),
        Duration::from_secs(config.flush_interval_seconds),
        cancel.clone(),
    )));
    background.push(tokio::spawn(tasks::run_status_log(
        STATUS_LOG_INTERVAL,
        cancel.clone(),
    )));

    // 3. 可选状态端点
    if let Some(addr) = config.http_addr.clone() {
        let state = status::StatusState {
            pipeline: pipeline.clone(),
            policies: policies.clone(),
        };
        let cancel = cancel.clone();
        background.push(tokio::spawn(async move {
            if let Err(err) = status::serve(&addr, state, cancel).await {
                warn!("status endpoint stopped: {}", err);
            }
        }));
    }

    // 4. 接入源
    let handler = Arc::new(ingest::AggregatorHandler::new(
        normalizer,
        policies.clone(),
        pipeline.clone(),
    ));
    let sources = ingest::build_sources(&config);
    if sources.is_empty() {
        return Err("no ingest source enabled".into());
    }
    let ingest_tasks = ingest::spawn_sources(sources, handler, cancel.clone());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("shutdown requested");
        }
        _ = cancel.cancelled() => {
            warn!("ingest source failed, shutting down");
        }
    }
    cancel.cancel();

    // 先停接入与定时器，再把剩余读数最后刷一次
    let stopped = tokio::time::timeout(ingest::SOURCE_STOP_TIMEOUT, async {
        for task in ingest_tasks.into_iter().chain(background) {
            let _ = task.await;
        }
    })
    .await;
    if stopped.is_err() {
        warn!("background tasks did not stop in time");
    }
    let summary = tasks::flush_once(&pipeline, &policies).await;
    info!(
        batches = summary.batches,
        readings = summary.readings,
        "final flush queued"
    );

    let drained = pool
        .shutdown(Duration::from_secs(config.shutdown_grace_seconds))
        .await;
    info!(drained, "shutdown complete");
    Ok(())
}
