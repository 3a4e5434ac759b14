//! 时钟抽象：所有等待（退避、轮询、tick 间隔）都经由 Sleeper
//!
//! 生产环境使用 TokioSleeper；测试使用 RecordingSleeper 记录每次等待时长而不真正挂起。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// 可注入的等待实现，只挂起调用方自身的任务
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// 基于 tokio::time 的真实等待
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 记录型等待：不实际等待，只记下时长（让出一次调度，避免空转饿死其它任务）
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// 到目前为止记录的全部等待
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// 以秒表示的等待序列
    pub fn recorded_secs(&self) -> Vec<f64> {
        self.recorded().iter().map(Duration::as_secs_f64).collect()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
        tokio::task::yield_now().await;
    }
}
