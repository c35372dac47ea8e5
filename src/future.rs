//! 调用方拿到的完成句柄
//!
//! 两种 future 都基于 tokio `oneshot`：既可以在异步代码里 `.await`，
//! 也可以在普通线程上用 `wait()` / `wait_timeout()` 阻塞等待（不要在 tokio 运行时内部调用）。

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::warn;

use crate::codec::ResultSet;
use crate::error::{IpcError, Result};

pub(crate) type QuerySender = oneshot::Sender<Result<ResultSet>>;

/// 在当前线程上带计时器地阻塞等待，超时返回 `Ok(None)`
fn block_on_timeout<F: Future>(
    fut: F,
    timeout: Duration,
) -> std::io::Result<Option<F::Output>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    Ok(runtime.block_on(async { tokio::time::timeout(timeout, fut).await.ok() }))
}

/// 一次查询的结果
///
/// 引擎销毁时仍未完成的查询会得到 [`IpcError::Abandoned`]。
#[derive(Debug)]
pub struct QueryFuture {
    rx: oneshot::Receiver<Result<ResultSet>>,
}

impl QueryFuture {
    pub(crate) fn channel() -> (QuerySender, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// 立即以给定结果完成
    pub(crate) fn ready(result: Result<ResultSet>) -> Self {
        let (tx, fut) = Self::channel();
        let _ = tx.send(result);
        fut
    }

    /// 阻塞等待结果
    pub fn wait(self) -> Result<ResultSet> {
        self.rx.blocking_recv().unwrap_or(Err(IpcError::Abandoned))
    }

    /// 带超时的阻塞等待；超时后句柄被丢弃
    pub fn wait_timeout(self, timeout: Duration) -> Result<ResultSet> {
        match block_on_timeout(self, timeout) {
            Ok(Some(result)) => result,
            Ok(None) => Err(IpcError::Timeout),
            Err(e) => Err(IpcError::Runtime(e.to_string())),
        }
    }
}

impl Future for QueryFuture {
    type Output = Result<ResultSet>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(IpcError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// 条件成立时完成的布尔 future（IPC 可用、数据库已加载）
///
/// 引擎在条件成立前销毁时得到 `false`。
#[derive(Debug)]
pub struct ReadyFuture {
    rx: oneshot::Receiver<bool>,
}

impl ReadyFuture {
    pub(crate) fn channel() -> (oneshot::Sender<bool>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    pub(crate) fn ready(value: bool) -> Self {
        let (tx, fut) = Self::channel();
        let _ = tx.send(value);
        fut
    }

    pub fn wait(self) -> bool {
        self.rx.blocking_recv().unwrap_or(false)
    }

    /// 超时返回 `None`
    pub fn wait_timeout(self, timeout: Duration) -> Option<bool> {
        match block_on_timeout(self, timeout) {
            Ok(value) => value,
            Err(e) => {
                warn!("创建计时运行时失败: {}", e);
                None
            }
        }
    }
}

impl Future for ReadyFuture {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|r| r.unwrap_or(false))
    }
}
