//! IPC 传输端点
//!
//! 每个客户端独占一个工作线程。对端通信原语（[`PeerLink`]）在工作线程上创建，
//! 也只在工作线程上使用；其他线程通过命令队列 + [`LinkWaker`] 与之交互。
//! 收到的回复交给 [`ReplySink`]（两种关联器各自实现）。

pub mod loopback;
#[cfg(windows)]
pub mod win32;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::codec::{encode_query, query_id};
use crate::config::ClientConfig;
use crate::error::{IpcError, Result};
use crate::future::ReadyFuture;
use crate::types::QueryRequest;

/// 当前平台的默认传输：Windows 上是隐藏窗口，其他平台上对端永远不存在
#[cfg(windows)]
pub type DefaultConnector = win32::WindowConnector;
#[cfg(not(windows))]
pub type DefaultConnector = loopback::LoopbackConnector;

#[cfg(windows)]
pub fn default_connector() -> DefaultConnector {
    win32::WindowConnector
}

#[cfg(not(windows))]
pub fn default_connector() -> DefaultConnector {
    loopback::LoopbackPeer::absent().connector()
}

/// 工作线程从通信原语收到的事件
#[derive(Debug)]
pub enum LinkEvent {
    /// 命令队列里有新命令
    Wake,
    /// 对端回复，缓冲区已复制为自有内存
    Reply { id: u32, data: Vec<u8> },
    /// 对端广播已就绪
    PeerReady,
    /// 通信原语已关闭
    Closed,
}

/// 工作线程上的对端通信原语，不要求跨线程
pub trait PeerLink {
    /// 本端地址，写入请求头供对端回复
    fn endpoint_id(&self) -> u32;

    /// 阻塞到下一个事件
    fn next_event(&mut self) -> LinkEvent;

    /// 按名字重新查找对端，返回是否找到
    fn find_peer(&mut self) -> bool;

    /// 缓存的对端是否仍然存在
    fn peer_alive(&mut self) -> bool;

    /// 投递一条查询请求
    fn deliver(&mut self, payload: &[u8]) -> Result<()>;

    /// 同步的 32 位命令往返
    fn probe(&mut self, command: u32, param: usize) -> Result<u32>;
}

/// 从任意线程唤醒工作线程
pub trait LinkWaker: Send + Sync {
    fn wake(&self) -> bool;
}

/// 在工作线程上打开通信原语
pub trait Connector: Send + 'static {
    type Link: PeerLink;

    fn open(self, config: &ClientConfig) -> Result<(Self::Link, Arc<dyn LinkWaker>)>;
}

/// 回复到达时的回调
pub trait ReplySink: Send + Sync {
    fn on_reply(&self, id: u32, data: Vec<u8>);

    /// 找不到对端、投递失败或对端拒绝，请求 `id` 不会有回复
    fn on_undelivered(&self, _id: u32) {}

    /// 工作线程退出前调用，未完成的等待者应被放弃
    fn on_shutdown(&self);
}

enum Command {
    Send(Vec<u8>),
    Probe {
        command: u32,
        param: usize,
        reply: mpsc::SyncSender<Result<u32>>,
    },
    IsPresent(mpsc::SyncSender<bool>),
    WatchPeer(oneshot::Sender<bool>),
    Shutdown,
}

/// 可克隆的命令入口，工作线程退出后所有调用返回 [`IpcError::TransportClosed`]
#[derive(Clone)]
pub struct TransportHandle {
    commands: mpsc::Sender<Command>,
    waker: Arc<dyn LinkWaker>,
}

impl TransportHandle {
    fn submit(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| IpcError::TransportClosed)?;
        if self.waker.wake() {
            Ok(())
        } else {
            Err(IpcError::TransportClosed)
        }
    }

    /// 阻塞的 32 位命令往返，只用于能力查询
    pub fn probe_dword(&self, command: u32, param: usize) -> Result<u32> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.submit(Command::Probe {
            command,
            param,
            reply: tx,
        })?;
        rx.recv().map_err(|_| IpcError::TransportClosed)?
    }
}

pub struct Transport {
    handle: TransportHandle,
    endpoint_id: u32,
    worker: Option<JoinHandle<()>>,
}

impl Transport {
    /// 启动工作线程并等待通信原语就绪
    pub fn spawn<C: Connector>(
        connector: C,
        sink: Arc<dyn ReplySink>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let worker_config = config.clone();

        let handle = std::thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || {
                let (link, waker) = match connector.open(&worker_config) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok((waker, link.endpoint_id())));
                Worker {
                    link,
                    commands: cmd_rx,
                    sink,
                    watchers: Vec::new(),
                    trace_protocol: worker_config.trace_protocol,
                }
                .run();
            })
            .map_err(|e| IpcError::Window(format!("创建工作线程失败: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok((waker, endpoint_id))) => {
                debug!(endpoint_id, "IPC 工作线程已就绪");
                Ok(Self {
                    handle: TransportHandle {
                        commands: cmd_tx,
                        waker,
                    },
                    endpoint_id,
                    worker: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(IpcError::TransportClosed)
            }
        }
    }

    pub fn endpoint_id(&self) -> u32 {
        self.endpoint_id
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.handle.submit(command)
    }

    /// 交给工作线程发送，入队后立即返回
    pub fn send(&self, payload: Vec<u8>) -> Result<()> {
        self.submit(Command::Send(payload))
    }

    pub fn send_query(&self, request: &QueryRequest) -> Result<()> {
        self.send(encode_query(request, self.endpoint_id))
    }

    /// 对端是否存在（不等待对端出现）
    pub fn is_peer_present(&self) -> Result<bool> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.submit(Command::IsPresent(tx))?;
        rx.recv().map_err(|_| IpcError::TransportClosed)
    }

    /// 对端已存在时立即完成，否则等待对端的就绪广播
    pub fn wait_for_peer(&self) -> ReadyFuture {
        let (tx, fut) = ReadyFuture::channel();
        // 失败时 tx 随命令一起被丢弃，future 得到 false
        let _ = self.submit(Command::WatchPeer(tx));
        fut
    }

    pub fn probe_dword(&self, command: u32, param: usize) -> Result<u32> {
        self.handle.probe_dword(command, param)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.submit(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("IPC 工作线程异常退出");
            }
        }
    }
}

struct Worker<L: PeerLink> {
    link: L,
    commands: mpsc::Receiver<Command>,
    sink: Arc<dyn ReplySink>,
    watchers: Vec<oneshot::Sender<bool>>,
    trace_protocol: bool,
}

impl<L: PeerLink> Worker<L> {
    fn run(mut self) {
        loop {
            match self.link.next_event() {
                LinkEvent::Wake => {
                    if !self.drain_commands() {
                        break;
                    }
                }
                LinkEvent::Reply { id, data } => {
                    if self.trace_protocol {
                        debug!(id, len = data.len(), "收到回复");
                    } else {
                        trace!(id, len = data.len(), "收到回复");
                    }
                    self.sink.on_reply(id, data);
                }
                LinkEvent::PeerReady => {
                    let present = self.link.find_peer();
                    debug!(present, "对端广播就绪");
                    if present {
                        for watcher in self.watchers.drain(..) {
                            let _ = watcher.send(true);
                        }
                    }
                }
                LinkEvent::Closed => break,
            }
        }
        debug!("IPC 工作线程退出");
        self.sink.on_shutdown();
    }

    /// 返回 false 表示收到关闭命令
    fn drain_commands(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Send(payload) => self.send(&payload),
                Command::Probe {
                    command,
                    param,
                    reply,
                } => {
                    let result = if self.ensure_peer() {
                        self.link.probe(command, param)
                    } else {
                        Err(IpcError::PeerUnavailable)
                    };
                    let _ = reply.send(result);
                }
                Command::IsPresent(reply) => {
                    let present = self.ensure_peer();
                    let _ = reply.send(present);
                }
                Command::WatchPeer(watcher) => {
                    if self.ensure_peer() {
                        let _ = watcher.send(true);
                    } else {
                        self.watchers.push(watcher);
                    }
                }
                Command::Shutdown => return false,
            }
        }
        true
    }

    /// 缓存失效时按名字重新查找
    fn ensure_peer(&mut self) -> bool {
        self.link.peer_alive() || self.link.find_peer()
    }

    fn send(&mut self, payload: &[u8]) {
        let id = match query_id(payload) {
            Ok(id) => id,
            Err(e) => {
                warn!("请求头无效，丢弃: {}", e);
                return;
            }
        };
        if !self.ensure_peer() {
            warn!(id, len = payload.len(), "找不到 Everything IPC 窗口，请求被丢弃");
            self.sink.on_undelivered(id);
            return;
        }
        if self.trace_protocol {
            debug!(len = payload.len(), "发送查询");
        } else {
            trace!(len = payload.len(), "发送查询");
        }
        if let Err(e) = self.link.deliver(payload) {
            warn!(id, "发送查询失败: {}", e);
            self.sink.on_undelivered(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::loopback::LoopbackPeer;
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        replies: Mutex<Vec<(u32, Vec<u8>)>>,
        undelivered: Mutex<Vec<u32>>,
        shutdown: Mutex<bool>,
    }

    impl ReplySink for Recorder {
        fn on_reply(&self, id: u32, data: Vec<u8>) {
            self.replies.lock().push((id, data));
        }

        fn on_undelivered(&self, id: u32) {
            self.undelivered.lock().push(id);
        }

        fn on_shutdown(&self) {
            *self.shutdown.lock() = true;
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_send_reaches_peer_and_reply_reaches_sink() {
        let peer = LoopbackPeer::new();
        peer.respond_with(|req| Some(req.search.clone().into_bytes()));
        let sink = Arc::new(Recorder::default());
        let transport =
            Transport::spawn(peer.connector(), sink.clone(), &ClientConfig::default()).unwrap();

        transport
            .send_query(&QueryRequest::new("abc").id(5))
            .unwrap();
        assert!(wait_until(|| !sink.replies.lock().is_empty()));
        assert_eq!(sink.replies.lock()[0], (5, b"abc".to_vec()));

        let received = peer.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].search, "abc");
    }

    #[test]
    fn test_drop_joins_worker_and_notifies_sink() {
        let peer = LoopbackPeer::new();
        let sink = Arc::new(Recorder::default());
        let transport =
            Transport::spawn(peer.connector(), sink.clone(), &ClientConfig::default()).unwrap();
        drop(transport);
        assert!(*sink.shutdown.lock());
    }

    #[test]
    fn test_send_without_peer_is_dropped() {
        let peer = LoopbackPeer::absent();
        let sink = Arc::new(Recorder::default());
        let transport =
            Transport::spawn(peer.connector(), sink.clone(), &ClientConfig::default()).unwrap();
        transport
            .send_query(&QueryRequest::new("lost").id(3))
            .unwrap();
        assert!(!transport.is_peer_present().unwrap());
        assert!(peer.received().is_empty());
        assert!(sink.replies.lock().is_empty());
        assert_eq!(*sink.undelivered.lock(), vec![3]);
    }

    #[test]
    fn test_rejected_send_is_reported_undelivered() {
        let peer = LoopbackPeer::new();
        peer.reject_queries();
        let sink = Arc::new(Recorder::default());
        let transport =
            Transport::spawn(peer.connector(), sink.clone(), &ClientConfig::default()).unwrap();

        transport
            .send_query(&QueryRequest::new("refused").id(12))
            .unwrap();
        assert!(wait_until(|| !sink.undelivered.lock().is_empty()));
        assert_eq!(*sink.undelivered.lock(), vec![12]);
        assert_eq!(peer.received().len(), 1);
        assert!(sink.replies.lock().is_empty());
    }

    #[test]
    fn test_probe_and_presence() {
        let peer = LoopbackPeer::new();
        peer.set_dword(401, 0, 1);
        let sink = Arc::new(Recorder::default());
        let transport =
            Transport::spawn(peer.connector(), sink, &ClientConfig::default()).unwrap();
        assert!(transport.is_peer_present().unwrap());
        assert_eq!(transport.probe_dword(401, 0).unwrap(), 1);
        assert_eq!(transport.probe_dword(0, 0).unwrap(), 0);

        peer.set_present(false);
        assert!(!transport.is_peer_present().unwrap());
        assert_eq!(
            transport.probe_dword(401, 0),
            Err(IpcError::PeerUnavailable)
        );
    }

    #[test]
    fn test_wait_for_peer_resolves_on_ready_broadcast() {
        let peer = LoopbackPeer::absent();
        let sink = Arc::new(Recorder::default());
        let transport =
            Transport::spawn(peer.connector(), sink, &ClientConfig::default()).unwrap();

        let fut = transport.wait_for_peer();
        assert_eq!(fut.wait_timeout(Duration::from_millis(30)), None);

        let fut = transport.wait_for_peer();
        peer.announce_ready();
        assert_eq!(fut.wait_timeout(Duration::from_secs(2)), Some(true));

        // 已存在时立即完成
        assert!(transport.wait_for_peer().wait());
    }

    #[test]
    fn test_wait_for_peer_false_on_teardown() {
        let peer = LoopbackPeer::absent();
        let sink = Arc::new(Recorder::default());
        let transport =
            Transport::spawn(peer.connector(), sink, &ClientConfig::default()).unwrap();
        let fut = transport.wait_for_peer();
        drop(transport);
        assert!(!fut.wait());
    }
}
