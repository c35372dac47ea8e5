//! 进程内的模拟 Everything 对端
//!
//! 非 Windows 平台的默认传输（对端永远不存在），同时供测试驱动关联器：
//! 可以自动应答、挂起请求后乱序应答、设置探测命令的返回值、广播就绪。

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{Connector, LinkEvent, LinkWaker, PeerLink};
use crate::codec::decode_query;
use crate::config::ClientConfig;
use crate::error::{IpcError, Result};
use crate::types::QueryRequest;

type Handler = Box<dyn FnMut(&QueryRequest) -> Option<Vec<u8>> + Send>;

enum Responder {
    /// 收下请求但不应答
    Silent,
    /// 收到请求后立即调用处理函数应答
    Auto(Handler),
    /// 挂起，由测试通过 [`LoopbackPeer::take_held`] 取出后应答
    Hold,
    /// 收下请求后拒绝，和 Everything 的 `WM_COPYDATA` 返回 0 一样
    Reject,
}

struct Shared {
    present: bool,
    responder: Responder,
    dwords: HashMap<(u32, usize), u32>,
    clients: Vec<mpsc::Sender<LinkEvent>>,
    received: Vec<QueryRequest>,
    held: Vec<HeldQuery>,
    next_endpoint: u32,
}

/// 模拟对端，克隆后共享同一状态
#[derive(Clone)]
pub struct LoopbackPeer {
    shared: Arc<Mutex<Shared>>,
}

impl Default for LoopbackPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackPeer {
    /// 已存在、不应答的对端
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                present: true,
                responder: Responder::Silent,
                dwords: HashMap::new(),
                clients: Vec::new(),
                received: Vec::new(),
                held: Vec::new(),
                next_endpoint: 1,
            })),
        }
    }

    /// 尚未启动的对端
    pub fn absent() -> Self {
        let peer = Self::new();
        peer.shared.lock().present = false;
        peer
    }

    /// 处理函数返回 `Some(reply)` 时以请求 id 应答，返回 `None` 则不应答
    pub fn respond_with<F>(&self, handler: F)
    where
        F: FnMut(&QueryRequest) -> Option<Vec<u8>> + Send + 'static,
    {
        self.shared.lock().responder = Responder::Auto(Box::new(handler));
    }

    pub fn hold_replies(&self) {
        self.shared.lock().responder = Responder::Hold;
    }

    pub fn reject_queries(&self) {
        self.shared.lock().responder = Responder::Reject;
    }

    pub fn set_present(&self, present: bool) {
        self.shared.lock().present = present;
    }

    /// 对端启动并向所有客户端广播就绪
    pub fn announce_ready(&self) {
        let mut shared = self.shared.lock();
        shared.present = true;
        shared
            .clients
            .retain(|inbox| inbox.send(LinkEvent::PeerReady).is_ok());
    }

    /// 设置探测命令 `(command, param)` 的返回值，未设置的命令返回 0
    pub fn set_dword(&self, command: u32, param: usize, value: u32) {
        self.shared.lock().dwords.insert((command, param), value);
    }

    /// 取出所有挂起的请求
    pub fn take_held(&self) -> Vec<HeldQuery> {
        std::mem::take(&mut self.shared.lock().held)
    }

    /// 已收到的全部请求，按到达顺序
    pub fn received(&self) -> Vec<QueryRequest> {
        self.shared.lock().received.clone()
    }

    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector { peer: self.clone() }
    }
}

/// 挂起的请求
pub struct HeldQuery {
    pub request: QueryRequest,
    inbox: mpsc::Sender<LinkEvent>,
}

impl HeldQuery {
    /// 以原请求 id 应答
    pub fn reply(self, data: Vec<u8>) {
        let id = self.request.id;
        self.reply_with_id(id, data);
    }

    /// 以任意 id 应答，用于模拟过期或重复的回复
    pub fn reply_with_id(&self, id: u32, data: Vec<u8>) {
        let _ = self.inbox.send(LinkEvent::Reply { id, data });
    }
}

pub struct LoopbackConnector {
    peer: LoopbackPeer,
}

impl Connector for LoopbackConnector {
    type Link = LoopbackLink;

    fn open(self, _config: &ClientConfig) -> Result<(Self::Link, Arc<dyn LinkWaker>)> {
        let (tx, rx) = mpsc::channel();
        let endpoint = {
            let mut shared = self.peer.shared.lock();
            shared.clients.push(tx.clone());
            let endpoint = shared.next_endpoint;
            shared.next_endpoint = shared.next_endpoint.wrapping_add(1);
            endpoint
        };
        let waker = Arc::new(LoopbackWaker {
            inbox: Mutex::new(tx.clone()),
        });
        let link = LoopbackLink {
            peer: self.peer,
            endpoint,
            inbox: tx,
            events: rx,
            peer_cached: false,
        };
        Ok((link, waker))
    }
}

pub struct LoopbackLink {
    peer: LoopbackPeer,
    endpoint: u32,
    inbox: mpsc::Sender<LinkEvent>,
    events: mpsc::Receiver<LinkEvent>,
    peer_cached: bool,
}

impl PeerLink for LoopbackLink {
    fn endpoint_id(&self) -> u32 {
        self.endpoint
    }

    fn next_event(&mut self) -> LinkEvent {
        self.events.recv().unwrap_or(LinkEvent::Closed)
    }

    fn find_peer(&mut self) -> bool {
        self.peer_cached = self.peer.shared.lock().present;
        self.peer_cached
    }

    fn peer_alive(&mut self) -> bool {
        self.peer_cached = self.peer_cached && self.peer.shared.lock().present;
        self.peer_cached
    }

    fn deliver(&mut self, payload: &[u8]) -> Result<()> {
        let (reply_endpoint, request) = decode_query(payload)?;
        trace!(reply_endpoint, id = request.id, "模拟对端收到查询");

        let mut guard = self.peer.shared.lock();
        let shared = &mut *guard;
        if !shared.present {
            return Err(IpcError::PeerUnavailable);
        }
        shared.received.push(request.clone());
        let reply = match &mut shared.responder {
            Responder::Silent => None,
            Responder::Auto(handler) => handler(&request),
            Responder::Hold => {
                shared.held.push(HeldQuery {
                    request,
                    inbox: self.inbox.clone(),
                });
                return Ok(());
            }
            Responder::Reject => return Err(IpcError::Rejected),
        };
        if let Some(data) = reply {
            let _ = self.inbox.send(LinkEvent::Reply {
                id: request.id,
                data,
            });
        }
        Ok(())
    }

    fn probe(&mut self, command: u32, param: usize) -> Result<u32> {
        let shared = self.peer.shared.lock();
        if !shared.present {
            return Err(IpcError::PeerUnavailable);
        }
        Ok(shared.dwords.get(&(command, param)).copied().unwrap_or(0))
    }
}

struct LoopbackWaker {
    inbox: Mutex<mpsc::Sender<LinkEvent>>,
}

impl LinkWaker for LoopbackWaker {
    fn wake(&self) -> bool {
        self.inbox.lock().send(LinkEvent::Wake).is_ok()
    }
}
