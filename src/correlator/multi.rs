//! 多查询客户端
//!
//! 每次查询分配一个 id，id 计数器和待回复表由同一把锁保护。
//! 调用方丢弃 future 不会清理表项，表项一直留到回复到达或客户端销毁。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::Client;
use crate::codec::ResultSet;
use crate::config::{ClientConfig, GLOBAL_CONFIG};
use crate::error::Result;
use crate::future::{QueryFuture, QuerySender};
use crate::transport::{default_connector, Connector, ReplySink, Transport};
use crate::types::QueryRequest;

struct Pending {
    next_id: u32,
    waiters: HashMap<u32, QuerySender>,
}

impl Pending {
    /// 下一个不在表里的 id，计数器回绕后跳过仍在等待的 id
    fn allocate(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.waiters.contains_key(&id) {
                return id;
            }
        }
    }
}

struct MultiSink {
    pending: Mutex<Pending>,
}

impl ReplySink for MultiSink {
    fn on_reply(&self, id: u32, data: Vec<u8>) {
        let waiter = self.pending.lock().waiters.remove(&id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(ResultSet::from_reply(id, data));
            }
            None => debug!(id, "没有对应查询的回复（重复或过期），已丢弃"),
        }
    }

    // 未送达的查询保留在表里，和对端收下却不回复时一样，直到客户端销毁
    fn on_undelivered(&self, id: u32) {
        debug!(id, "查询未送达");
    }

    fn on_shutdown(&self) {
        let dropped = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut pending.waiters)
        };
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "放弃未完成的查询");
        }
    }
}

/// 多查询客户端，查询之间互不影响，完成顺序不保证与发送顺序一致
pub struct EverythingMt {
    sink: Arc<MultiSink>,
    config: ClientConfig,
    transport: Transport,
}

impl EverythingMt {
    pub fn new() -> Result<Self> {
        Self::with_connector(default_connector(), GLOBAL_CONFIG.clone())
    }

    pub fn with_instance(instance: impl Into<String>) -> Result<Self> {
        let config = ClientConfig {
            instance: Some(instance.into()),
            ..GLOBAL_CONFIG.clone()
        };
        Self::with_connector(default_connector(), config)
    }

    pub fn with_connector<C: Connector>(connector: C, config: ClientConfig) -> Result<Self> {
        let sink = Arc::new(MultiSink {
            pending: Mutex::new(Pending {
                next_id: 0,
                waiters: HashMap::new(),
            }),
        });
        let transport = Transport::spawn(connector, sink.clone(), &config)?;
        Ok(Self {
            sink,
            config,
            transport,
        })
    }

    /// 发出查询并返回它的 future；请求里的 `id` 会被替换为分配的 id
    pub fn query_send(&self, request: &QueryRequest) -> QueryFuture {
        let (tx, fut) = QueryFuture::channel();
        let id = {
            let mut pending = self.sink.pending.lock();
            let id = pending.allocate();
            pending.waiters.insert(id, tx);
            id
        };

        if self.config.trace_protocol {
            debug!(id, search = %request.search, "发送查询");
        } else {
            trace!(id, search = %request.search, "发送查询");
        }
        let request = request.clone().id(id);
        if let Err(e) = self.transport.send_query(&request) {
            if let Some(waiter) = self.sink.pending.lock().waiters.remove(&id) {
                let _ = waiter.send(Err(e));
            }
        }
        fut
    }

    /// 等待回复的查询数
    pub fn pending_count(&self) -> usize {
        self.sink.pending.lock().waiters.len()
    }
}

impl Client for EverythingMt {
    fn transport(&self) -> &Transport {
        &self.transport
    }

    fn config(&self) -> &ClientConfig {
        &self.config
    }
}
