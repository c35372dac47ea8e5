//! 单查询客户端
//!
//! 结果槽的状态机：
//!
//! ```text
//! Empty --回复--> Filled --取走--> Consumed --再次等待--> Empty
//!   \______________________________________________/
//!                      Drop --> Abandoned
//! ```
//!
//! 每次 `query_send` 在线上使用一个私有的代号作为请求 id，只有代号等于最新一次发送的回复
//! 会被交付，交付时换回调用方的 id。之前未取走的结果直接丢弃。

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::Client;
use crate::codec::ResultSet;
use crate::config::{ClientConfig, GLOBAL_CONFIG};
use crate::error::{IpcError, Result};
use crate::future::{QueryFuture, QuerySender};
use crate::transport::{default_connector, Connector, ReplySink, Transport};
use crate::types::QueryRequest;

#[derive(Debug)]
enum Slot {
    Empty,
    Filled(Result<ResultSet>),
    Consumed,
    Abandoned,
}

/// 最新一次发送
#[derive(Debug, Clone, Copy)]
struct Latest {
    generation: u32,
    caller_id: u32,
}

struct State {
    slot: Slot,
    waiter: Option<QuerySender>,
    next_generation: u32,
    /// 回复已交付、未送达或尚未发送过时为 `None`
    latest: Option<Latest>,
}

impl State {
    /// 记下新的最新查询，返回线上使用的代号
    fn begin(&mut self, caller_id: u32) -> u32 {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        self.latest = Some(Latest {
            generation,
            caller_id,
        });
        generation
    }

    /// 只有最新代号的第一次回复返回调用方 id
    fn accept(&mut self, generation: u32) -> Option<u32> {
        match self.latest {
            Some(latest) if latest.generation == generation => {
                self.latest = None;
                Some(latest.caller_id)
            }
            _ => None,
        }
    }
}

struct SingleSink {
    state: Mutex<State>,
}

impl SingleSink {
    fn abandon(&self) {
        let mut state = self.state.lock();
        state.slot = Slot::Abandoned;
        // 丢弃 sender，等待中的 future 得到 Abandoned
        state.waiter = None;
    }

    fn forget(&self, generation: u32) {
        let mut state = self.state.lock();
        if state.accept(generation).is_some() {
            debug!(generation, "最新查询未送达，不会有回复");
        }
    }
}

impl ReplySink for SingleSink {
    fn on_reply(&self, id: u32, data: Vec<u8>) {
        let mut state = self.state.lock();
        if matches!(state.slot, Slot::Abandoned) {
            return;
        }
        let caller_id = match state.accept(id) {
            Some(caller_id) => caller_id,
            None => {
                debug!(id, "丢弃旧查询或重复的回复");
                return;
            }
        };

        let result = ResultSet::from_reply(caller_id, data);
        // 等待者已放弃（例如超时）时结果留在槽里
        state.slot = match state.waiter.take() {
            Some(waiter) => match waiter.send(result) {
                Ok(()) => Slot::Consumed,
                Err(result) => Slot::Filled(result),
            },
            None => Slot::Filled(result),
        };
    }

    fn on_undelivered(&self, id: u32) {
        self.forget(id);
    }

    fn on_shutdown(&self) {
        self.abandon();
    }
}

/// 单查询客户端，新查询覆盖旧查询
///
/// ```no_run
/// use starsearch_ipc::{Everything, QueryRequest};
///
/// let everything = Everything::new()?;
/// everything.query_send(&QueryRequest::new("report"))?;
/// let results = everything.query_get()?;
/// println!("{} / {}", results.len(), results.found_num());
/// # Ok::<(), starsearch_ipc::IpcError>(())
/// ```
pub struct Everything {
    sink: Arc<SingleSink>,
    config: ClientConfig,
    transport: Transport,
}

impl Everything {
    /// 连接默认实例（或环境变量指定的实例）
    pub fn new() -> Result<Self> {
        Self::with_connector(default_connector(), GLOBAL_CONFIG.clone())
    }

    /// 连接指定名字的实例，例如 [`ES_INSTANCE`](crate::config::ES_INSTANCE)
    pub fn with_instance(instance: impl Into<String>) -> Result<Self> {
        let config = ClientConfig {
            instance: Some(instance.into()),
            ..GLOBAL_CONFIG.clone()
        };
        Self::with_connector(default_connector(), config)
    }

    pub fn with_connector<C: Connector>(connector: C, config: ClientConfig) -> Result<Self> {
        let sink = Arc::new(SingleSink {
            state: Mutex::new(State {
                slot: Slot::Empty,
                waiter: None,
                next_generation: 0,
                latest: None,
            }),
        });
        let transport = Transport::spawn(connector, sink.clone(), &config)?;
        Ok(Self {
            sink,
            config,
            transport,
        })
    }

    /// 发出查询，入队后立即返回
    ///
    /// 尚未取走的上一次结果会被丢弃；之前发出但还没回复的查询，其回复也不会再交付。
    pub fn query_send(&self, request: &QueryRequest) -> Result<()> {
        let generation = {
            let mut state = self.sink.state.lock();
            if matches!(state.slot, Slot::Abandoned) {
                return Err(IpcError::Abandoned);
            }
            if matches!(state.slot, Slot::Filled(_)) {
                debug!("丢弃未取走的结果");
                state.slot = Slot::Empty;
            }
            state.begin(request.id)
        };

        if self.config.trace_protocol {
            debug!(id = request.id, generation, search = %request.search, "发送单查询");
        } else {
            trace!(id = request.id, generation, search = %request.search, "发送单查询");
        }
        let sent = self.transport.send_query(&request.clone().id(generation));
        if sent.is_err() {
            self.sink.forget(generation);
        }
        sent
    }

    /// 取最新查询的结果
    ///
    /// 结果已到达时立即完成；否则等待下一个回复。之前返回且尚未完成的 future 被放弃。
    pub fn query_future(&self) -> QueryFuture {
        let mut state = self.sink.state.lock();
        match std::mem::replace(&mut state.slot, Slot::Consumed) {
            Slot::Filled(result) => QueryFuture::ready(result),
            Slot::Abandoned => {
                state.slot = Slot::Abandoned;
                QueryFuture::ready(Err(IpcError::Abandoned))
            }
            Slot::Empty | Slot::Consumed => {
                state.slot = Slot::Empty;
                let (tx, fut) = QueryFuture::channel();
                state.waiter = Some(tx);
                fut
            }
        }
    }

    /// 阻塞等待最新查询的结果
    pub fn query_get(&self) -> Result<ResultSet> {
        self.query_future().wait()
    }
}

impl Client for Everything {
    fn transport(&self) -> &Transport {
        &self.transport
    }

    fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for Everything {
    fn drop(&mut self) {
        self.sink.abandon();
    }
}
