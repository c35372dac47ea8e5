//! 星TAP极速搜索的 Everything IPC 查询引擎
//!
//! 把查询编码成 Everything 的 `QUERY2` 消息，通过窗口消息发给 Everything，
//! 再把回复解码成按需读取字段的 [`ResultSet`]。
//!
//! - [`Everything`]：单查询客户端，新查询覆盖旧查询
//! - [`EverythingMt`]：多查询客户端，按 id 关联回复
//! - [`Capabilities`]：版本、数据库加载状态等能力查询

pub mod codec;
pub mod config;
pub mod correlator;
pub mod error;
pub mod future;
pub mod probe;
pub mod transport;
pub mod types;

pub use codec::{FieldValue, Item, ReplyBuilder, ResultSet};
pub use config::{ClientConfig, ES_INSTANCE, GLOBAL_CONFIG};
pub use correlator::{Client, Everything, EverythingMt};
pub use error::{IpcError, Result};
pub use future::{QueryFuture, ReadyFuture};
pub use probe::Capabilities;
pub use types::{
    FieldType, FileTime, InfoKind, QueryRequest, RequestField, RequestFlags, SearchFlags, Sort,
    TargetMachine, Version,
};
