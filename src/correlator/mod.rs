//! 回复关联
//!
//! 传输层只知道“某个 id 的回复到了”，如何把回复交给调用方由这里的两种客户端决定：
//!
//! - [`Everything`]：同一时刻只关心最新一次查询，旧查询的回复被丢弃
//! - [`EverythingMt`]：每次查询分配唯一 id，任意多个查询并发进行

pub mod multi;
pub mod single;

pub use multi::EverythingMt;
pub use single::Everything;

use crate::config::ClientConfig;
use crate::transport::Transport;

/// 两种客户端共有的部分，能力查询基于它实现
pub trait Client {
    fn transport(&self) -> &Transport;

    fn config(&self) -> &ClientConfig;
}
