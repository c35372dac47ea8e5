use crate::types::RequestField;

/// IPC 查询引擎的错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IpcError {
    /// 调用方请求了类型表中不存在的字段位（编程错误）
    #[error("未知的请求字段位: {bit:#010x}")]
    UnknownField { bit: u32 },

    /// 对端本次回复没有返回该字段
    #[error("回复中不包含字段 {field:?}")]
    FieldNotReturned { field: RequestField },

    /// 字段类型与访问方式不匹配
    #[error("字段 {field:?} 不是 {expected} 类型")]
    FieldType {
        field: RequestField,
        expected: &'static str,
    },

    /// 回复缓冲区长度不足
    #[error("回复数据被截断: 需要 {needed} 字节, 实际 {have} 字节")]
    Truncated { needed: usize, have: usize },

    /// 行号越界
    #[error("结果行 {index} 越界 (共 {len} 行)")]
    RowOutOfRange { index: usize, len: usize },

    /// 找不到 Everything 的 IPC 窗口
    #[error("Everything IPC 不可用")]
    PeerUnavailable,

    /// Everything 收到了查询但拒绝处理（`WM_COPYDATA` 返回 0）
    #[error("Everything 拒绝了查询")]
    Rejected,

    /// 引擎已销毁，查询被放弃
    #[error("查询已被放弃（引擎已关闭）")]
    Abandoned,

    /// 工作线程已退出
    #[error("IPC 工作线程已关闭")]
    TransportClosed,

    /// 等待超时
    #[error("等待回复超时")]
    Timeout,

    /// 无法创建等待用的计时器运行时
    #[error("创建计时运行时失败: {0}")]
    Runtime(String),

    /// 创建 IPC 窗口失败
    #[error("IPC 窗口初始化失败: {0}")]
    Window(String),
}

pub type Result<T> = std::result::Result<T, IpcError>;
