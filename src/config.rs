use std::time::Duration;

use serde::Deserialize;

/// Everything 1.5 alpha 的默认实例名
pub const ES_INSTANCE: &str = "1.5a";

/// Everything IPC 窗口类名（多实例时追加 `_(实例名)`）
pub const IPC_CLASS_NAME: &str = "EVERYTHING_TASKBAR_NOTIFICATION";

/// Everything 启动完成时广播的消息名
pub const IPC_CREATED_MESSAGE: &str = "EVERYTHING_IPC_CREATED";

/// 实例名环境变量
pub const ENV_INSTANCE: &str = "STARSEARCH_EVERYTHING_INSTANCE";

/// 轮询间隔环境变量（毫秒）
pub const ENV_POLL_MS: &str = "STARSEARCH_POLL_MS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Everything 实例名，`None` 表示默认实例
    pub instance: Option<String>,
    /// 数据库加载等状态的轮询间隔
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// 工作线程名
    pub worker_name: String,
    /// 把每条收发消息的事件从 trace 提升到 debug
    pub trace_protocol: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            instance: None,
            poll_interval: Duration::from_millis(10),
            worker_name: "everything-ipc".to_string(),
            trace_protocol: false,
        }
    }
}

impl ClientConfig {
    pub fn with_instance(instance: impl Into<String>) -> Self {
        Self {
            instance: Some(instance.into()),
            ..Self::default()
        }
    }

    /// 读取环境变量覆盖默认值
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(
            std::env::var(ENV_INSTANCE).ok(),
            std::env::var(ENV_POLL_MS).ok(),
        );
        config
    }

    fn apply_overrides(&mut self, instance: Option<String>, poll_ms: Option<String>) {
        if let Some(instance) = instance.filter(|s| !s.trim().is_empty()) {
            self.instance = Some(instance.trim().to_string());
        }
        if let Some(ms) = poll_ms.and_then(|s| s.trim().parse::<u64>().ok()) {
            if ms > 0 {
                self.poll_interval = Duration::from_millis(ms);
            }
        }
    }

    /// 对端 IPC 窗口类名
    pub fn ipc_class(&self) -> String {
        match self.instance.as_deref() {
            Some(name) if !name.is_empty() => format!("{}_({})", IPC_CLASS_NAME, name),
            _ => IPC_CLASS_NAME.to_string(),
        }
    }
}

/// 进程级默认配置
pub static GLOBAL_CONFIG: once_cell::sync::Lazy<ClientConfig> =
    once_cell::sync::Lazy::new(ClientConfig::from_env);

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipc_class_with_instance() {
        assert_eq!(ClientConfig::default().ipc_class(), IPC_CLASS_NAME);
        assert_eq!(
            ClientConfig::with_instance(ES_INSTANCE).ipc_class(),
            "EVERYTHING_TASKBAR_NOTIFICATION_(1.5a)"
        );
    }

    #[test]
    fn test_overrides() {
        let mut config = ClientConfig::default();
        config.apply_overrides(Some(" 1.5a ".into()), Some("25".into()));
        assert_eq!(config.instance.as_deref(), Some("1.5a"));
        assert_eq!(config.poll_interval, Duration::from_millis(25));

        let mut config = ClientConfig::default();
        config.apply_overrides(Some("".into()), Some("abc".into()));
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"instance":"1.5a","poll_interval":50}"#).unwrap();
        assert_eq!(config.instance.as_deref(), Some("1.5a"));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.worker_name, "everything-ipc");
        assert!(!config.trace_protocol);
    }
}
