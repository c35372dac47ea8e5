//! 能力查询：版本、数据库状态、字段索引状态、IPC 是否可用
//!
//! 所有查询都是对端 `WM_USER` 命令的同步往返，经由工作线程执行，与搜索查询互不影响。
//! 对端不存在时返回 [`IpcError::PeerUnavailable`]。

use std::time::Duration;

use tracing::{debug, warn};

use crate::correlator::Client;
use crate::error::{IpcError, Result};
use crate::future::ReadyFuture;
use crate::transport::TransportHandle;
use crate::types::{InfoKind, TargetMachine, Version};

pub const IPC_GET_MAJOR_VERSION: u32 = 0;
pub const IPC_GET_MINOR_VERSION: u32 = 1;
pub const IPC_GET_REVISION: u32 = 2;
pub const IPC_GET_BUILD_NUMBER: u32 = 3;
pub const IPC_GET_TARGET_MACHINE: u32 = 5;
pub const IPC_IS_DB_LOADED: u32 = 401;
pub const IPC_IS_INFO_INDEXED: u32 = 411;

pub trait Capabilities {
    fn get_version(&self) -> Result<Version>;

    fn is_database_loaded(&self) -> Result<bool>;

    /// 数据库加载完成时得到 `true`；客户端先被销毁则得到 `false`
    fn database_loaded_future(&self) -> ReadyFuture;

    fn is_info_indexed(&self, kind: InfoKind) -> Result<bool>;

    fn is_ipc_available(&self) -> Result<bool>;

    /// 对端出现（或已经存在）时得到 `true`
    fn ipc_available_future(&self) -> ReadyFuture;
}

impl<T: Client + ?Sized> Capabilities for T {
    fn get_version(&self) -> Result<Version> {
        let transport = self.transport();
        Ok(Version {
            major: transport.probe_dword(IPC_GET_MAJOR_VERSION, 0)?,
            minor: transport.probe_dword(IPC_GET_MINOR_VERSION, 0)?,
            revision: transport.probe_dword(IPC_GET_REVISION, 0)?,
            build: transport.probe_dword(IPC_GET_BUILD_NUMBER, 0)?,
            target_machine: TargetMachine::from(
                transport.probe_dword(IPC_GET_TARGET_MACHINE, 0)?,
            ),
        })
    }

    fn is_database_loaded(&self) -> Result<bool> {
        Ok(self.transport().probe_dword(IPC_IS_DB_LOADED, 0)? != 0)
    }

    fn database_loaded_future(&self) -> ReadyFuture {
        let handle = self.transport().handle();
        let interval = self.config().poll_interval;
        let (tx, fut) = ReadyFuture::channel();
        let spawned = std::thread::Builder::new()
            .name(format!("{}-db-poll", self.config().worker_name))
            .spawn(move || {
                let loaded = poll_database_loaded(&handle, interval, || tx.is_closed());
                let _ = tx.send(loaded);
            });
        match spawned {
            Ok(_) => fut,
            Err(e) => {
                warn!("创建轮询线程失败: {}", e);
                ReadyFuture::ready(false)
            }
        }
    }

    fn is_info_indexed(&self, kind: InfoKind) -> Result<bool> {
        Ok(self
            .transport()
            .probe_dword(IPC_IS_INFO_INDEXED, kind as usize)?
            != 0)
    }

    fn is_ipc_available(&self) -> Result<bool> {
        self.transport().is_peer_present()
    }

    fn ipc_available_future(&self) -> ReadyFuture {
        self.transport().wait_for_peer()
    }
}

/// 对端暂时不存在时继续轮询，传输关闭或调用方放弃等待时停止
fn poll_database_loaded(
    handle: &TransportHandle,
    interval: Duration,
    cancelled: impl Fn() -> bool,
) -> bool {
    loop {
        if cancelled() {
            return false;
        }
        match handle.probe_dword(IPC_IS_DB_LOADED, 0) {
            Ok(loaded) if loaded != 0 => {
                debug!("Everything 数据库已加载");
                return true;
            }
            Ok(_) | Err(IpcError::PeerUnavailable) => std::thread::sleep(interval),
            Err(e) => {
                debug!("停止轮询数据库状态: {}", e);
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::correlator::Everything;
    use crate::transport::loopback::LoopbackPeer;

    #[test]
    fn test_version_from_probes() {
        let peer = LoopbackPeer::new();
        peer.set_dword(IPC_GET_MAJOR_VERSION, 0, 1);
        peer.set_dword(IPC_GET_MINOR_VERSION, 0, 5);
        peer.set_dword(IPC_GET_REVISION, 0, 0);
        peer.set_dword(IPC_GET_BUILD_NUMBER, 0, 1383);
        peer.set_dword(IPC_GET_TARGET_MACHINE, 0, 2);
        let everything =
            Everything::with_connector(peer.connector(), ClientConfig::default()).unwrap();

        let version = everything.get_version().unwrap();
        assert_eq!(version.to_string(), "1.5.0.1383");
        assert_eq!(version.target_machine, TargetMachine::X64);
    }

    #[test]
    fn test_info_indexed_uses_kind_as_param() {
        let peer = LoopbackPeer::new();
        peer.set_dword(IPC_IS_INFO_INDEXED, InfoKind::FolderSize as usize, 1);
        let everything =
            Everything::with_connector(peer.connector(), ClientConfig::default()).unwrap();
        assert!(everything.is_info_indexed(InfoKind::FolderSize).unwrap());
        assert!(!everything.is_info_indexed(InfoKind::FileSize).unwrap());
    }

    #[test]
    fn test_probe_without_peer() {
        let peer = LoopbackPeer::absent();
        let everything =
            Everything::with_connector(peer.connector(), ClientConfig::default()).unwrap();
        assert_eq!(everything.get_version(), Err(IpcError::PeerUnavailable));
        assert_eq!(everything.is_database_loaded(), Err(IpcError::PeerUnavailable));
        assert_eq!(everything.is_ipc_available(), Ok(false));
    }
}
