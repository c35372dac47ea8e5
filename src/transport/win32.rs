//! Windows 消息传输
//!
//! 工作线程上创建一个隐藏的顶层窗口（需要接收 `EVERYTHING_IPC_CREATED` 广播，
//! 所以不能用 message-only 窗口）。对端的 WM_COPYDATA 在窗口过程里被复制成自有
//! 缓冲区后立即 `ReplyMessage`，对端不会被我们的处理阻塞。

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::c_void;
use std::sync::Arc;

use tracing::debug;
use windows::core::{w, PCWSTR};
use windows::Win32::Foundation::{HANDLE, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::DataExchange::COPYDATASTRUCT;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, FindWindowW,
    GetClassInfoExW, GetMessageW, GetPropW, IsWindow, PostMessageW, RegisterClassExW,
    RegisterWindowMessageW, RemovePropW, ReplyMessage, SendMessageW, SetPropW,
    TranslateMessage, HMENU, MSG, WM_APP, WM_COPYDATA, WM_USER, WNDCLASSEXW, WS_EX_TOOLWINDOW,
    WS_POPUP,
};

use super::{Connector, LinkEvent, LinkWaker, PeerLink};
use crate::codec::COPYDATA_QUERY2W;
use crate::config::{ClientConfig, IPC_CREATED_MESSAGE};
use crate::error::{IpcError, Result};

const CLIENT_CLASS: PCWSTR = w!("STARSEARCH_EVERYTHING_IPC_CLIENT");
const STATE_PROP: PCWSTR = w!("STARSEARCH_IPC_STATE");

/// 命令队列有新命令
const WM_WAKE: u32 = WM_APP;
/// 窗口过程入队了事件，只用来让 GetMessageW 返回
const WM_NUDGE: u32 = WM_APP + 1;

struct WindowState {
    inbox: RefCell<VecDeque<LinkEvent>>,
    created_message: u32,
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn register_class(hinstance: HINSTANCE) -> Result<()> {
    unsafe {
        let mut existing = WNDCLASSEXW {
            cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
            ..Default::default()
        };
        if GetClassInfoExW(hinstance, CLIENT_CLASS, &mut existing).is_ok() {
            return Ok(());
        }

        let class = WNDCLASSEXW {
            cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
            lpfnWndProc: Some(window_proc),
            hInstance: hinstance,
            lpszClassName: CLIENT_CLASS,
            ..Default::default()
        };
        if RegisterClassExW(&class) == 0
            && GetClassInfoExW(hinstance, CLIENT_CLASS, &mut existing).is_err()
        {
            return Err(IpcError::Window("注册窗口类失败".to_string()));
        }
    }
    Ok(())
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let state = GetPropW(hwnd, STATE_PROP).0 as *const WindowState;
    if state.is_null() {
        return DefWindowProcW(hwnd, msg, wparam, lparam);
    }
    let state = &*state;

    match msg {
        WM_COPYDATA => {
            let cds = lparam.0 as *const COPYDATASTRUCT;
            if cds.is_null() {
                return LRESULT(0);
            }
            let cds = &*cds;
            let data = if cds.lpData.is_null() || cds.cbData == 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(cds.lpData as *const u8, cds.cbData as usize).to_vec()
            };
            state.inbox.borrow_mut().push_back(LinkEvent::Reply {
                id: cds.dwData as u32,
                data,
            });
            let _ = ReplyMessage(LRESULT(1));
            let _ = PostMessageW(hwnd, WM_NUDGE, WPARAM(0), LPARAM(0));
            LRESULT(1)
        }
        WM_WAKE => {
            state.inbox.borrow_mut().push_back(LinkEvent::Wake);
            LRESULT(0)
        }
        WM_NUDGE => LRESULT(0),
        m if m != 0 && m == state.created_message => {
            state.inbox.borrow_mut().push_back(LinkEvent::PeerReady);
            let _ = PostMessageW(hwnd, WM_NUDGE, WPARAM(0), LPARAM(0));
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

/// 打开隐藏窗口传输
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowConnector;

impl Connector for WindowConnector {
    type Link = WindowLink;

    fn open(self, config: &ClientConfig) -> Result<(Self::Link, Arc<dyn LinkWaker>)> {
        let hinstance: HINSTANCE = unsafe { GetModuleHandleW(PCWSTR::null()) }
            .map_err(|e| IpcError::Window(format!("GetModuleHandleW: {}", e)))?
            .into();
        register_class(hinstance)?;

        let created_name = wide(IPC_CREATED_MESSAGE);
        let created_message = unsafe { RegisterWindowMessageW(PCWSTR(created_name.as_ptr())) };

        let hwnd = unsafe {
            CreateWindowExW(
                WS_EX_TOOLWINDOW,
                CLIENT_CLASS,
                w!("StarSearch IPC"),
                WS_POPUP,
                0,
                0,
                0,
                0,
                HWND::default(),
                HMENU::default(),
                hinstance,
                None,
            )
        }
        .map_err(|e| IpcError::Window(format!("创建 IPC 窗口失败: {}", e)))?;

        let state = Box::new(WindowState {
            inbox: RefCell::new(VecDeque::new()),
            created_message,
        });
        let state_ptr = &*state as *const WindowState as *mut c_void;
        if let Err(e) = unsafe { SetPropW(hwnd, STATE_PROP, HANDLE(state_ptr)) } {
            unsafe {
                let _ = DestroyWindow(hwnd);
            }
            return Err(IpcError::Window(format!("SetPropW: {}", e)));
        }

        let peer_class = wide(&config.ipc_class());
        debug!(class = %config.ipc_class(), "IPC 窗口已创建");
        let waker = Arc::new(WindowWaker {
            hwnd: hwnd.0 as isize,
        });
        let link = WindowLink {
            hwnd,
            state,
            peer_class,
            peer: None,
        };
        Ok((link, waker))
    }
}

pub struct WindowLink {
    hwnd: HWND,
    state: Box<WindowState>,
    peer_class: Vec<u16>,
    peer: Option<HWND>,
}

impl PeerLink for WindowLink {
    fn endpoint_id(&self) -> u32 {
        // 窗口句柄只有低 32 位有效
        self.hwnd.0 as usize as u32
    }

    fn next_event(&mut self) -> LinkEvent {
        loop {
            if let Some(event) = self.state.inbox.borrow_mut().pop_front() {
                return event;
            }
            let mut msg = MSG::default();
            let got = unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) };
            if got.0 <= 0 {
                return LinkEvent::Closed;
            }
            unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
    }

    fn find_peer(&mut self) -> bool {
        self.peer = unsafe { FindWindowW(PCWSTR(self.peer_class.as_ptr()), PCWSTR::null()) }.ok();
        self.peer.is_some()
    }

    fn peer_alive(&mut self) -> bool {
        if let Some(peer) = self.peer {
            if unsafe { IsWindow(peer) }.as_bool() {
                return true;
            }
            self.peer = None;
        }
        false
    }

    fn deliver(&mut self, payload: &[u8]) -> Result<()> {
        let peer = self.peer.ok_or(IpcError::PeerUnavailable)?;
        let cds = COPYDATASTRUCT {
            dwData: COPYDATA_QUERY2W,
            cbData: payload.len() as u32,
            lpData: payload.as_ptr() as *mut c_void,
        };
        let accepted = unsafe {
            SendMessageW(
                peer,
                WM_COPYDATA,
                WPARAM(self.hwnd.0 as usize),
                LPARAM(&cds as *const COPYDATASTRUCT as isize),
            )
        };
        if accepted.0 == 0 {
            return Err(IpcError::Rejected);
        }
        Ok(())
    }

    fn probe(&mut self, command: u32, param: usize) -> Result<u32> {
        let peer = self.peer.ok_or(IpcError::PeerUnavailable)?;
        let result =
            unsafe { SendMessageW(peer, WM_USER, WPARAM(command as usize), LPARAM(param as isize)) };
        Ok(result.0 as u32)
    }
}

impl Drop for WindowLink {
    fn drop(&mut self) {
        unsafe {
            let _ = RemovePropW(self.hwnd, STATE_PROP);
            let _ = DestroyWindow(self.hwnd);
        }
    }
}

struct WindowWaker {
    hwnd: isize,
}

impl LinkWaker for WindowWaker {
    fn wake(&self) -> bool {
        unsafe {
            PostMessageW(
                HWND(self.hwnd as *mut c_void),
                WM_WAKE,
                WPARAM(0),
                LPARAM(0),
            )
        }
        .is_ok()
    }
}
