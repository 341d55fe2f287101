//! The borderless topmost mirror window and process-level shutdown
//! signals (ESC, window close, console control events).
//!
//! Both signal paths funnel into the session's shared running flag: the
//! window procedure reaches it through `GWLP_USERDATA`, the console
//! handler through a process-global slot (the Win32 callback carries no
//! context pointer).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use anyhow::Context;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Console::{
    CTRL_BREAK_EVENT, CTRL_C_EVENT, CTRL_CLOSE_EVENT, CTRL_LOGOFF_EVENT, CTRL_SHUTDOWN_EVENT,
    SetConsoleCtrlHandler,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::HiDpi::{
    DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2, SetProcessDpiAwarenessContext,
};
use windows::Win32::UI::Input::KeyboardAndMouse::VK_ESCAPE;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GWLP_USERDATA,
    GetWindowLongPtrW, IDC_ARROW, LoadCursorW, MSG, PM_REMOVE, PeekMessageW, PostQuitMessage,
    RegisterClassExW, SetWindowLongPtrW, TranslateMessage, WM_DESTROY, WM_KEYDOWN, WM_QUIT,
    WNDCLASSEXW, WS_EX_TOPMOST, WS_POPUP, WS_VISIBLE,
};
use windows::core::w;

use crate::error::{MirrorError, MirrorResult};

use super::monitor::MonitorDescriptor;

/// Running flag shared with the console control handler. The handler is
/// registered once and never unregistered; the flag outlives the
/// session through this slot.
static CONSOLE_RUNNING: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Borderless topmost popup covering the target monitor.
pub(crate) struct MirrorWindow {
    hwnd: HWND,
    width: u32,
    height: u32,
    /// Keeps the pointer stored in `GWLP_USERDATA` valid for the
    /// window's lifetime.
    _running: Arc<AtomicBool>,
}

impl MirrorWindow {
    pub fn create(target: &MonitorDescriptor, running: Arc<AtomicBool>) -> MirrorResult<Self> {
        let class_name = w!("GlassMirror");
        let instance = unsafe { GetModuleHandleW(None) }
            .context("GetModuleHandleW failed")
            .map_err(MirrorError::Platform)?;

        let class = WNDCLASSEXW {
            cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
            lpfnWndProc: Some(wndproc),
            hInstance: instance.into(),
            lpszClassName: class_name,
            hCursor: unsafe { LoadCursorW(None, IDC_ARROW) }.unwrap_or_default(),
            ..Default::default()
        };
        // Zero means "already registered" on every call after the
        // first; creation below surfaces any real failure.
        unsafe { RegisterClassExW(&class) };

        let width = target.width();
        let height = target.height();
        let hwnd = unsafe {
            CreateWindowExW(
                WS_EX_TOPMOST,
                class_name,
                w!("Glass Mirror"),
                WS_POPUP | WS_VISIBLE,
                target.rect.left,
                target.rect.top,
                width as i32,
                height as i32,
                None,
                None,
                Some(instance.into()),
                None,
            )
        }
        .context("CreateWindowExW for the mirror window failed")
        .map_err(MirrorError::Platform)?;

        // Hand the running flag to the window procedure. The Arc clone
        // held by `_running` keeps the pointee alive until drop.
        unsafe {
            SetWindowLongPtrW(hwnd, GWLP_USERDATA, Arc::as_ptr(&running) as isize);
        }

        Ok(Self {
            hwnd,
            width,
            height,
            _running: running,
        })
    }

    pub fn hwnd(&self) -> HWND {
        self.hwnd
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pump all pending window messages. Returns `false` once WM_QUIT
    /// has been posted.
    pub fn drain_messages(&self) -> bool {
        let mut msg = MSG::default();
        while unsafe { PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE) }.as_bool() {
            if msg.message == WM_QUIT {
                return false;
            }
            unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        true
    }
}

impl Drop for MirrorWindow {
    fn drop(&mut self) {
        unsafe {
            SetWindowLongPtrW(self.hwnd, GWLP_USERDATA, 0);
            let _ = DestroyWindow(self.hwnd);
        }
    }
}

unsafe extern "system" fn wndproc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    match msg {
        WM_KEYDOWN if wparam.0 as u16 == VK_ESCAPE.0 => {
            let running = unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) } as *const AtomicBool;
            if !running.is_null() {
                unsafe { &*running }.store(false, Ordering::Release);
            }
            LRESULT(0)
        }
        WM_DESTROY => {
            unsafe { PostQuitMessage(0) };
            LRESULT(0)
        }
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}

/// Opt into per-monitor-v2 DPI awareness so monitor rectangles and the
/// mirror window are in physical pixels. Best-effort; older systems
/// simply keep their default awareness.
pub(crate) fn set_dpi_awareness() {
    let _ = unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) };
}

/// Route console control events (CTRL+C, CTRL+BREAK, close, logoff,
/// shutdown) into the running flag, then give the threads a moment to
/// drain before the OS tears the process down.
pub(crate) fn install_console_handler(running: Arc<AtomicBool>) -> MirrorResult<()> {
    CONSOLE_RUNNING.get_or_init(|| running);
    unsafe { SetConsoleCtrlHandler(Some(console_handler), true) }
        .context("SetConsoleCtrlHandler failed")
        .map_err(MirrorError::Platform)
}

unsafe extern "system" fn console_handler(ctrl_type: u32) -> BOOL {
    match ctrl_type {
        CTRL_C_EVENT | CTRL_BREAK_EVENT | CTRL_CLOSE_EVENT | CTRL_LOGOFF_EVENT
        | CTRL_SHUTDOWN_EVENT => {
            println!("\nReceived shutdown signal...");
            if let Some(running) = CONSOLE_RUNNING.get() {
                running.store(false, Ordering::Release);
            }
            // Let the capture thread leave its duplication wait and the
            // render loop finish the current present.
            std::thread::sleep(std::time::Duration::from_millis(200));
            BOOL::from(true)
        }
        _ => BOOL::from(false),
    }
}
