//! Windows input tap using low-level keyboard and mouse hooks.

use crate::collector::types::RawEvent;
use crate::collector::{CollectorError, TapConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::error;
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, GetMessageW, PostThreadMessageW, SetWindowsHookExW, UnhookWindowsHookEx,
    HHOOK, KBDLLHOOKSTRUCT, MSG, MSLLHOOKSTRUCT, WH_KEYBOARD_LL, WH_MOUSE_LL, WM_KEYDOWN,
    WM_KEYUP, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MOUSEMOVE, WM_QUIT, WM_RBUTTONDOWN, WM_RBUTTONUP,
    WM_SYSKEYDOWN, WM_SYSKEYUP,
};

/// Hook-based tap running its own message loop thread.
pub struct WindowsTap {
    config: TapConfig,
    sender: Sender<RawEvent>,
    receiver: Receiver<RawEvent>,
    running: Arc<AtomicBool>,
    hook_thread_id: Arc<AtomicU32>,
    thread_handle: Option<JoinHandle<()>>,
}

impl WindowsTap {
    pub fn new(config: TapConfig) -> Self {
        let (sender, receiver) = bounded(10_000);

        Self {
            config,
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            hook_thread_id: Arc::new(AtomicU32::new(0)),
            thread_handle: None,
        }
    }

    pub fn start(&mut self) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }

        self.running.store(true, Ordering::SeqCst);

        let sender = self.sender.clone();
        let running = self.running.clone();
        let thread_id = self.hook_thread_id.clone();
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("win-input-hook".to_string())
            .spawn(move || {
                thread_id.store(unsafe { GetCurrentThreadId() }, Ordering::SeqCst);
                if let Err(e) = run_hook_loop(sender, running.clone(), config) {
                    error!("input hook loop failed: {e}");
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| CollectorError::ThreadSpawn(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let thread_id = self.hook_thread_id.load(Ordering::SeqCst);
        if thread_id != 0 {
            // GetMessageW blocks; wake the loop so it can observe the flag.
            unsafe {
                let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
            }
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn receiver(&self) -> &Receiver<RawEvent> {
        &self.receiver
    }
}

impl Drop for WindowsTap {
    fn drop(&mut self) {
        self.stop();
    }
}

thread_local! {
    static EVENT_SENDER: std::cell::RefCell<Option<Sender<RawEvent>>> = const { std::cell::RefCell::new(None) };
}

fn emit(event: RawEvent) {
    EVENT_SENDER.with(|sender| {
        if let Some(ref s) = *sender.borrow() {
            let _ = s.try_send(event);
        }
    });
}

unsafe extern "system" fn keyboard_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code >= 0 {
        let kb_struct = &*(l_param.0 as *const KBDLLHOOKSTRUCT);
        match w_param.0 as u32 {
            WM_KEYDOWN | WM_SYSKEYDOWN => emit(RawEvent::key_down(kb_struct.vkCode)),
            WM_KEYUP | WM_SYSKEYUP => emit(RawEvent::key_up(kb_struct.vkCode)),
            _ => {}
        }
    }

    CallNextHookEx(HHOOK::default(), n_code, w_param, l_param)
}

unsafe extern "system" fn mouse_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code >= 0 {
        let mouse_struct = &*(l_param.0 as *const MSLLHOOKSTRUCT);
        match w_param.0 as u32 {
            WM_MOUSEMOVE => emit(RawEvent::movement(
                mouse_struct.pt.x as f64,
                mouse_struct.pt.y as f64,
            )),
            WM_LBUTTONDOWN | WM_RBUTTONDOWN => emit(RawEvent::click(true)),
            WM_LBUTTONUP | WM_RBUTTONUP => emit(RawEvent::click(false)),
            _ => {}
        }
    }

    CallNextHookEx(HHOOK::default(), n_code, w_param, l_param)
}

fn run_hook_loop(
    sender: Sender<RawEvent>,
    running: Arc<AtomicBool>,
    config: TapConfig,
) -> Result<(), CollectorError> {
    EVENT_SENDER.with(|s| {
        *s.borrow_mut() = Some(sender);
    });

    unsafe {
        let mut hooks: Vec<HHOOK> = Vec::new();

        if config.capture_keyboard {
            match SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), None, 0) {
                Ok(hook) => hooks.push(hook),
                Err(_) => return Err(CollectorError::HookInstallationFailed),
            }
        }

        if config.capture_mouse {
            match SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_hook_proc), None, 0) {
                Ok(hook) => hooks.push(hook),
                Err(_) => {
                    for hook in hooks {
                        let _ = UnhookWindowsHookEx(hook);
                    }
                    return Err(CollectorError::HookInstallationFailed);
                }
            }
        }

        let mut msg = MSG::default();
        while running.load(Ordering::SeqCst) {
            // 0 is WM_QUIT, -1 is an error; either ends the loop.
            if GetMessageW(&mut msg, HWND::default(), 0, 0).0 <= 0 {
                break;
            }
        }

        for hook in hooks {
            let _ = UnhookWindowsHookEx(hook);
        }
    }

    Ok(())
}

/// Low-level hooks need no explicit permission; probe by installing one.
pub fn check_permission() -> bool {
    unsafe {
        match SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), None, 0) {
            Ok(hook) => {
                let _ = UnhookWindowsHookEx(hook);
                true
            }
            Err(_) => false,
        }
    }
}
