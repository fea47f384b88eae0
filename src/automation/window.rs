//! OS window access behind an injectable service trait.
//!
//! Everything the automation engine needs from the OS (window lookup, control
//! tree walking, pixel reads, synthetic input) goes through [`WindowService`]
//! so the locator, classifier, and engine can be exercised against the
//! in-memory [`fake::FakeWindowService`] without a live window. The real
//! implementation wraps the Win32 user/gdi APIs; no accessibility tree is
//! involved.

use crate::automation::color::Rgb;
use std::time::Duration;

/// Opaque window/control identifier (an `HWND` value on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub isize);

/// Screen-space rectangle, Win32 convention (right/bottom exclusive).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Virtual-key code for Enter, used to acknowledge confirmation dialogs.
pub const VK_RETURN: u16 = 0x0D;

/// Injectable surface over the OS window APIs.
///
/// Synthetic input (cursor position, key events) is a global OS resource, so
/// at most one consumer should drive a service instance at a time.
pub trait WindowService: Send + Sync {
    /// Block until the process has an idle input queue, or the timeout lapses.
    fn wait_input_idle(&self, pid: u32, timeout: Duration);

    /// Top-level, visible, unowned window belonging to the process.
    fn find_main_window(&self, pid: u32) -> Option<WindowId>;

    /// Top-level window with this exact title, regardless of owner process.
    fn find_window_titled(&self, title: &str) -> Option<WindowId>;

    /// Direct children of a window, in z-order.
    fn child_windows(&self, parent: WindowId) -> Vec<WindowId>;

    fn class_name(&self, window: WindowId) -> String;

    fn window_text(&self, window: WindowId) -> String;

    fn window_rect(&self, window: WindowId) -> Option<Rect>;

    fn is_enabled(&self, window: WindowId) -> bool;

    /// Color of one pixel, coordinates relative to the window's top-left.
    fn pixel_at(&self, window: WindowId, x: i32, y: i32) -> Option<Rgb>;

    /// Post a button-activation message to the control.
    fn click_button(&self, button: WindowId);

    /// Move the pointer to window-relative coordinates and click.
    fn click_at(&self, window: WindowId, x: i32, y: i32);

    /// Synthesize a key press (down + up) on the foreground window.
    fn press_key(&self, virtual_key: u16);

    /// Ask the window to close.
    fn request_close(&self, window: WindowId);
}

#[cfg(windows)]
pub use win32::Win32WindowService;

#[cfg(windows)]
mod win32 {
    use super::{Rect, WindowId, WindowService};
    use crate::automation::color::Rgb;
    use std::time::Duration;
    use windows::Win32::Foundation::{BOOL, CloseHandle, HWND, LPARAM, POINT, RECT, WPARAM};
    use windows::Win32::Graphics::Gdi::{ClientToScreen, GetDC, GetPixel, ReleaseDC};
    use windows::Win32::System::Threading::{
        OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_SYNCHRONIZE,
    };
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, keybd_event,
        mouse_event,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        BM_CLICK, EnumWindows, FindWindowExW, FindWindowW, GW_OWNER, GetClassNameW, GetWindow,
        GetWindowRect, GetWindowTextW, GetWindowThreadProcessId, IsWindowEnabled, IsWindowVisible,
        PostMessageW, SendMessageW, SetCursorPos, WM_CLOSE, WaitForInputIdle,
    };
    use windows::core::PCWSTR;

    fn to_wide(value: &str) -> Vec<u16> {
        value.encode_utf16().chain(std::iter::once(0)).collect()
    }

    fn hwnd(window: WindowId) -> HWND {
        HWND(window.0 as *mut core::ffi::c_void)
    }

    fn id(window: HWND) -> WindowId {
        WindowId(window.0 as isize)
    }

    /// Win32-backed window service.
    pub struct Win32WindowService;

    struct MainWindowSearch {
        pid: u32,
        found: Option<WindowId>,
    }

    unsafe extern "system" fn enum_main_window(window: HWND, lparam: LPARAM) -> BOOL {
        let search = unsafe { &mut *(lparam.0 as *mut MainWindowSearch) };
        let mut pid = 0u32;
        unsafe { GetWindowThreadProcessId(window, Some(&mut pid)) };
        let owned = unsafe { GetWindow(window, GW_OWNER) }.is_ok_and(|owner| !owner.is_invalid());
        if pid == search.pid && unsafe { IsWindowVisible(window) }.as_bool() && !owned {
            search.found = Some(id(window));
            return false.into();
        }
        true.into()
    }

    impl WindowService for Win32WindowService {
        fn wait_input_idle(&self, pid: u32, timeout: Duration) {
            unsafe {
                if let Ok(process) =
                    OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_SYNCHRONIZE, false, pid)
                {
                    WaitForInputIdle(process, timeout.as_millis() as u32);
                    let _ = CloseHandle(process);
                }
            }
        }

        fn find_main_window(&self, pid: u32) -> Option<WindowId> {
            let mut search = MainWindowSearch { pid, found: None };
            unsafe {
                // EnumWindows reports an error when the callback stops early;
                // that is the found case, not a failure.
                let _ = EnumWindows(
                    Some(enum_main_window),
                    LPARAM(&mut search as *mut MainWindowSearch as isize),
                );
            }
            search.found
        }

        fn find_window_titled(&self, title: &str) -> Option<WindowId> {
            let title = to_wide(title);
            unsafe {
                FindWindowW(PCWSTR::null(), PCWSTR(title.as_ptr()))
                    .ok()
                    .filter(|window| !window.is_invalid())
                    .map(id)
            }
        }

        fn child_windows(&self, parent: WindowId) -> Vec<WindowId> {
            let mut children = Vec::new();
            let mut previous: Option<HWND> = None;
            loop {
                let next = unsafe {
                    FindWindowExW(
                        Some(hwnd(parent)),
                        previous,
                        PCWSTR::null(),
                        PCWSTR::null(),
                    )
                };
                match next {
                    Ok(child) if !child.is_invalid() => {
                        children.push(id(child));
                        previous = Some(child);
                    }
                    _ => break,
                }
            }
            children
        }

        fn class_name(&self, window: WindowId) -> String {
            let mut buffer = [0u16; 256];
            let length = unsafe { GetClassNameW(hwnd(window), &mut buffer) };
            String::from_utf16_lossy(&buffer[..length.max(0) as usize])
        }

        fn window_text(&self, window: WindowId) -> String {
            let mut buffer = [0u16; 512];
            let length = unsafe { GetWindowTextW(hwnd(window), &mut buffer) };
            String::from_utf16_lossy(&buffer[..length.max(0) as usize])
        }

        fn window_rect(&self, window: WindowId) -> Option<Rect> {
            let mut rect = RECT::default();
            unsafe { GetWindowRect(hwnd(window), &mut rect) }.ok()?;
            Some(Rect::new(rect.left, rect.top, rect.right, rect.bottom))
        }

        fn is_enabled(&self, window: WindowId) -> bool {
            unsafe { IsWindowEnabled(hwnd(window)) }.as_bool()
        }

        fn pixel_at(&self, window: WindowId, x: i32, y: i32) -> Option<Rgb> {
            let rect = self.window_rect(window)?;
            unsafe {
                // Screen DC: GetPixel on a window DC misses layered windows.
                let screen = GetDC(None);
                let color = GetPixel(screen, rect.left + x, rect.top + y);
                ReleaseDC(None, screen);
                // COLORREF is 0x00BBGGRR.
                Some(Rgb::new(
                    (color.0 & 0xFF) as u8,
                    ((color.0 >> 8) & 0xFF) as u8,
                    ((color.0 >> 16) & 0xFF) as u8,
                ))
            }
        }

        fn click_button(&self, button: WindowId) {
            unsafe {
                SendMessageW(hwnd(button), BM_CLICK, WPARAM(0), LPARAM(0));
            }
        }

        fn click_at(&self, window: WindowId, x: i32, y: i32) {
            let mut point = POINT { x, y };
            unsafe {
                if !ClientToScreen(hwnd(window), &mut point).as_bool() {
                    return;
                }
                let _ = SetCursorPos(point.x, point.y);
                std::thread::sleep(Duration::from_millis(50));
                mouse_event(MOUSEEVENTF_LEFTDOWN, 0, 0, 0, 0);
                std::thread::sleep(Duration::from_millis(50));
                mouse_event(MOUSEEVENTF_LEFTUP, 0, 0, 0, 0);
            }
        }

        fn press_key(&self, virtual_key: u16) {
            unsafe {
                keybd_event(virtual_key as u8, 0, KEYBD_EVENT_FLAGS(0), 0);
                keybd_event(virtual_key as u8, 0, KEYEVENTF_KEYUP, 0);
            }
        }

        fn request_close(&self, window: WindowId) {
            unsafe {
                let _ = PostMessageW(Some(hwnd(window)), WM_CLOSE, WPARAM(0), LPARAM(0));
            }
        }
    }
}

pub mod fake {
    //! In-memory window service for tests: a control tree plus a pixel map,
    //! with recorded interactions instead of real input synthesis.

    use super::{Rect, WindowId, WindowService};
    use crate::automation::color::Rgb;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    struct FakeWindow {
        parent: Option<WindowId>,
        pid: Option<u32>,
        title: String,
        class: String,
        rect: Rect,
        enabled: bool,
        background: Rgb,
        pixels: HashMap<(i32, i32), Rgb>,
        disable_after_queries: Option<u32>,
    }

    #[derive(Default)]
    struct FakeState {
        windows: Vec<(WindowId, FakeWindow)>,
        next_id: isize,
        clicks: Vec<WindowId>,
        coordinate_clicks: Vec<(WindowId, i32, i32)>,
        pressed_keys: Vec<u16>,
        close_requests: Vec<WindowId>,
        enabled_queries: HashMap<WindowId, u32>,
    }

    impl FakeState {
        fn window(&self, id: WindowId) -> Option<&FakeWindow> {
            self.windows
                .iter()
                .find(|(wid, _)| *wid == id)
                .map(|(_, w)| w)
        }

        fn window_mut(&mut self, id: WindowId) -> Option<&mut FakeWindow> {
            self.windows
                .iter_mut()
                .find(|(wid, _)| *wid == id)
                .map(|(_, w)| w)
        }
    }

    /// Test double for [`WindowService`].
    #[derive(Default)]
    pub struct FakeWindowService {
        state: Mutex<FakeState>,
    }

    impl FakeWindowService {
        pub fn new() -> Self {
            Self::default()
        }

        fn insert(&self, window: FakeWindow) -> WindowId {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = WindowId(state.next_id);
            state.windows.push((id, window));
            id
        }

        /// Register a top-level window.
        pub fn add_window(&self, pid: Option<u32>, title: &str, rect: Rect) -> WindowId {
            self.insert(FakeWindow {
                parent: None,
                pid,
                title: title.to_string(),
                class: String::new(),
                rect,
                enabled: true,
                background: Rgb::new(240, 240, 240),
                pixels: HashMap::new(),
                disable_after_queries: None,
            })
        }

        /// Register a child control under an existing window.
        pub fn add_child(&self, parent: WindowId, class: &str, text: &str, rect: Rect) -> WindowId {
            self.insert(FakeWindow {
                parent: Some(parent),
                pid: None,
                title: text.to_string(),
                class: class.to_string(),
                rect,
                enabled: true,
                background: Rgb::new(240, 240, 240),
                pixels: HashMap::new(),
                disable_after_queries: None,
            })
        }

        pub fn set_enabled(&self, window: WindowId, enabled: bool) {
            let mut state = self.state.lock().unwrap();
            if let Some(w) = state.window_mut(window) {
                w.enabled = enabled;
            }
        }

        /// Report the control as disabled starting with the nth enabled-state
        /// query; models a tool greying out its button mid-task.
        pub fn disable_after_queries(&self, window: WindowId, queries: u32) {
            let mut state = self.state.lock().unwrap();
            if let Some(w) = state.window_mut(window) {
                w.disable_after_queries = Some(queries);
            }
        }

        pub fn set_background(&self, window: WindowId, color: Rgb) {
            let mut state = self.state.lock().unwrap();
            if let Some(w) = state.window_mut(window) {
                w.background = color;
            }
        }

        pub fn set_pixel(&self, window: WindowId, x: i32, y: i32, color: Rgb) {
            let mut state = self.state.lock().unwrap();
            if let Some(w) = state.window_mut(window) {
                w.pixels.insert((x, y), color);
            }
        }

        pub fn clicks(&self) -> Vec<WindowId> {
            self.state.lock().unwrap().clicks.clone()
        }

        pub fn coordinate_clicks(&self) -> Vec<(WindowId, i32, i32)> {
            self.state.lock().unwrap().coordinate_clicks.clone()
        }

        pub fn pressed_keys(&self) -> Vec<u16> {
            self.state.lock().unwrap().pressed_keys.clone()
        }

        pub fn close_requests(&self) -> Vec<WindowId> {
            self.state.lock().unwrap().close_requests.clone()
        }

        pub fn enabled_query_count(&self, window: WindowId) -> u32 {
            self.state
                .lock()
                .unwrap()
                .enabled_queries
                .get(&window)
                .copied()
                .unwrap_or(0)
        }
    }

    impl WindowService for FakeWindowService {
        fn wait_input_idle(&self, _pid: u32, _timeout: Duration) {}

        fn find_main_window(&self, pid: u32) -> Option<WindowId> {
            let state = self.state.lock().unwrap();
            state
                .windows
                .iter()
                .find(|(_, w)| w.parent.is_none() && w.pid == Some(pid))
                .map(|(id, _)| *id)
        }

        fn find_window_titled(&self, title: &str) -> Option<WindowId> {
            let state = self.state.lock().unwrap();
            state
                .windows
                .iter()
                .find(|(_, w)| w.parent.is_none() && w.title == title)
                .map(|(id, _)| *id)
        }

        fn child_windows(&self, parent: WindowId) -> Vec<WindowId> {
            let state = self.state.lock().unwrap();
            state
                .windows
                .iter()
                .filter(|(_, w)| w.parent == Some(parent))
                .map(|(id, _)| *id)
                .collect()
        }

        fn class_name(&self, window: WindowId) -> String {
            let state = self.state.lock().unwrap();
            state.window(window).map(|w| w.class.clone()).unwrap_or_default()
        }

        fn window_text(&self, window: WindowId) -> String {
            let state = self.state.lock().unwrap();
            state.window(window).map(|w| w.title.clone()).unwrap_or_default()
        }

        fn window_rect(&self, window: WindowId) -> Option<Rect> {
            let state = self.state.lock().unwrap();
            state.window(window).map(|w| w.rect)
        }

        fn is_enabled(&self, window: WindowId) -> bool {
            let mut state = self.state.lock().unwrap();
            let queries = state.enabled_queries.entry(window).or_insert(0);
            *queries += 1;
            let queries = *queries;
            state
                .window(window)
                .map(|w| match w.disable_after_queries {
                    Some(limit) if queries >= limit => false,
                    _ => w.enabled,
                })
                .unwrap_or(false)
        }

        fn pixel_at(&self, window: WindowId, x: i32, y: i32) -> Option<Rgb> {
            let state = self.state.lock().unwrap();
            let w = state.window(window)?;
            Some(w.pixels.get(&(x, y)).copied().unwrap_or(w.background))
        }

        fn click_button(&self, button: WindowId) {
            self.state.lock().unwrap().clicks.push(button);
        }

        fn click_at(&self, window: WindowId, x: i32, y: i32) {
            self.state
                .lock()
                .unwrap()
                .coordinate_clicks
                .push((window, x, y));
        }

        fn press_key(&self, virtual_key: u16) {
            self.state.lock().unwrap().pressed_keys.push(virtual_key);
        }

        fn request_close(&self, window: WindowId) {
            self.state.lock().unwrap().close_requests.push(window);
        }
    }
}
