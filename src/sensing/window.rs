//! Foreground window lookup.
//!
//! The strategy is picked once at startup by [`select_window_provider`]; the
//! screen-time tracker only ever sees the trait.

use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveWindow {
    pub pid: u32,
    pub title: String,
}

pub trait ForegroundWindowProvider: Send + Sync {
    /// The window that currently has input focus, or `None` when no
    /// attributable window has focus (locked screen, desktop, no display).
    fn active_window(&self) -> Option<ActiveWindow>;

    fn name(&self) -> &'static str;
}

/// Used on platforms (or sessions) without a supported window system.
#[derive(Debug, Default)]
pub struct NoForegroundWindow;

impl ForegroundWindowProvider for NoForegroundWindow {
    fn active_window(&self) -> Option<ActiveWindow> {
        None
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

#[cfg(windows)]
pub fn select_window_provider() -> Arc<dyn ForegroundWindowProvider> {
    Arc::new(win32::Win32ForegroundWindow)
}

#[cfg(target_os = "linux")]
pub fn select_window_provider() -> Arc<dyn ForegroundWindowProvider> {
    if std::env::var_os("DISPLAY").is_some() {
        Arc::new(x11::XpropForegroundWindow)
    } else {
        log::warn!("DISPLAY is not set; screen time will not be attributed");
        Arc::new(NoForegroundWindow)
    }
}

#[cfg(not(any(windows, target_os = "linux")))]
pub fn select_window_provider() -> Arc<dyn ForegroundWindowProvider> {
    Arc::new(NoForegroundWindow)
}

#[cfg(windows)]
mod win32 {
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId,
    };

    use super::{ActiveWindow, ForegroundWindowProvider};

    pub struct Win32ForegroundWindow;

    impl ForegroundWindowProvider for Win32ForegroundWindow {
        fn active_window(&self) -> Option<ActiveWindow> {
            // SAFETY: every pointer passed references a live local buffer of the
            // advertised length; a null window handle is checked first.
            unsafe {
                let hwnd = GetForegroundWindow();
                if hwnd.is_null() {
                    return None;
                }

                let mut pid: u32 = 0;
                GetWindowThreadProcessId(hwnd, &mut pid);
                if pid == 0 {
                    return None;
                }

                let mut buffer = [0u16; 512];
                let len = GetWindowTextW(hwnd, buffer.as_mut_ptr(), buffer.len() as i32);
                let title = String::from_utf16_lossy(&buffer[..len.max(0) as usize]);

                Some(ActiveWindow { pid, title })
            }
        }

        fn name(&self) -> &'static str {
            "win32"
        }
    }
}

#[cfg(target_os = "linux")]
mod x11 {
    use std::process::Command;

    use super::{ActiveWindow, ForegroundWindowProvider};

    /// Reads `_NET_ACTIVE_WINDOW` and the window's `_NET_WM_PID` through
    /// `xprop`, which every EWMH-compliant window manager populates.
    pub struct XpropForegroundWindow;

    impl ForegroundWindowProvider for XpropForegroundWindow {
        fn active_window(&self) -> Option<ActiveWindow> {
            let root = xprop(&["-root", "_NET_ACTIVE_WINDOW"])?;
            let window_id = parse_active_window_id(&root)?;
            let props = xprop(&["-id", &window_id, "_NET_WM_PID", "_NET_WM_NAME"])?;
            let pid = parse_wm_pid(&props)?;

            Some(ActiveWindow {
                pid,
                title: parse_wm_name(&props).unwrap_or_default(),
            })
        }

        fn name(&self) -> &'static str {
            "xprop"
        }
    }

    fn xprop(args: &[&str]) -> Option<String> {
        let output = Command::new("xprop").args(args).output().ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8(output.stdout).ok()
    }

    /// `_NET_ACTIVE_WINDOW(WINDOW): window id # 0x3a00007`
    pub fn parse_active_window_id(output: &str) -> Option<String> {
        let id = output.rsplit('#').next()?.trim();
        let id = id.split([',', ' ']).next()?.trim();
        if id.is_empty() || id == "0x0" {
            return None;
        }
        Some(id.to_string())
    }

    /// `_NET_WM_PID(CARDINAL) = 1234`
    pub fn parse_wm_pid(output: &str) -> Option<u32> {
        output
            .lines()
            .find(|line| line.starts_with("_NET_WM_PID"))?
            .split('=')
            .nth(1)?
            .trim()
            .parse()
            .ok()
    }

    /// `_NET_WM_NAME(UTF8_STRING) = "title"`
    pub fn parse_wm_name(output: &str) -> Option<String> {
        let value = output
            .lines()
            .find(|line| line.starts_with("_NET_WM_NAME"))?
            .split_once('=')?
            .1
            .trim();
        Some(value.trim_matches('"').to_string())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_xprop_output() {
            assert_eq!(
                parse_active_window_id("_NET_ACTIVE_WINDOW(WINDOW): window id # 0x3a00007\n"),
                Some("0x3a00007".to_string())
            );
            assert_eq!(
                parse_active_window_id("_NET_ACTIVE_WINDOW(WINDOW): window id # 0x0\n"),
                None
            );

            let props = "_NET_WM_PID(CARDINAL) = 4321\n_NET_WM_NAME(UTF8_STRING) = \"notes - editor\"\n";
            assert_eq!(parse_wm_pid(props), Some(4321));
            assert_eq!(parse_wm_name(props), Some("notes - editor".to_string()));
        }

        #[test]
        fn missing_pid_property_yields_none() {
            let props = "_NET_WM_PID:  not found.\n";
            assert_eq!(parse_wm_pid(props), None);
        }
    }
}
