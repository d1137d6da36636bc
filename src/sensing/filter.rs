use super::types::ProcessInfo;

/// Which executables are history-worthy applications.
pub trait AppFilter: Send + Sync {
    /// True for processes that must never be tracked or accounted: the agent
    /// itself and OS plumbing.
    fn should_exclude(&self, exe_path: &str, process: &ProcessInfo) -> bool;

    /// True for user-facing applications worth a history row.
    fn should_track(&self, exe_path: &str, process: &ProcessInfo) -> bool;
}

/// Platform heuristics: never the agent's own executable, and on Windows
/// nothing that lives under the system directory except the shell. Windows
/// only tracks processes that own a visible top-level window; elsewhere every
/// remaining process with a known executable is tracked.
#[derive(Debug, Clone)]
pub struct DefaultAppFilter {
    self_markers: Vec<String>,
    system_roots: Vec<String>,
}

impl DefaultAppFilter {
    pub fn new() -> Self {
        let mut self_markers = vec!["procguard".to_string()];
        if let Ok(exe) = std::env::current_exe() {
            let exe = exe.to_string_lossy().to_lowercase();
            if !exe.is_empty() && !self_markers.contains(&exe) {
                self_markers.push(exe);
            }
        }

        Self {
            self_markers,
            system_roots: platform_system_roots(),
        }
    }

    fn is_self(&self, exe_lower: &str) -> bool {
        self.self_markers
            .iter()
            .any(|marker| exe_lower.contains(marker.as_str()))
    }

    fn is_system(&self, exe_lower: &str) -> bool {
        self.system_roots
            .iter()
            .any(|root| exe_lower.starts_with(root.as_str()))
    }
}

impl Default for DefaultAppFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl AppFilter for DefaultAppFilter {
    fn should_exclude(&self, exe_path: &str, _process: &ProcessInfo) -> bool {
        let exe_lower = exe_path.to_lowercase();
        if self.is_self(&exe_lower) {
            return true;
        }
        self.is_system(&exe_lower) && !exe_lower.ends_with("\\explorer.exe")
    }

    fn should_track(&self, exe_path: &str, process: &ProcessInfo) -> bool {
        !exe_path.is_empty() && process.pid != 0 && is_user_facing(process.pid)
    }
}

#[cfg(windows)]
fn is_user_facing(pid: u32) -> bool {
    visible_window::has_visible_window(pid)
}

#[cfg(not(windows))]
fn is_user_facing(_pid: u32) -> bool {
    true
}

#[cfg(windows)]
mod visible_window {
    use windows_sys::Win32::Foundation::{HWND, LPARAM};
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowThreadProcessId, IsWindowVisible,
    };

    struct Search {
        pid: u32,
        found: bool,
    }

    unsafe extern "system" fn visit(hwnd: HWND, lparam: LPARAM) -> i32 {
        // SAFETY: lparam is the &mut Search handed to EnumWindows below, alive
        // for the whole enumeration.
        let search = unsafe { &mut *(lparam as *mut Search) };
        let mut owner = 0u32;
        // SAFETY: hwnd comes from the enumeration; owner is a live local.
        unsafe { GetWindowThreadProcessId(hwnd, &mut owner) };
        if owner == search.pid && unsafe { IsWindowVisible(hwnd) } != 0 {
            search.found = true;
            return 0;
        }
        1
    }

    /// True when `pid` owns at least one visible top-level window.
    pub fn has_visible_window(pid: u32) -> bool {
        let mut search = Search { pid, found: false };
        // SAFETY: EnumWindows calls `visit` synchronously; the pointer does
        // not outlive this frame. A stopped enumeration reports failure, so
        // the return value is ignored in favour of `found`.
        unsafe {
            EnumWindows(Some(visit), &mut search as *mut Search as LPARAM);
        }
        search.found
    }
}

#[cfg(windows)]
fn platform_system_roots() -> Vec<String> {
    let root = std::env::var("SystemRoot").unwrap_or_else(|_| "C:\\Windows".to_string());
    vec![format!("{}\\", root.trim_end_matches('\\').to_lowercase())]
}

#[cfg(not(windows))]
fn platform_system_roots() -> Vec<String> {
    Vec::new()
}
