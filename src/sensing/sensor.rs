use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use thiserror::Error;

use super::types::ProcessInfo;

const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("process {0} not found")]
    NotFound(u32),

    #[error("process enumeration failed: {0}")]
    Enumeration(String),
}

/// Platform process enumeration.
///
/// Fields the OS will not reveal (an access-denied exe path, for example) come
/// back empty instead of failing the whole call.
pub trait ProcessSensor: Send + Sync {
    fn all_processes(&self) -> Result<Vec<ProcessInfo>, SensorError>;

    /// Resolves a single pid with the same precision as `all_processes`.
    fn process_by_pid(&self, pid: u32) -> Result<ProcessInfo, SensorError>;
}

/// Production sensor backed by `sysinfo`, with a platform-specific lookup of
/// the precise creation time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoSensor;

impl SysinfoSensor {
    pub fn new() -> Self {
        Self
    }
}

fn refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet)
}

impl ProcessSensor for SysinfoSensor {
    fn all_processes(&self) -> Result<Vec<ProcessInfo>, SensorError> {
        // A fresh System per call: a long-lived one keeps exited processes
        // around until the next full refresh.
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::All, refresh_kind());

        if system.processes().is_empty() {
            return Err(SensorError::Enumeration(
                "no processes visible to the current user".into(),
            ));
        }

        let boot_time = System::boot_time();
        Ok(system
            .processes()
            .iter()
            .filter(|(_, process)| is_process(process))
            .map(|(pid, process)| to_process_info(*pid, process, boot_time))
            .collect())
    }

    fn process_by_pid(&self, pid: u32) -> Result<ProcessInfo, SensorError> {
        let target = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), refresh_kind());

        system
            .process(target)
            .filter(|process| is_process(process))
            .map(|process| to_process_info(target, process, System::boot_time()))
            .ok_or(SensorError::NotFound(pid))
    }
}

/// sysinfo lists Linux tasks alongside processes; threads carry the thread
/// name and the owning pid as parent.
fn is_process(process: &Process) -> bool {
    process.thread_kind().is_none()
}

fn to_process_info(pid: Pid, process: &Process, boot_time: u64) -> ProcessInfo {
    let pid = pid.as_u32();
    let coarse_ns = process.start_time().saturating_mul(NANOS_PER_SEC);

    ProcessInfo {
        pid,
        parent_pid: process.parent().map(|parent| parent.as_u32()).unwrap_or(0),
        start_time_ns: platform::precise_start_time_ns(pid, boot_time).unwrap_or(coarse_ns),
        name: process.name().to_string_lossy().into_owned(),
        exe_path: process
            .exe()
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use super::NANOS_PER_SEC;

    /// Creation time from `/proc/<pid>/stat` (clock ticks since boot).
    pub fn precise_start_time_ns(pid: u32, boot_time: u64) -> Option<u64> {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let ticks = parse_start_ticks(&stat)?;
        // SAFETY: sysconf has no preconditions.
        let ticks_per_sec = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if ticks_per_sec <= 0 {
            return None;
        }
        let ticks_per_sec = ticks_per_sec as u64;
        let since_boot_ns = ticks
            .checked_mul(NANOS_PER_SEC)?
            .checked_div(ticks_per_sec)?;
        boot_time
            .checked_mul(NANOS_PER_SEC)?
            .checked_add(since_boot_ns)
    }

    /// Field 22 of the stat line. The command name (field 2) may contain
    /// spaces and parentheses, so parsing starts after the last ')'.
    pub fn parse_start_ticks(stat: &str) -> Option<u64> {
        let rest = &stat[stat.rfind(')')? + 1..];
        // rest begins at field 3 (state); field 22 is 19 further.
        rest.split_whitespace().nth(19)?.parse().ok()
    }
}

#[cfg(windows)]
mod platform {
    use windows_sys::Win32::Foundation::{CloseHandle, FILETIME};
    use windows_sys::Win32::System::Threading::{
        GetProcessTimes, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    /// 100ns intervals between 1601-01-01 and 1970-01-01.
    const EPOCH_DIFFERENCE_100NS: u64 = 116_444_736_000_000_000;

    pub fn precise_start_time_ns(pid: u32, _boot_time: u64) -> Option<u64> {
        let empty = FILETIME {
            dwLowDateTime: 0,
            dwHighDateTime: 0,
        };
        let (mut creation, mut exit, mut kernel, mut user) = (empty, empty, empty, empty);

        // SAFETY: the handle is checked for null and closed on every path; the
        // FILETIME out-pointers reference live locals.
        let ok = unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return None;
            }
            let ok = GetProcessTimes(handle, &mut creation, &mut exit, &mut kernel, &mut user);
            CloseHandle(handle);
            ok
        };
        if ok == 0 {
            return None;
        }

        let intervals =
            (u64::from(creation.dwHighDateTime) << 32) | u64::from(creation.dwLowDateTime);
        intervals
            .checked_sub(EPOCH_DIFFERENCE_100NS)?
            .checked_mul(100)
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
mod platform {
    pub fn precise_start_time_ns(_pid: u32, _boot_time: u64) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_resolvable() {
        let sensor = SysinfoSensor::new();
        let me = sensor.process_by_pid(std::process::id()).unwrap();
        assert_eq!(me.pid, std::process::id());
        assert!(me.start_time_ns > 0);
    }

    #[test]
    fn bulk_and_single_lookup_agree_on_identity() {
        let sensor = SysinfoSensor::new();
        let me = sensor.process_by_pid(std::process::id()).unwrap();
        let all = sensor.all_processes().unwrap();
        let listed = all
            .iter()
            .find(|process| process.pid == me.pid)
            .expect("current process listed");
        assert_eq!(listed.unique_key(), me.unique_key());
    }

    #[test]
    fn unknown_pid_is_not_found() {
        let sensor = SysinfoSensor::new();
        assert!(matches!(
            sensor.process_by_pid(u32::MAX - 1),
            Err(SensorError::NotFound(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn worker_threads_are_not_listed_as_processes() {
        use std::sync::mpsc;

        const NAMES: [&str; 4] = ["sampler-a", "sampler-b", "sampler-c", "sampler-d"];

        let (tid_tx, tid_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Arc::new(std::sync::Mutex::new(release_rx));
        let workers: Vec<_> = NAMES
            .iter()
            .map(|name| {
                let tid_tx = tid_tx.clone();
                let release_rx = release_rx.clone();
                std::thread::Builder::new()
                    .name(name.to_string())
                    .spawn(move || {
                        // SAFETY: gettid has no preconditions.
                        let tid = unsafe { libc::syscall(libc::SYS_gettid) } as u32;
                        tid_tx.send(tid).unwrap();
                        let _ = release_rx.lock().unwrap().recv();
                    })
                    .unwrap()
            })
            .collect();
        let tids: Vec<u32> = (0..NAMES.len()).map(|_| tid_rx.recv().unwrap()).collect();

        let sensor = SysinfoSensor::new();
        let all = sensor.all_processes().unwrap();
        let own = std::process::id();

        assert_eq!(all.iter().filter(|process| process.pid == own).count(), 1);
        assert!(all.iter().all(|process| !tids.contains(&process.pid)));
        assert!(all
            .iter()
            .filter(|process| process.parent_pid == own)
            .all(|process| !NAMES.contains(&process.name.as_str())));

        drop(release_tx);
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stat_parsing_skips_command_with_spaces() {
        let stat = "1234 (my (odd) proc) S 1 1234 1234 0 -1 4194560 100 0 0 0 \
                    1 2 0 0 20 0 1 0 987654 1000000 100 18446744073709551615";
        assert_eq!(platform::parse_start_ticks(stat), Some(987654));
    }
}
