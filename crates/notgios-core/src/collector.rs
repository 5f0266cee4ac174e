//! The collector interface (spec §4.10, C10) and a concrete `/proc`-backed
//! implementation, grounded on the original `worker.c` collection routines.

use std::fs;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::sys::resource::{getrlimit, setrlimit, Resource};

use crate::child;
use crate::error::CollectOutcome;
use crate::registry::Registry;
use crate::task::{MetricType, TaskDescriptor, TaskOptionType, TaskType};

/// A single collection result, independent of the wire `message` framing
/// (the worker assembles the final [`crate::task::Report`] from this plus
/// the descriptor).
#[derive(Debug, Clone, Default)]
pub struct CollectSample {
    pub value: f64,
    pub percentage: f64,
    pub time_taken: u64,
    /// Set alongside `CollectOutcome::Success` for a non-fatal error report
    /// (e.g. `PROC_NOT_RUNNING`), or alongside a terminal outcome for the
    /// `FATAL CAUSE <cause>` message.
    pub cause: Option<&'static str>,
}

/// The adapter workers call once per scheduling tick (spec §4.10).
pub trait Collector: Send + Sync {
    fn collect_once(&self, descriptor: &TaskDescriptor, registry: &Registry) -> (CollectOutcome, CollectSample);
}

/// Grounded on `worker.c`'s `/proc`-based process, directory and system-wide
/// collectors. Disk, swap and load tasks were left as `TODO` stubs in the
/// original and are reported as [`CollectOutcome::UnsupportedTask`] here.
pub struct ProcCollector;

impl Collector for ProcCollector {
    fn collect_once(&self, descriptor: &TaskDescriptor, registry: &Registry) -> (CollectOutcome, CollectSample) {
        match descriptor.task_type {
            TaskType::Process => collect_process(descriptor, registry),
            TaskType::Directory => collect_directory(descriptor),
            TaskType::Total => collect_total(descriptor),
            TaskType::Disk | TaskType::Swap | TaskType::Load => {
                (CollectOutcome::UnsupportedTask, CollectSample::default())
            }
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn collect_process(descriptor: &TaskDescriptor, registry: &Registry) -> (CollectOutcome, CollectSample) {
    let keepalive = descriptor.keepalive();
    let pidfile = descriptor.option(TaskOptionType::Pidfile).unwrap_or("");

    let pid = if keepalive {
        let runcmd = descriptor.option(TaskOptionType::Runcmd).unwrap_or("");
        match child::ensure_keepalive_child(&descriptor.id, pidfile, runcmd, registry) {
            Ok(pid) => pid,
            Err(_) => {
                return (
                    CollectOutcome::TaskFatal,
                    CollectSample { cause: Some("NO_PIDFILE"), ..Default::default() },
                )
            }
        }
    } else {
        match child::probe_watched_pid(pidfile) {
            Ok(pid) => pid,
            Err("NO_PIDFILE") => {
                return (
                    CollectOutcome::TaskFatal,
                    CollectSample { cause: Some("NO_PIDFILE"), ..Default::default() },
                )
            }
            Err(_) => {
                return (
                    CollectOutcome::Success,
                    CollectSample { cause: Some("PROC_NOT_RUNNING"), ..Default::default() },
                )
            }
        }
    };

    match descriptor.metric {
        MetricType::Memory => match process_memory(pid.as_raw()) {
            Some(value) => (
                CollectOutcome::Success,
                CollectSample { value, time_taken: now_secs(), ..Default::default() },
            ),
            None if keepalive && !statm_supported() => {
                (CollectOutcome::TaskFatal, CollectSample { cause: Some("UNSUPPORTED_DISTRO"), ..Default::default() })
            }
            None => (
                CollectOutcome::Success,
                CollectSample { cause: Some("PROC_NOT_RUNNING"), ..Default::default() },
            ),
        },
        MetricType::Cpu => match process_cpu_percent(pid.as_raw()) {
            Some(percentage) => (
                CollectOutcome::Success,
                CollectSample { percentage, time_taken: now_secs(), ..Default::default() },
            ),
            None if !stat_supported() => {
                (CollectOutcome::TaskFatal, CollectSample { cause: Some("UNSUPPORTED_DISTRO"), ..Default::default() })
            }
            None => (
                CollectOutcome::Success,
                CollectSample { cause: Some("PROC_NOT_RUNNING"), ..Default::default() },
            ),
        },
        MetricType::Io => (CollectOutcome::UnsupportedTask, CollectSample::default()),
        MetricType::None => (CollectOutcome::GenericError, CollectSample::default()),
    }
}

fn process_memory(pid: i32) -> Option<f64> {
    let contents = fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let usage: f64 = contents.split_whitespace().next()?.parse().ok()?;
    Some(usage)
}

fn statm_supported() -> bool {
    fs::metadata("/proc/self/statm").is_ok()
}

fn stat_supported() -> bool {
    read_pid_cpu_ticks(std::process::id() as i32).is_some() && read_global_cpu_ticks().is_some()
}

/// `(utime, stime)` ticks from field 14/15 of `/proc/<pid>/stat`.
fn read_pid_cpu_ticks(pid: i32) -> Option<(u64, u64)> {
    let contents = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Field 2 (`comm`) is parenthesized and may itself contain spaces/parens;
    // skip past the last ')' before splitting the rest on whitespace.
    let after_comm = contents.rsplit_once(')')?.1;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // Fields after comm are numbered from 3; utime is field 14, stime is 15.
    let utime: u64 = fields.get(14 - 3)?.parse().ok()?;
    let stime: u64 = fields.get(15 - 3)?.parse().ok()?;
    Some((utime, stime))
}

/// `(user, nice, system, idle, iowait)` ticks from `/proc/stat`'s first line.
fn read_global_cpu_ticks() -> Option<(u64, u64, u64, u64, u64)> {
    let contents = fs::read_to_string("/proc/stat").ok()?;
    let first_line = contents.lines().next()?;
    let mut fields = first_line.split_whitespace().skip(1);
    Some((
        fields.next()?.parse().ok()?,
        fields.next()?.parse().ok()?,
        fields.next()?.parse().ok()?,
        fields.next()?.parse().ok()?,
        fields.next()?.parse().ok()?,
    ))
}

fn process_cpu_percent(pid: i32) -> Option<f64> {
    let (start_user, start_sys) = read_pid_cpu_ticks(pid)?;
    let (su, sn, ss, si, sio) = read_global_cpu_ticks()?;
    let start_pid_total = start_user + start_sys;
    let start_global_total = su + sn + ss + si + sio;

    thread::sleep(Duration::from_secs(1));

    let (end_user, end_sys) = read_pid_cpu_ticks(pid)?;
    let (eu, en, es, ei, eio) = read_global_cpu_ticks()?;
    let end_pid_total = end_user + end_sys;
    let end_global_total = eu + en + es + ei + eio;

    let global_delta = end_global_total.saturating_sub(start_global_total);
    if global_delta == 0 {
        return Some(0.0);
    }
    Some((end_pid_total.saturating_sub(start_pid_total) as f64) * 100.0 / global_delta as f64)
}

fn collect_directory(descriptor: &TaskDescriptor) -> (CollectOutcome, CollectSample) {
    let Some(path) = descriptor.option(TaskOptionType::Path) else {
        return (
            CollectOutcome::TaskFatal,
            CollectSample { cause: Some("TASK_MISSING_OPTIONS"), ..Default::default() },
        );
    };

    match directory_size(path, true) {
        Ok(size) => (
            CollectOutcome::Success,
            CollectSample { value: size as f64, time_taken: now_secs(), ..Default::default() },
        ),
        Err(DirError::NotAccessible) => (
            CollectOutcome::TaskFatal,
            CollectSample { cause: Some("DIR_NOT_ACCESSIBLE"), ..Default::default() },
        ),
        Err(DirError::SubdirNotAccessible) => (
            CollectOutcome::TaskFatal,
            CollectSample { cause: Some("SUBDIR_NOT_ACCESSIBLE"), ..Default::default() },
        ),
        Err(DirError::InfiniteLoop) => (
            CollectOutcome::TaskFatal,
            CollectSample { cause: Some("DIR_INFINITE_LOOP"), ..Default::default() },
        ),
        Err(DirError::NameTooLong) => (
            CollectOutcome::TaskFatal,
            CollectSample { cause: Some("DIR_NAME_TOO_LONG"), ..Default::default() },
        ),
        Err(DirError::TooManyFiles) => (
            CollectOutcome::Success,
            CollectSample { cause: Some("TOO_MANY_FILES"), ..Default::default() },
        ),
    }
}

#[derive(Debug)]
enum DirError {
    NotAccessible,
    SubdirNotAccessible,
    InfiniteLoop,
    NameTooLong,
    TooManyFiles,
}

/// Maps a `symlink_metadata`/`read_dir` failure to a cause, the way the
/// original `handle_directory` differentiates by errno (`ELOOP` →
/// infinite-loop, `ENAMETOOLONG` → name-too-long, else not-accessible —
/// `DIR_NOT_ACCESSIBLE` at the watched root, `SUBDIR_NOT_ACCESSIBLE` for a
/// failure partway through the recursive walk).
fn classify_dir_error(e: &std::io::Error, is_root: bool) -> DirError {
    match e.raw_os_error() {
        Some(code) if code == libc::ELOOP => DirError::InfiniteLoop,
        Some(code) if code == libc::ENAMETOOLONG => DirError::NameTooLong,
        _ if is_root => DirError::NotAccessible,
        _ => DirError::SubdirNotAccessible,
    }
}

/// Recursively sums file sizes under `path`. On `EMFILE`, doubles the
/// process's open-file-descriptor limit and retries once, per the original's
/// `getrlimit`/`setrlimit` recovery (spec §9 supplemented feature).
fn directory_size(path: &str, is_root: bool) -> Result<u64, DirError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| classify_dir_error(&e, is_root))?;
    if metadata.is_file() {
        return Ok(metadata.len());
    }
    if !metadata.is_dir() {
        return Ok(0);
    }

    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.raw_os_error() == Some(libc::EMFILE) => {
            raise_nofile_limit().map_err(|_| DirError::TooManyFiles)?;
            return directory_size(path, is_root);
        }
        Err(e) if e.raw_os_error() == Some(libc::ENFILE) => return Err(DirError::TooManyFiles),
        Err(e) => return Err(classify_dir_error(&e, is_root)),
    };

    let mut total = 0u64;
    for entry in entries {
        let entry = entry.map_err(|e| classify_dir_error(&e, false))?;
        total += directory_size(&entry.path().to_string_lossy(), false)?;
    }
    Ok(total)
}

fn raise_nofile_limit() -> nix::Result<()> {
    let (_, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;
    let new_hard = hard.saturating_mul(2);
    setrlimit(Resource::RLIMIT_NOFILE, new_hard, new_hard)
}

fn collect_total(descriptor: &TaskDescriptor) -> (CollectOutcome, CollectSample) {
    match descriptor.metric {
        MetricType::Memory => match total_memory_percent() {
            Some(percentage) => (
                CollectOutcome::Success,
                CollectSample { percentage, time_taken: now_secs(), ..Default::default() },
            ),
            None => (
                CollectOutcome::TaskFatal,
                CollectSample { cause: Some("UNSUPPORTED_DISTRO"), ..Default::default() },
            ),
        },
        MetricType::Cpu => match total_cpu_percent() {
            Some(percentage) => (
                CollectOutcome::Success,
                CollectSample { percentage, time_taken: now_secs(), ..Default::default() },
            ),
            None => (
                CollectOutcome::TaskFatal,
                CollectSample { cause: Some("UNSUPPORTED_DISTRO"), ..Default::default() },
            ),
        },
        MetricType::Io => (CollectOutcome::UnsupportedTask, CollectSample::default()),
        MetricType::None => (CollectOutcome::GenericError, CollectSample::default()),
    }
}

fn total_memory_percent() -> Option<f64> {
    let contents = fs::read_to_string("/proc/meminfo").ok()?;
    let mut total = None;
    let mut available = None;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = rest.split_whitespace().next()?.parse::<f64>().ok();
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = rest.split_whitespace().next()?.parse::<f64>().ok();
        }
    }
    let (total, available) = (total?, available?);
    if total == 0.0 {
        return None;
    }
    Some(available / total)
}

fn total_cpu_percent() -> Option<f64> {
    let (su, sn, ss, si, sio) = read_global_cpu_ticks()?;
    thread::sleep(Duration::from_secs(1));
    let (eu, en, es, ei, eio) = read_global_cpu_ticks()?;

    let start_idle = si + sio;
    let end_idle = ei + eio;
    let start_total = su + sn + ss + si + sio;
    let end_total = eu + en + es + ei + eio;
    let total_delta = end_total.saturating_sub(start_total);
    if total_delta == 0 {
        return Some(0.0);
    }
    Some((total_delta.saturating_sub(end_idle.saturating_sub(start_idle))) as f64 / total_delta as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_memory_reads_self_statm() {
        let value = process_memory(std::process::id() as i32);
        assert!(value.is_some());
    }

    #[test]
    fn total_memory_percent_reads_meminfo() {
        let pct = total_memory_percent();
        assert!(pct.is_some());
        assert!(pct.unwrap() >= 0.0 && pct.unwrap() <= 1.0);
    }

    #[test]
    fn directory_size_sums_a_small_tree() {
        let dir = std::env::temp_dir().join(format!("notgios-test-dir-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.join("b.txt"), b"world!").unwrap();
        let size = directory_size(dir.to_str().unwrap(), true).unwrap();
        assert_eq!(size, 11);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn directory_size_distinguishes_name_too_long_from_not_accessible() {
        let overlong = "x".repeat(5000);
        let err = directory_size(&overlong, true).unwrap_err();
        assert!(matches!(err, DirError::NameTooLong));

        let err = directory_size("/nonexistent/watched/path", true).unwrap_err();
        assert!(matches!(err, DirError::NotAccessible));
    }

    #[test]
    fn directory_size_reports_subdir_not_accessible_for_nested_failures() {
        let dir = std::env::temp_dir().join(format!("notgios-test-subdir-{}", std::process::id()));
        let inner = dir.join("locked");
        std::fs::create_dir_all(&inner).unwrap();
        let mut perms = std::fs::metadata(&inner).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o000);
        std::fs::set_permissions(&inner, perms).unwrap();

        let result = if unsafe { libc::geteuid() } == 0 {
            // root bypasses the permission bits this test relies on.
            None
        } else {
            Some(directory_size(dir.to_str().unwrap(), true).unwrap_err())
        };

        let mut restore = std::fs::metadata(&inner).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut restore, 0o755);
        std::fs::set_permissions(&inner, restore).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        if let Some(err) = result {
            assert!(matches!(err, DirError::SubdirNotAccessible));
        }
    }

    #[test]
    fn collect_directory_reports_fatal_for_missing_path_option() {
        use crate::task::{TaskDescriptor, TaskId};
        let descriptor = TaskDescriptor {
            id: TaskId::new("d1"),
            task_type: TaskType::Directory,
            metric: MetricType::Memory,
            frequency_secs: 5,
            options: vec![],
        };
        let (outcome, sample) = collect_directory(&descriptor);
        assert_eq!(outcome, CollectOutcome::TaskFatal);
        assert_eq!(sample.cause, Some("TASK_MISSING_OPTIONS"));
    }
}
