//! Table rendering and formatting for `ls`.
//!
//! Column widths adapt to the terminal: the command column absorbs whatever
//! is left after the fixed-width columns, and long names are capped so one
//! verbose task cannot squeeze the command out of view.

use std::os::unix::io::AsRawFd;

use crate::task::{unix_now, TaskRecord, TaskStatus};

const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const RESET: &str = "\x1b[0m";

const ID_WIDTH: usize = 4;
const STATUS_WIDTH: usize = 7;
const UPTIME_WIDTH: usize = 6;
const PID_WIDTH: usize = 7;
const NAME_WIDTH_MAX: usize = 16;

/// Renders the task table. `color` adds ANSI status colors; `width` is the
/// total character budget per row.
pub fn render_table(rows: &[(TaskRecord, TaskStatus)], width: usize, color: bool) -> String {
    let now = unix_now();
    let name_width = rows
        .iter()
        .filter_map(|(rec, _)| rec.name.as_deref())
        .map(str::len)
        .max()
        .unwrap_or(0)
        .clamp(4, NAME_WIDTH_MAX);
    let fixed = ID_WIDTH + name_width + STATUS_WIDTH + UPTIME_WIDTH + PID_WIDTH + 5;
    let command_width = width.saturating_sub(fixed).max(10);

    let mut out = String::new();
    push_row(
        &mut out,
        name_width,
        command_width,
        "ID",
        "NAME",
        "COMMAND",
        "STATUS",
        "UPTIME",
        "PID",
        None,
    );
    for (record, status) in rows {
        let (status_text, status_color) = match status {
            TaskStatus::Running => ("running", GREEN),
            TaskStatus::Stopped => ("stopped", RED),
        };
        let uptime = match status {
            TaskStatus::Running => format_duration(record.uptime_secs(now)),
            TaskStatus::Stopped => "-".to_string(),
        };
        let pid = match (status, record.pid) {
            (TaskStatus::Running, Some(pid)) => pid.to_string(),
            _ => "-".to_string(),
        };
        push_row(
            &mut out,
            name_width,
            command_width,
            &record.id.to_string(),
            record.name.as_deref().unwrap_or("-"),
            &record.command_line(),
            status_text,
            &uptime,
            &pid,
            color.then_some(status_color),
        );
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn push_row(
    out: &mut String,
    name_width: usize,
    command_width: usize,
    id: &str,
    name: &str,
    command: &str,
    status: &str,
    uptime: &str,
    pid: &str,
    status_color: Option<&str>,
) {
    let name = truncate(name, name_width);
    let command = truncate(command, command_width);
    let status_cell = match status_color {
        Some(color) => format!("{color}{status:<STATUS_WIDTH$}{RESET}"),
        None => format!("{status:<STATUS_WIDTH$}"),
    };
    out.push_str(&format!(
        "{id:<ID_WIDTH$} {name:<name_width$} {command:<command_width$} \
         {status_cell} {uptime:<UPTIME_WIDTH$} {pid:<PID_WIDTH$}\n"
    ));
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

/// Formats a duration the way uptimes read at a glance: only the coarsest
/// nonzero unit.
pub fn format_duration(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    if days > 0 {
        format!("{days}d")
    } else if hours > 0 {
        format!("{hours}h")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{}s", seconds % 60)
    }
}

/// Terminal width of stdout, or 80 when not a terminal.
pub fn terminal_width() -> usize {
    let fd = std::io::stdout().as_raw_fd();
    let mut size: libc::winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut size) };
    if rc == 0 && size.ws_col > 0 {
        size.ws_col as usize
    } else {
        80
    }
}

/// Whether stdout is a terminal (controls color output).
pub fn stdout_is_tty() -> bool {
    unsafe { libc::isatty(std::io::stdout().as_raw_fd()) == 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(id: u64, name: Option<&str>, started_at: u64) -> TaskRecord {
        TaskRecord {
            id,
            name: name.map(Into::into),
            command: vec!["sleep".into(), "100".into()],
            working_dir: PathBuf::from("/"),
            created_at: started_at,
            started_at,
            pid: Some(4321),
            starttime: Some(1),
            stdout_path: PathBuf::from("out.log"),
            stderr_path: PathBuf::from("err.log"),
        }
    }

    #[test]
    fn coarsest_unit_only() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(60), "1m");
        assert_eq!(format_duration(3_599), "59m");
        assert_eq!(format_duration(3_600), "1h");
        assert_eq!(format_duration(86_400 * 2 + 3_600), "2d");
    }

    #[test]
    fn table_has_header_and_one_row_per_task() {
        let rows = vec![
            (record(1, Some("web"), 0), TaskStatus::Running),
            (record(2, None, 0), TaskStatus::Stopped),
        ];
        let table = render_table(&rows, 80, false);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("web"));
        assert!(lines[1].contains("running"));
        assert!(lines[2].contains("stopped"));
        // Stopped tasks show no uptime or pid.
        assert!(!lines[2].contains("4321"));
    }

    #[test]
    fn long_commands_are_truncated_to_width() {
        let mut rec = record(1, None, 0);
        rec.command = vec!["echo".into(), "x".repeat(500)];
        let table = render_table(&[(rec, TaskStatus::Running)], 60, false);
        for line in table.lines() {
            assert!(line.chars().count() <= 70, "row wider than budget: {line}");
        }
    }

    #[test]
    fn color_wraps_only_the_status_cell() {
        let rows = vec![(record(1, None, 0), TaskStatus::Running)];
        let table = render_table(&rows, 80, true);
        assert!(table.contains(GREEN));
        assert!(table.contains(RESET));
        assert!(!table.lines().next().unwrap().contains(GREEN));
    }
}
