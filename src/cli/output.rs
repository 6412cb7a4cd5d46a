use std::io::{self, Write};

use crate::volume::{MountStatus, VolumeEntry};

/// Result of writing to an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputStatus {
    /// Write completed.
    Written,
    /// Stream was closed by the reader.
    BrokenPipe,
}

fn map_result(result: io::Result<()>) -> io::Result<OutputStatus> {
    match result {
        Ok(()) => Ok(OutputStatus::Written),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(OutputStatus::BrokenPipe),
        Err(error) => Err(error),
    }
}

fn write_line(handle: &mut impl Write, text: &str) -> io::Result<OutputStatus> {
    map_result(
        handle
            .write_all(text.as_bytes())
            .and_then(|_| handle.write_all(b"\n"))
            .and_then(|_| handle.flush()),
    )
}

/// Writes text and a newline to stdout.
pub(crate) fn stdout_line(text: &str) -> io::Result<OutputStatus> {
    write_line(&mut io::stdout().lock(), text)
}

/// Writes text and a newline to stderr.
pub(crate) fn stderr_line(text: &str) -> io::Result<OutputStatus> {
    write_line(&mut io::stderr().lock(), text)
}

const TABLE_HEADERS: [&str; 4] = ["NAME", "TYPE", "MOUNTED", "MOUNT PATH"];

/// Renders volume entries as an aligned plain-text table.
pub(crate) fn render_volume_table(entries: &[VolumeEntry]) -> String {
    let rows = entries
        .iter()
        .map(|entry| {
            let mount_path = match &entry.status {
                MountStatus::Mounted(path) => path.display().to_string(),
                MountStatus::NotMounted | MountStatus::Unknown => "-".to_owned(),
            };
            [
                entry.name.to_string(),
                entry.volume_type.to_string(),
                entry.status.label().to_owned(),
                mount_path,
            ]
        })
        .collect::<Vec<_>>();

    let mut widths = TABLE_HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(format_row(&TABLE_HEADERS.map(str::to_owned), &widths));
    for row in &rows {
        lines.push(format_row(row, &widths));
    }
    lines.join("\n")
}

fn format_row(cells: &[String; 4], widths: &[usize; 4]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_owned()
}
