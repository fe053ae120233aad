use std::io::{self, IsTerminal, Write};

use chrono::NaiveDate;
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{format_date, format_timestamp};
use crate::filter::StatusGroups;
use crate::task::{Task, TaskStatus};

const DESCRIPTION_WIDTH: usize = 48;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    timezone: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            color: cfg.color && io::stdout().is_terminal(),
            timezone: cfg.timezone,
        }
    }

    /// A renderer that never emits escape codes.
    pub fn plain(timezone: Tz) -> Self {
        Self {
            color: false,
            timezone,
        }
    }

    pub fn print_task_table(&self, tasks: &[Task], today: NaiveDate) -> anyhow::Result<()> {
        self.write_task_table(io::stdout().lock(), tasks, today)
    }

    pub fn print_task_info(&self, task: &Task) -> anyhow::Result<()> {
        self.write_task_info(io::stdout().lock(), task)
    }

    pub fn print_groups(&self, groups: &StatusGroups, today: NaiveDate) -> anyhow::Result<()> {
        self.write_groups(io::stdout().lock(), groups, today)
    }

    #[tracing::instrument(skip(self, out, tasks))]
    pub fn write_task_table<W: Write>(
        &self,
        mut out: W,
        tasks: &[Task],
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Status".to_string(),
            "Due".to_string(),
            "Title".to_string(),
            "Description".to_string(),
        ];

        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(task.id.as_str(), "33"),
                    self.paint_status(task.status),
                    self.due_cell(task, today),
                    task.title.clone(),
                    truncate(&task.description, DESCRIPTION_WIDTH),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        writeln!(out)?;
        writeln!(
            out,
            "{} task{}",
            tasks.len(),
            if tasks.len() == 1 { "" } else { "s" }
        )?;
        Ok(())
    }

    #[tracing::instrument(skip(self, out, task))]
    pub fn write_task_info<W: Write>(&self, mut out: W, task: &Task) -> anyhow::Result<()> {
        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(out, "description {}", task.description)?;
        writeln!(out, "status      {}", self.paint_status(task.status))?;
        writeln!(
            out,
            "due         {}",
            task.due_date.map(format_date).unwrap_or_else(|| "-".to_string())
        )?;
        writeln!(
            out,
            "created     {}",
            format_timestamp(task.created_at, &self.timezone)
        )?;
        Ok(())
    }

    /// The board view: one section per status, always all three.
    #[tracing::instrument(skip(self, out, groups))]
    pub fn write_groups<W: Write>(
        &self,
        mut out: W,
        groups: &StatusGroups,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        for (idx, (status, tasks)) in groups.iter().enumerate() {
            if idx > 0 {
                writeln!(out)?;
            }
            writeln!(out, "{} ({})", self.paint_status(status), tasks.len())?;
            if tasks.is_empty() {
                writeln!(out, "  (none)")?;
                continue;
            }
            for task in tasks {
                let due = task
                    .due_date
                    .map(|_| format!("  due {}", self.due_cell(task, today)))
                    .unwrap_or_default();
                writeln!(
                    out,
                    "  {} {}{}",
                    self.paint(task.id.as_str(), "33"),
                    task.title,
                    due
                )?;
            }
        }
        Ok(())
    }

    fn due_cell(&self, task: &Task, today: NaiveDate) -> String {
        let Some(due) = task.due_date else {
            return String::new();
        };
        let text = format_date(due);
        if due < today && task.status != TaskStatus::Completed {
            self.paint(&text, "31")
        } else {
            text
        }
    }

    fn paint_status(&self, status: TaskStatus) -> String {
        let code = match status {
            TaskStatus::Pending => "36",
            TaskStatus::InProgress => "35",
            TaskStatus::Completed => "32",
        };
        self.paint(status.as_str(), code)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn truncate(text: &str, max_width: usize) -> String {
    let flat = text.replace('\n', " ");
    if UnicodeWidthStr::width(flat.as_str()) <= max_width {
        return flat;
    }

    let mut out = String::new();
    let mut width = 0;
    for ch in flat.chars() {
        let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width > max_width.saturating_sub(1) {
            break;
        }
        width += ch_width;
        out.push(ch);
    }
    out.push('…');
    out
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
