use std::fmt::Write;

use chrono::{DateTime, Utc};
use comfy_table::Cell;

use crate::actions::{Notice, NoticeLevel};
use crate::api::{ActivityEntry, Build, BuildLogLine, Pipeline, User};
use crate::events::Event;
use crate::sync::{DashboardReport, Detail};
use crate::views::StatusFilter;

use super::styling::{bright, bright_green, bright_red, bright_yellow, cyan, dim, status};
use super::tables::{
    create_table, failure_rate_cell, optional_cell, status_cell, success_rate_cell,
};

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn format_time(time: Option<DateTime<Utc>>) -> Option<String> {
    time.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
}

/// Seconds as `42s`, `3m 07s` or `1h 05m`.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    match (seconds / 3600, (seconds % 3600) / 60, seconds % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, s) => format!("{m}m {s:02}s"),
        (h, m, _) => format!("{h}h {m:02}m"),
    }
}

/// Headline numbers, rates, insights and recent activity.
pub fn render_dashboard(report: &DashboardReport) -> String {
    let mut output = String::new();
    let stats = &report.stats;

    add_section_header(&mut output, "📊", "Overview");
    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n",
        dim("Pipelines:"),
        bright_yellow(stats.pipelines),
        dim("Running:"),
        bright_yellow(stats.running),
        dim("Failed:"),
        bright_red(stats.failed),
        dim("Succeeded:"),
        bright_green(stats.success),
    );

    add_section_header(&mut output, "📈", "Executions");
    let mut rates = create_table(&["Executions", "Success Rate", "Failure Rate"]);
    rates.add_row(vec![
        Cell::new(report.rates.executions),
        success_rate_cell(report.rates.success_rate),
        failure_rate_cell(report.rates.failure_rate),
    ]);
    let _ = writeln!(output, "{rates}\n");

    add_section_header(&mut output, "💡", "Insights");
    for insight in &report.insights {
        let _ = writeln!(output, "  • {}", insight.message());
    }
    output.push('\n');

    add_section_header(&mut output, "🕒", "Recent Activity");
    let builds = &report.builds;
    let _ = writeln!(
        output,
        "  {} {} running, {} succeeded, {} failed",
        dim("Builds:"),
        bright_yellow(builds.running),
        bright_green(builds.success),
        bright_red(builds.failed),
    );
    output.push_str(&builds_table(&report.recent_builds));

    output
}

pub fn render_pipelines(pipelines: &[Pipeline], filter: StatusFilter) -> String {
    if pipelines.is_empty() {
        return match filter {
            StatusFilter::All => format!(
                "{}\n",
                bright_yellow("No pipelines yet. Create one with `pipewatch create`.")
            ),
            filter => format!(
                "{}\n",
                bright_yellow(format!("No {} pipelines.", status_label(filter)))
            ),
        };
    }

    let mut table = create_table(&["ID", "Name", "Status", "Runtime", "Description"]);
    for pipeline in pipelines {
        table.add_row(vec![
            Cell::new(pipeline.id),
            Cell::new(&pipeline.name),
            status_cell(pipeline.status),
            optional_cell(pipeline.runtime.as_deref()),
            optional_cell(pipeline.description.as_deref()),
        ]);
    }
    format!("{table}\n")
}

fn status_label(filter: StatusFilter) -> &'static str {
    match filter {
        StatusFilter::All => "",
        StatusFilter::Running => "running",
        StatusFilter::Success => "successful",
        StatusFilter::Failed => "failed",
    }
}

pub fn render_builds(builds: &[Build]) -> String {
    builds_table(builds)
}

fn builds_table(builds: &[Build]) -> String {
    if builds.is_empty() {
        return format!("{}\n", dim("No builds yet."));
    }

    let mut table = create_table(&["Build", "Pipeline", "Status", "Started", "Duration"]);
    for build in builds {
        table.add_row(vec![
            Cell::new(format!("#{}", build.id)),
            Cell::new(build.pipeline_label()),
            status_cell(build.status),
            optional_cell(format_time(build.started_at)),
            optional_cell(build.duration.map(format_duration)),
        ]);
    }
    format!("{table}\n")
}

/// Stored output of one build, in the order it was written.
pub fn render_build_logs(lines: &[BuildLogLine]) -> String {
    if lines.is_empty() {
        return format!("{}\n", dim("No logs for this build."));
    }

    let mut table = create_table(&["Step", "Time", "Output"]);
    for line in lines {
        table.add_row(vec![
            optional_cell(line.step_index.map(|idx| idx + 1)),
            optional_cell(format_time(line.timestamp)),
            Cell::new(line.text.trim_end()),
        ]);
    }
    format!("{table}\n")
}

pub fn render_activity(entries: &[ActivityEntry]) -> String {
    if entries.is_empty() {
        return format!("{}\n", dim("No recent activity."));
    }

    let mut table = create_table(&["ID", "Time", "Message"]);
    for entry in entries {
        table.add_row(vec![
            Cell::new(entry.id),
            optional_cell(format_time(entry.created_at)),
            Cell::new(&entry.message),
        ]);
    }
    format!("{table}\n")
}

pub fn render_detail(detail: &Detail) -> String {
    let mut output = String::new();

    let Some(pipeline) = &detail.pipeline else {
        let _ = writeln!(output, "{}", bright_red("Pipeline not found."));
        return output;
    };

    add_section_header(&mut output, "🔧", &pipeline.name);
    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n",
        dim("ID:"),
        cyan(pipeline.id),
        dim("Status:"),
        status(pipeline.status),
        dim("Last run:"),
        format_time(pipeline.last_run).unwrap_or_else(|| "never".into()),
        dim("Description:"),
        pipeline.description.as_deref().unwrap_or("—"),
    );

    add_section_header(&mut output, "📋", "Steps");
    if pipeline.steps.is_empty() {
        let _ = writeln!(output, "  {}\n", dim("No steps configured."));
    } else {
        let mut steps = create_table(&["#", "Name", "Command"]);
        for (idx, step) in pipeline.steps.iter().enumerate() {
            steps.add_row(vec![
                Cell::new(idx + 1),
                Cell::new(&step.name),
                Cell::new(&step.cmd),
            ]);
        }
        let _ = writeln!(output, "{steps}\n");
    }

    add_section_header(&mut output, "🕒", "History");
    if pipeline.history.is_empty() {
        let _ = writeln!(output, "  {}\n", dim("No runs yet."));
    } else {
        let mut history = create_table(&["Build", "Date", "Status", "Duration"]);
        for entry in &pipeline.history {
            history.add_row(vec![
                optional_cell(entry.id.map(|id| format!("#{id}"))),
                optional_cell(format_time(entry.date)),
                status_cell(entry.status),
                optional_cell(entry.duration.as_deref()),
            ]);
        }
        let _ = writeln!(output, "{history}\n");
    }

    add_section_header(&mut output, "📜", "Logs");
    if detail.logs.is_empty() {
        let _ = writeln!(output, "  {}", dim("No logs available."));
    } else {
        for line in &detail.logs {
            let _ = writeln!(output, "  {} {line}", dim("│"));
        }
    }

    output
}

pub fn render_notice(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Success => format!("{} {}", bright_green(&notice.title), notice.message),
        NoticeLevel::Error => format!("{} {}", bright_red(&notice.title), notice.message),
    }
}

pub fn render_user(user: &User) -> String {
    let mut output = format!("{} {}", dim("Signed in as"), cyan(user.display_name()));
    if let Some(email) = &user.email {
        let _ = write!(output, " {}", dim(format!("<{email}>")));
    }
    output
}

/// One line per push notification while watching.
pub fn render_event(event: &Event) -> String {
    match event {
        Event::BuildStatusUpdate => format!("{}", bright_yellow("● build status changed")),
        Event::BuildFinished => format!("{}", bright_green("● build finished")),
        Event::BuildLog(line) => format!("{} {line}", dim("│")),
    }
}
