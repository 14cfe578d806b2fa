//! Drawing.

use ratatui::{
    Frame,
    prelude::*,
    widgets::{Block, Borders, Paragraph, Row, Table, TableState, Wrap},
};

use crate::{
    events::Screen,
    generate::FlowState,
    input,
    jobs::{JobStatus, Property, ReportJob},
    layout,
    shortcuts::Shortcuts,
};

use super::App;

pub fn draw(f: &mut Frame, app: &App) {
    let main_layout = layout::create_main_layout(f.area());
    let body = layout::create_body_layout(main_layout.body);
    let rows = app.rows();

    draw_properties(f, app, &rows, body.properties_table);
    draw_jobs(f, &app.jobs, body.jobs_table);

    let info_text = match app.ui.screen {
        Screen::Branding => branding_info_text(app),
        Screen::Main => main_info_text(app, rows.get(app.ui.selected)),
    };
    let info_panel = Paragraph::new(info_text)
        .block(Block::default().borders(Borders::ALL).title("INFO"))
        .wrap(Wrap { trim: true });
    f.render_widget(info_panel, body.info_panel);

    let help_bar = Paragraph::new(help_text(app.ui.screen, &app.shortcuts))
        .block(Block::default().borders(Borders::ALL).title("HELP"))
        .wrap(Wrap { trim: true });
    f.render_widget(help_bar, main_layout.help_bar);

    f.render_widget(status_bar(app, rows.len()), main_layout.status_bar);

    if let Some(state) = &app.input_box {
        input::render_input_box(f, state);
    }
}

fn draw_properties(f: &mut Frame, app: &App, rows: &[Property], area: Rect) {
    let table_rows = rows.iter().map(|p| {
        let report = if p.optimistic {
            "creating...".to_string()
        } else {
            report_cell(app, &p.id)
        };
        let row = Row::new(vec![
            p.address_common_name.clone(),
            p.suburb.clone(),
            report,
        ]);
        if p.optimistic {
            row.style(Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC))
        } else {
            row
        }
    });

    let table = Table::new(
        table_rows,
        [
            Constraint::Min(20),
            Constraint::Length(14),
            Constraint::Length(22),
        ],
    )
    .block(Block::default().borders(Borders::ALL).title("PROPERTIES"))
    .header(Row::new(vec!["address", "suburb", "report"]).bold())
    .row_highlight_style(
        Style::default()
            .bg(Color::Rgb(255, 140, 0))
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    );

    let mut state = TableState::default();
    if !rows.is_empty() {
        state.select(Some(app.ui.selected));
    }
    f.render_stateful_widget(table, area, &mut state);
}

/// Short report status for a property row: running flow first, then tracker.
fn report_cell(app: &App, property_id: &str) -> String {
    if let Some(update) = app.flows.get(property_id) {
        match &update.state {
            FlowState::Submitting { attempt } | FlowState::Retrying { attempt } => {
                return format!("starting (#{attempt})");
            }
            FlowState::Polling { progress, .. } => return format!("generating {progress}%"),
            FlowState::Completed { .. } => return "ready".into(),
            FlowState::FailedFinal { .. } => return "failed".into(),
            FlowState::TimedOut { .. } => return "timed out".into(),
        }
    }
    match app.job_for(property_id) {
        Some(job) => job_cell(job),
        None => "-".into(),
    }
}

fn job_cell(job: &ReportJob) -> String {
    match job.status {
        JobStatus::Pending => "queued".into(),
        JobStatus::Processing => format!("generating {}%", job.progress),
        JobStatus::Completed => "ready".into(),
        JobStatus::Failed => "failed".into(),
    }
}

fn draw_jobs(f: &mut Frame, jobs: &[ReportJob], area: Rect) {
    let rows = jobs.iter().map(|j| {
        let detail = j
            .error
            .clone()
            .or_else(|| j.message.clone())
            .unwrap_or_default();
        let style = match j.status {
            JobStatus::Completed => Style::default().fg(Color::Green),
            JobStatus::Failed => Style::default().fg(Color::Red),
            _ => Style::default(),
        };
        Row::new(vec![
            j.property_id.clone(),
            j.status.label().to_string(),
            j.stage.clone().unwrap_or_else(|| "-".into()),
            format!("{}%", j.progress),
            detail,
        ])
        .style(style)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(11),
            Constraint::Length(15),
            Constraint::Length(5),
            Constraint::Min(10),
        ],
    )
    .block(Block::default().borders(Borders::ALL).title("REPORT JOBS"))
    .header(Row::new(vec!["property", "status", "stage", "%", "message"]).bold());
    f.render_widget(table, area);
}

fn main_info_text(app: &App, selected: Option<&Property>) -> String {
    let mut lines = vec![];
    match selected {
        Some(p) => {
            lines.push(format!("Address: {}", p.address_common_name));
            if !p.address_line.is_empty() {
                lines.push(format!("{}, {} {} {}", p.address_line, p.suburb, p.state, p.postcode));
            }
            lines.push(format!("ID: {}", p.id));
            if let Some(update) = app.flows.get(&p.id) {
                lines.push(format!("Report: {}", update.text));
            }
            if let Some(url) = app.pdf_url_for(&p.id) {
                lines.push(format!("PDF: {url}"));
            }
        }
        None => lines.push("No property selected".into()),
    }

    lines.push(String::new());
    lines.push(format!(
        "Company: {}",
        app.cfg.branding.company_name().unwrap_or_else(|| "-".into())
    ));
    lines.push(String::new());
    lines.push("Log:".into());
    let start = app.ui.log.len().saturating_sub(8);
    lines.extend(app.ui.log[start..].iter().cloned());
    lines.join("\n")
}

fn branding_info_text(app: &App) -> String {
    format!(
        "Branding printed on generated reports\n\nCompany name: {}\nLogo URL: {}\n\nSaved values are sent with every new report request.",
        app.company_name, app.company_logo_url
    )
}

fn status_bar(app: &App, row_count: usize) -> Paragraph<'static> {
    let screen_name = match app.ui.screen {
        Screen::Main => "Main",
        Screen::Branding => "Branding",
    };
    let active = app.jobs.iter().filter(|j| !j.status.is_terminal()).count();
    let summary = format!("Properties: {row_count}, active reports: {active}");

    let text = match &app.ui.error {
        Some(err) => format!("[{screen_name}] {summary} | ERROR: {err}"),
        None => format!("[{screen_name}] {summary} | {}", app.ui.status),
    };
    let bar = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("STATUS"))
        .wrap(Wrap { trim: true });
    if app.ui.error.is_some() {
        bar.style(Style::default().fg(Color::Red))
    } else {
        bar
    }
}

fn help_text(screen: Screen, sc: &Shortcuts) -> String {
    match screen {
        Screen::Main => format!(
            "{}: quit | {}: refresh | {}: new property | {}: generate report | {}: open PDF | {}: branding | {}/{}: navigate",
            keys(&sc.main.quit),
            keys(&sc.main.refresh),
            keys(&sc.main.new_property),
            keys(&sc.main.generate),
            keys(&sc.main.open_pdf),
            keys(&sc.main.branding),
            keys(&sc.main.up),
            keys(&sc.main.down),
        ),
        Screen::Branding => format!(
            "{}: company name | {}: logo URL | {}: save | {}: cancel",
            keys(&sc.branding.company_name),
            keys(&sc.branding.logo_url),
            keys(&sc.branding.save),
            keys(&sc.branding.cancel),
        ),
    }
}

fn keys(list: &[String]) -> String {
    list.join("/")
}
