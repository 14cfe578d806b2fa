//! Layout helpers.

use ratatui::prelude::*;

/// Body plus the help and status bars.
pub struct MainLayout {
    pub body: Rect,
    pub help_bar: Rect,
    pub status_bar: Rect,
}

/// Body split into the two tables and the info panel.
pub struct BodyLayout {
    pub properties_table: Rect,
    pub jobs_table: Rect,
    pub info_panel: Rect,
}

pub fn create_main_layout(area: Rect) -> MainLayout {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(area);

    MainLayout {
        body: chunks[0],
        help_bar: chunks[1],
        status_bar: chunks[2],
    }
}

/// Properties (top) and report jobs (bottom) on the left, info on the right.
pub fn create_body_layout(area: Rect) -> BodyLayout {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(area);
    let tables = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(columns[0]);

    BodyLayout {
        properties_table: tables[0],
        jobs_table: tables[1],
        info_panel: columns[1],
    }
}
