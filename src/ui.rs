//! TUI rendering for the pickup screen.
//!
//! Left: a map canvas centred on the pickup pin with the user's position.
//! Right: pickup address, ETA, position tier and distance, with a help bar
//! underneath. A permission prompt is drawn over everything when location
//! access was refused.

use ratatui::{
    prelude::*,
    widgets::{canvas::*, *},
};

use ratatui::text::Line;

use crate::app::App;
use crate::models::{EtaEstimate, FixSource};

const SPINNER: [&str; 4] = ["◐", "◓", "◑", "◒"];

/// Renders one frame of the TUI based on current application state.
pub fn render(f: &mut Frame, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(f.size());

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[0]);

    render_map(f, app, chunks[0]);
    render_details(f, app, chunks[1]);
    render_help(f, rows[1]);

    if app.show_permission_prompt {
        render_permission_prompt(f, app);
    }
}

fn render_map(f: &mut Frame, app: &App, area: Rect) {
    let centre = app.pickup;
    let span = app.map_span_deg;

    let canvas = Canvas::default()
        .block(
            Block::bordered()
                .title(" Pickup ")
                .border_type(BorderType::Rounded),
        )
        .marker(symbols::Marker::Braille)
        .x_bounds([centre.longitude - span, centre.longitude + span])
        .y_bounds([centre.latitude - span, centre.latitude + span])
        .paint(|ctx| {
            ctx.draw(&Map {
                color: Color::Rgb(50, 50, 50),
                resolution: MapResolution::High,
            });

            let label_style = Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::DIM);
            ctx.print(
                centre.longitude,
                centre.latitude + span * 0.9,
                Line::from(Span::styled("N", label_style)),
            );

            if let Some(fix) = app.user_fix {
                let style = Style::default().fg(source_color(fix.source));
                ctx.print(
                    fix.position.longitude,
                    fix.position.latitude,
                    Line::from(Span::styled(" ⌖ ", style)),
                );
            }

            ctx.print(
                centre.longitude,
                centre.latitude,
                Line::from(Span::styled(
                    " ▼ ",
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                )),
            );
        });

    f.render_widget(canvas, area);
}

fn render_details(f: &mut Frame, app: &App, area: Rect) {
    let bold = Style::default().add_modifier(Modifier::BOLD);

    let address_style = if app.address_resolved {
        Style::default().fg(Color::White)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let mut lines = vec![
        Line::from(Span::styled("PICKUP", bold)),
        Line::from(Span::styled(app.address_text.as_str(), address_style)),
        Line::from(""),
        Line::from(Span::styled("ETA", bold)),
        eta_line(app.eta.as_ref()),
    ];

    if let Some(eta) = &app.eta {
        if let Some(distance) = &eta.distance_text {
            lines.push(Line::from(Span::styled(
                format!("driver is {} away", distance),
                Style::default().fg(Color::DarkGray),
            )));
        }
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("LOCATION", bold)));
    lines.push(location_line(app));

    if let Some(distance) = app.distance_to_pickup() {
        lines.push(Line::from(vec![
            Span::raw("pin is "),
            Span::styled(distance, Style::default().fg(Color::Cyan)),
            Span::raw(" from you"),
        ]));
    }

    if let Some(error) = &app.location_error {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            error.as_str(),
            Style::default().fg(Color::Red),
        )));
    }

    if let Some(confirmed) = &app.confirmed_pickup {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("✔ Pickup set: {}", confirmed),
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )));
    }

    let panel = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .title(" Request a Tow ")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .padding(Padding::new(2, 2, 1, 1)),
        );
    f.render_widget(panel, area);
}

fn eta_line(eta: Option<&EtaEstimate>) -> Line<'static> {
    match eta {
        Some(eta) if eta.is_live() => Line::from(Span::styled(
            eta.duration_text.clone(),
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )),
        Some(eta) => Line::from(vec![
            Span::styled(eta.duration_text.clone(), Style::default().fg(Color::Yellow)),
            Span::styled(" (estimate)", Style::default().fg(Color::DarkGray)),
        ]),
        None => Line::from(Span::styled("…", Style::default().fg(Color::DarkGray))),
    }
}

fn location_line(app: &App) -> Line<'static> {
    let mut spans = match app.user_fix {
        Some(fix) => vec![Span::styled(
            fix.source.label(),
            Style::default().fg(source_color(fix.source)),
        )],
        None => vec![Span::styled("UNKNOWN", Style::default().fg(Color::DarkGray))],
    };
    if app.is_locating {
        let frame = SPINNER[app.tick_count % SPINNER.len()];
        spans.push(Span::raw(format!("  {} locating", frame)));
    }
    Line::from(spans)
}

fn source_color(source: FixSource) -> Color {
    match source {
        FixSource::Gps => Color::Green,
        FixSource::Network => Color::Cyan,
        FixSource::Cached => Color::Yellow,
        FixSource::Fallback => Color::DarkGray,
    }
}

fn render_help(f: &mut Frame, area: Rect) {
    let help = Paragraph::new(" ←↑↓→/hjkl move pin   g locate me   c confirm pickup   q quit")
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(help, area);
}

fn render_permission_prompt(f: &mut Frame, app: &App) {
    let area = centered_rect(f.size(), 50, 7);
    let message = app
        .location_error
        .as_deref()
        .unwrap_or("Location access is turned off.");
    let prompt = Paragraph::new(vec![
        Line::from(Span::styled(
            message,
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("You can still move the pin to set your pickup."),
        Line::from(Span::styled(
            "Esc to dismiss",
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true })
    .block(
        Block::default()
            .title(" Location Permission ")
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded),
    );
    f.render_widget(Clear, area);
    f.render_widget(prompt, area);
}

fn centered_rect(area: Rect, percent_x: u16, height: u16) -> Rect {
    let width = (u32::from(area.width) * u32::from(percent_x.min(100)) / 100) as u16;
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
