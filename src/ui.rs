// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Frame drawing.
//!
//! Only the items inside the layout window are turned into widgets, so the
//! cost of a frame does not grow with the number of images.

use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style, Stylize};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{App, InputMode};
use crate::config::ViewMode;
use crate::model::{ImageStatus, ProjectStatus, Scope, TagImage};
use crate::preview::PreviewHandle;
use crate::persist::SaveStatus;
use crate::thumbnail::HalfBlocks;
use crate::virtual_view::ItemLayout;

const SIDEBAR_WIDTH: u16 = 28;
const INSPECTOR_WIDTH: u16 = 40;
const INSPECTOR_THUMB_ROWS: u16 = 10;
/// Tile rows below the thumbnail: status and caption.
const TILE_TEXT_ROWS: u16 = 2;

const HELP: &str = "s start  p pause  g regen  / search  f filter  Tab scope  v view  e edit  b batch  m move  x export  q quit";

fn status_color(status: ImageStatus) -> Color {
    match status {
        ImageStatus::Idle => Color::DarkGray,
        ImageStatus::Loading => Color::Yellow,
        ImageStatus::Success => Color::Green,
        ImageStatus::Error => Color::Red,
    }
}

fn save_color(status: SaveStatus) -> Color {
    match status {
        SaveStatus::Saved => Color::Green,
        SaveStatus::Saving => Color::Yellow,
        SaveStatus::Unsaved => Color::Red,
    }
}

/// Clip to `max` characters, marking the cut with an ellipsis.
fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

pub fn draw(frame: &mut Frame, app: &mut App) {
    let [toolbar, body, footer] =
        Layout::vertical([Constraint::Length(4), Constraint::Min(3), Constraint::Length(1)]).areas(frame.area());
    let [sidebar, items, inspector] = Layout::horizontal([
        Constraint::Length(SIDEBAR_WIDTH),
        Constraint::Min(20),
        Constraint::Length(INSPECTOR_WIDTH),
    ])
    .areas(body);

    draw_toolbar(frame, app, toolbar);
    draw_sidebar(frame, app, sidebar);

    let block = Block::default().borders(Borders::ALL).title(format!(" {} items ", app.visible().len()));
    let inner = block.inner(items);
    frame.render_widget(block, items);
    let layout = app.measure(inner, sidebar);
    let wanted = wanted_thumbnails(app, inner, layout);
    app.prepare_thumbnails(&wanted);
    draw_items(frame, app, inner, layout);

    draw_inspector(frame, app, inspector);
    draw_footer(frame, app, footer);
}

/// Thumbnail cell box of a grid tile of `w` x `h` cells.
fn tile_thumb_size(w: u16, h: u16) -> (u16, u16) {
    (w.saturating_sub(2), h.saturating_sub(2 + TILE_TEXT_ROWS))
}

/// Thumbnails needed by the tiles in the layout window and the inspector.
fn wanted_thumbnails(app: &App, area: Rect, layout: ItemLayout) -> Vec<(PreviewHandle, u16, u16)> {
    let mut wanted = Vec::new();
    if let ItemLayout::Grid(_) = layout {
        let window = layout.window(app.visible().len(), app.scroll, area.height as usize);
        for (index, item) in app.visible().iter().enumerate().take(window.end).skip(window.start) {
            let Some(handle) = app.image(item).and_then(|i| i.preview) else {
                continue;
            };
            let (_, _, w, h) = layout.cell(index, area.width as usize);
            let (cols, rows) = tile_thumb_size(w as u16, h as u16);
            wanted.push((handle, cols, rows));
        }
    }
    if let Some(handle) = app.cursor_image().and_then(|(_, i)| i.preview) {
        wanted.push((handle, INSPECTOR_WIDTH - 2, INSPECTOR_THUMB_ROWS));
    }
    wanted
}

/// Half-block lines, centered in `width` columns.
fn thumbnail_lines(thumb: &HalfBlocks, width: u16) -> Vec<Line<'static>> {
    let pad = " ".repeat(width.saturating_sub(thumb.cols) as usize / 2);
    (0..thumb.rows)
        .map(|row| {
            let mut spans = vec![Span::raw(pad.clone())];
            spans.extend((0..thumb.cols).filter_map(|col| {
                let [upper, lower] = thumb.cell(col, row)?;
                Some(Span::styled(
                    "▀",
                    Style::default()
                        .fg(Color::Rgb(upper[0], upper[1], upper[2]))
                        .bg(Color::Rgb(lower[0], lower[1], lower[2])),
                ))
            }));
            Line::from(spans)
        })
        .collect()
}

fn draw_toolbar(frame: &mut Frame, app: &App, area: Rect) {
    let settings = app.settings();
    let stats = app.stats();
    let scope = app
        .scope_project()
        .map_or_else(|| "All projects".to_string(), |p| p.name.clone());
    let template = settings
        .active_template()
        .and_then(|i| settings.templates.get(i))
        .map_or("Custom", |t| t.label.as_str());

    let run = if app.is_processing() {
        let queued = app.batch_queued().map(|q| format!(", {q} queued")).unwrap_or_default();
        Span::styled(format!("Processing ({} in flight{queued})", app.in_flight()), Color::Yellow)
    } else {
        Span::raw("Idle")
    };
    let save = app.save_status();

    let line1 = Line::from(vec![
        Span::styled(scope, Modifier::BOLD),
        Span::raw(format!("  filter: {}", app.filter.label())),
        Span::raw(if app.search.is_empty() {
            String::new()
        } else {
            format!("  search: {}", app.search)
        }),
        Span::raw(format!(
            "  view: {}  workers: {}  model: {}  prompt: {template}",
            match settings.view_mode {
                ViewMode::Grid => "grid",
                ViewMode::List => "list",
            },
            settings.concurrency,
            settings.effective_model(),
        )),
    ]);
    let line2 = Line::from(vec![
        Span::raw(format!(
            "{}/{} done ({:.0}%)  pending {}  ",
            stats.completed,
            stats.total,
            stats.progress() * 100.0,
            stats.pending
        )),
        Span::styled(format!("errors {}", stats.errors), if stats.errors > 0 { Color::Red } else { Color::Reset }),
        Span::raw("  "),
        run,
        Span::raw("  "),
        Span::styled(save.label(), save_color(save)),
    ]);

    let block = Block::default().borders(Borders::ALL).title(" batchtag ");
    frame.render_widget(Paragraph::new(vec![line1, line2]).block(block), area);
}

fn draw_sidebar(frame: &mut Frame, app: &App, area: Rect) {
    let width = area.width.saturating_sub(2) as usize;
    let mut lines = Vec::with_capacity(app.projects().len() + 1);
    let all_style = if app.scope == Scope::All {
        Style::default().reversed()
    } else {
        Style::default()
    };
    lines.push(Line::styled(clip("All projects", width), all_style));

    for (n, project) in app.projects().iter().enumerate() {
        let marker = if project.collapsed { '▸' } else { '▾' };
        let done = project.count(ImageStatus::Success);
        let color = match project.status() {
            ProjectStatus::Idle => Color::Reset,
            ProjectStatus::Processing => Color::Yellow,
            ProjectStatus::Completed => Color::Green,
        };
        let mut style = Style::default().fg(color);
        if app.scope == Scope::Project(project.id) {
            style = style.reversed();
        }
        let text = format!("{marker}{} {} {done}/{}", n + 1, project.name, project.images.len());
        lines.push(Line::styled(clip(&text, width), style));
    }

    let block = Block::default().borders(Borders::ALL).title(" Projects ");
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_items(frame: &mut Frame, app: &App, area: Rect, layout: ItemLayout) {
    let visible = app.visible();
    if visible.is_empty() {
        let hint = if app.projects().is_empty() {
            "No images. Start with: batchtag <dir or files>"
        } else {
            "No images match the current filter"
        };
        frame.render_widget(Paragraph::new(hint).dark_gray(), area);
        return;
    }

    let viewport = area.height as usize;
    let window = layout.window(visible.len(), app.scroll, viewport);
    for (index, item) in visible.iter().enumerate().take(window.end).skip(window.start) {
        let Some(image) = app.image(item) else {
            continue;
        };
        let (x, y, w, h) = layout.cell(index, area.width as usize);
        // Partially visible items are clipped at the viewport edge.
        let top = y.max(app.scroll);
        let bottom = (y + h).min(app.scroll + viewport);
        if top >= bottom {
            continue;
        }
        let rect = Rect::new(
            area.x + x as u16,
            area.y + (top - app.scroll) as u16,
            (w as u16).min(area.width.saturating_sub(x as u16)),
            (bottom - top) as u16,
        );
        let selected = app.selection.contains(&image.id);
        let focused = app.cursor == Some(image.id);
        match layout {
            ItemLayout::Grid(_) => {
                let (cols, rows) = tile_thumb_size(w as u16, h as u16);
                let thumb = app.thumbnail(image, cols, rows);
                draw_tile(frame, image, thumb, rect, selected, focused);
            }
            ItemLayout::List(_) => draw_row(frame, image, rect, selected, focused),
        }
    }
}

fn draw_tile(
    frame: &mut Frame,
    image: &TagImage,
    thumb: Option<&HalfBlocks>,
    area: Rect,
    selected: bool,
    focused: bool,
) {
    let mut border = Style::default();
    if selected {
        border = border.fg(Color::Yellow);
    }
    if focused {
        border = border.add_modifier(Modifier::BOLD).fg(Color::Cyan);
    }
    let title = clip(image.name(), area.width.saturating_sub(2) as usize);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border)
        .title(title);

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let mut text: Vec<(String, Style)> = vec![(image.status.label().to_string(), status_color(image.status).into())];
    if let Some(err) = &image.error_msg {
        text.push((err.clone(), Color::Red.into()));
    }
    if !image.caption.is_empty() {
        text.push((image.caption.clone(), Style::default()));
    }

    let Some(thumb) = thumb else {
        let lines: Vec<Line> = text.into_iter().map(|(t, style)| Line::styled(t, style)).collect();
        frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), inner);
        return;
    };
    let [picture, below] =
        Layout::vertical([Constraint::Length(thumb.rows), Constraint::Min(0)]).areas(inner);
    frame.render_widget(Paragraph::new(thumbnail_lines(thumb, picture.width)), picture);
    let width = below.width as usize;
    let text: Vec<Line> = text
        .into_iter()
        .map(|(t, style)| Line::styled(clip(&t, width), style))
        .collect();
    frame.render_widget(Paragraph::new(text), below);
}

fn draw_row(frame: &mut Frame, image: &TagImage, area: Rect, selected: bool, focused: bool) {
    let width = area.width as usize;
    let check = if selected { "[x]" } else { "[ ]" };
    let mut name_style = Style::default();
    if focused {
        name_style = name_style.reversed();
    }
    let head = Line::from(vec![
        Span::raw(format!("{check} ")),
        Span::styled(format!("{:<7}", image.status.label()), status_color(image.status)),
        Span::styled(clip(image.name(), width.saturating_sub(12)), name_style),
    ]);
    let detail = match &image.error_msg {
        Some(err) => Line::styled(clip(&format!("    {err}"), width), Color::Red),
        None => Line::styled(clip(&format!("    {}", image.caption), width), Color::DarkGray),
    };
    frame.render_widget(Paragraph::new(vec![head, detail]), area);
}

fn draw_inspector(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" Inspector ");
    let mut lines = Vec::new();
    if !app.selection.is_empty() {
        lines.push(Line::styled(format!("{} selected", app.selection.len()), Color::Yellow));
        lines.push(Line::raw(""));
    }
    match app.cursor_image() {
        Some((project_id, image)) => {
            let project = app
                .projects()
                .iter()
                .find(|p| p.id == project_id)
                .map_or("", |p| p.name.as_str());
            if let Some(thumb) = app.thumbnail(image, INSPECTOR_WIDTH - 2, INSPECTOR_THUMB_ROWS) {
                lines.extend(thumbnail_lines(thumb, area.width.saturating_sub(2)));
            }
            lines.push(Line::styled(image.name().to_string(), Modifier::BOLD));
            lines.push(Line::raw(format!("{project}  {} KiB  {}", image.payload.size() / 1024, image.payload.mime)));
            lines.push(Line::styled(image.status.label(), status_color(image.status)));
            if let Some(err) = &image.error_msg {
                lines.push(Line::styled(err.clone(), Color::Red));
            }
            lines.push(Line::raw(""));
            lines.push(Line::raw(if image.caption.is_empty() {
                "(no caption)".to_string()
            } else {
                image.caption.clone()
            }));
        }
        None => lines.push(Line::raw("Nothing focused").dark_gray()),
    }
    frame.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: false }), area);
}

fn draw_footer(frame: &mut Frame, app: &App, area: Rect) {
    let line = match &app.mode {
        InputMode::Confirm(action) => Line::styled(format!("{} [y/N]", action.prompt()), Color::Yellow),
        mode => match mode.label() {
            Some(label) => {
                let prefix = format!("{label}: ");
                let cursor_x = area.x + (prefix.chars().count() + app.input.chars().count()) as u16;
                frame.set_cursor_position((cursor_x.min(area.right().saturating_sub(1)), area.y));
                Line::from(vec![Span::styled(prefix, Color::Cyan), Span::raw(app.input.clone())])
            }
            None => match &app.message {
                Some(message) => Line::raw(message.clone()),
                None => Line::raw(HELP).dark_gray(),
            },
        },
    };
    frame.render_widget(Paragraph::new(line), area);
}
