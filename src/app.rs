// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Terminal application state and input handling.
//!
//! `App` owns:
//! - the view state (scope, filter, search, scroll, selection)
//! - a handle on the scheduler and the autosaver
//! - the current input mode for prompts and confirmations
//!
//! Drawing lives in `ui`. Captioning and saving run on the tokio runtime,
//! thumbnails on their own thread; every method here returns without
//! waiting on them.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::{Position, Rect};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::caption::{CaptionEdit, split_tags};
use crate::clipboard::{Clipboard, CopyMethod};
use crate::config::{Config, ViewMode};
use crate::export::{self, ExportFormat};
use crate::model::{ImageId, Project, ProjectId, Scope, Snapshot, TagImage};
use crate::persist::{AutoSaver, SaveStatus};
use crate::preview::PreviewHandle;
use crate::scheduler::{BatchRun, RunEnd, SchedulerEvent, TagScheduler};
use crate::selection::{Modifiers, SelectionManager};
use crate::store::{Destination, StoreHandle};
use crate::thumbnail::{HalfBlocks, THUMBNAIL_CACHE_SIZE, Thumbnails};
use crate::view::{self, ContextStats, SearchQuery, ViewFilter, VisibleItem};
use crate::virtual_view::{GridLayout, ItemLayout, ListLayout, clamp_scroll, columns_for_width};

const GRID_GAP: usize = 1;
const LIST_ROW_HEIGHT: usize = 2;
const WHEEL_STEP: usize = 3;

/// Destructive actions waiting for a `y`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmAction {
    RemoveImages(HashSet<ImageId>),
    ClearDone,
    DeleteProject(ProjectId),
}

impl ConfirmAction {
    pub fn prompt(&self) -> String {
        match self {
            ConfirmAction::RemoveImages(ids) => format!("Remove {} image(s)?", ids.len()),
            ConfirmAction::ClearDone => "Remove all completed images?".to_string(),
            ConfirmAction::DeleteProject(_) => "Delete this project and all its images?".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum InputMode {
    #[default]
    Normal,
    Search,
    EditCaption {
        project_id: ProjectId,
        image_id: ImageId,
    },
    RenameImage {
        project_id: ProjectId,
        image_id: ImageId,
    },
    RenameProject(ProjectId),
    BatchEdit,
    Move,
    Merge(ProjectId),
    Confirm(ConfirmAction),
}

impl InputMode {
    /// Prompt label for modes that read a line of text.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            InputMode::Normal | InputMode::Confirm(_) => None,
            InputMode::Search => Some("Search"),
            InputMode::EditCaption { .. } => Some("Caption"),
            InputMode::RenameImage { .. } => Some("Rename image"),
            InputMode::RenameProject(_) => Some("Rename project"),
            InputMode::BatchEdit => Some("Batch edit (replace A => B | prepend X | append X | add a, b | remove a, b)"),
            InputMode::Move => Some("Move to (project number | new [name])"),
            InputMode::Merge(_) => Some("Merge into (project number | new [name])"),
        }
    }
}

/// Parse a batch edit command line.
pub fn parse_batch_edit(input: &str) -> Option<CaptionEdit> {
    let input = input.trim_start();
    let (command, rest) = input.split_once(' ').unwrap_or((input, ""));
    let tags = |s: &str| -> Vec<String> { split_tags(s).into_iter().map(str::to_string).collect() };
    match command.to_lowercase().as_str() {
        "replace" => {
            let (find, replace) = rest.split_once("=>")?;
            let find = find.trim();
            (!find.is_empty()).then(|| CaptionEdit::Replace {
                find: find.to_string(),
                replace: replace.trim().to_string(),
            })
        }
        "prepend" if !rest.is_empty() => Some(CaptionEdit::Prepend(rest.to_string())),
        "append" if !rest.is_empty() => Some(CaptionEdit::Append(rest.to_string())),
        "add" | "remove" => {
            let tags = tags(rest);
            if tags.is_empty() {
                None
            } else if command.eq_ignore_ascii_case("add") {
                Some(CaptionEdit::AddTags(tags))
            } else {
                Some(CaptionEdit::RemoveTags(tags))
            }
        }
        _ => None,
    }
}

/// Parse a move/merge destination: a 1-based sidebar number, or `new` with
/// an optional name.
pub fn parse_destination(input: &str, projects: &[Arc<Project>]) -> Option<Destination> {
    let input = input.trim();
    if let Some(rest) = input.strip_prefix("new") {
        let name = rest.trim();
        return Some(Destination::New {
            name: (!name.is_empty()).then(|| name.to_string()),
        });
    }
    let index = input.parse::<usize>().ok()?.checked_sub(1)?;
    projects.get(index).map(|p| Destination::Existing(p.id))
}

pub struct App {
    scheduler: TagScheduler,
    saver: AutoSaver,
    events: broadcast::Receiver<SchedulerEvent>,
    batch: Option<BatchRun>,
    clipboard: Clipboard,
    thumbnails: Thumbnails,
    export_dir: PathBuf,

    pub scope: Scope,
    pub filter: ViewFilter,
    pub search: String,
    query: SearchQuery,
    pub selection: SelectionManager<ImageId>,
    /// Keyboard caret; also the item shown in the inspector.
    pub cursor: Option<ImageId>,
    pub scroll: usize,
    pub mode: InputMode,
    pub input: String,
    pub message: Option<String>,
    pub should_quit: bool,

    snapshot: Snapshot,
    visible: Vec<VisibleItem>,
    visible_ids: Vec<ImageId>,
    seen_revision: Option<u64>,
    settings: Config,

    layout: ItemLayout,
    items_area: Rect,
    sidebar_area: Rect,
}

impl App {
    pub fn new(scheduler: TagScheduler, saver: AutoSaver, export_dir: PathBuf) -> Self {
        let events = scheduler.subscribe();
        let settings = scheduler.settings();
        let mut app = Self {
            scheduler,
            saver,
            events,
            batch: None,
            clipboard: Clipboard::new(),
            thumbnails: Thumbnails::new(THUMBNAIL_CACHE_SIZE),
            export_dir,
            scope: Scope::All,
            filter: ViewFilter::All,
            search: String::new(),
            query: SearchQuery::Empty,
            selection: SelectionManager::new(),
            cursor: None,
            scroll: 0,
            mode: InputMode::Normal,
            input: String::new(),
            message: None,
            should_quit: false,
            snapshot: Arc::new(Vec::new()),
            visible: Vec::new(),
            visible_ids: Vec::new(),
            seen_revision: None,
            settings,
            layout: ItemLayout::default(),
            items_area: Rect::default(),
            sidebar_area: Rect::default(),
        };
        app.refresh();
        app
    }

    fn store(&self) -> &StoreHandle {
        self.scheduler.store()
    }

    pub fn projects(&self) -> &[Arc<Project>] {
        &self.snapshot
    }

    pub fn visible(&self) -> &[VisibleItem] {
        &self.visible
    }

    pub fn settings(&self) -> &Config {
        &self.settings
    }

    pub fn stats(&self) -> ContextStats {
        view::context_stats(&self.snapshot, self.scope)
    }

    pub fn save_status(&self) -> SaveStatus {
        self.saver.status()
    }

    pub fn is_processing(&self) -> bool {
        self.scheduler.is_processing()
    }

    pub fn in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }

    /// Queue length of the active batch run.
    pub fn batch_queued(&self) -> Option<usize> {
        self.batch.as_ref().map(BatchRun::queued)
    }

    pub fn scope_project(&self) -> Option<&Project> {
        match self.scope {
            Scope::All => None,
            Scope::Project(id) => self.snapshot.iter().find(|p| p.id == id).map(AsRef::as_ref),
        }
    }

    /// The image under the caret with its project.
    pub fn cursor_image(&self) -> Option<(ProjectId, &TagImage)> {
        let id = self.cursor?;
        let item = self.visible.iter().find(|v| v.image_id == id)?;
        let project = self.snapshot.iter().find(|p| p.id == item.project_id)?;
        Some((project.id, project.image(id)?))
    }

    pub fn image(&self, item: &VisibleItem) -> Option<&TagImage> {
        self.snapshot
            .iter()
            .find(|p| p.id == item.project_id)?
            .image(item.image_id)
    }

    /// Queue renders for thumbnails that are not cached yet.
    pub fn prepare_thumbnails(&mut self, wanted: &[(PreviewHandle, u16, u16)]) {
        for &(handle, cols, rows) in wanted {
            if cols == 0 || rows == 0 {
                continue;
            }
            let store = self.scheduler.store();
            self.thumbnails
                .request((handle, cols, rows), || store.read(|s| s.previews().resolve(handle)));
        }
    }

    pub fn thumbnail(&self, image: &TagImage, cols: u16, rows: u16) -> Option<&HalfBlocks> {
        let handle = image.preview?;
        self.thumbnails.get(&(handle, cols, rows)).map(AsRef::as_ref)
    }

    fn flash(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    fn invalidate(&mut self) {
        self.seen_revision = None;
    }

    /// Re-derive the visible sequence after store or view changes.
    pub fn refresh(&mut self) {
        self.settings = self.scheduler.settings();
        let revision = self.store().revision();
        if self.seen_revision == Some(revision) {
            return;
        }
        self.seen_revision = Some(revision);
        self.snapshot = self.store().snapshot();

        if let Scope::Project(id) = self.scope
            && !self.snapshot.iter().any(|p| p.id == id)
        {
            self.scope = Scope::All;
        }
        self.visible = view::visible_items(&self.snapshot, self.scope, self.filter, &self.query);
        self.visible_ids = self.visible.iter().map(|v| v.image_id).collect();
        self.selection.retain_visible(&self.visible_ids);
        if self.cursor.is_none_or(|id| !self.visible_ids.contains(&id)) {
            self.cursor = self.selection.selected().or(self.visible_ids.first().copied());
        }
    }

    /// Drain scheduler events without blocking.
    pub fn poll_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(SchedulerEvent::RunFinished { run, reason }) => {
                    if self.batch.as_ref().is_some_and(|b| b.run() == run) {
                        self.batch = None;
                    }
                    self.flash(match reason {
                        RunEnd::Exhausted => "Batch finished",
                        RunEnd::Paused => "Batch paused",
                    });
                }
                Ok(SchedulerEvent::RunStarted { queued, .. }) => {
                    self.flash(format!("Batch started: {queued} image(s) queued"));
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "scheduler events lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        self.thumbnails.poll();
        self.refresh();
    }

    /// Compute the item layout for `area`. Called on every draw so a resize
    /// or a view mode change takes effect immediately.
    pub fn measure(&mut self, area: Rect, sidebar: Rect) -> ItemLayout {
        let width = area.width as usize;
        self.layout = match self.settings.view_mode {
            ViewMode::Grid => {
                let columns = match self.settings.grid_columns {
                    0 => columns_for_width(width),
                    n => n,
                };
                ItemLayout::Grid(GridLayout::new(columns, width, GRID_GAP, 1.0 / self.settings.cell_aspect_ratio))
            }
            ViewMode::List => ItemLayout::List(ListLayout::new(LIST_ROW_HEIGHT)),
        };
        self.items_area = area;
        self.sidebar_area = sidebar;
        let total = self.layout.total_extent(self.visible.len());
        self.scroll = clamp_scroll(self.scroll, total, area.height as usize);
        self.layout
    }

    fn cursor_index(&self) -> Option<usize> {
        let id = self.cursor?;
        self.visible_ids.iter().position(|v| *v == id)
    }

    fn reveal(&mut self, index: usize) {
        self.scroll = self.layout.reveal(index, self.scroll, self.items_area.height as usize);
    }

    fn move_cursor(&mut self, delta: isize, extend: bool) {
        if self.visible_ids.is_empty() {
            return;
        }
        let last = self.visible_ids.len() - 1;
        let index = match self.cursor_index() {
            Some(i) => i.saturating_add_signed(delta).min(last),
            None => 0,
        };
        let id = self.visible_ids[index];
        if extend {
            if self.selection.anchor().is_none()
                && let Some(current) = self.cursor
            {
                self.selection.focus(current);
            }
            self.selection.pointer_down(id, Modifiers::RANGE, &self.visible_ids);
            self.selection.pointer_up();
        } else {
            self.selection.focus(id);
        }
        self.cursor = Some(id);
        self.reveal(index);
    }

    fn click_cursor(&mut self, mods: Modifiers) {
        if let Some(id) = self.cursor {
            self.selection.pointer_down(id, mods, &self.visible_ids);
            self.selection.pointer_up();
        }
    }

    /// Selected images, or the caret image when nothing is selected.
    fn targets(&self) -> HashSet<ImageId> {
        if !self.selection.is_empty() {
            return self.selection.multi().clone();
        }
        self.cursor.into_iter().collect()
    }

    fn set_scope(&mut self, scope: Scope) {
        if self.scope != scope {
            self.scope = scope;
            self.scroll = 0;
            self.invalidate();
            self.refresh();
        }
    }

    fn cycle_scope(&mut self, forward: bool) {
        let mut scopes = vec![Scope::All];
        scopes.extend(self.snapshot.iter().map(|p| Scope::Project(p.id)));
        let current = scopes.iter().position(|s| *s == self.scope).unwrap_or(0);
        let next = if forward {
            (current + 1) % scopes.len()
        } else {
            (current + scopes.len() - 1) % scopes.len()
        };
        self.set_scope(scopes[next]);
    }

    /// Project targeted by project-level commands: the scope project, else
    /// the caret image's project.
    fn target_project(&self) -> Option<ProjectId> {
        match self.scope {
            Scope::Project(id) => Some(id),
            Scope::All => self.cursor_image().map(|(pid, _)| pid),
        }
    }

    fn start_batch(&mut self) {
        let mut missing = false;
        let run = self.scheduler.start_batch(self.scope, || missing = true);
        if missing {
            self.flash("Please configure an API key (BATCHTAG_API_KEY or config.toml)");
        }
        if run.is_some() {
            self.batch = run;
        }
    }

    fn regenerate_cursor(&mut self) {
        if !self.settings.has_credentials() {
            self.flash("Please configure an API key (BATCHTAG_API_KEY or config.toml)");
            return;
        }
        if let Some((project_id, image)) = self.cursor_image() {
            let image_id = image.id;
            drop(self.scheduler.spawn_single(project_id, image_id));
        }
    }

    fn export(&mut self, format: ExportFormat) {
        let result = match self.scope_project() {
            Some(project) => export::export_project(project, format, &self.export_dir),
            None => export::export_all(&self.snapshot, format, &self.export_dir),
        };
        match result {
            Ok((path, stats)) => self.flash(format!("Exported {} image(s) to {}", stats.images, path.display())),
            Err(err) => {
                tracing::warn!(error = %err, "export failed");
                self.flash(err.to_string());
            }
        }
    }

    fn write_caption(&mut self) {
        let Some((_, image)) = self.cursor_image() else {
            return;
        };
        match export::write_caption_file(image, &self.export_dir) {
            Ok(Some(path)) => self.flash(format!("Wrote {}", path.display())),
            Ok(None) => self.flash("Caption is empty"),
            Err(err) => self.flash(err.to_string()),
        }
    }

    fn copy_caption(&mut self) {
        let Some(caption) = self.cursor_image().map(|(_, i)| i.caption.clone()) else {
            return;
        };
        if caption.is_empty() {
            self.flash("Caption is empty");
            return;
        }
        match self.clipboard.copy(&caption) {
            Ok(CopyMethod::Native) => self.flash("Copied caption"),
            Ok(CopyMethod::Osc52) => self.flash("Copied caption (terminal clipboard)"),
            Err(err) => self.flash(format!("Copy failed: {err}")),
        }
    }

    fn cycle_template(&mut self) {
        let templates = &self.settings.templates;
        if templates.is_empty() {
            return;
        }
        let next = self
            .settings
            .active_template()
            .map_or(0, |i| (i + 1) % templates.len());
        let (id, label) = (templates[next].id.clone(), templates[next].label.clone());
        self.scheduler.update_settings(|c| {
            c.apply_template(&id);
        });
        self.flash(format!("Prompt: {label}"));
    }

    fn adjust_concurrency(&mut self, delta: isize) {
        self.scheduler
            .update_settings(|c| c.concurrency = c.concurrency.saturating_add_signed(delta));
        self.settings = self.scheduler.settings();
        self.flash(format!("Concurrency: {}", self.settings.concurrency));
    }

    fn begin_input(&mut self, mode: InputMode, initial: &str) {
        self.mode = mode;
        self.input = initial.to_string();
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        match self.mode {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::Confirm(_) => self.handle_confirm_key(key),
            _ => self.handle_input_key(key),
        }
        self.refresh();
    }

    fn handle_normal_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let shift = key.modifiers.contains(KeyModifiers::SHIFT);
        let columns = self.layout.columns() as isize;
        self.message = None;

        match key.code {
            KeyCode::Left | KeyCode::Char('h') => self.move_cursor(-1, shift),
            KeyCode::Right | KeyCode::Char('l') => self.move_cursor(1, shift),
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-columns, shift),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(columns, shift),
            KeyCode::Home => self.move_cursor(isize::MIN / 2, shift),
            KeyCode::End => self.move_cursor(isize::MAX / 2, shift),
            KeyCode::Enter => self.click_cursor(Modifiers::NONE),
            KeyCode::Char(' ') => self.click_cursor(Modifiers::TOGGLE),
            KeyCode::Char('a') if ctrl => self.selection.select_all(&self.visible_ids),
            KeyCode::Esc => self.selection.clear(),
            KeyCode::Char('/') => {
                let search = self.search.clone();
                self.begin_input(InputMode::Search, &search);
            }
            KeyCode::Char('f') => {
                self.filter = self.filter.next();
                self.invalidate();
            }
            KeyCode::Tab => self.cycle_scope(true),
            KeyCode::BackTab => self.cycle_scope(false),
            KeyCode::Char('v') => self.scheduler.update_settings(|c| c.view_mode = c.view_mode.next()),
            KeyCode::Char('s') => self.start_batch(),
            KeyCode::Char('p') => {
                if !self.scheduler.pause() {
                    self.flash("No batch running");
                }
            }
            KeyCode::Char('g') => self.regenerate_cursor(),
            KeyCode::Char('r') => {
                let count = self.store().update(|s| s.retry_errors());
                self.flash(format!("{count} errored image(s) reset"));
            }
            KeyCode::Char('c') => self.mode = InputMode::Confirm(ConfirmAction::ClearDone),
            KeyCode::Char('d') | KeyCode::Delete => {
                let ids = self.targets();
                if !ids.is_empty() {
                    self.mode = InputMode::Confirm(ConfirmAction::RemoveImages(ids));
                }
            }
            KeyCode::Char('D') => {
                if let Scope::Project(id) = self.scope {
                    self.mode = InputMode::Confirm(ConfirmAction::DeleteProject(id));
                }
            }
            KeyCode::Char('e') => {
                if let Some((project_id, image)) = self.cursor_image() {
                    let (image_id, caption) = (image.id, image.caption.clone());
                    self.begin_input(InputMode::EditCaption { project_id, image_id }, &caption);
                }
            }
            KeyCode::Char('n') => {
                if let Some((project_id, image)) = self.cursor_image() {
                    let (image_id, name) = (image.id, image.name().to_string());
                    self.begin_input(InputMode::RenameImage { project_id, image_id }, &name);
                }
            }
            KeyCode::Char('N') => {
                if let Some(id) = self.target_project()
                    && let Some(name) = self.snapshot.iter().find(|p| p.id == id).map(|p| p.name.clone())
                {
                    self.begin_input(InputMode::RenameProject(id), &name);
                }
            }
            KeyCode::Char('b') => {
                if self.targets().is_empty() {
                    self.flash("Nothing selected");
                } else {
                    self.begin_input(InputMode::BatchEdit, "");
                }
            }
            KeyCode::Char('m') => {
                if self.targets().is_empty() {
                    self.flash("Nothing selected");
                } else {
                    self.begin_input(InputMode::Move, "");
                }
            }
            KeyCode::Char('M') => {
                if let Some(id) = self.target_project() {
                    self.begin_input(InputMode::Merge(id), "");
                }
            }
            KeyCode::Char('x') => self.export(ExportFormat::Txt),
            KeyCode::Char('X') => self.export(ExportFormat::Json),
            KeyCode::Char('w') => self.write_caption(),
            KeyCode::Char('y') => self.copy_caption(),
            KeyCode::Char('t') => self.cycle_template(),
            KeyCode::Char('+') | KeyCode::Char('=') => self.adjust_concurrency(1),
            KeyCode::Char('-') => self.adjust_concurrency(-1),
            KeyCode::Char('z') => {
                if let Some(id) = self.target_project() {
                    let collapsed = self.snapshot.iter().any(|p| p.id == id && p.collapsed);
                    self.store().update(|s| s.set_collapsed(id, !collapsed));
                }
            }
            KeyCode::Char('q') => self.should_quit = true,
            _ => {}
        }
    }

    fn handle_confirm_key(&mut self, key: KeyEvent) {
        let InputMode::Confirm(action) = std::mem::take(&mut self.mode) else {
            return;
        };
        if !matches!(key.code, KeyCode::Char('y') | KeyCode::Enter) {
            return;
        }
        match action {
            ConfirmAction::RemoveImages(ids) => {
                let count = self.store().update(|s| s.remove_images(&ids));
                self.selection.clear();
                self.flash(format!("Removed {count} image(s)"));
            }
            ConfirmAction::ClearDone => {
                let count = self.store().update(|s| s.clear_done());
                self.flash(format!("Cleared {count} completed image(s)"));
            }
            ConfirmAction::DeleteProject(id) => {
                if self.store().update(|s| s.delete_project(id)) {
                    self.flash("Project deleted");
                }
            }
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                if self.mode == InputMode::Search {
                    self.search.clear();
                    self.apply_search();
                }
                self.mode = InputMode::Normal;
                self.input.clear();
            }
            KeyCode::Enter => {
                let mode = std::mem::take(&mut self.mode);
                let input = std::mem::take(&mut self.input);
                self.commit_input(mode, input);
            }
            KeyCode::Backspace => {
                self.input.pop();
                if self.mode == InputMode::Search {
                    self.search = self.input.clone();
                    self.apply_search();
                }
            }
            KeyCode::Char(c) => {
                self.input.push(c);
                if self.mode == InputMode::Search {
                    self.search = self.input.clone();
                    self.apply_search();
                }
            }
            _ => {}
        }
    }

    fn apply_search(&mut self) {
        self.query = SearchQuery::parse(&self.search);
        self.scroll = 0;
        self.invalidate();
    }

    fn commit_input(&mut self, mode: InputMode, input: String) {
        match mode {
            InputMode::Normal | InputMode::Confirm(_) | InputMode::Search => {}
            InputMode::EditCaption { project_id, image_id } => {
                self.store().update(|s| s.update_caption(project_id, image_id, &input));
            }
            InputMode::RenameImage { project_id, image_id } => {
                if !self.store().update(|s| s.rename_image(project_id, image_id, &input)) {
                    self.flash("Name cannot be empty");
                }
            }
            InputMode::RenameProject(id) => {
                if !self.store().update(|s| s.rename_project(id, &input)) {
                    self.flash("Name cannot be empty");
                }
            }
            InputMode::BatchEdit => match parse_batch_edit(&input) {
                Some(edit) => {
                    let ids = self.targets();
                    let count = self.store().update(|s| s.batch_update_captions(&ids, &edit));
                    self.flash(format!("Updated {count} caption(s)"));
                }
                None => self.flash("Unrecognized batch edit"),
            },
            InputMode::Move => match parse_destination(&input, &self.snapshot) {
                Some(dest) => {
                    let ids = self.targets();
                    match self.store().update(|s| s.move_images(&ids, dest)) {
                        Some(_) => {
                            self.selection.clear();
                            self.flash(format!("Moved {} image(s)", ids.len()));
                        }
                        None => self.flash("Nothing to move"),
                    }
                }
                None => self.flash("Unknown destination"),
            },
            InputMode::Merge(source) => match parse_destination(&input, &self.snapshot) {
                Some(dest) => match self.store().update(|s| s.merge_projects(source, dest)) {
                    Some(target) => {
                        if self.scope == Scope::Project(source) {
                            self.scope = Scope::Project(target);
                        }
                        self.flash("Projects merged");
                    }
                    None => self.flash("Nothing to merge"),
                },
                None => self.flash("Unknown destination"),
            },
        }
    }

    pub fn handle_mouse(&mut self, event: MouseEvent) {
        if self.mode != InputMode::Normal {
            return;
        }
        let position = Position::new(event.column, event.row);
        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if self.sidebar_area.contains(position) {
                    self.click_sidebar(position.y);
                } else if let Some(id) = self.hit(position) {
                    let mods = Modifiers {
                        toggle: event.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::SUPER),
                        range: event.modifiers.contains(KeyModifiers::SHIFT),
                    };
                    self.selection.pointer_down(id, mods, &self.visible_ids);
                    self.cursor = Some(id);
                }
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                if let Some(id) = self.hit(position) {
                    self.selection.pointer_enter(id);
                    self.cursor = Some(id);
                }
            }
            MouseEventKind::Up(MouseButton::Left) => self.selection.pointer_up(),
            MouseEventKind::ScrollUp => self.scroll = self.scroll.saturating_sub(WHEEL_STEP),
            MouseEventKind::ScrollDown => self.scroll += WHEEL_STEP,
            _ => {}
        }
    }

    fn hit(&self, position: Position) -> Option<ImageId> {
        if !self.items_area.contains(position) {
            return None;
        }
        let x = (position.x - self.items_area.x) as usize;
        let y = (position.y - self.items_area.y) as usize + self.scroll;
        let index = self.layout.hit(self.visible_ids.len(), x, y)?;
        self.visible_ids.get(index).copied()
    }

    /// Sidebar rows: a border, "All projects", then one row per project.
    fn click_sidebar(&mut self, row: u16) {
        let index = (row - self.sidebar_area.y) as usize;
        match index {
            0 => {}
            1 => self.set_scope(Scope::All),
            n => {
                if let Some(project) = self.snapshot.get(n - 2) {
                    let id = project.id;
                    self.set_scope(Scope::Project(id));
                }
            }
        }
    }

    /// Save anything pending. Called once on the way out.
    pub async fn shutdown(&mut self) -> SaveStatus {
        self.scheduler.pause();
        self.saver.flush().await
    }
}
