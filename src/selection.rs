// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Selection over the visible items.
//!
//! Tracks a focused item, a multi-selection set and a range anchor. Every
//! gesture takes the current visible sequence, so the manager holds ids only
//! and never owns the records behind them. Callers prune with
//! [`SelectionManager::retain_visible`] whenever the sequence changes.

use std::collections::HashSet;
use std::hash::Hash;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Ctrl on most platforms, Cmd on macOS.
    pub toggle: bool,
    pub range: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        toggle: false,
        range: false,
    };
    pub const TOGGLE: Self = Self {
        toggle: true,
        range: false,
    };
    pub const RANGE: Self = Self {
        toggle: false,
        range: true,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DragMode {
    Select,
    Deselect,
}

#[derive(Debug)]
pub struct SelectionManager<T> {
    selected: Option<T>,
    multi: HashSet<T>,
    anchor: Option<T>,
    drag: Option<DragMode>,
}

impl<T> Default for SelectionManager<T> {
    fn default() -> Self {
        Self {
            selected: None,
            multi: HashSet::new(),
            anchor: None,
            drag: None,
        }
    }
}

impl<T: Copy + Eq + Hash> SelectionManager<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<T> {
        self.selected
    }

    pub fn anchor(&self) -> Option<T> {
        self.anchor
    }

    pub fn multi(&self) -> &HashSet<T> {
        &self.multi
    }

    pub fn contains(&self, id: &T) -> bool {
        self.multi.contains(id)
    }

    pub fn len(&self) -> usize {
        self.multi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.multi.is_empty()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn drag_mode(&self) -> Option<DragMode> {
        self.drag
    }

    /// Focus an item without changing the multi-selection.
    pub fn focus(&mut self, id: T) {
        self.selected = Some(id);
        self.anchor = Some(id);
    }

    /// Pointer pressed on `id`.
    ///
    /// With `range` and an anchor present in `visible`, the inclusive span
    /// between them is added to the selection and nothing else changes.
    /// Otherwise this starts a drag: `toggle` flips `id` (dragging then
    /// deselects if `id` was selected), a plain press collapses the selection
    /// to `{id}` unless `id` is already selected.
    pub fn pointer_down(&mut self, id: T, mods: Modifiers, visible: &[T]) {
        if mods.range
            && let Some(anchor) = self.anchor
            && let Some(from) = visible.iter().position(|v| *v == anchor)
            && let Some(to) = visible.iter().position(|v| *v == id)
        {
            let (start, end) = (from.min(to), from.max(to));
            self.multi.extend(visible[start..=end].iter().copied());
            return;
        }

        let was_selected = self.multi.contains(&id);
        let mode = if mods.toggle && was_selected {
            DragMode::Deselect
        } else {
            DragMode::Select
        };
        if mods.toggle {
            match mode {
                DragMode::Select => self.multi.insert(id),
                DragMode::Deselect => self.multi.remove(&id),
            };
        } else if !was_selected {
            self.multi.clear();
            self.multi.insert(id);
        }
        self.drag = Some(mode);
        self.focus(id);
    }

    /// Pointer entered `id`. Extends or shrinks the selection while dragging.
    pub fn pointer_enter(&mut self, id: T) {
        let Some(mode) = self.drag else {
            return;
        };
        match mode {
            DragMode::Select => self.multi.insert(id),
            DragMode::Deselect => self.multi.remove(&id),
        };
        self.anchor = Some(id);
    }

    /// Pointer released anywhere.
    pub fn pointer_up(&mut self) {
        self.drag = None;
    }

    /// Replace the selection with every visible item, or clear it if they are
    /// all selected already.
    pub fn select_all(&mut self, visible: &[T]) {
        if !visible.is_empty() && visible.iter().all(|id| self.multi.contains(id)) {
            self.multi.clear();
        } else {
            self.multi = visible.iter().copied().collect();
        }
    }

    pub fn clear(&mut self) {
        self.multi.clear();
        self.selected = None;
    }

    /// Drop ids that are no longer visible.
    pub fn retain_visible(&mut self, visible: &[T]) {
        let present: HashSet<T> = visible.iter().copied().collect();
        self.multi.retain(|id| present.contains(id));
        if self.selected.is_some_and(|id| !present.contains(&id)) {
            self.selected = None;
        }
        if self.anchor.is_some_and(|id| !present.contains(&id)) {
            self.anchor = None;
        }
    }

    /// Selected ids in visible order.
    pub fn ordered(&self, visible: &[T]) -> Vec<T> {
        visible
            .iter()
            .copied()
            .filter(|id| self.multi.contains(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<u32> {
        (0..10).collect()
    }

    fn set(ids: &[u32]) -> HashSet<u32> {
        ids.iter().copied().collect()
    }

    fn click(sel: &mut SelectionManager<u32>, id: u32, mods: Modifiers, visible: &[u32]) {
        sel.pointer_down(id, mods, visible);
        sel.pointer_up();
    }

    #[test]
    fn test_shift_range_is_order_independent() {
        let visible = items();
        for (a, b) in [(2, 5), (5, 2)] {
            let mut sel = SelectionManager::new();
            click(&mut sel, a, Modifiers::NONE, &visible);
            click(&mut sel, b, Modifiers::RANGE, &visible);
            assert_eq!(sel.multi(), &set(&[2, 3, 4, 5]));
            assert_eq!(sel.selected(), Some(a));
            assert_eq!(sel.anchor(), Some(a));
        }
    }

    #[test]
    fn test_shift_range_unions_prior_selection() {
        let visible = items();
        let mut sel = SelectionManager::new();
        click(&mut sel, 8, Modifiers::NONE, &visible);
        click(&mut sel, 1, Modifiers::TOGGLE, &visible);
        click(&mut sel, 3, Modifiers::RANGE, &visible);
        assert_eq!(sel.multi(), &set(&[1, 2, 3, 8]));
    }

    #[test]
    fn test_shift_without_anchor_acts_as_click() {
        let visible = items();
        let mut sel = SelectionManager::new();
        click(&mut sel, 4, Modifiers::RANGE, &visible);
        assert_eq!(sel.multi(), &set(&[4]));
        assert_eq!(sel.selected(), Some(4));
    }

    #[test]
    fn test_plain_click_collapses_unless_selected() {
        let visible = items();
        let mut sel = SelectionManager::new();
        sel.select_all(&visible[..4]);
        click(&mut sel, 2, Modifiers::NONE, &visible);
        assert_eq!(sel.len(), 4);
        assert_eq!(sel.selected(), Some(2));

        click(&mut sel, 7, Modifiers::NONE, &visible);
        assert_eq!(sel.multi(), &set(&[7]));
    }

    #[test]
    fn test_toggle_click() {
        let visible = items();
        let mut sel = SelectionManager::new();
        click(&mut sel, 1, Modifiers::NONE, &visible);
        click(&mut sel, 3, Modifiers::TOGGLE, &visible);
        assert_eq!(sel.multi(), &set(&[1, 3]));
        click(&mut sel, 1, Modifiers::TOGGLE, &visible);
        assert_eq!(sel.multi(), &set(&[3]));
        assert_eq!(sel.selected(), Some(1));
    }

    #[test]
    fn test_drag_paint_select_and_deselect() {
        let visible = items();
        let mut sel = SelectionManager::new();
        sel.pointer_down(2, Modifiers::NONE, &visible);
        sel.pointer_enter(3);
        sel.pointer_enter(4);
        sel.pointer_up();
        sel.pointer_enter(5);
        assert_eq!(sel.multi(), &set(&[2, 3, 4]));
        assert_eq!(sel.anchor(), Some(4));

        sel.pointer_down(3, Modifiers::TOGGLE, &visible);
        assert_eq!(sel.drag_mode(), Some(DragMode::Deselect));
        sel.pointer_enter(4);
        sel.pointer_up();
        assert_eq!(sel.multi(), &set(&[2]));
    }

    #[test]
    fn test_select_all_toggles() {
        let visible = items();
        let mut sel = SelectionManager::new();
        sel.select_all(&visible);
        assert_eq!(sel.len(), 10);
        sel.select_all(&visible);
        assert!(sel.is_empty());

        sel.select_all(&[]);
        assert!(sel.is_empty());
    }

    #[test]
    fn test_select_all_drops_hidden_items() {
        let visible = items();
        let mut sel = SelectionManager::new();
        click(&mut sel, 8, Modifiers::NONE, &visible);
        click(&mut sel, 9, Modifiers::TOGGLE, &visible);

        sel.select_all(&visible[..3]);
        assert_eq!(sel.multi(), &set(&[0, 1, 2]));

        click(&mut sel, 8, Modifiers::TOGGLE, &visible);
        sel.select_all(&visible[..3]);
        assert_eq!(sel.multi(), &set(&[0, 1, 2]));
    }

    #[test]
    fn test_retain_visible_prunes() {
        let visible = items();
        let mut sel = SelectionManager::new();
        click(&mut sel, 9, Modifiers::NONE, &visible);
        click(&mut sel, 1, Modifiers::TOGGLE, &visible);
        sel.retain_visible(&visible[..5]);
        assert_eq!(sel.multi(), &set(&[1]));
        assert_eq!(sel.selected(), Some(1));

        sel.retain_visible(&[]);
        assert!(sel.is_empty());
        assert_eq!(sel.selected(), None);
        assert_eq!(sel.anchor(), None);
    }

    #[test]
    fn test_clear() {
        let visible = items();
        let mut sel = SelectionManager::new();
        click(&mut sel, 3, Modifiers::NONE, &visible);
        sel.clear();
        assert!(sel.is_empty());
        assert_eq!(sel.selected(), None);
        assert_eq!(sel.ordered(&visible), Vec::<u32>::new());
    }
}
