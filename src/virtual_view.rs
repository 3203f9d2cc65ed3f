// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Windowing for long item sequences.
//!
//! Pure functions of (item count, extents, scroll offset). Units are terminal
//! cells: widths in columns, extents and offsets in rows.

/// Extra rows materialized above and below the viewport.
pub const DEFAULT_BUFFER: usize = 4;

/// The contiguous slice of items to materialize.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Window {
    /// First item index (inclusive).
    pub start: usize,
    /// Last item index (exclusive).
    pub end: usize,
    /// Content offset of the first materialized row.
    pub offset: usize,
    /// Height of the whole content.
    pub total_extent: usize,
}

impl Window {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..self.end).contains(&index)
    }
}

/// Row range `[start, end)` covering the viewport plus `buffer` rows each side.
fn row_range(total_rows: usize, row_height: usize, scroll: usize, viewport: usize, buffer: usize) -> (usize, usize) {
    let row_height = row_height.max(1);
    let start = (scroll / row_height).saturating_sub(buffer);
    let end = ((scroll + viewport).div_ceil(row_height) + buffer).min(total_rows);
    (start.min(end), end)
}

/// Largest valid scroll offset for the given content and viewport.
pub fn clamp_scroll(scroll: usize, total_extent: usize, viewport: usize) -> usize {
    scroll.min(total_extent.saturating_sub(viewport))
}

/// Scroll offset that brings the row at `row_top..row_top+row_height` into
/// view, moving as little as possible.
pub fn scroll_to_reveal(row_top: usize, row_height: usize, scroll: usize, viewport: usize) -> usize {
    let row_bottom = row_top + row_height;
    if row_top < scroll {
        row_top
    } else if row_bottom > scroll + viewport {
        row_bottom.saturating_sub(viewport)
    } else {
        scroll
    }
}

/// Responsive column count for an available width.
pub fn columns_for_width(width: usize) -> usize {
    match width {
        w if w >= 192 => 6,
        w if w >= 160 => 5,
        w if w >= 128 => 4,
        w if w >= 96 => 3,
        _ => 2,
    }
}

/// Single column, fixed row height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListLayout {
    pub row_height: usize,
    pub buffer: usize,
}

impl ListLayout {
    pub fn new(row_height: usize) -> Self {
        Self {
            row_height: row_height.max(1),
            buffer: DEFAULT_BUFFER,
        }
    }

    pub fn total_extent(&self, len: usize) -> usize {
        len * self.row_height
    }

    pub fn window(&self, len: usize, scroll: usize, viewport: usize) -> Window {
        let (start, end) = row_range(len, self.row_height, scroll, viewport, self.buffer);
        Window {
            start,
            end,
            offset: start * self.row_height,
            total_extent: self.total_extent(len),
        }
    }

    pub fn reveal(&self, index: usize, scroll: usize, viewport: usize) -> usize {
        scroll_to_reveal(index * self.row_height, self.row_height, scroll, viewport)
    }

    /// Item index at a content offset.
    pub fn hit(&self, len: usize, y: usize) -> Option<usize> {
        let index = y / self.row_height.max(1);
        (index < len).then_some(index)
    }
}

/// Multi-column grid of square items.
///
/// The row height follows from the width, column count and gap, so a change
/// to any of them moves every row. `item_aspect` converts an item's width in
/// columns to its height in rows (terminal cells are taller than wide).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridLayout {
    pub columns: usize,
    pub gap: usize,
    pub width: usize,
    pub item_aspect: f64,
    pub buffer: usize,
}

impl GridLayout {
    pub fn new(columns: usize, width: usize, gap: usize, item_aspect: f64) -> Self {
        Self {
            columns: columns.max(1),
            gap,
            width,
            item_aspect,
            buffer: DEFAULT_BUFFER,
        }
    }

    /// Column count, at least one even when `columns` was set to zero.
    fn cols(&self) -> usize {
        self.columns.max(1)
    }

    pub fn item_width(&self) -> usize {
        let gaps = self.gap * (self.cols() - 1);
        (self.width.saturating_sub(gaps) / self.cols()).max(1)
    }

    pub fn item_height(&self) -> usize {
        ((self.item_width() as f64 * self.item_aspect).round() as usize).max(1)
    }

    pub fn row_height(&self) -> usize {
        self.item_height() + self.gap
    }

    pub fn total_rows(&self, len: usize) -> usize {
        len.div_ceil(self.cols())
    }

    pub fn total_extent(&self, len: usize) -> usize {
        self.total_rows(len) * self.row_height()
    }

    pub fn window(&self, len: usize, scroll: usize, viewport: usize) -> Window {
        let row_height = self.row_height();
        let (start_row, end_row) = row_range(self.total_rows(len), row_height, scroll, viewport, self.buffer);
        Window {
            start: start_row * self.cols(),
            end: (end_row * self.cols()).min(len),
            offset: start_row * row_height,
            total_extent: self.total_extent(len),
        }
    }

    /// Column x-offset and row y-offset of item `index`.
    pub fn position(&self, index: usize) -> (usize, usize) {
        let (row, col) = (index / self.cols(), index % self.cols());
        (col * (self.item_width() + self.gap), row * self.row_height())
    }

    pub fn reveal(&self, index: usize, scroll: usize, viewport: usize) -> usize {
        let row_height = self.row_height();
        let top = (index / self.cols()) * row_height;
        scroll_to_reveal(top, row_height, scroll, viewport)
    }

    /// Item index under content coordinates, ignoring gaps.
    pub fn hit(&self, len: usize, x: usize, y: usize) -> Option<usize> {
        let stride_x = self.item_width() + self.gap;
        let col = x / stride_x;
        if col >= self.cols() || x % stride_x >= self.item_width() {
            return None;
        }
        let row = y / self.row_height();
        if y % self.row_height() >= self.item_height() {
            return None;
        }
        let index = row * self.cols() + col;
        (index < len).then_some(index)
    }
}

/// Either layout, as chosen by the current view mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ItemLayout {
    Grid(GridLayout),
    List(ListLayout),
}

impl ItemLayout {
    /// Items per row; the step for vertical keyboard moves.
    pub fn columns(&self) -> usize {
        match self {
            ItemLayout::Grid(grid) => grid.cols(),
            ItemLayout::List(_) => 1,
        }
    }

    pub fn total_extent(&self, len: usize) -> usize {
        match self {
            ItemLayout::Grid(grid) => grid.total_extent(len),
            ItemLayout::List(list) => list.total_extent(len),
        }
    }

    pub fn window(&self, len: usize, scroll: usize, viewport: usize) -> Window {
        match self {
            ItemLayout::Grid(grid) => grid.window(len, scroll, viewport),
            ItemLayout::List(list) => list.window(len, scroll, viewport),
        }
    }

    pub fn reveal(&self, index: usize, scroll: usize, viewport: usize) -> usize {
        match self {
            ItemLayout::Grid(grid) => grid.reveal(index, scroll, viewport),
            ItemLayout::List(list) => list.reveal(index, scroll, viewport),
        }
    }

    pub fn hit(&self, len: usize, x: usize, y: usize) -> Option<usize> {
        match self {
            ItemLayout::Grid(grid) => grid.hit(len, x, y),
            ItemLayout::List(list) => list.hit(len, y),
        }
    }

    /// Content-space `(x, y, width, height)` of item `index` in a viewport
    /// `width` columns wide.
    pub fn cell(&self, index: usize, width: usize) -> (usize, usize, usize, usize) {
        match self {
            ItemLayout::Grid(grid) => {
                let (x, y) = grid.position(index);
                (x, y, grid.item_width(), grid.item_height())
            }
            ItemLayout::List(list) => (0, index * list.row_height, width, list.row_height),
        }
    }
}

impl Default for ItemLayout {
    fn default() -> Self {
        ItemLayout::List(ListLayout::new(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_window_buffers_both_sides() {
        let list = ListLayout::new(3);
        let w = list.window(1_000, 300, 30);
        assert_eq!(w.start, 96);
        assert_eq!(w.end, 114);
        assert_eq!(w.offset, 288);
        assert_eq!(w.total_extent, 3_000);
    }

    #[test]
    fn test_list_window_clamps_at_edges() {
        let list = ListLayout::new(2);
        assert_eq!(list.window(5, 0, 20), Window { start: 0, end: 5, offset: 0, total_extent: 10 });
        assert!(list.window(0, 0, 20).is_empty());
    }

    #[test]
    fn test_grid_row_height_follows_columns() {
        let grid = GridLayout::new(4, 100, 2, 0.5);
        assert_eq!(grid.item_width(), 23);
        assert_eq!(grid.item_height(), 12);
        assert_eq!(grid.row_height(), 14);
        assert_eq!(grid.total_extent(10), 3 * 14);

        let wider = GridLayout { columns: 2, ..grid };
        assert_eq!(wider.item_width(), 49);
        assert_eq!(wider.row_height(), 27);
        assert_eq!(wider.total_extent(10), 5 * 27);
    }

    #[test]
    fn test_grid_zero_columns_acts_as_one() {
        let grid = GridLayout { columns: 0, ..GridLayout::new(4, 20, 2, 0.5) };
        assert_eq!(grid.item_width(), 20);
        assert_eq!(grid.total_rows(3), 3);
        assert_eq!(grid.position(2), (0, 2 * grid.row_height()));
        assert_eq!(grid.window(3, 0, 100).end, 3);
        assert_eq!(grid.hit(3, 1, grid.row_height() + 1), Some(1));
        assert_eq!(grid.reveal(2, 100, 1), 2 * grid.row_height());
        assert_eq!(ItemLayout::Grid(grid).columns(), 1);
    }

    #[test]
    fn test_grid_window_whole_rows() {
        let grid = GridLayout::new(5, 100, 0, 0.5);
        let w = grid.window(10_000, 1_000, 50);
        let row_height = grid.row_height();
        assert_eq!(row_height, 10);
        assert_eq!(w.start, (100 - DEFAULT_BUFFER) * 5);
        assert_eq!(w.end, (105 + DEFAULT_BUFFER) * 5);
        assert_eq!(w.offset, (100 - DEFAULT_BUFFER) * row_height);
    }

    #[test]
    fn test_grid_window_partial_last_row() {
        let grid = GridLayout::new(4, 40, 0, 0.5);
        let w = grid.window(7, 0, 100);
        assert_eq!((w.start, w.end), (0, 7));
    }

    #[test]
    fn test_reveal_moves_minimally() {
        let list = ListLayout::new(2);
        assert_eq!(list.reveal(5, 0, 20), 0);
        assert_eq!(list.reveal(15, 0, 20), 12);
        assert_eq!(list.reveal(1, 10, 20), 2);
    }

    #[test]
    fn test_clamp_scroll() {
        assert_eq!(clamp_scroll(500, 100, 30), 70);
        assert_eq!(clamp_scroll(10, 20, 30), 0);
        assert_eq!(clamp_scroll(5, 100, 30), 5);
    }

    #[test]
    fn test_grid_hit_and_position() {
        let grid = GridLayout::new(3, 32, 1, 0.5);
        assert_eq!(grid.item_width(), 10);
        assert_eq!(grid.position(4), (11, grid.row_height()));
        assert_eq!(grid.hit(9, 12, grid.row_height() + 1), Some(4));
        assert_eq!(grid.hit(9, 10, 0), None);
        assert_eq!(grid.hit(4, 12, grid.row_height()), None);
    }

    #[test]
    fn test_item_layout_dispatch() {
        let list = ItemLayout::List(ListLayout::new(2));
        assert_eq!(list.columns(), 1);
        assert_eq!(list.cell(3, 80), (0, 6, 80, 2));
        assert_eq!(list.hit(5, 70, 7), Some(3));

        let grid = ItemLayout::Grid(GridLayout::new(3, 32, 1, 0.5));
        assert_eq!(grid.columns(), 3);
        assert_eq!(grid.cell(4, 32), (11, 6, 10, 5));
        assert_eq!(grid.total_extent(9), 18);
    }

    #[test]
    fn test_columns_for_width() {
        assert_eq!(columns_for_width(40), 2);
        assert_eq!(columns_for_width(100), 3);
        assert_eq!(columns_for_width(250), 6);
    }
}
