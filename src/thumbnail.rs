// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Thumbnail worker thread.
//!
//! This thread performs the expensive work:
//! - decode preview bytes
//! - downsample to the cell box of a tile or the inspector
//! - split into half-block cells (`▀`: upper pixel as foreground, lower
//!   pixel as background)
//!
//! Requests are best-effort. Results land in an LRU cache on the UI side;
//! failed decodes are cached too so they are not retried every frame.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use image::imageops::FilterType;
use rayon::prelude::*;

use crate::backend::encode;
use crate::preview::PreviewHandle;

/// Default capacity for the thumbnail LRU cache.
pub const THUMBNAIL_CACHE_SIZE: usize = 256;

/// Cache key: (preview, columns, rows).
pub type ThumbKey = (PreviewHandle, u16, u16);

/// An image downsampled to terminal cells, two pixels per cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HalfBlocks {
    pub cols: u16,
    pub rows: u16,
    /// Row-major `[upper, lower]` RGB pairs.
    pub cells: Vec<[[u8; 3]; 2]>,
}

impl HalfBlocks {
    pub fn cell(&self, col: u16, row: u16) -> Option<[[u8; 3]; 2]> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        self.cells.get(row as usize * self.cols as usize + col as usize).copied()
    }
}

/// Contain `orig` in `max`, scaling up or down and keeping the aspect ratio.
pub fn fit_within(orig: (u32, u32), max: (u32, u32)) -> (u32, u32) {
    let (orig_w, orig_h) = (orig.0.max(1), orig.1.max(1));
    let scale_w = max.0 as f64 / orig_w as f64;
    let scale_h = max.1 as f64 / orig_h as f64;
    let scale = scale_w.min(scale_h);
    (
        (orig_w as f64 * scale).floor().max(1.0) as u32,
        (orig_h as f64 * scale).floor().max(1.0) as u32,
    )
}

/// Decode `bytes` and fit them into `cols` x `rows` cells. Pixels are
/// treated as square, which holds for the usual 1:2 terminal cell.
pub fn render(bytes: &[u8], cols: u16, rows: u16) -> image::ImageResult<HalfBlocks> {
    let decoded = encode::decode(bytes)?;
    let (w, h) = fit_within((decoded.width(), decoded.height()), (cols as u32, rows as u32 * 2));
    let small = decoded.resize_exact(w, h, FilterType::Triangle).to_rgb8();

    let out_rows = h.div_ceil(2);
    let mut cells = Vec::with_capacity((w * out_rows) as usize);
    for row in 0..out_rows {
        for col in 0..w {
            let upper = small.get_pixel(col, row * 2).0;
            let lower = if row * 2 + 1 < h {
                small.get_pixel(col, row * 2 + 1).0
            } else {
                [0, 0, 0]
            };
            cells.push([upper, lower]);
        }
    }
    Ok(HalfBlocks {
        cols: w as u16,
        rows: out_rows as u16,
        cells,
    })
}

type Rendered = Option<Arc<HalfBlocks>>;

/// LRU cache for rendered thumbnails.
struct ThumbnailCache {
    cache: HashMap<ThumbKey, Rendered>,
    order: VecDeque<ThumbKey>,
    capacity: usize,
}

impl ThumbnailCache {
    fn new(capacity: usize) -> Self {
        Self {
            cache: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn peek(&self, key: &ThumbKey) -> Option<&Rendered> {
        self.cache.get(key)
    }

    fn touch(&mut self, key: &ThumbKey) -> bool {
        if !self.cache.contains_key(key) {
            return false;
        }
        if !matches!(self.order.back(), Some(k) if k == key) {
            // Move to back (most recently used)
            self.order.retain(|k| k != key);
            self.order.push_back(*key);
        }
        true
    }

    fn insert(&mut self, key: ThumbKey, value: Rendered) {
        if self.touch(&key) {
            self.cache.insert(key, value);
            return;
        }
        if self.cache.len() >= self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.cache.remove(&oldest);
        }
        self.order.push_back(key);
        self.cache.insert(key, value);
    }

    fn len(&self) -> usize {
        self.cache.len()
    }
}

struct ThumbRequest {
    key: ThumbKey,
    bytes: Arc<[u8]>,
}

struct ThumbnailWorker {
    request_tx: Sender<ThumbRequest>,
    result_rx: Receiver<(ThumbKey, Rendered)>,
    _handle: JoinHandle<()>,
}

impl ThumbnailWorker {
    fn new() -> Self {
        let (request_tx, request_rx) = mpsc::channel::<ThumbRequest>();
        let (result_tx, result_rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            Self::worker_loop(request_rx, result_tx);
        });

        Self {
            request_tx,
            result_rx,
            _handle: handle,
        }
    }

    /// Render everything queued so far in parallel, then wait for more.
    /// Exits when the UI side drops its sender.
    fn worker_loop(rx: Receiver<ThumbRequest>, tx: Sender<(ThumbKey, Rendered)>) {
        while let Ok(first) = rx.recv() {
            let mut seen = HashSet::new();
            let batch: Vec<ThumbRequest> = std::iter::once(first)
                .chain(rx.try_iter())
                .filter(|req| seen.insert(req.key))
                .collect();

            let results: Vec<(ThumbKey, Rendered)> = batch
                .into_par_iter()
                .map(|req| {
                    let (_, cols, rows) = req.key;
                    let rendered = render(&req.bytes, cols, rows)
                        .inspect_err(|e| tracing::debug!(error = %e, "thumbnail decode failed"))
                        .ok()
                        .map(Arc::new);
                    (req.key, rendered)
                })
                .collect();

            for result in results {
                if tx.send(result).is_err() {
                    return;
                }
            }
        }
    }
}

/// Worker plus cache, owned by the UI thread.
pub struct Thumbnails {
    worker: ThumbnailWorker,
    cache: ThumbnailCache,
    pending: HashSet<ThumbKey>,
}

impl Thumbnails {
    pub fn new(capacity: usize) -> Self {
        Self {
            worker: ThumbnailWorker::new(),
            cache: ThumbnailCache::new(capacity),
            pending: HashSet::new(),
        }
    }

    /// Cached thumbnail, if rendered and decodable.
    pub fn get(&self, key: &ThumbKey) -> Option<&Arc<HalfBlocks>> {
        self.cache.peek(key)?.as_ref()
    }

    /// Make sure `key` is cached or on its way. `bytes` is only called when
    /// a render has to be queued.
    pub fn request(&mut self, key: ThumbKey, bytes: impl FnOnce() -> Option<Arc<[u8]>>) {
        if self.cache.touch(&key) || self.pending.contains(&key) {
            return;
        }
        let Some(bytes) = bytes() else {
            return;
        };
        if self.worker.request_tx.send(ThumbRequest { key, bytes }).is_ok() {
            self.pending.insert(key);
        }
    }

    /// Move finished renders into the cache. Returns how many arrived.
    pub fn poll(&mut self) -> usize {
        let mut count = 0;
        while let Ok((key, rendered)) = self.worker.result_rx.try_recv() {
            self.pending.remove(&key);
            self.cache.insert(key, rendered);
            count += 1;
        }
        count
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
