// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Preview handles.
//!
//! A preview handle stands for a display resource derived from an image payload
//! (a thumbnail, an object URL, a texture). Handles are created when an image
//! arrives in the store and must be revoked explicitly when the image leaves it
//! or its payload wrapper is replaced, so long sessions do not leak them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::ImagePayload;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PreviewHandle(u64);

impl PreviewHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct PreviewRegistry {
    next_id: u64,
    live: HashMap<u64, Arc<[u8]>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, payload: &ImagePayload) -> PreviewHandle {
        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        self.live.insert(id, Arc::clone(&payload.bytes));
        PreviewHandle(id)
    }

    /// Release a handle. Returns false if it was already released.
    pub fn revoke(&mut self, handle: PreviewHandle) -> bool {
        self.live.remove(&handle.0).is_some()
    }

    /// Source bytes behind a live handle, for the thumbnail renderer.
    pub fn resolve(&self, handle: PreviewHandle) -> Option<Arc<[u8]>> {
        self.live.get(&handle.0).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
