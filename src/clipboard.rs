// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Caption copy to the system clipboard.
//!
//! Tries the native clipboard first. Over SSH or without a display server
//! that fails, so the text is sent to the terminal as an OSC 52 sequence.

use std::io::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyMethod {
    Native,
    Osc52,
}

pub fn is_tmux_env() -> bool {
    std::env::var_os("TMUX").is_some()
}

/// Build OSC 52 escape sequence for clipboard copy.
fn build_osc52(data: &[u8], is_tmux: bool) -> Vec<u8> {
    let b64 = base64_simd::STANDARD.encode_to_string(data);

    if is_tmux {
        format!("\x1bPtmux;\x1b\x1b]52;c;{b64}\x07\x1b\\").into_bytes()
    } else {
        format!("\x1b]52;c;{b64}\x07").into_bytes()
    }
}

#[derive(Default)]
pub struct Clipboard {
    native: Option<arboard::Clipboard>,
}

impl Clipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn copy(&mut self, text: &str) -> std::io::Result<CopyMethod> {
        if self.native.is_none() {
            self.native = arboard::Clipboard::new()
                .inspect_err(|e| tracing::debug!(error = %e, "native clipboard unavailable"))
                .ok();
        }
        if let Some(native) = self.native.as_mut() {
            match native.set_text(text.to_string()) {
                Ok(()) => return Ok(CopyMethod::Native),
                Err(e) => tracing::debug!(error = %e, "native clipboard copy failed"),
            }
        }
        let mut out = std::io::stdout();
        out.write_all(&build_osc52(text.as_bytes(), is_tmux_env()))?;
        out.flush()?;
        Ok(CopyMethod::Osc52)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_osc52() {
        let result = build_osc52(b"red hair", false);
        let s = String::from_utf8_lossy(&result);
        assert!(s.starts_with("\x1b]52;c;"));
        assert!(s.ends_with('\x07'));
        assert!(s.contains("cmVkIGhhaXI="));
    }

    #[test]
    fn test_build_osc52_tmux() {
        let result = build_osc52(b"test", true);
        let s = String::from_utf8_lossy(&result);
        assert!(s.starts_with("\x1bPtmux;"));
        assert!(s.ends_with("\x1b\\"));
        assert!(s.contains("dGVzdA=="));
    }
}
