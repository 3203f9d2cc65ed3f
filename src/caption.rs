// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Caption text transforms: batch edits and the blocked-word filter.

use regex::{NoExpand, Regex, RegexBuilder};

/// A bulk edit applied to every targeted caption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptionEdit {
    /// Case-insensitive literal find/replace.
    Replace { find: String, replace: String },
    Prepend(String),
    Append(String),
    AddTags(Vec<String>),
    RemoveTags(Vec<String>),
}

impl CaptionEdit {
    pub fn apply(&self, caption: &str) -> String {
        match self {
            CaptionEdit::Replace { find, replace } => replace_literal(caption, find, replace),
            CaptionEdit::Prepend(prefix) => format!("{prefix}{caption}"),
            CaptionEdit::Append(suffix) => format!("{caption}{suffix}"),
            CaptionEdit::AddTags(tags) => add_tags(caption, tags),
            CaptionEdit::RemoveTags(tags) => remove_tags(caption, tags),
        }
    }
}

/// Split a comma-separated tag list, trimming and dropping empty entries.
pub fn split_tags(caption: &str) -> Vec<&str> {
    caption
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}

fn replace_literal(caption: &str, find: &str, replace: &str) -> String {
    if find.is_empty() {
        return caption.to_string();
    }
    match RegexBuilder::new(&regex::escape(find))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.replace_all(caption, NoExpand(replace)).into_owned(),
        Err(_) => caption.to_string(),
    }
}

fn add_tags(caption: &str, tags: &[String]) -> String {
    let current = split_tags(caption);
    let mut seen: Vec<String> = current.iter().map(|t| t.to_lowercase()).collect();
    let mut to_add = Vec::new();
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        let lower = tag.to_lowercase();
        if !seen.contains(&lower) {
            seen.push(lower);
            to_add.push(tag);
        }
    }
    if to_add.is_empty() {
        return caption.to_string();
    }
    current
        .into_iter()
        .chain(to_add)
        .collect::<Vec<_>>()
        .join(", ")
}

fn remove_tags(caption: &str, tags: &[String]) -> String {
    let remove: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    split_tags(caption)
        .into_iter()
        .filter(|t| !remove.contains(&t.to_lowercase()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compiled blocked-phrase filter for generated captions.
///
/// In a comma-separated caption every segment containing a blocked phrase is
/// dropped as a whole; a caption without commas has the phrases cut out in
/// place. Leftover separators and runs of whitespace are collapsed afterwards.
#[derive(Debug, Default)]
pub struct BlockedWords {
    patterns: Vec<Regex>,
}

impl BlockedWords {
    pub fn new<S: AsRef<str>>(words: &[S]) -> Self {
        let patterns = words
            .iter()
            .map(|w| w.as_ref().trim())
            .filter(|w| !w.is_empty())
            .filter_map(|w| {
                RegexBuilder::new(&format!(r"\b{}\b", regex::escape(w)))
                    .case_insensitive(true)
                    .build()
                    .ok()
            })
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    fn is_blocked(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(text))
    }

    fn strip(&self, text: &str) -> String {
        self.patterns
            .iter()
            .fold(text.to_string(), |acc, re| re.replace_all(&acc, "").into_owned())
    }

    pub fn apply(&self, text: &str) -> String {
        if self.is_empty() {
            return text.to_string();
        }
        let filtered = if text.contains(',') {
            text.split(',')
                .filter(|segment| !self.is_blocked(segment))
                .collect::<Vec<_>>()
                .join(",")
        } else {
            self.strip(text)
        };
        tidy(&filtered)
    }
}

/// Collapse empty comma segments and whitespace runs, trim outer commas.
fn tidy(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    for segment in collapsed.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(segment);
    }
    if collapsed.contains(',') {
        out
    } else {
        collapsed.trim_matches(|c: char| c == ',' || c.is_whitespace()).to_string()
    }
}
