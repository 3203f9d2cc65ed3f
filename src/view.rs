// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Derived views: the filtered, searched sequence of visible images and the
//! per-scope counters shown in the toolbar.

use std::sync::{Arc, LazyLock};

use regex::{Regex, RegexBuilder};

use crate::model::{ImageId, ImageStatus, Project, ProjectId, Scope, TagImage};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ViewFilter {
    #[default]
    All,
    /// Anything not yet captioned: idle, loading or errored.
    Pending,
    Completed,
}

impl ViewFilter {
    pub fn next(self) -> Self {
        match self {
            ViewFilter::All => ViewFilter::Pending,
            ViewFilter::Pending => ViewFilter::Completed,
            ViewFilter::Completed => ViewFilter::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ViewFilter::All => "all",
            ViewFilter::Pending => "pending",
            ViewFilter::Completed => "completed",
        }
    }

    pub fn matches(self, status: ImageStatus) -> bool {
        match self {
            ViewFilter::All => true,
            ViewFilter::Pending => status != ImageStatus::Success,
            ViewFilter::Completed => status == ImageStatus::Success,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LenOp {
    Gt,
    Lt,
    Eq,
    Ge,
    Le,
}

impl LenOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            ">" => Some(LenOp::Gt),
            "<" => Some(LenOp::Lt),
            "=" | "==" => Some(LenOp::Eq),
            ">=" => Some(LenOp::Ge),
            "<=" => Some(LenOp::Le),
            _ => None,
        }
    }

    fn test(self, len: usize, target: usize) -> bool {
        match self {
            LenOp::Gt => len > target,
            LenOp::Lt => len < target,
            LenOp::Eq => len == target,
            LenOp::Ge => len >= target,
            LenOp::Le => len <= target,
        }
    }
}

static LEN_QUERY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    RegexBuilder::new(r"^len\s*([><=]+)\s*(\d+)$")
        .case_insensitive(true)
        .build()
        .ok()
});

/// Parsed search box contents.
///
/// `len>N`, `len<N`, `len=N` (or `==`), `len>=N`, `len<=N` compare the
/// caption length in characters. Anything else is a case-insensitive
/// substring match against file name or caption.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SearchQuery {
    #[default]
    Empty,
    Length(LenOp, usize),
    Text(String),
    /// A `len` query with an unknown operator; matches nothing.
    NoMatch,
}

impl SearchQuery {
    pub fn parse(input: &str) -> Self {
        let q = input.trim();
        if q.is_empty() {
            return SearchQuery::Empty;
        }
        if let Some(caps) = LEN_QUERY.as_ref().and_then(|re| re.captures(q)) {
            let op = LenOp::parse(&caps[1]);
            let target = caps[2].parse::<usize>().ok();
            return match (op, target) {
                (Some(op), Some(target)) => SearchQuery::Length(op, target),
                _ => SearchQuery::NoMatch,
            };
        }
        SearchQuery::Text(q.to_lowercase())
    }

    pub fn matches(&self, image: &TagImage) -> bool {
        match self {
            SearchQuery::Empty => true,
            SearchQuery::Length(op, target) => op.test(image.caption.chars().count(), *target),
            SearchQuery::Text(needle) => {
                image.name().to_lowercase().contains(needle)
                    || image.caption.to_lowercase().contains(needle)
            }
            SearchQuery::NoMatch => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VisibleItem {
    pub project_id: ProjectId,
    pub image_id: ImageId,
}

/// Images in scope that pass the filter and query, in project then image
/// order. Collapsed projects are hidden only when viewing all projects.
pub fn visible_items(
    projects: &[Arc<Project>],
    scope: Scope,
    filter: ViewFilter,
    query: &SearchQuery,
) -> Vec<VisibleItem> {
    projects
        .iter()
        .filter(|p| scope.includes(p.id))
        .filter(|p| !(p.collapsed && scope == Scope::All))
        .flat_map(|p| {
            p.images
                .iter()
                .filter(move |i| filter.matches(i.status) && query.matches(i))
                .map(move |i| VisibleItem {
                    project_id: p.id,
                    image_id: i.id,
                })
        })
        .collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub total: usize,
    pub completed: usize,
    /// Everything not completed.
    pub pending: usize,
    pub errors: usize,
    pub loading: usize,
}

impl ContextStats {
    /// Completed share, 0.0 to 1.0.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

pub fn context_stats(projects: &[Arc<Project>], scope: Scope) -> ContextStats {
    let mut stats = ContextStats::default();
    for project in projects.iter().filter(|p| scope.includes(p.id)) {
        stats.total += project.images.len();
        stats.completed += project.count(ImageStatus::Success);
        stats.errors += project.count(ImageStatus::Error);
        stats.loading += project.count(ImageStatus::Loading);
    }
    stats.pending = stats.total - stats.completed;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImagePayload;

    fn image(name: &str, caption: &str, status: ImageStatus) -> TagImage {
        let mut image = TagImage::new(ImagePayload::new(name, "image/png", vec![0u8]));
        image.caption = caption.to_string();
        image.status = status;
        image
    }

    fn fixture() -> Vec<Arc<Project>> {
        let mut a = Project::new("a");
        a.push(image("cat.png", "a cat, sitting", ImageStatus::Success));
        a.push(image("dog.png", "", ImageStatus::Idle));
        let mut b = Project::new("b");
        b.push(image("bird.jpg", "red bird", ImageStatus::Error));
        b.collapsed = true;
        vec![Arc::new(a), Arc::new(b)]
    }

    #[test]
    fn test_parse_length_queries() {
        assert_eq!(SearchQuery::parse("len>5"), SearchQuery::Length(LenOp::Gt, 5));
        assert_eq!(SearchQuery::parse(" LEN <= 10 "), SearchQuery::Length(LenOp::Le, 10));
        assert_eq!(SearchQuery::parse("len==0"), SearchQuery::Length(LenOp::Eq, 0));
        assert_eq!(SearchQuery::parse("len=<3"), SearchQuery::NoMatch);
        assert_eq!(SearchQuery::parse("length"), SearchQuery::Text("length".into()));
        assert_eq!(SearchQuery::parse("   "), SearchQuery::Empty);
    }

    #[test]
    fn test_collapsed_hidden_only_in_all_scope() {
        let projects = fixture();
        let all = visible_items(&projects, Scope::All, ViewFilter::All, &SearchQuery::Empty);
        assert_eq!(all.len(), 2);

        let b = Scope::Project(projects[1].id);
        let only_b = visible_items(&projects, b, ViewFilter::All, &SearchQuery::Empty);
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].image_id, projects[1].images[0].id);
    }

    #[test]
    fn test_filter_and_search() {
        let mut projects = fixture();
        Arc::make_mut(&mut projects[1]).collapsed = false;

        let pending = visible_items(&projects, Scope::All, ViewFilter::Pending, &SearchQuery::Empty);
        assert_eq!(pending.len(), 2);

        let cat = visible_items(&projects, Scope::All, ViewFilter::All, &SearchQuery::parse("CAT"));
        assert_eq!(cat.len(), 1);

        let red = visible_items(&projects, Scope::All, ViewFilter::Pending, &SearchQuery::parse("red"));
        assert_eq!(red.len(), 1);

        let long = visible_items(&projects, Scope::All, ViewFilter::All, &SearchQuery::parse("len>8"));
        assert_eq!(long.len(), 1);
        let empty = visible_items(&projects, Scope::All, ViewFilter::All, &SearchQuery::parse("len=0"));
        assert_eq!(empty[0].image_id, projects[0].images[1].id);
    }

    #[test]
    fn test_context_stats() {
        let projects = fixture();
        let stats = context_stats(&projects, Scope::All);
        assert_eq!(stats, ContextStats { total: 3, completed: 1, pending: 2, errors: 1, loading: 0 });
        let a = context_stats(&projects, Scope::Project(projects[0].id));
        assert_eq!(a.total, 2);
        assert_eq!(a.progress(), 0.5);
    }
}
