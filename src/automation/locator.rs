//! Control location heuristics.
//!
//! Third-party tool windows expose no stable control identifiers, so a
//! control is described as a [`ControlQuery`] and resolved against the live
//! control tree with progressively looser heuristics. Later heuristics only
//! run when every earlier one found nothing, which keeps matches stable when
//! a tool update renames a button but keeps its class.

use crate::automation::window::{WindowId, WindowService};
use std::fmt;

const BOTTOM_BAND_NUMERATOR: i32 = 3;
const BOTTOM_BAND_DENOMINATOR: i32 = 4;
const STATUS_MIN_HEIGHT: i32 = 15;
const STATUS_MAX_HEIGHT: i32 = 60;

/// Description of a control to find inside a window.
///
/// `texts` lists acceptable captions in preference order, so one query can
/// cover wording changes across tool versions ("Randomize new run!" vs
/// "Reroll").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlQuery {
    pub class_name: Option<String>,
    pub texts: Vec<String>,
    pub bottom_band_fallback: bool,
}

impl ControlQuery {
    pub fn by_text(text: &str) -> Self {
        Self {
            texts: vec![text.to_string()],
            ..Self::default()
        }
    }

    pub fn by_texts(texts: &[&str]) -> Self {
        Self {
            texts: texts.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn by_class(class: &str) -> Self {
        Self {
            class_name: Some(class.to_string()),
            ..Self::default()
        }
    }

    pub fn with_texts(mut self, texts: &[&str]) -> Self {
        self.texts = texts.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Fall back to the lowest status-bar-sized control when nothing matches
    /// by class or text.
    pub fn with_bottom_band_fallback(mut self) -> Self {
        self.bottom_band_fallback = true;
        self
    }
}

impl fmt::Display for ControlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.class_name, self.texts.first()) {
            (Some(class), Some(text)) => write!(f, "class {class:?} or text {text:?}"),
            (Some(class), None) => write!(f, "class {class:?}"),
            (None, Some(text)) => write!(f, "text {text:?}"),
            (None, None) => write!(f, "bottom band control"),
        }
    }
}

/// Resolve a query against the window's descendant tree.
pub fn locate(ws: &dyn WindowService, root: WindowId, query: &ControlQuery) -> Option<WindowId> {
    if let Some(class) = &query.class_name {
        if let Some(hit) = find(ws, root, &mut |w| ws.class_name(w) == *class) {
            return Some(hit);
        }
        if let Some(hit) = find(ws, root, &mut |w| ws.class_name(w).starts_with(class)) {
            return Some(hit);
        }
    }

    for text in &query.texts {
        let needle = text.to_lowercase();
        let hit = find(ws, root, &mut |w| {
            ws.class_name(w).to_lowercase().contains(&needle)
                || ws.window_text(w).to_lowercase().contains(&needle)
        });
        if hit.is_some() {
            return hit;
        }
    }

    if query.bottom_band_fallback {
        return find_bottom_band(ws, root);
    }
    None
}

/// Depth-first search over descendants, parents before their children.
fn find(
    ws: &dyn WindowService,
    parent: WindowId,
    predicate: &mut dyn FnMut(WindowId) -> bool,
) -> Option<WindowId> {
    for child in ws.child_windows(parent) {
        if predicate(child) {
            return Some(child);
        }
        if let Some(hit) = find(ws, child, predicate) {
            return Some(hit);
        }
    }
    None
}

fn descendants(ws: &dyn WindowService, parent: WindowId, out: &mut Vec<WindowId>) {
    for child in ws.child_windows(parent) {
        out.push(child);
        descendants(ws, child, out);
    }
}

/// Positional fallback: a status bar sits in the bottom quarter of its
/// window and is 15 to 60 pixels tall. Of the candidates, the one closest to
/// the bottom edge wins.
fn find_bottom_band(ws: &dyn WindowService, root: WindowId) -> Option<WindowId> {
    let parent = ws.window_rect(root)?;
    let band_top = parent.top + parent.height() * BOTTOM_BAND_NUMERATOR / BOTTOM_BAND_DENOMINATOR;

    let mut all = Vec::new();
    descendants(ws, root, &mut all);

    let mut best: Option<(WindowId, i32)> = None;
    for candidate in all {
        let Some(rect) = ws.window_rect(candidate) else {
            continue;
        };
        let height = rect.height();
        if rect.bottom > band_top && (STATUS_MIN_HEIGHT..=STATUS_MAX_HEIGHT).contains(&height) {
            if best.is_none_or(|(_, bottom)| rect.bottom > bottom) {
                best = Some((candidate, rect.bottom));
            }
        }
    }
    best.map(|(id, _)| id)
}
