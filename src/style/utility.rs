//! Utility-class resolver.
//!
//! Resolves class strings like `"bg-blue-500 p-4 md:p-8 dark:bg-gray-900
//! hover:bg-blue-600 font-bold"` against the design tokens.
//!
//! # Prefixes
//!
//! - `sm:` .. `2xl:` apply when the current breakpoint is at least that one.
//! - `dark:` applies under the dark theme only.
//! - `hover:` and `focus:` map background and foreground to `active_bg` /
//!   `active_fg` and `focus_bg` / `focus_fg`.
//!
//! Classes apply left to right; a later class overrides an earlier one that
//! sets the same prop. Unknown classes are ignored.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::trace;

use super::tokens::{self, Breakpoint};
use super::{StyleResolver, StyleToken};
use crate::types::{Props, Value};

const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// [`StyleResolver`] over the built-in design tokens, with a result cache
/// keyed by (class string, breakpoint, theme).
pub struct UtilityStyleResolver {
    cache: Mutex<HashMap<(String, StyleToken), Props>>,
    capacity: usize,
}

impl Default for UtilityStyleResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl UtilityStyleResolver {
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// The cache is emptied when it reaches `capacity` entries. Zero
    /// disables caching.
    pub fn with_cache_capacity(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    fn resolve_uncached(classes: &str, token: &StyleToken) -> Props {
        let mut props = Props::new();
        for class in classes.split_whitespace() {
            apply(class, token, &mut props);
        }
        props
    }
}

impl StyleResolver for UtilityStyleResolver {
    fn resolve(&self, classes: &str, token: &StyleToken) -> Props {
        if self.capacity == 0 {
            return Self::resolve_uncached(classes, token);
        }
        let key = (classes.to_string(), *token);
        if let Some(hit) = self.cache.lock().get(&key) {
            return hit.clone();
        }

        let props = Self::resolve_uncached(classes, token);
        let mut cache = self.cache.lock();
        if cache.len() >= self.capacity {
            cache.clear();
        }
        cache.insert(key, props.clone());
        props
    }
}

// =============================================================================
// Class rules
// =============================================================================

fn apply(class: &str, token: &StyleToken, out: &mut Props) {
    let mut class = class;

    if let Some((prefix, rest)) = class.split_once(':')
        && let Ok(breakpoint) = prefix.parse::<Breakpoint>()
    {
        if token.breakpoint < breakpoint {
            return;
        }
        class = rest;
    }

    if let Some(rest) = class.strip_prefix("dark:") {
        if !token.theme.is_dark() {
            return;
        }
        class = rest;
    }

    let pseudo = [
        ("hover:", "active_bg", "active_fg"),
        ("focus:", "focus_bg", "focus_fg"),
    ];
    for (prefix, bg, fg) in pseudo {
        if let Some(rest) = class.strip_prefix(prefix) {
            let props = utility(rest, token);
            if let Some(value) = props.get("bg") {
                out.insert(bg.to_string(), value.clone());
            }
            if let Some(value) = props.get("fg") {
                out.insert(fg.to_string(), value.clone());
            }
            return;
        }
    }
    if class.contains(':') {
        trace!(class, "unsupported class prefix");
        return;
    }

    let props = utility(class, token);
    if props.is_empty() {
        trace!(class, "unknown utility class");
    }
    out.extend(props);
}

fn color(name: &str, token: &StyleToken) -> Option<Value> {
    token
        .theme
        .palette()
        .role(name)
        .or_else(|| tokens::color(name))
        .map(Value::from)
}

fn props<const N: usize>(entries: [(&str, Value); N]) -> Props {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn one(name: &str, value: Option<impl Into<Value>>) -> Props {
    value
        .map(|v| props([(name, v.into())]))
        .unwrap_or_default()
}

fn size(name: &str, step: &str) -> Props {
    let full = format!("{name}_full");
    match step {
        "full" => props([
            (name, Value::from("100%")),
            (full.as_str(), Value::from(true)),
        ]),
        "screen" => props([(full.as_str(), Value::from(true))]),
        "auto" => props([(name, Value::from("auto"))]),
        _ => one(name, tokens::spacing(step)),
    }
}

/// Props for one bare utility class.
fn utility(class: &str, token: &StyleToken) -> Props {
    match class {
        "flex" | "flex-row" => {
            return props([
                ("layout", "horizontal".into()),
                ("layout_manager", "flex".into()),
            ]);
        }
        "flex-col" => {
            return props([
                ("layout", "vertical".into()),
                ("layout_manager", "flex".into()),
            ]);
        }
        "flex-1" => return props([("flex_grow", 1.into())]),
        "flex-none" => return props([("flex_grow", 0.into())]),
        "flex-wrap" => return props([("flex_wrap", "wrap".into())]),
        "grid" => return props([("layout_manager", "grid".into())]),
        "hidden" => return props([("visible", false.into())]),
        "italic" => return props([("font_style", "italic".into())]),
        "underline" => return props([("text_decoration", "underline".into())]),
        "line-through" => return props([("text_decoration", "line-through".into())]),
        "border" => {
            return props([
                ("border_width", 1.into()),
                ("border_color", token.theme.palette().border.into()),
            ]);
        }
        "rounded" => return one("border_radius", tokens::radius("default")),
        _ => {}
    }

    let Some((head, rest)) = class.split_once('-') else {
        return Props::new();
    };
    match head {
        "bg" => one("bg", color(rest, token)),
        "text" => match rest {
            "left" | "center" | "right" => props([("text_align", rest.into())]),
            _ => match tokens::font_size(rest) {
                Some(size) => props([("font_size", size.into())]),
                None => one("fg", color(rest, token)),
            },
        },
        "p" => match tokens::spacing(rest) {
            Some(v) => props([("padx", v.into()), ("pady", v.into())]),
            None => Props::new(),
        },
        "px" => one("padx", tokens::spacing(rest)),
        "py" => one("pady", tokens::spacing(rest)),
        "pt" => one("pad_top", tokens::spacing(rest)),
        "pr" => one("pad_right", tokens::spacing(rest)),
        "pb" => one("pad_bottom", tokens::spacing(rest)),
        "pl" => one("pad_left", tokens::spacing(rest)),
        "m" => one("margin", tokens::spacing(rest)),
        "mx" => one("margin_x", tokens::spacing(rest)),
        "my" => one("margin_y", tokens::spacing(rest)),
        "w" => size("width", rest),
        "h" => size("height", rest),
        "gap" => one("spacing", tokens::spacing(rest)),
        "font" => match rest {
            "sans" => props([("font_family", "sans-serif".into())]),
            "serif" => props([("font_family", "serif".into())]),
            "mono" => props([("font_family", "monospace".into())]),
            _ => one("font_weight", tokens::font_weight(rest)),
        },
        "rounded" => one("border_radius", tokens::radius(rest)),
        "opacity" => one("opacity", tokens::opacity(rest)),
        "border" => border(rest, token),
        _ => Props::new(),
    }
}

fn border(rest: &str, token: &StyleToken) -> Props {
    if let Ok(width) = rest.parse::<i64>() {
        return props([("border_width", width.into())]);
    }
    let side = |s: &str| match s {
        "t" => Some("top"),
        "r" => Some("right"),
        "b" => Some("bottom"),
        "l" => Some("left"),
        _ => None,
    };
    match rest.split_once('-') {
        Some((s, width)) if side(s).is_some() => {
            let width = width.parse::<i64>().unwrap_or(1);
            let name = format!("border_{}_width", side(s).unwrap_or_default());
            props([(name.as_str(), width.into())])
        }
        _ if side(rest).is_some() => {
            let name = format!("border_{}_width", side(rest).unwrap_or_default());
            props([(name.as_str(), 1.into())])
        }
        _ => one("border_color", color(rest, token)),
    }
}
