//! Terminal renderer.
//!
//! Keeps the widget tree in a [`MemoryRenderer`] and, on every flush, prints
//! it as one styled line per widget, indented by depth:
//!
//! ```text
//! frame
//!   label Hello
//!   button Save
//! ```
//!
//! Styling comes from the widget props:
//!
//! - `fg` / `color` and `bg` / `background`: `#RGB`, `#RRGGBB` or
//!   `#RRGGBBAA` hex.
//! - `font_weight = "bold"`, `font_style = "italic"`,
//!   `text_decoration = "underline" | "line-through"`, `opacity < 1` (dim).
//! - Boolean `bold`, `italic`, `underline`, `dim` props.
//!
//! There is no layout: positions, sizes and spacing are ignored.

use std::io::{self, Write};

use crossterm::cursor::MoveTo;
use crossterm::queue;
use crossterm::style::{
    Attribute, Color, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor,
};
use crossterm::terminal::{Clear, ClearType};

use super::memory::{MemoryRenderer, WidgetId};
use super::{Placement, Renderer};
use crate::error::RenderError;
use crate::tree::ERROR_TAG;
use crate::types::{Props, Value};

// =============================================================================
// Text attributes
// =============================================================================

bitflags::bitflags! {
    /// Text attributes as a bitfield.
    ///
    /// Combine with bitwise OR: `Attr::BOLD | Attr::ITALIC`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attr: u8 {
        const NONE = 0;
        const BOLD = 1 << 0;
        const DIM = 1 << 1;
        const ITALIC = 1 << 2;
        const UNDERLINE = 1 << 3;
        const BLINK = 1 << 4;
        const INVERSE = 1 << 5;
        const HIDDEN = 1 << 6;
        const STRIKETHROUGH = 1 << 7;
    }
}

impl Attr {
    /// Attributes requested by a widget's props.
    pub fn from_props(props: &Props) -> Self {
        let mut attr = Attr::NONE;
        let text = |name: &str| props.get(name).and_then(Value::as_str);
        let flag = |name: &str| props.get(name).and_then(Value::as_bool).unwrap_or(false);

        if flag("bold") || text("font_weight") == Some("bold") {
            attr |= Attr::BOLD;
        }
        if flag("italic") || text("font_style") == Some("italic") {
            attr |= Attr::ITALIC;
        }
        if flag("underline") || text("text_decoration") == Some("underline") {
            attr |= Attr::UNDERLINE;
        }
        if text("text_decoration") == Some("line-through") {
            attr |= Attr::STRIKETHROUGH;
        }
        let faded = props
            .get("opacity")
            .and_then(Value::as_f64)
            .is_some_and(|o| o < 1.0);
        if flag("dim") || faded {
            attr |= Attr::DIM;
        }
        attr
    }

    fn attributes(self) -> impl Iterator<Item = Attribute> {
        [
            (Attr::BOLD, Attribute::Bold),
            (Attr::DIM, Attribute::Dim),
            (Attr::ITALIC, Attribute::Italic),
            (Attr::UNDERLINE, Attribute::Underlined),
            (Attr::BLINK, Attribute::SlowBlink),
            (Attr::INVERSE, Attribute::Reverse),
            (Attr::HIDDEN, Attribute::Hidden),
            (Attr::STRIKETHROUGH, Attribute::CrossedOut),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, attribute)| attribute)
    }
}

// =============================================================================
// Color parsing
// =============================================================================

/// Parse a hex color (#RGB, #RRGGBB, #RRGGBBAA). Alpha is dropped.
pub(crate) fn parse_hex(hex: &str) -> Option<Color> {
    let hex = hex.trim().trim_start_matches('#');

    fn hex_digit(c: u8) -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'a'..=b'f' => Some(c - b'a' + 10),
            b'A'..=b'F' => Some(c - b'A' + 10),
            _ => None,
        }
    }

    fn hex_byte(s: &[u8], i: usize) -> Option<u8> {
        let high = hex_digit(s[i])?;
        let low = hex_digit(s[i + 1])?;
        Some((high << 4) | low)
    }

    let bytes = hex.as_bytes();
    let (r, g, b) = match bytes.len() {
        3 => {
            let r = hex_digit(bytes[0])?;
            let g = hex_digit(bytes[1])?;
            let b = hex_digit(bytes[2])?;
            ((r << 4) | r, (g << 4) | g, (b << 4) | b)
        }
        6 | 8 => (
            hex_byte(bytes, 0)?,
            hex_byte(bytes, 2)?,
            hex_byte(bytes, 4)?,
        ),
        _ => return None,
    };
    if bytes.len() == 8 {
        hex_byte(bytes, 6)?;
    }
    Some(Color::Rgb { r, g, b })
}

fn color_prop(props: &Props, names: &[&str]) -> Option<Color> {
    names
        .iter()
        .find_map(|name| props.get(*name).and_then(Value::as_str))
        .and_then(parse_hex)
}

// =============================================================================
// Renderer
// =============================================================================

/// Text props shown after the tag, first match wins.
const TEXT_PROPS: [&str; 4] = ["text", "label", "title", "message"];

/// Renderer that prints the widget tree to a writer.
pub struct TerminalRenderer<W: Write = io::Stdout> {
    tree: MemoryRenderer,
    out: W,
    indent: usize,
    clear: bool,
    frames: u64,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            tree: MemoryRenderer::new(),
            out,
            indent: 2,
            clear: false,
            frames: 0,
        }
    }

    /// Clear the screen and draw from the top-left on every flush.
    pub fn with_clear(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    /// Frames drawn so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The retained widget tree.
    pub fn tree(&self) -> &MemoryRenderer {
        &self.tree
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn draw(&mut self) -> io::Result<()> {
        if self.clear {
            queue!(self.out, Clear(ClearType::All), MoveTo(0, 0))?;
        }
        if let Some(root) = self.tree.root() {
            self.draw_widget(root, 0)?;
        }
        self.out.flush()
    }

    fn draw_widget(&mut self, id: WidgetId, depth: usize) -> io::Result<()> {
        let Some(tag) = self.tree.tag(id).map(str::to_string) else {
            return Ok(());
        };
        let props = self.tree.props(id).cloned().unwrap_or_default();

        let mut line = format!("{:width$}{tag}", "", width = depth * self.indent);
        if let Some(text) = TEXT_PROPS
            .iter()
            .find_map(|name| props.get(*name).and_then(Value::as_str))
        {
            line.push(' ');
            line.push_str(text);
        }

        let (fg, attr) = if tag == ERROR_TAG {
            (Some(Color::Red), Attr::BOLD)
        } else {
            (
                color_prop(&props, &["fg", "color"]),
                Attr::from_props(&props),
            )
        };
        let bg = color_prop(&props, &["bg", "background"]);

        if let Some(fg) = fg {
            queue!(self.out, SetForegroundColor(fg))?;
        }
        if let Some(bg) = bg {
            queue!(self.out, SetBackgroundColor(bg))?;
        }
        for attribute in attr.attributes() {
            queue!(self.out, SetAttribute(attribute))?;
        }
        queue!(self.out, Print(line))?;
        if fg.is_some() || bg.is_some() || !attr.is_empty() {
            queue!(self.out, SetAttribute(Attribute::Reset), ResetColor)?;
        }
        queue!(self.out, Print("\r\n"))?;

        let children = self.tree.children(id).to_vec();
        for child in children {
            self.draw_widget(child, depth + 1)?;
        }
        Ok(())
    }
}

impl<W: Write> Renderer for TerminalRenderer<W> {
    type Widget = WidgetId;

    fn create_widget(
        &mut self,
        tag: &str,
        props: &Props,
        placement: Placement<'_, WidgetId>,
    ) -> Result<WidgetId, RenderError> {
        self.tree.create_widget(tag, props, placement)
    }

    fn destroy_widget(&mut self, widget: &WidgetId) -> Result<(), RenderError> {
        self.tree.destroy_widget(widget)
    }

    fn update_widget(
        &mut self,
        widget: &WidgetId,
        changed: &Props,
        removed: &[String],
    ) -> Result<(), RenderError> {
        self.tree.update_widget(widget, changed, removed)
    }

    fn reorder_children(
        &mut self,
        parent: &WidgetId,
        new_order: &[WidgetId],
    ) -> Result<(), RenderError> {
        self.tree.reorder_children(parent, new_order)
    }

    fn flush(&mut self) -> Result<(), RenderError> {
        self.tree.clear_ops();
        self.draw()
            .map_err(|err| RenderError::Backend(err.to_string()))?;
        self.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::Patcher;
    use crate::tree::{Node, diff};

    fn render(tree: &Node) -> String {
        let mut renderer = TerminalRenderer::new(Vec::new());
        let mut patcher = Patcher::new();
        let report = patcher.apply(&mut renderer, &diff(None, Some(tree)));
        assert!(report.is_clean());
        assert_eq!(renderer.frames(), 1);
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("#ff0000"), Some(Color::Rgb { r: 255, g: 0, b: 0 }));
        assert_eq!(parse_hex("#fff"), Some(Color::Rgb { r: 255, g: 255, b: 255 }));
        assert_eq!(parse_hex("0000ff80"), Some(Color::Rgb { r: 0, g: 0, b: 255 }));
        assert!(parse_hex("invalid").is_none());
        assert!(parse_hex("#gg0000").is_none());
        assert!(parse_hex("#ff0000zz").is_none());
    }

    #[test]
    fn test_attr_from_props() {
        let mut props = Props::new();
        props.insert("font_weight".into(), "bold".into());
        props.insert("text_decoration".into(), "underline".into());
        props.insert("opacity".into(), Value::Float(0.5));
        assert_eq!(
            Attr::from_props(&props),
            Attr::BOLD | Attr::UNDERLINE | Attr::DIM
        );
        assert_eq!(Attr::from_props(&Props::new()), Attr::NONE);
    }

    #[test]
    fn test_plain_tree_is_indented() {
        let tree = Node::element("frame")
            .child(Node::element("label").prop("text", "Hello"))
            .child(Node::element("button").prop("label", "Save"));
        assert_eq!(render(&tree), "frame\r\n  label Hello\r\n  button Save\r\n");
    }

    #[test]
    fn test_styled_line_resets() {
        let tree = Node::element("label")
            .prop("text", "x")
            .prop("color", "#ff0000")
            .prop("bold", true);
        let out = render(&tree);
        assert!(out.contains("\x1b[38;2;255;0;0m"));
        assert!(out.contains("\x1b[1m"));
        assert!(out.ends_with("label x\x1b[0m\x1b[0m\r\n"));
    }

    #[test]
    fn test_error_node_is_highlighted() {
        let out = render(&Node::fallback("boom"));
        assert!(out.contains("error boom"));
        assert!(out.contains("\x1b[1m"));
    }
}
