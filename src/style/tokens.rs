//! Design tokens and theme palettes.
//!
//! Scales follow the usual utility-class conventions: a ten-shade color
//! palette per hue, a 4px spacing scale, named font sizes and weights,
//! corner radii, opacities and breakpoint widths.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Breakpoints and themes
// =============================================================================

/// Viewport size class, smallest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Breakpoint {
    Xs,
    Sm,
    #[default]
    Md,
    Lg,
    Xl,
    #[serde(rename = "2xl")]
    Xxl,
}

impl Breakpoint {
    pub const ALL: [Breakpoint; 6] = [
        Breakpoint::Xs,
        Breakpoint::Sm,
        Breakpoint::Md,
        Breakpoint::Lg,
        Breakpoint::Xl,
        Breakpoint::Xxl,
    ];

    /// Minimum viewport width in pixels.
    pub fn min_width(self) -> u32 {
        match self {
            Breakpoint::Xs => 0,
            Breakpoint::Sm => 640,
            Breakpoint::Md => 768,
            Breakpoint::Lg => 1024,
            Breakpoint::Xl => 1280,
            Breakpoint::Xxl => 1536,
        }
    }

    /// Largest breakpoint whose minimum width fits `width`.
    pub fn for_width(width: u32) -> Self {
        Self::ALL
            .into_iter()
            .rev()
            .find(|bp| width >= bp.min_width())
            .unwrap_or(Breakpoint::Xs)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Breakpoint::Xs => "xs",
            Breakpoint::Sm => "sm",
            Breakpoint::Md => "md",
            Breakpoint::Lg => "lg",
            Breakpoint::Xl => "xl",
            Breakpoint::Xxl => "2xl",
        }
    }
}

impl FromStr for Breakpoint {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|bp| bp.as_str() == s).ok_or(())
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn is_dark(self) -> bool {
        self == Theme::Dark
    }

    /// Semantic colors for this theme.
    pub fn palette(self) -> &'static Palette {
        match self {
            Theme::Light => &LIGHT,
            Theme::Dark => &DARK,
        }
    }
}

// =============================================================================
// Semantic palettes
// =============================================================================

/// Semantic colors, addressed by role rather than hue (`bg-primary`,
/// `text-muted`, `border-border`).
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    pub name: &'static str,
    pub primary: &'static str,
    pub secondary: &'static str,
    pub success: &'static str,
    pub warning: &'static str,
    pub error: &'static str,
    pub info: &'static str,
    pub background: &'static str,
    pub surface: &'static str,
    pub text: &'static str,
    pub muted: &'static str,
    pub border: &'static str,
}

impl Palette {
    /// Color for a semantic role name.
    pub fn role(&self, name: &str) -> Option<&'static str> {
        Some(match name {
            "primary" => self.primary,
            "secondary" => self.secondary,
            "success" => self.success,
            "warning" => self.warning,
            "error" | "danger" => self.error,
            "info" => self.info,
            "background" => self.background,
            "surface" => self.surface,
            "text" => self.text,
            "muted" => self.muted,
            "border" => self.border,
            _ => return None,
        })
    }
}

static LIGHT: Palette = Palette {
    name: "light",
    primary: "#3b82f6",   // blue-500
    secondary: "#6b7280", // gray-500
    success: "#22c55e",
    warning: "#eab308",
    error: "#ef4444",
    info: "#06b6d4",
    background: "#ffffff",
    surface: "#f3f4f6",
    text: "#111827",
    muted: "#6b7280",
    border: "#d1d5db",
};

static DARK: Palette = Palette {
    name: "dark",
    primary: "#60a5fa",   // blue-400
    secondary: "#9ca3af", // gray-400
    success: "#4ade80",
    warning: "#facc15",
    error: "#f87171",
    info: "#22d3ee",
    background: "#111827",
    surface: "#1f2937",
    text: "#f3f4f6",
    muted: "#9ca3af",
    border: "#374151",
};

// =============================================================================
// Scales
// =============================================================================

const SHADES: [u16; 10] = [50, 100, 200, 300, 400, 500, 600, 700, 800, 900];

#[rustfmt::skip]
const COLORS: &[(&str, [&str; 10])] = &[
    ("slate", ["#f8fafc", "#f1f5f9", "#e2e8f0", "#cbd5e1", "#94a3b8", "#64748b", "#475569", "#334155", "#1e293b", "#0f172a"]),
    ("gray", ["#f9fafb", "#f3f4f6", "#e5e7eb", "#d1d5db", "#9ca3af", "#6b7280", "#4b5563", "#374151", "#1f2937", "#111827"]),
    ("blue", ["#eff6ff", "#dbeafe", "#bfdbfe", "#93c5fd", "#60a5fa", "#3b82f6", "#2563eb", "#1d4ed8", "#1e40af", "#1e3a8a"]),
    ("red", ["#fef2f2", "#fee2e2", "#fecaca", "#fca5a5", "#f87171", "#ef4444", "#dc2626", "#b91c1c", "#991b1b", "#7f1d1d"]),
    ("green", ["#f0fdf4", "#dcfce7", "#bbf7d0", "#86efac", "#4ade80", "#22c55e", "#16a34a", "#15803d", "#166534", "#14532d"]),
    ("yellow", ["#fefce8", "#fef9c3", "#fef08a", "#fde047", "#facc15", "#eab308", "#ca8a04", "#a16207", "#854d0e", "#713f12"]),
    ("purple", ["#faf5ff", "#f3e8ff", "#e9d5ff", "#d8b4fe", "#c084fc", "#a855f7", "#9333ea", "#7e22ce", "#6b21a8", "#581c87"]),
    ("pink", ["#fdf2f8", "#fce7f3", "#fbcfe8", "#f9a8d4", "#f472b6", "#ec4899", "#db2777", "#be185d", "#9d174d", "#831843"]),
    ("orange", ["#fff7ed", "#ffedd5", "#fed7aa", "#fdba74", "#fb923c", "#f97316", "#ea580c", "#c2410c", "#9a3412", "#7c2d12"]),
    ("cyan", ["#ecfeff", "#cffafe", "#a5f3fc", "#67e8f9", "#22d3ee", "#06b6d4", "#0891b2", "#0e7490", "#155e75", "#164e63"]),
    ("teal", ["#f0fdfa", "#ccfbf1", "#99f6e4", "#5eead4", "#2dd4bf", "#14b8a6", "#0d9488", "#0f766e", "#115e59", "#134e4a"]),
];

const SPACING: &[(&str, i64)] = &[
    ("0", 0),
    ("1", 4),
    ("2", 8),
    ("3", 12),
    ("4", 16),
    ("5", 20),
    ("6", 24),
    ("8", 32),
    ("10", 40),
    ("12", 48),
    ("16", 64),
    ("20", 80),
    ("24", 96),
    ("32", 128),
    ("40", 160),
    ("48", 192),
    ("64", 256),
    ("80", 320),
    ("96", 384),
];

const FONT_SIZES: &[(&str, i64)] = &[
    ("xs", 10),
    ("sm", 12),
    ("base", 14),
    ("lg", 16),
    ("xl", 18),
    ("2xl", 20),
    ("3xl", 24),
    ("4xl", 28),
    ("5xl", 32),
    ("6xl", 36),
    ("7xl", 40),
    ("8xl", 48),
    ("9xl", 56),
];

/// Named weights collapse to the two weights a text widget can show.
const FONT_WEIGHTS: &[(&str, &str)] = &[
    ("thin", "normal"),
    ("extralight", "normal"),
    ("light", "normal"),
    ("normal", "normal"),
    ("medium", "normal"),
    ("semibold", "bold"),
    ("bold", "bold"),
    ("extrabold", "bold"),
    ("black", "bold"),
];

const RADII: &[(&str, i64)] = &[
    ("none", 0),
    ("sm", 2),
    ("default", 4),
    ("md", 6),
    ("lg", 8),
    ("xl", 12),
    ("2xl", 16),
    ("3xl", 24),
    ("full", 9999),
];

fn lookup<T: Copy>(table: &[(&str, T)], name: &str) -> Option<T> {
    table.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
}

/// Hex color for `hue-shade`, or `hue` alone at shade 500. A shade missing
/// from the scale resolves to the closest one.
pub fn color(name: &str) -> Option<&'static str> {
    match name {
        "white" => return Some("#ffffff"),
        "black" => return Some("#000000"),
        _ => {}
    }
    let (hue, shade) = match name.rsplit_once('-') {
        Some((hue, shade)) => (hue, shade.parse::<u16>().ok()?),
        None => (name, 500),
    };
    let shades = COLORS.iter().find(|(h, _)| *h == hue).map(|(_, s)| s)?;
    let index = SHADES
        .iter()
        .enumerate()
        .min_by_key(|(_, s)| s.abs_diff(shade))
        .map(|(i, _)| i)?;
    Some(shades[index])
}

/// Spacing scale step in pixels.
pub fn spacing(step: &str) -> Option<i64> {
    lookup(SPACING, step)
}

pub fn font_size(name: &str) -> Option<i64> {
    lookup(FONT_SIZES, name)
}

pub fn font_weight(name: &str) -> Option<&'static str> {
    lookup(FONT_WEIGHTS, name)
}

pub fn radius(name: &str) -> Option<i64> {
    lookup(RADII, name)
}

/// Opacity step (`0`..=`100`) as a fraction.
pub fn opacity(step: &str) -> Option<f64> {
    let step: u8 = step.parse().ok()?;
    (step <= 100 && step % 5 == 0).then(|| f64::from(step) / 100.0)
}
