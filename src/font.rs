use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use ttf_parser::GlyphId;

use crate::types::Pt;

/// Font selection for one run of text.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    pub family: String,
    pub size: Pt,
    pub bold: bool,
    pub italic: bool,
}

impl FontSpec {
    pub fn new(family: impl Into<String>, size: Pt) -> Self {
        Self {
            family: family.into(),
            size,
            bold: false,
            italic: false,
        }
    }

    pub fn styled(&self, bold: bool, italic: bool) -> FontSpec {
        FontSpec {
            family: self.family.clone(),
            size: self.size,
            bold,
            italic,
        }
    }
}

/// Text metrics used by layout.
pub trait TextMeasure: Send + Sync {
    fn text_width(&self, text: &str, font: &FontSpec) -> Pt;

    fn line_height(&self, font: &FontSpec) -> Pt {
        font.size.mul_ratio(6, 5)
    }

    /// Name of the concrete face for the font's weight and style.
    fn font_name(&self, font: &FontSpec) -> String {
        base14_variant_name(&font.family, font.bold, font.italic)
            .map(str::to_string)
            .unwrap_or_else(|| font.family.clone())
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TextWidthKey {
    font_index: usize,
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct TextWidthCache {
    map: HashMap<TextWidthKey, Pt>,
    order: VecDeque<TextWidthKey>,
    max_entries: usize,
}

impl TextWidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&self, key: &TextWidthKey) -> Option<Pt> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: TextWidthKey, value: Pt) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            let Some(old) = self.order.pop_front() else {
                break;
            };
            self.map.remove(&old);
        }
    }
}

/// Registered TrueType/OpenType faces. Unknown families measure with a fixed
/// per-character advance of 0.6em.
#[derive(Debug)]
pub struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, usize>,
    use_full_unicode_metrics: bool,
    text_width_cache: Mutex<TextWidthCache>,
}

#[derive(Debug)]
struct RegisteredFont {
    data: Vec<u8>,
    metrics: FontMetrics,
}

#[derive(Debug)]
struct FontMetrics {
    first_char: u8,
    last_char: u8,
    widths: Vec<u16>,
    glyph_ids: Vec<u16>,
    ascent: i16,
    descent: i16,
    line_gap: i16,
    missing_width: u16,
    kerning: HashMap<(u16, u16), i16>,
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FontRegistry {
    pub fn new() -> Self {
        Self {
            fonts: Vec::new(),
            lookup: HashMap::new(),
            use_full_unicode_metrics: true,
            text_width_cache: Mutex::new(TextWidthCache::new(20_000)),
        }
    }

    pub fn set_use_full_unicode_metrics(&mut self, enabled: bool) {
        self.use_full_unicode_metrics = enabled;
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    pub fn register_dir(&mut self, path: impl AsRef<Path>) -> usize {
        let Ok(entries) = fs::read_dir(path.as_ref()) else {
            return 0;
        };
        let mut added = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && self.register_file(&path) {
                added += 1;
            }
        }
        added
    }

    /// Registers a `.ttf`/`.otf` file. Unreadable or unparsable files are skipped.
    pub fn register_file(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        if ext != "ttf" && ext != "otf" {
            return false;
        }
        let Ok(data) = fs::read(path) else {
            log::warn!("font file {} could not be read", path.display());
            return false;
        };
        let Ok(face) = ttf_parser::Face::parse(&data, 0) else {
            log::warn!("font file {} is not a usable face", path.display());
            return false;
        };

        let names = font_names(&face, path);
        let metrics = FontMetrics::from_face(&face);
        let index = self.fonts.len();
        self.fonts.push(RegisteredFont { data, metrics });
        for alias in names {
            let key = normalize_name(&alias);
            if key.is_empty() || self.lookup.contains_key(&key) {
                continue;
            }
            self.lookup.insert(key, index);
        }
        true
    }

    fn resolve(&self, name: &str) -> Option<(usize, &RegisteredFont)> {
        let index = *self.lookup.get(&normalize_name(name))?;
        self.fonts.get(index).map(|font| (index, font))
    }

    fn measure(&self, name: &str, font_size: Pt, text: &str) -> Pt {
        let Some((index, font)) = self.resolve(name) else {
            return fallback_width(font_size, text);
        };
        let cache_key = TextWidthKey {
            font_index: index,
            size_milli: font_size.to_milli_i64(),
            text: text.to_string(),
        };
        if let Ok(cache) = self.text_width_cache.lock() {
            if let Some(value) = cache.get(&cache_key) {
                return value;
            }
        }
        let value = if !self.use_full_unicode_metrics || font.metrics.is_within_basic_latin(text) {
            font.metrics.measure_text_width(font_size, text)
        } else {
            measure_text_width_full(font, font_size, text)
                .unwrap_or_else(|| font.metrics.measure_text_width(font_size, text))
        };
        if let Ok(mut cache) = self.text_width_cache.lock() {
            cache.insert(cache_key, value);
        }
        value
    }
}

impl TextMeasure for FontRegistry {
    fn text_width(&self, text: &str, font: &FontSpec) -> Pt {
        self.measure(&self.font_name(font), font.size, text)
    }

    fn line_height(&self, font: &FontSpec) -> Pt {
        let fallback = font.size.mul_ratio(6, 5);
        match self.resolve(&self.font_name(font)) {
            Some((_, registered)) => registered.metrics.line_height(font.size).max(fallback),
            None => fallback,
        }
    }

    fn font_name(&self, font: &FontSpec) -> String {
        let base = font.family.as_str();
        if !font.bold && !font.italic {
            return base.to_string();
        }
        if let Some(base14) = base14_variant_name(base, font.bold, font.italic) {
            return base14.to_string();
        }
        let mut candidates: Vec<String> = Vec::new();
        if font.bold && font.italic {
            candidates.push(format!("{base} Bold Italic"));
            candidates.push(format!("{base} BoldItalic"));
            candidates.push(format!("{base}-BoldItalic"));
        }
        if font.bold {
            candidates.push(format!("{base} Bold"));
            candidates.push(format!("{base} SemiBold"));
            candidates.push(format!("{base}-Bold"));
        }
        if font.italic {
            candidates.push(format!("{base} Italic"));
            candidates.push(format!("{base} Oblique"));
            candidates.push(format!("{base}-Italic"));
        }
        candidates
            .into_iter()
            .find(|candidate| self.resolve(candidate).is_some())
            .unwrap_or_else(|| base.to_string())
    }
}

fn fallback_width(font_size: Pt, text: &str) -> Pt {
    let char_width = (font_size * 0.6).max(Pt::from_f32(1.0));
    char_width * (text.chars().count() as i32)
}

pub(crate) fn base14_variant_name(base: &str, bold: bool, italic: bool) -> Option<&'static str> {
    match normalize_name(base).as_str() {
        "helvetica" | "arial" => Some(match (bold, italic) {
            (true, true) => "Helvetica-BoldOblique",
            (true, false) => "Helvetica-Bold",
            (false, true) => "Helvetica-Oblique",
            (false, false) => "Helvetica",
        }),
        "times-roman" | "times new roman" => Some(match (bold, italic) {
            (true, true) => "Times-BoldItalic",
            (true, false) => "Times-Bold",
            (false, true) => "Times-Italic",
            (false, false) => "Times-Roman",
        }),
        "courier" | "courier new" => Some(match (bold, italic) {
            (true, true) => "Courier-BoldOblique",
            (true, false) => "Courier-Bold",
            (false, true) => "Courier-Oblique",
            (false, false) => "Courier",
        }),
        _ => None,
    }
}

impl FontMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let first_char = 32u8;
        let last_char = 255u8;
        let mut glyph_ids = Vec::with_capacity((last_char - first_char) as usize + 1);
        let mut widths = Vec::with_capacity(glyph_ids.capacity());
        for code in first_char..=last_char {
            let gid = char::from_u32(code as u32).and_then(|ch| face.glyph_index(ch));
            glyph_ids.push(gid.map(|g| g.0).unwrap_or(0));
            let width = gid.and_then(|id| face.glyph_hor_advance(id)).unwrap_or(0);
            let scaled = (width as f32 * scale).round() as i32;
            widths.push(scaled.clamp(0, u16::MAX as i32) as u16);
        }
        let missing_width = widths.first().copied().unwrap_or(0);
        let kerning = build_kerning_pairs(face, &glyph_ids, scale);

        Self {
            first_char,
            last_char,
            widths,
            glyph_ids,
            ascent: scale_i16(face.ascender(), scale),
            descent: scale_i16(face.descender(), scale),
            line_gap: scale_i16(face.line_gap(), scale),
            missing_width,
            kerning,
        }
    }

    fn slot(&self, ch: char) -> Option<usize> {
        let code = ch as u32;
        if code < self.first_char as u32 || code > self.last_char as u32 {
            return None;
        }
        Some((code - self.first_char as u32) as usize)
    }

    fn measure_text_width(&self, font_size: Pt, text: &str) -> Pt {
        let mut total_units: i32 = 0;
        let mut prev: Option<u16> = None;
        for ch in text.chars() {
            let slot = self.slot(ch);
            let gid = slot.and_then(|i| self.glyph_ids.get(i).copied()).unwrap_or(0);
            let adv = slot
                .and_then(|i| self.widths.get(i).copied())
                .unwrap_or(self.missing_width) as i32;
            total_units = total_units.saturating_add(adv);
            if let Some(k) = prev.and_then(|p| self.kerning.get(&(p, gid))) {
                total_units = total_units.saturating_add(*k as i32);
            }
            prev = Some(gid);
        }
        if total_units <= 0 {
            return Pt::ZERO;
        }
        font_size.mul_ratio(total_units, 1000)
    }

    fn is_within_basic_latin(&self, text: &str) -> bool {
        text.chars().all(|ch| self.slot(ch).is_some())
    }

    fn line_height(&self, font_size: Pt) -> Pt {
        let height_1000 = self.ascent as i32 - self.descent as i32 + self.line_gap as i32;
        if height_1000 <= 0 {
            return Pt::ZERO;
        }
        font_size.mul_ratio(height_1000, 1000)
    }
}

fn build_kerning_pairs(
    face: &ttf_parser::Face<'_>,
    glyph_ids: &[u16],
    scale: f32,
) -> HashMap<(u16, u16), i16> {
    let mut out = HashMap::new();
    let Some(kern) = face.tables().kern else {
        return out;
    };
    let subtables: Vec<_> = kern
        .subtables
        .into_iter()
        .filter(|s| s.horizontal && !s.has_cross_stream && !s.has_state_machine)
        .collect();
    if subtables.is_empty() {
        return out;
    }
    for &left in glyph_ids.iter().filter(|g| **g != 0) {
        for &right in glyph_ids.iter().filter(|g| **g != 0) {
            let total: i32 = subtables
                .iter()
                .filter_map(|sub| sub.glyphs_kerning(GlyphId(left), GlyphId(right)))
                .map(i32::from)
                .sum();
            if total != 0 {
                let clamped = total.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                let scaled = scale_i16(clamped, scale);
                if scaled != 0 {
                    out.insert((left, right), scaled);
                }
            }
        }
    }
    out
}

fn measure_text_width_full(font: &RegisteredFont, font_size: Pt, text: &str) -> Option<Pt> {
    let face = HbFace::from_slice(&font.data, 0)?;
    let units_per_em = face.units_per_em().max(1) as i64;

    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let positions = output.glyph_positions();
    if positions.is_empty() {
        return None;
    }
    let total_units: i32 = positions
        .iter()
        .map(|pos| (((pos.x_advance as i64) * 1000 + (units_per_em / 2)) / units_per_em) as i32)
        .fold(0i32, |acc, adv| acc.saturating_add(adv));
    if total_units <= 0 {
        return Some(Pt::ZERO);
    }
    Some(font_size.mul_ratio(total_units, 1000))
}

fn detect_direction(text: &str) -> HbDirection {
    let rtl = text.chars().any(|ch| {
        matches!(
            ch as u32,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        )
    });
    if rtl {
        HbDirection::RightToLeft
    } else {
        HbDirection::LeftToRight
    }
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn font_names(face: &ttf_parser::Face<'_>, path: &Path) -> Vec<String> {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        let slot = match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => &mut family,
            name_id::FULL_NAME => &mut full,
            name_id::POST_SCRIPT_NAME => &mut post,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(name);
        }
    }
    let stem = path
        .file_stem()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string());
    [post, full, family, stem].into_iter().flatten().collect()
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}
