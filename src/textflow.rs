use crate::canvas::Page;
use crate::font::{FontSpec, TextMeasure};
use crate::types::{Pt, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    Left,
    Center,
    Right,
    #[default]
    Justify,
}

impl TextAlign {
    /// `General` and unknown values fall back to `Justify`.
    pub fn parse(raw: &str) -> TextAlign {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" => TextAlign::Left,
            "center" => TextAlign::Center,
            "right" => TextAlign::Right,
            _ => TextAlign::Justify,
        }
    }
}

/// A measured word with the inline style markers it carried.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub text: String,
    pub width: Pt,
    pub start_bold: bool,
    pub stop_bold: bool,
    pub start_italic: bool,
    pub stop_italic: bool,
    pub bold: bool,
    pub italic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(Word),
    ParagraphEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WordPlacement {
    pub text: String,
    pub x: Pt,
    /// Top of the line box.
    pub y: Pt,
    pub width: Pt,
    pub bold: bool,
    pub italic: bool,
    pub fill: bool,
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowLayout {
    pub placements: Vec<WordPlacement>,
    pub lines: usize,
    pub line_height: Pt,
    pub height: Pt,
    pub truncated: bool,
}

/// Word-wrapping and justification of marked-up text.
pub struct TextFlow<'a> {
    measure: &'a dyn TextMeasure,
    font: FontSpec,
    align: TextAlign,
    fill: Option<char>,
}

impl<'a> TextFlow<'a> {
    pub fn new(measure: &'a dyn TextMeasure, font: FontSpec) -> Self {
        Self {
            measure,
            font,
            align: TextAlign::Justify,
            fill: None,
        }
    }

    pub fn align(mut self, align: TextAlign) -> Self {
        self.align = align;
        self
    }

    /// Character repeated after the last word of every paragraph.
    pub fn paragraph_fill(mut self, fill: Option<char>) -> Self {
        self.fill = fill.filter(|ch| *ch != ' ');
        self
    }

    pub fn font(&self) -> &FontSpec {
        &self.font
    }

    /// Splits `text` into measured words and paragraph ends.
    pub fn tokenize(&self, text: &str, max_width: Pt) -> Vec<Token> {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        let mut tokens = Vec::new();
        let mut bold = false;
        let mut italic = false;
        for (index, paragraph) in normalized.split('\n').enumerate() {
            if index > 0 {
                tokens.push(Token::ParagraphEnd);
            }
            for raw in paragraph.split_whitespace() {
                let lower = raw.to_ascii_lowercase();
                let start_bold = lower.contains("<b>");
                let stop_bold = lower.contains("</b>");
                let start_italic = lower.contains("<i>");
                let stop_italic = lower.contains("</i>");
                if start_bold {
                    bold = true;
                }
                if start_italic {
                    italic = true;
                }
                let stripped = strip_markers(raw);
                if !stripped.is_empty() {
                    let word = Word {
                        width: Pt::ZERO,
                        text: stripped,
                        start_bold,
                        stop_bold,
                        start_italic,
                        stop_italic,
                        bold,
                        italic,
                    };
                    self.push_word(&mut tokens, word, max_width);
                }
                if stop_bold {
                    bold = false;
                }
                if stop_italic {
                    italic = false;
                }
            }
        }
        if !matches!(tokens.last(), Some(Token::ParagraphEnd)) && !tokens.is_empty() {
            tokens.push(Token::ParagraphEnd);
        }
        tokens
    }

    fn word_width(&self, text: &str, bold: bool, italic: bool) -> Pt {
        self.measure
            .text_width(text, &self.font.styled(bold, italic))
    }

    fn push_word(&self, tokens: &mut Vec<Token>, mut word: Word, max_width: Pt) {
        loop {
            word.width = self.word_width(&word.text, word.bold, word.italic);
            if word.width <= max_width || max_width <= Pt::ZERO || word.text.chars().count() < 2 {
                tokens.push(Token::Word(word));
                return;
            }
            let split_at = self.split_point(&word, max_width);
            let rest = word.text.split_off(split_at);
            let mut tail = word.clone();
            tail.text = rest;
            tail.start_bold = false;
            tail.start_italic = false;
            word.stop_bold = false;
            word.stop_italic = false;
            word.width = self.word_width(&word.text, word.bold, word.italic);
            tokens.push(Token::Word(word));
            word = tail;
        }
    }

    /// Byte offset of the longest prefix that fits; at least one character.
    fn split_point(&self, word: &Word, max_width: Pt) -> usize {
        let boundaries: Vec<usize> = word
            .text
            .char_indices()
            .map(|(i, _)| i)
            .skip(1)
            .chain(std::iter::once(word.text.len()))
            .collect();
        let mut best = boundaries[0];
        for &end in &boundaries {
            if self.word_width(&word.text[..end], word.bold, word.italic) <= max_width {
                best = end;
            } else {
                break;
            }
        }
        best
    }

    /// Lays `text` out inside `rect`. Lines starting below the rectangle's
    /// bottom edge are dropped and mark the layout truncated; a line that
    /// only overhangs it is kept.
    pub fn layout(&self, text: &str, rect: Rect) -> FlowLayout {
        self.layout_bounded(text, rect, true)
    }

    /// Height needed to show all of `text` at `width`.
    pub fn measure_height(&self, text: &str, width: Pt) -> Pt {
        let rect = Rect::new(Pt::ZERO, Pt::ZERO, width, Pt::ZERO);
        self.layout_bounded(text, rect, false).height
    }

    fn layout_bounded(&self, text: &str, rect: Rect, bounded: bool) -> FlowLayout {
        let tokens = self.tokenize(text, rect.width);
        let line_height = self.measure.line_height(&self.font);
        let space = self.measure.text_width(" ", &self.font);
        let fill_width = self
            .fill
            .map(|ch| self.measure.text_width(&ch.to_string(), &self.font))
            .unwrap_or(Pt::ZERO);

        let mut layout = FlowLayout {
            line_height,
            ..FlowLayout::default()
        };
        let mut index = 0;
        while index < tokens.len() {
            let mut words: Vec<&Word> = Vec::new();
            let mut used = Pt::ZERO;
            let mut paragraph_end = false;
            while index < tokens.len() {
                match &tokens[index] {
                    Token::ParagraphEnd => {
                        paragraph_end = true;
                        index += 1;
                        break;
                    }
                    Token::Word(word) => {
                        let needed = if words.is_empty() {
                            word.width
                        } else {
                            used + space + word.width
                        };
                        if !words.is_empty() && needed > rect.width {
                            break;
                        }
                        used = needed;
                        words.push(word);
                        index += 1;
                    }
                }
            }

            let top = rect.y + line_height * (layout.lines as i32);
            if bounded && top > rect.bottom() {
                layout.truncated = true;
                break;
            }
            self.place_line(
                &mut layout,
                &words,
                LineGeometry {
                    rect,
                    top,
                    space,
                    used,
                    fill_width,
                },
                paragraph_end,
            );
            layout.lines += 1;
        }
        layout.height = line_height * (layout.lines as i32);
        layout
    }

    fn place_line(
        &self,
        layout: &mut FlowLayout,
        words: &[&Word],
        geometry: LineGeometry,
        paragraph_end: bool,
    ) {
        let LineGeometry {
            rect,
            top,
            space,
            used,
            fill_width,
        } = geometry;
        let stretch = self.align == TextAlign::Justify && !paragraph_end && words.len() >= 2;
        let gap = if stretch {
            let total: Pt = words.iter().map(|w| w.width).sum();
            (rect.width - total) / (words.len() as i32 - 1)
        } else {
            space
        };
        let mut x = match self.align {
            TextAlign::Right => rect.right() - used,
            TextAlign::Center => rect.x + (rect.width - used) / 2,
            TextAlign::Left | TextAlign::Justify => rect.x,
        };
        if x < rect.x {
            x = rect.x;
        }
        let line = layout.lines;
        for (position, word) in words.iter().enumerate() {
            if position > 0 {
                x += gap;
            }
            layout.placements.push(WordPlacement {
                text: word.text.clone(),
                x,
                y: top,
                width: word.width,
                bold: word.bold,
                italic: word.italic,
                fill: false,
                line,
            });
            x += word.width;
        }
        if let (Some(ch), true) = (self.fill, paragraph_end && !words.is_empty()) {
            if fill_width <= Pt::ZERO {
                return;
            }
            while x + fill_width <= rect.right() {
                layout.placements.push(WordPlacement {
                    text: ch.to_string(),
                    x,
                    y: top,
                    width: fill_width,
                    bold: false,
                    italic: false,
                    fill: true,
                    line,
                });
                x += fill_width;
            }
        }
    }
}

#[derive(Clone, Copy)]
struct LineGeometry {
    rect: Rect,
    top: Pt,
    space: Pt,
    used: Pt,
    fill_width: Pt,
}

fn strip_markers(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    'outer: while !rest.is_empty() {
        for marker in ["<b>", "</b>", "<i>", "</i>"] {
            if rest.len() >= marker.len()
                && rest.is_char_boundary(marker.len())
                && rest[..marker.len()].eq_ignore_ascii_case(marker)
            {
                rest = &rest[marker.len()..];
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            out.push(ch);
        }
        rest = chars.as_str();
    }
    out
}

/// Writes a layout onto `page`, switching the font face per style run.
pub fn draw_flow(page: &mut Page, layout: &FlowLayout, measure: &dyn TextMeasure, font: &FontSpec) {
    page.set_font_size(font.size);
    for placement in &layout.placements {
        let face = measure.font_name(&font.styled(placement.bold, placement.italic));
        page.set_font_name(&face);
        page.draw_string(placement.x, placement.y + font.size, placement.text.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontRegistry;

    fn flow(registry: &FontRegistry) -> TextFlow<'_> {
        // 10pt unregistered font: 6pt per character, 12pt lines.
        TextFlow::new(registry, FontSpec::new("Helvetica", Pt::from_i32(10)))
    }

    fn rect(width: i32, height: i32) -> Rect {
        Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_i32(width), Pt::from_i32(height))
    }

    fn line_words(layout: &FlowLayout, line: usize) -> Vec<&WordPlacement> {
        layout
            .placements
            .iter()
            .filter(|p| p.line == line && !p.fill)
            .collect()
    }

    #[test]
    fn justified_line_spans_full_width() {
        let registry = FontRegistry::new();
        let layout = flow(&registry).layout("aaa bbb ccc ddd eee", rect(70, 100));
        assert_eq!(layout.lines, 2);
        let first = line_words(&layout, 0);
        assert_eq!(first.len(), 3);
        let last = first[2];
        assert_eq!((last.x + last.width).to_milli_i64(), 70_000);
        let widths: Pt = first.iter().map(|p| p.width).sum();
        let gaps = (first[1].x - first[0].x - first[0].width) + (first[2].x - first[1].x - first[1].width);
        assert_eq!((widths + gaps).to_milli_i64(), 70_000);
    }

    #[test]
    fn final_line_keeps_natural_gaps() {
        let registry = FontRegistry::new();
        let layout = flow(&registry).layout("aaa bbb ccc ddd eee", rect(70, 100));
        let last = line_words(&layout, 1);
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].x, Pt::ZERO);
        assert_eq!(last[1].x, Pt::from_i32(24));
    }

    #[test]
    fn single_word_line_is_left_aligned() {
        let registry = FontRegistry::new();
        let layout = flow(&registry).layout("abcdefgh abcdefgh", rect(60, 100));
        assert_eq!(layout.lines, 2);
        assert_eq!(line_words(&layout, 0)[0].x, Pt::ZERO);
    }

    #[test]
    fn long_word_is_hard_split() {
        let registry = FontRegistry::new();
        let f = flow(&registry);
        let tokens = f.tokenize("abcdefghijklmnopqrstuvwxy", Pt::from_i32(60));
        let texts: Vec<String> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w.text.clone()),
                Token::ParagraphEnd => None,
            })
            .collect();
        assert_eq!(texts, vec!["abcdefghij", "klmnopqrst", "uvwxy"]);
        assert_eq!(tokens.last(), Some(&Token::ParagraphEnd));
    }

    #[test]
    fn markers_toggle_style_and_are_stripped() {
        let registry = FontRegistry::new();
        let tokens = flow(&registry).tokenize("plain <b>bold words</b> <I>it</i> end", Pt::from_i32(500));
        let words: Vec<&Word> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w),
                Token::ParagraphEnd => None,
            })
            .collect();
        let summary: Vec<(&str, bool, bool)> = words
            .iter()
            .map(|w| (w.text.as_str(), w.bold, w.italic))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("plain", false, false),
                ("bold", true, false),
                ("words", true, false),
                ("it", false, true),
                ("end", false, false),
            ]
        );
        assert!(words[1].start_bold);
        assert!(words[2].stop_bold);
    }

    #[test]
    fn line_breaks_end_paragraphs() {
        let registry = FontRegistry::new();
        let layout = flow(&registry).layout("aaa bbb\r\nccc\rddd\neee", rect(200, 100));
        assert_eq!(layout.lines, 4);
        assert_eq!(layout.height, Pt::from_i32(48));
        // Each line is a paragraph end, so nothing is stretched.
        let first = line_words(&layout, 0);
        assert_eq!(first[1].x, Pt::from_i32(24));
    }

    #[test]
    fn lines_past_bottom_are_dropped() {
        let registry = FontRegistry::new();
        // The line starting at 24 overhangs the 30pt box but is kept.
        let layout = flow(&registry).layout("aaa bbb ccc ddd eee fff", rect(30, 30));
        assert_eq!(layout.lines, 3);
        assert!(layout.truncated);
        let unbounded = flow(&registry).measure_height("aaa bbb ccc ddd eee fff", Pt::from_i32(30));
        assert_eq!(unbounded, Pt::from_i32(72));
    }

    #[test]
    fn box_shorter_than_a_line_keeps_first_line() {
        let registry = FontRegistry::new();
        let layout = flow(&registry).layout("aaa bbb", rect(30, 0));
        assert_eq!(layout.lines, 1);
        assert!(layout.truncated);
        assert_eq!(line_words(&layout, 0).len(), 1);
    }

    #[test]
    fn fill_character_runs_to_right_edge() {
        let registry = FontRegistry::new();
        let layout = flow(&registry)
            .paragraph_fill(Some('.'))
            .layout("ab", rect(30, 20));
        let fills: Vec<&WordPlacement> = layout.placements.iter().filter(|p| p.fill).collect();
        assert_eq!(fills.len(), 3);
        assert_eq!(fills[0].x, Pt::from_i32(12));
        let end = fills[2].x + fills[2].width;
        assert!(end <= Pt::from_i32(30));
    }

    #[test]
    fn right_and_center_alignment_shift_lines() {
        let registry = FontRegistry::new();
        let right = flow(&registry).align(TextAlign::Right).layout("ab", rect(30, 20));
        assert_eq!(right.placements[0].x, Pt::from_i32(18));
        let center = flow(&registry).align(TextAlign::Center).layout("ab", rect(30, 20));
        assert_eq!(center.placements[0].x, Pt::from_i32(9));
    }

    #[test]
    fn draw_flow_switches_faces() {
        let registry = FontRegistry::new();
        let f = flow(&registry);
        let layout = f.layout("a <b>b</b>", rect(100, 20));
        let mut page = Page::new(1, Pt::ZERO);
        draw_flow(&mut page, &layout, &registry, f.font());
        assert_eq!(page.text(), "a b");
        assert!(page
            .commands()
            .iter()
            .any(|c| matches!(c, crate::canvas::Command::SetFontName(n) if n == "Helvetica-Bold")));
    }
}
