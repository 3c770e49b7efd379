use crate::types::{Color, Pt, Rect};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Non-rendered metadata (item names, drillthrough links). Renderers may ignore it.
    Meta {
        key: String,
        value: String,
    },
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    SetFontName(String),
    SetFontSize(Pt),
    DrawString {
        x: Pt,
        y: Pt,
        text: String,
    },
    DrawRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    Stroke,
}

#[derive(Debug, Clone)]
struct GraphicsState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    font_size: Pt,
    font_name: String,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            font_size: Pt::ZERO,
            font_name: String::new(),
        }
    }
}

/// One laid-out page: number, running vertical offset and drawing commands.
#[derive(Debug, Clone)]
pub struct Page {
    number: usize,
    offset: Pt,
    commands: Vec<Command>,
    empty: bool,
    state: GraphicsState,
}

impl Page {
    pub(crate) fn new(number: usize, offset: Pt) -> Self {
        Self {
            number,
            offset,
            commands: Vec::new(),
            empty: true,
            state: GraphicsState::default(),
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub(crate) fn set_number(&mut self, number: usize) {
        self.number = number;
    }

    pub fn offset(&self) -> Pt {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: Pt) {
        self.offset = offset;
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Counts the page as used even when nothing visible was drawn on it.
    pub(crate) fn mark_used(&mut self) {
        self.empty = false;
    }

    /// Concatenated text of every `DrawString` on the page.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for command in &self.commands {
            if let Command::DrawString { text, .. } = command {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(text);
            }
        }
        out
    }

    pub(crate) fn meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.commands.push(Command::Meta {
            key: key.into(),
            value: value.into(),
        });
    }

    pub(crate) fn set_fill_color(&mut self, color: Color) {
        if self.state.fill_color == color {
            return;
        }
        self.state.fill_color = color;
        self.commands.push(Command::SetFillColor(color));
    }

    pub(crate) fn set_stroke_color(&mut self, color: Color) {
        if self.state.stroke_color == color {
            return;
        }
        self.state.stroke_color = color;
        self.commands.push(Command::SetStrokeColor(color));
    }

    pub(crate) fn set_line_width(&mut self, width: Pt) {
        let width = width.max(Pt::ZERO);
        if self.state.line_width == width {
            return;
        }
        self.state.line_width = width;
        self.commands.push(Command::SetLineWidth(width));
    }

    pub(crate) fn set_font_name(&mut self, name: &str) {
        if self.state.font_name == name {
            return;
        }
        self.state.font_name = name.to_string();
        self.commands
            .push(Command::SetFontName(self.state.font_name.clone()));
    }

    pub(crate) fn set_font_size(&mut self, size: Pt) {
        if self.state.font_size == size {
            return;
        }
        self.state.font_size = size;
        self.commands.push(Command::SetFontSize(size));
    }

    pub(crate) fn draw_string(&mut self, x: Pt, y: Pt, text: impl Into<String>) {
        self.empty = false;
        self.commands.push(Command::DrawString {
            x,
            y,
            text: text.into(),
        });
    }

    pub(crate) fn stroke_rect(&mut self, rect: Rect) {
        self.empty = false;
        self.commands.push(Command::DrawRect {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        });
        self.commands.push(Command::Stroke);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_setters_skip_redundant_commands() {
        let mut page = Page::new(1, Pt::ZERO);
        page.set_font_name("Helvetica");
        page.set_font_name("Helvetica");
        page.set_font_size(Pt::from_i32(10));
        page.set_font_size(Pt::from_i32(10));
        page.set_fill_color(Color::BLACK);
        assert_eq!(page.commands().len(), 2);
        assert!(page.is_empty());
    }

    #[test]
    fn drawing_marks_page_non_empty() {
        let mut page = Page::new(1, Pt::ZERO);
        page.meta("item", "txt1");
        assert!(page.is_empty());
        page.draw_string(Pt::ZERO, Pt::ZERO, "hello");
        assert!(!page.is_empty());
        assert_eq!(page.text(), "hello");
    }
}
