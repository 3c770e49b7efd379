use crate::canvas::Page;
use crate::metrics::RenderMetrics;
use crate::present::Presenter;
use crate::types::Pt;

/// Page list under construction with a cursor on the page being filled.
///
/// Table cells rewind the cursor to the row's page, so the cursor is not
/// always on the last page.
pub(crate) struct Pages {
    pages: Vec<Page>,
    current: usize,
    top: Pt,
    bottom: Pt,
    pending: Option<&'static str>,
}

impl Pages {
    pub fn new(top: Pt, bottom: Pt) -> Self {
        Self {
            pages: vec![Page::new(1, top)],
            current: 0,
            top,
            bottom,
            pending: None,
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn current(&self) -> &Page {
        &self.pages[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Page {
        &mut self.pages[self.current]
    }

    pub fn index(&self) -> usize {
        self.current
    }

    /// Moves the cursor back to a page that already exists.
    pub fn set_index(&mut self, index: usize) {
        self.current = index.min(self.pages.len() - 1);
    }

    pub fn offset(&self) -> Pt {
        self.current().offset()
    }

    pub fn set_offset(&mut self, offset: Pt) {
        self.current_mut().set_offset(offset);
    }

    /// Advances to the following page, appending one when the cursor is on the last.
    pub fn next_or_new(&mut self) {
        self.current += 1;
        if self.current == self.pages.len() {
            let number = self.pages.len() + 1;
            self.pages.push(Page::new(number, self.top));
        }
    }

    /// Records that a row or item was placed on the current page.
    pub fn mark_used(&mut self) {
        self.current_mut().mark_used();
    }

    /// Asks for a page break before the next content.
    pub fn request_break(&mut self, reason: &'static str) {
        if self.pending.is_none() {
            self.pending = Some(reason);
        }
    }

    /// Makes room for `height` at the current offset.
    ///
    /// Returns the reason when a new page was started: a pending break, or
    /// `overflow` when the content does not fit. Breaks requested on an empty
    /// page are dropped.
    pub fn make_room(&mut self, height: Pt, overflow: &'static str) -> Option<&'static str> {
        let pending = self.pending.take();
        if self.current().is_empty() {
            return None;
        }
        let reason = match pending {
            Some(reason) => reason,
            None if self.offset() + height > self.bottom => overflow,
            None => return None,
        };
        self.next_or_new();
        Some(reason)
    }

    /// Drops empty pages and renumbers the rest.
    pub fn finish(self) -> (Vec<Page>, usize) {
        let before = self.pages.len();
        let mut pages: Vec<Page> = self.pages.into_iter().filter(|page| !page.is_empty()).collect();
        for (index, page) in pages.iter_mut().enumerate() {
            page.set_number(index + 1);
        }
        let discarded = before - pages.len();
        (pages, discarded)
    }
}

/// Laid-out pages of one render.
#[derive(Debug, Clone)]
pub struct PagedReport {
    pub pages: Vec<Page>,
    pub metrics: RenderMetrics,
}

impl PagedReport {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, number: usize) -> Option<&Page> {
        number.checked_sub(1).and_then(|index| self.pages.get(index))
    }

    /// Replays every page through `presenter`.
    pub fn present(&self, presenter: &mut dyn Presenter) {
        for page in &self.pages {
            presenter.new_page(page);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::present::{PresenterEvent, RecordingPresenter};

    fn pages() -> Pages {
        Pages::new(Pt::from_i32(10), Pt::from_i32(100))
    }

    #[test]
    fn empty_page_never_breaks() {
        let mut pages = pages();
        pages.request_break("page_break_at_start");
        assert_eq!(pages.make_room(Pt::from_i32(500), "row_overflow"), None);
        assert_eq!(pages.index(), 0);
        pages.current_mut().draw_string(Pt::ZERO, Pt::ZERO, "x");
        assert_eq!(pages.make_room(Pt::from_i32(10), "row_overflow"), None);
    }

    #[test]
    fn overflow_and_pending_breaks_start_pages() {
        let mut pages = pages();
        pages.current_mut().draw_string(Pt::ZERO, Pt::ZERO, "a");
        pages.set_offset(Pt::from_i32(95));
        assert_eq!(pages.make_room(Pt::from_i32(10), "row_overflow"), Some("row_overflow"));
        assert_eq!(pages.offset(), Pt::from_i32(10));
        pages.current_mut().draw_string(Pt::ZERO, Pt::ZERO, "b");
        pages.request_break("page_break_at_end");
        assert_eq!(pages.make_room(Pt::from_i32(1), "row_overflow"), Some("page_break_at_end"));
        assert_eq!(pages.index(), 2);
    }

    #[test]
    fn placed_rows_count_without_drawing() {
        let mut pages = pages();
        pages.mark_used();
        pages.set_offset(Pt::from_i32(95));
        assert_eq!(pages.make_room(Pt::from_i32(10), "row_overflow"), Some("row_overflow"));
        let (pages, discarded) = pages.finish();
        assert_eq!((pages.len(), discarded), (1, 1));
    }

    #[test]
    fn finish_discards_empty_pages_and_renumbers() {
        let mut pages = pages();
        pages.next_or_new();
        pages.current_mut().draw_string(Pt::ZERO, Pt::ZERO, "second");
        pages.next_or_new();
        pages.set_index(0);
        pages.next_or_new();
        assert_eq!(pages.index(), 1);

        let (pages, discarded) = pages.finish();
        assert_eq!(discarded, 2);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number(), 1);
        assert_eq!(pages[0].text(), "second");

        let report = PagedReport {
            pages,
            metrics: RenderMetrics::default(),
        };
        assert!(report.page(0).is_none());
        let mut presenter = RecordingPresenter::new();
        report.present(&mut presenter);
        assert_eq!(presenter.events, vec![PresenterEvent::NewPage(1)]);
    }
}
