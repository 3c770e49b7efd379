use crate::canvas::Page;
use crate::definition::ReportDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    List,
    Table,
    Rectangle,
    Chart,
}

/// What a pair of `entry_begin`/`entry_end` callbacks brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// One row of an ungrouped region.
    Detail,
    /// The collapsed first row of a group instance.
    Group,
    Header,
    GroupHeader(usize),
    GroupFooter(usize),
    Footer,
}

/// Receives a render as a strictly ordered stream of callbacks.
///
/// Every method has an empty default so renderers implement only what they need.
pub trait Presenter {
    fn report_start(&mut self, _definition: &ReportDefinition) {}

    fn report_end(&mut self) {}

    /// Returning `false` skips the container and its content.
    fn container_start(&mut self, _name: Option<&str>, _kind: ContainerKind) -> bool {
        true
    }

    fn container_end(&mut self, _name: Option<&str>, _kind: ContainerKind) {}

    fn entry_begin(&mut self, _kind: EntryKind, _row: Option<usize>) {}

    fn entry_end(&mut self, _kind: EntryKind) {}

    fn textbox(&mut self, _name: Option<&str>, _text: &str, _link: Option<&str>) {}

    fn no_rows(&mut self, _name: Option<&str>, _message: &str) {}

    fn new_page(&mut self, _page: &Page) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresenterEvent {
    ReportStart(String),
    ReportEnd,
    ContainerStart(Option<String>, ContainerKind),
    ContainerEnd(Option<String>, ContainerKind),
    EntryBegin(EntryKind, Option<usize>),
    EntryEnd(EntryKind),
    Textbox {
        name: Option<String>,
        text: String,
        link: Option<String>,
    },
    NoRows(Option<String>, String),
    NewPage(usize),
}

/// Records every callback, optionally vetoing named containers.
#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    pub events: Vec<PresenterEvent>,
    pub veto: Vec<String>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vetoing(mut self, name: impl Into<String>) -> Self {
        self.veto.push(name.into());
        self
    }

    /// Texts of every `textbox` callback, in order.
    pub fn texts(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                PresenterEvent::Textbox { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Presenter for RecordingPresenter {
    fn report_start(&mut self, definition: &ReportDefinition) {
        self.events
            .push(PresenterEvent::ReportStart(definition.name.clone()));
    }

    fn report_end(&mut self) {
        self.events.push(PresenterEvent::ReportEnd);
    }

    fn container_start(&mut self, name: Option<&str>, kind: ContainerKind) -> bool {
        if name.is_some_and(|name| self.veto.iter().any(|v| v == name)) {
            return false;
        }
        self.events
            .push(PresenterEvent::ContainerStart(name.map(str::to_string), kind));
        true
    }

    fn container_end(&mut self, name: Option<&str>, kind: ContainerKind) {
        self.events
            .push(PresenterEvent::ContainerEnd(name.map(str::to_string), kind));
    }

    fn entry_begin(&mut self, kind: EntryKind, row: Option<usize>) {
        self.events.push(PresenterEvent::EntryBegin(kind, row));
    }

    fn entry_end(&mut self, kind: EntryKind) {
        self.events.push(PresenterEvent::EntryEnd(kind));
    }

    fn textbox(&mut self, name: Option<&str>, text: &str, link: Option<&str>) {
        self.events.push(PresenterEvent::Textbox {
            name: name.map(str::to_string),
            text: text.to_string(),
            link: link.map(str::to_string),
        });
    }

    fn no_rows(&mut self, name: Option<&str>, message: &str) {
        self.events
            .push(PresenterEvent::NoRows(name.map(str::to_string), message.to_string()));
    }

    fn new_page(&mut self, page: &Page) {
        self.events.push(PresenterEvent::NewPage(page.number()));
    }
}
