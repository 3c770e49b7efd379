use std::fmt;

pub const SEVERITY_WARNING: u8 = 4;
pub const SEVERITY_ERROR: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: u8,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

/// Severity-tagged construction log of a report definition.
#[derive(Debug, Clone, Default)]
pub struct DefinitionLog {
    entries: Vec<Diagnostic>,
    max_severity: u8,
}

impl DefinitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, severity: u8, message: impl Into<String>) {
        let message = message.into();
        if severity >= SEVERITY_ERROR {
            log::error!("report definition: {message}");
        } else {
            log::warn!("report definition: {message}");
        }
        self.max_severity = self.max_severity.max(severity);
        self.entries.push(Diagnostic { severity, message });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.log(SEVERITY_WARNING, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log(SEVERITY_ERROR, message);
    }

    pub(crate) fn unknown_element(&mut self, parent: &str, element: &str) {
        self.warn(format!("Unknown {parent} element '{element}' ignored."));
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn max_severity(&self) -> u8 {
        self.max_severity
    }

    pub fn has_errors(&self) -> bool {
        self.max_severity >= SEVERITY_ERROR
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_highest_severity() {
        let mut log = DefinitionLog::new();
        log.unknown_element("List", "Bogus");
        assert!(!log.has_errors());
        log.error("Sorting requires at least one SortBy.");
        assert!(log.has_errors());
        assert_eq!(log.entries()[0].severity, SEVERITY_WARNING);
        assert_eq!(log.entries()[0].message, "Unknown List element 'Bogus' ignored.");
        assert_eq!(log.max_severity(), SEVERITY_ERROR);
    }
}
