use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ReportError {
    Xml(String),
    InvalidDefinition(String),
    Evaluation {
        node: String,
        row: Option<usize>,
        message: String,
    },
    TypeMismatch {
        expected: String,
        found: String,
    },
    MissingDataSet(String),
    OutputExists(PathBuf),
    InvalidConfiguration(String),
    Io(std::io::Error),
}

impl ReportError {
    pub(crate) fn evaluation(
        node: impl Into<String>,
        row: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        ReportError::Evaluation {
            node: node.into(),
            row,
            message: message.into(),
        }
    }

    /// Attaches node and row context to an error raised without it.
    pub(crate) fn at(self, node: &str, row: Option<usize>) -> Self {
        match self {
            ReportError::Evaluation {
                node: existing,
                row: existing_row,
                message,
            } if existing.is_empty() => ReportError::Evaluation {
                node: node.to_string(),
                row: existing_row.or(row),
                message,
            },
            other => other,
        }
    }
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Xml(message) => write!(f, "malformed report document: {}", message),
            ReportError::InvalidDefinition(message) => {
                write!(f, "invalid report definition: {}", message)
            }
            ReportError::Evaluation { node, row, message } => match row {
                Some(row) => write!(f, "evaluation failed in {} at row {}: {}", node, row, message),
                None => write!(f, "evaluation failed in {}: {}", node, message),
            },
            ReportError::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            ReportError::MissingDataSet(name) => write!(f, "no data set named {}", name),
            ReportError::OutputExists(path) => {
                write!(f, "output file already exists: {}", path.display())
            }
            ReportError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            ReportError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReportError {
    fn from(value: std::io::Error) -> Self {
        ReportError::Io(value)
    }
}

impl From<roxmltree::Error> for ReportError {
    fn from(value: roxmltree::Error) -> Self {
        ReportError::Xml(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_error_names_node_and_row() {
        let err = ReportError::evaluation("", None, "bad operand").at("txtTotal", Some(3));
        assert_eq!(
            err.to_string(),
            "evaluation failed in txtTotal at row 3: bad operand"
        );
    }

    #[test]
    fn existing_context_is_kept() {
        let err = ReportError::evaluation("inner", Some(1), "x").at("outer", Some(9));
        match err {
            ReportError::Evaluation { node, row, .. } => {
                assert_eq!(node, "inner");
                assert_eq!(row, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
