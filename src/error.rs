use std::fmt;

/// Top-level error for the public API.
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseError {
    Init(InitError),
    Validation(ValidationError),
    Export(ExportError),
}

/// Fatal to the engine instance being created.
#[derive(Debug, Clone, PartialEq)]
pub enum InitError {
    MissingCapability(&'static str),
    InvalidConfig(String),
    /// The engine was torn down and accepts no further work.
    TornDown,
}

/// Where in a composition document a problem was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// The document root.
    Document,
    /// An entry of the named track.
    Track { name: String, path: Vec<usize> },
    /// An entry of the global event list.
    Global { path: Vec<usize> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationErrorKind {
    MalformedJson(String),
    NotAnObject,
    NotAList,
    MissingField(&'static str),
    NotANumber(&'static str),
    OutOfRange { field: &'static str, value: f64, min: f64, max: f64 },
    InvalidValue { field: &'static str, value: String },
    InvalidRepeat(String),
    EmptyRepeat,
    UnknownEvent,
    TooManyEvents { limit: usize },
}

/// A composition document failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub location: Location,
    pub kind: ValidationErrorKind,
}

/// An export request could not be honored.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportError {
    InvalidDuration(f64),
    TooLong { seconds: f64, limit: f64 },
    /// The WAV data chunk would not fit its 32-bit size field.
    TooLarge { bytes: u64 },
    Unsupported(&'static str),
}

impl ValidationError {
    pub fn new(location: Location, kind: ValidationErrorKind) -> Self {
        ValidationError { location, kind }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_path(f: &mut fmt::Formatter<'_>, path: &[usize]) -> fmt::Result {
            for i in path {
                write!(f, "[{i}]")?;
            }
            Ok(())
        }
        match self {
            Location::Document => write!(f, "document"),
            Location::Track { name, path } => {
                write!(f, "track '{name}' event ")?;
                write_path(f, path)
            }
            Location::Global { path } => {
                write!(f, "global event ")?;
                write_path(f, path)
            }
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationErrorKind::MalformedJson(msg) => write!(f, "malformed JSON: {msg}"),
            ValidationErrorKind::NotAnObject => write!(f, "expected an object"),
            ValidationErrorKind::NotAList => write!(f, "expected a list of events"),
            ValidationErrorKind::MissingField(field) => write!(f, "missing required field '{field}'"),
            ValidationErrorKind::NotANumber(field) => write!(f, "'{field}' must be a number"),
            ValidationErrorKind::OutOfRange { field, value, min, max } => {
                write!(f, "'{field}' = {value} outside [{min}, {max}]")
            }
            ValidationErrorKind::InvalidValue { field, value } => {
                write!(f, "'{field}' has invalid value {value}")
            }
            ValidationErrorKind::InvalidRepeat(value) => {
                write!(f, "'repeat' must be a positive integer, got {value}")
            }
            ValidationErrorKind::EmptyRepeat => write!(f, "repeat block has no events"),
            ValidationErrorKind::UnknownEvent => {
                write!(f, "event is neither a note, a wait nor a repeat block")
            }
            ValidationErrorKind::TooManyEvents { limit } => {
                write!(f, "composition expands to more than {limit} events")
            }
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid composition at {}: {}", self.location, self.kind)
    }
}

impl std::error::Error for ValidationError {}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::MissingCapability(name) => {
                write!(f, "Host lacks required capability: {name}")
            }
            InitError::InvalidConfig(msg) => write!(f, "Invalid engine config: {msg}"),
            InitError::TornDown => write!(f, "Engine has been torn down"),
        }
    }
}

impl std::error::Error for InitError {}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::InvalidDuration(d) => write!(f, "Invalid export duration {d}"),
            ExportError::TooLong { seconds, limit } => {
                write!(f, "Export of {seconds}s exceeds the {limit}s limit")
            }
            ExportError::TooLarge { bytes } => {
                write!(f, "Export of {bytes} bytes exceeds the WAV size limit")
            }
            ExportError::Unsupported(what) => write!(f, "Export unavailable: {what}"),
        }
    }
}

impl std::error::Error for ExportError {}

impl fmt::Display for NoiseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseError::Init(e) => write!(f, "{e}"),
            NoiseError::Validation(e) => write!(f, "{e}"),
            NoiseError::Export(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for NoiseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NoiseError::Init(e) => Some(e),
            NoiseError::Validation(e) => Some(e),
            NoiseError::Export(e) => Some(e),
        }
    }
}

impl From<InitError> for NoiseError {
    fn from(e: InitError) -> Self {
        NoiseError::Init(e)
    }
}

impl From<ValidationError> for NoiseError {
    fn from(e: ValidationError) -> Self {
        NoiseError::Validation(e)
    }
}

impl From<ExportError> for NoiseError {
    fn from(e: ExportError) -> Self {
        NoiseError::Export(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_track_and_path() {
        let err = ValidationError::new(
            Location::Track {
                name: "rain".into(),
                path: vec![2, 0],
            },
            ValidationErrorKind::MissingField("duration"),
        );
        let msg = err.to_string();
        assert!(msg.contains("track 'rain'"), "{msg}");
        assert!(msg.contains("[2][0]"), "{msg}");
        assert!(msg.contains("duration"), "{msg}");
    }

    #[test]
    fn wraps_into_top_level() {
        let e: NoiseError = ExportError::InvalidDuration(-1.0).into();
        assert!(matches!(e, NoiseError::Export(_)));
        assert!(std::error::Error::source(&e).is_some());
    }
}
