use super::error::AsioError;

/// Device lifecycle state machine.
///
/// State transitions:
/// ```text
/// closed → opening → open → started
///    ↑        ↓        ↓       ↓
///    └──── resetting ←─┴───────┘
///
/// opening/open → closed → error   (terminal for this attempt; open() may be retried)
/// ```
///
/// A failed open releases everything before reporting `Error`, so `Error`
/// never holds buffers.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceState {
    Closed,
    Opening,
    Open,
    Started,
    Resetting,
    Error(AsioError),
}

impl DeviceState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started)
    }

    /// Whether hardware buffers may be allocated in this state.
    pub fn holds_buffers(&self) -> bool {
        matches!(self, Self::Open | Self::Started)
    }

    pub fn error(&self) -> Option<&AsioError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Short lowercase name, used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Started => "started",
            Self::Resetting => "resetting",
            Self::Error(_) => "error",
        }
    }
}
