use std::{fmt, rc::Rc};

use parse_display::Display;

/// Errors raised by source collections and delivered through the error channel of change-set
/// streams.
#[derive(Clone, Display)]
pub enum Error {
    #[display("invalid argument: {0}")]
    InvalidArgument(String),

    #[display("index {index} is out of range (len {len})")]
    OutOfRange { index: usize, len: usize },

    #[display("invalid operation: {0}")]
    InvalidOperation(String),

    #[display("upstream failure: {0}")]
    Upstream(Rc<dyn std::error::Error>),
}

impl Error {
    pub fn upstream(e: impl std::error::Error + 'static) -> Self {
        Self::Upstream(Rc::new(e))
    }

    pub(crate) fn check_index(index: usize, len: usize) -> Result<()> {
        if index < len {
            Ok(())
        } else {
            Err(Self::OutOfRange { index, len })
        }
    }

    pub(crate) fn check_insert_index(index: usize, len: usize) -> Result<()> {
        if index <= len {
            Ok(())
        } else {
            Err(Self::OutOfRange { index, len })
        }
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }
    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, Self::InvalidOperation(_))
    }
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(message) => {
                f.debug_tuple("InvalidArgument").field(message).finish()
            }
            Self::OutOfRange { index, len } => f
                .debug_struct("OutOfRange")
                .field("index", index)
                .field("len", len)
                .finish(),
            Self::InvalidOperation(message) => {
                f.debug_tuple("InvalidOperation").field(message).finish()
            }
            Self::Upstream(e) => f.debug_tuple("Upstream").field(&e.to_string()).finish(),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T, E = Error> = std::result::Result<T, E>;
