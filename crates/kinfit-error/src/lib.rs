use std::borrow::Cow;
use std::fmt::{self, Display, Formatter};
use std::ops::Deref;

#[cfg(feature = "backtrace")]
use std::backtrace::Backtrace;

pub type FitResult<T> = Result<T, FitError>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidConfig,
    ParamSpec,
    Model,
    Tabular,
    Simulation,
    Scoring,
    Cluster,
    Engine,
    Io,
    Serde,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrString(Cow<'static, str>);

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T: Into<Cow<'static, str>>> From<T> for ErrString {
    fn from(v: T) -> Self {
        Self(v.into())
    }
}

#[derive(Debug)]
pub enum FitError {
    InvalidConfig {
        message: ErrString,
    },
    ParamSpec {
        message: ErrString,
    },
    Model {
        message: ErrString,
    },
    Tabular {
        message: ErrString,
    },
    Simulation {
        message: ErrString,
    },
    Scoring {
        message: ErrString,
    },
    Cluster {
        message: ErrString,
    },
    Engine {
        message: ErrString,
    },
    Io {
        source: std::io::Error,
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
    Serde {
        message: ErrString,
    },
    Context {
        context: ErrorContext,
        source: Box<FitError>,
        #[cfg(feature = "backtrace")]
        backtrace: Backtrace,
    },
}

impl FitError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::ParamSpec { .. } => ErrorCode::ParamSpec,
            Self::Model { .. } => ErrorCode::Model,
            Self::Tabular { .. } => ErrorCode::Tabular,
            Self::Simulation { .. } => ErrorCode::Simulation,
            Self::Scoring { .. } => ErrorCode::Scoring,
            Self::Cluster { .. } => ErrorCode::Cluster,
            Self::Engine { .. } => ErrorCode::Engine,
            Self::Io { .. } => ErrorCode::Io,
            Self::Serde { .. } => ErrorCode::Serde,
            Self::Context { .. } => ErrorCode::Context,
        }
    }

    pub fn with_context(self, msg: impl Into<String>) -> Self {
        FitError::Context {
            context: ErrorContext::new(msg),
            source: Box::new(self),
            #[cfg(feature = "backtrace")]
            backtrace: Backtrace::capture(),
        }
    }
}

impl Display for FitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { message } => write!(f, "Invalid configuration: {}", message),
            Self::ParamSpec { message } => write!(f, "Invalid parameter spec: {}", message),
            Self::Model { message } => write!(f, "Model error: {}", message),
            Self::Tabular { message } => write!(f, "Tabular data error: {}", message),
            Self::Simulation { message } => write!(f, "Simulation error: {}", message),
            Self::Scoring { message } => write!(f, "Scoring error: {}", message),
            Self::Cluster { message } => write!(f, "Cluster error: {}", message),
            Self::Engine { message } => write!(f, "Engine error: {}", message),
            Self::Io { source, .. } => write!(f, "IO error: {}", source),
            Self::Serde { message } => write!(f, "Serialization error: {}", message),
            Self::Context {
                context, source, ..
            } => write!(f, "{}\nCaused by: {}", context, source),
        }
    }
}

impl std::error::Error for FitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Context { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FitError {
    fn from(source: std::io::Error) -> Self {
        FitError::Io {
            source,
            #[cfg(feature = "backtrace")]
            backtrace: Backtrace::capture(),
        }
    }
}

#[derive(Debug)]
pub struct ErrorContext {
    message: String,
}

impl ErrorContext {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl Display for ErrorContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ErrorContext {}

// Ergonomic Result extensions (context)
pub trait ResultExt<T> {
    fn context(self, msg: impl Into<String>) -> FitResult<T>;
    fn with_context<F: FnOnce() -> String>(self, f: F) -> FitResult<T>;
}

impl<T, E: Into<FitError>> ResultExt<T> for Result<T, E> {
    fn context(self, msg: impl Into<String>) -> FitResult<T> {
        self.map_err(|e| e.into().with_context(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> FitResult<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[doc(hidden)]
pub mod __private {
    #[inline]
    #[cold]
    #[must_use]
    pub fn must_use<E>(e: E) -> E {
        e
    }
}

#[macro_export]
macro_rules! fit_err {
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::__private::must_use($crate::FitError::$variant { message: format!($fmt, $($arg),*).into() })
    };
    ($variant:ident: $msg:expr $(,)?) => {
        $crate::__private::must_use($crate::FitError::$variant { message: $msg.into() })
    };
}

#[macro_export]
macro_rules! fit_bail {
    ($($tt:tt)+) => { return Err($crate::fit_err!($($tt)+)) };
}

#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($tt:tt)+) => {
        if !$cond { $crate::fit_bail!($($tt)+); }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_round_trip() {
        let err = fit_err!(InvalidConfig: "missing key {}", "population_size");
        assert_eq!(err.code(), ErrorCode::InvalidConfig);
        assert_eq!(
            err.to_string(),
            "Invalid configuration: missing key population_size"
        );
    }

    #[test]
    fn context_wraps_source() {
        let inner = fit_err!(Scoring: "column A missing");
        let wrapped = inner.with_context("scoring permutation 4");
        assert_eq!(wrapped.code(), ErrorCode::Context);
        assert!(wrapped.to_string().contains("Caused by: Scoring error"));
    }

    #[test]
    fn ensure_bails_on_false() {
        fn check(n: usize) -> FitResult<()> {
            ensure!(n >= 3, Engine: "fewer than 3 survivors remain ({})", n);
            Ok(())
        }

        assert!(check(5).is_ok());
        assert_eq!(check(2).unwrap_err().code(), ErrorCode::Engine);
    }
}
