use crate::dtype::Shape;

/// The tagged error kinds surfaced by tracing, transformation, and dispatch.
///
/// Tracing-time kinds abort the in-progress transformation; no partial jaxpr
/// is returned. Backend failures are wrapped verbatim in `Backend`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Incompatible broadcast or rank mismatch at abstract evaluation.
    ShapeMismatch { primitive: String, detail: String },
    /// Promotion refused, or an operation given operand dtypes it rejects.
    DTypeMismatch { primitive: String, detail: String },
    /// A primitive has no rule for the requested transformation.
    MissingRule {
        primitive: String,
        transform: &'static str,
    },
    /// A tracer escaped its trace, or the trace stack was misused.
    LevelViolation { detail: String },
    /// Static jit arguments churn on every call. Surfaced as a warning flag
    /// on dispatch statistics, never as a hard failure.
    StaticArgChange { detail: String },
    /// Mismatched treedefs between calls of a transformed function, or a
    /// pointwise map over differently shaped trees.
    PytreeStructureMismatch { detail: String },
    /// Backend failure, wrapped verbatim.
    Backend { detail: String },
    /// `grad` applied to a function whose distinguished output is not scalar.
    OutputNotScalar { shape: Shape },
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShapeMismatch { primitive, detail } => {
                write!(f, "shape mismatch in {primitive}: {detail}")
            }
            Self::DTypeMismatch { primitive, detail } => {
                write!(f, "dtype mismatch in {primitive}: {detail}")
            }
            Self::MissingRule {
                primitive,
                transform,
            } => {
                write!(f, "no {transform} rule for primitive {primitive}")
            }
            Self::LevelViolation { detail } => write!(f, "trace level violation: {detail}"),
            Self::StaticArgChange { detail } => write!(f, "static argument change: {detail}"),
            Self::PytreeStructureMismatch { detail } => {
                write!(f, "pytree structure mismatch: {detail}")
            }
            Self::Backend { detail } => write!(f, "backend error: {detail}"),
            Self::OutputNotScalar { shape } => {
                write!(f, "expected scalar output, got shape {shape}")
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl CoreError {
    #[must_use]
    pub fn shape(primitive: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            primitive: primitive.into(),
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn dtype(primitive: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::DTypeMismatch {
            primitive: primitive.into(),
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn level(detail: impl Into<String>) -> Self {
        Self::LevelViolation {
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn pytree(detail: impl Into<String>) -> Self {
        Self::PytreeStructureMismatch {
            detail: detail.into(),
        }
    }
}
