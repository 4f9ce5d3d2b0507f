use thiserror::Error;

/// A complete ISA segment is exactly 106 bytes including its terminator.
pub const MIN_ISA_LEN: usize = 106;

/// Input does not conform to the X12 grammar. Always fatal to the parse call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("interchange too short: the ISA segment needs {MIN_ISA_LEN} bytes, got {0}")]
    Truncated(usize),

    #[error("interchange must begin with an ISA segment")]
    MissingIsa,

    #[error("element, component and segment delimiters must be distinct")]
    IndistinctDelimiters,

    #[error("missing required segment {id}")]
    MissingSegment { id: &'static str },

    #[error("unexpected segment {id} at position {position}")]
    UnexpectedSegment { id: String, position: usize },

    #[error("empty segment at position {0}")]
    EmptySegment(usize),

    #[error("{level} control number mismatch: header {header}, trailer {trailer}")]
    ControlNumberMismatch {
        level: &'static str,
        header: String,
        trailer: String,
    },

    #[error("{level} trailer declares {declared} segments/sets but {actual} were observed")]
    CountMismatch {
        level: &'static str,
        declared: usize,
        actual: usize,
    },

    #[error("{segment} element {element} is not valid: {reason}")]
    InvalidElement {
        segment: &'static str,
        element: usize,
        reason: String,
    },

    #[error("unsupported transaction set {0}")]
    UnsupportedTransaction(String),
}

/// Grammatically valid input with semantically invalid content. Collected
/// where feasible so a caller sees the complete defect list in one pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid X12 date {0:?}: expected CCYYMMDD")]
    InvalidDate(String),

    #[error("invalid X12 date-time {0:?}: expected CCYYMMDDHHMM")]
    InvalidDateTime(String),

    #[error("invalid X12 amount {0:?}")]
    InvalidAmount(String),

    #[error("invalid NPI {0:?}: failed Luhn check")]
    InvalidNpi(String),

    #[error("missing required segment {segment} in {context}")]
    MissingSegment {
        segment: &'static str,
        context: &'static str,
    },

    #[error("missing required element {segment}{element:02}")]
    MissingElement {
        segment: &'static str,
        element: usize,
    },

    #[error("service line {line}: diagnosis pointer {value:?} is not a number")]
    MalformedDiagnosisPointer { line: usize, value: String },

    #[error(
        "service line {line}: diagnosis pointer {pointer} is out of range (claim has {count} diagnoses)"
    )]
    DiagnosisPointerOutOfRange {
        line: usize,
        pointer: usize,
        count: usize,
    },

    #[error(
        "claim {claim_id}: service payments {services} plus adjustments {adjustments} do not reconcile to paid amount {paid}"
    )]
    AmountMismatch {
        claim_id: String,
        services: String,
        adjustments: String,
        paid: String,
    },

    #[error("subscriber identification missing: need a member id or a name with date of birth")]
    MissingIdentification,
}

/// Umbrella error for the parse/generate surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EdiError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

impl From<ValidationError> for EdiError {
    fn from(err: ValidationError) -> Self {
        EdiError::Validation(vec![err])
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, EdiError>;
