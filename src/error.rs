use thiserror::Error;

/// Filter parameters that cannot be designed or applied.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("{filter} needs a high_pass and/or low_pass cutoff")]
    MissingCutoff { filter: &'static str },
    #[error("{filter} needs an order")]
    MissingOrder { filter: &'static str },
    #[error("{filter} order must be odd, got {order}")]
    EvenOrder { filter: &'static str, order: usize },
    #[error("cutoff {cutoff_hz} Hz is outside (0, {nyquist_hz}) Hz")]
    CutoffOutOfRange { cutoff_hz: f64, nyquist_hz: f64 },
    #[error("high_pass {high_pass} Hz must be below low_pass {low_pass} Hz")]
    InvertedBand { high_pass: f64, low_pass: f64 },
    #[error("{filter} needs a transition width for the {edge} edge")]
    MissingWidth { filter: &'static str, edge: &'static str },
    #[error("band edges are not increasing inside (0, nyquist): {0:?}")]
    BadBandEdges(Vec<f64>),
    #[error("savgol window {window} must exceed polyorder {polyorder}")]
    SavgolWindow { window: usize, polyorder: usize },
    #[error("ewma proportion {0} must lie strictly between 0 and 1")]
    EwmaProportion(f64),
    #[error("elliptic filter needs positive ripple and attenuation, got rp={rp} rs={rs}")]
    EllipticRipple { rp: f64, rs: f64 },
    #[error("baseline window {start}..{end} is empty or outside the trace ({len} samples)")]
    BaselineWindow { start: usize, end: usize, len: usize },
    #[error("trace of {len} samples is too short for padding of {padlen}")]
    TraceTooShort { len: usize, padlen: usize },
    #[error("equiripple design did not converge")]
    RemezFailed,
}

/// Decay fit failures. Callers turn these into absent values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitError {
    #[error("need at least {needed} points, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("x and y lengths differ: {x} vs {y}")]
    LengthMismatch { x: usize, y: usize },
    #[error("initial guess has {got} parameters, model needs {expected}")]
    GuessLength { expected: usize, got: usize },
    #[error("bounds have {got} lower and upper limits, model needs {expected}")]
    BoundsLength { expected: usize, got: usize },
    #[error("residuals became non-finite")]
    NonFinite,
    #[error("normal equations are singular")]
    Singular,
    #[error("no convergence after {0} iterations")]
    DidNotConverge(usize),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("acquisition {acq_number}: sample rate {sample_rate} must be positive")]
    InvalidSampleRate { acq_number: u32, sample_rate: f64 },
    #[error("acquisition {0}: trace is empty")]
    EmptyTrace(u32),
    #[error("acquisition {acq_number}: non-finite sample at index {index}")]
    NonFiniteSample { acq_number: u32, index: usize },
    #[error("window {name} ({start}..{end}) is empty or outside the trace ({len} samples)")]
    Window {
        name: &'static str,
        start: usize,
        end: usize,
        len: usize,
    },
    #[error("unknown analyzer '{0}'")]
    UnknownAnalyzer(String),
    #[error("analyzer '{expected}' cannot accept a '{got}' record")]
    ModalityMismatch {
        expected: &'static str,
        got: &'static str,
    },
    #[error("duplicate acquisition number {0}")]
    DuplicateAcquisition(u32),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not decode traces: {0}")]
    Decode(#[from] serde_json::Error),
}
