use thiserror::Error as ThisError;

/// Errors surfaced at the codec boundary.
///
/// The engine itself never raises these: invariant violations inside
/// [`crate::Grammar`] are programmer bugs, asserted via `debug_assert!`/
/// `.expect()`, not recoverable `Result`s.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Magic mismatch, a truncated integer, a declared offset exceeding the
    /// remaining bytes, or a bit stream that did not decode exactly the
    /// declared symbol count.
    #[error("malformed artifact: {0}")]
    MalformedArtifact(String),

    /// `offset_count` did not match (live rule count) - 1, or a histogram
    /// entry referenced a rule number beyond `max_symbol`.
    #[error("histogram inconsistency: {0}")]
    HistogramInconsistency(String),

    /// A decoded rule body referenced a nonterminal not present in the
    /// artifact's live-rule set, or the encoder was asked to encode a symbol
    /// absent from its own code table.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The underlying reader or writer failed.
    #[error("I/O failure")]
    IoFailure(#[from] std::io::Error),
}
