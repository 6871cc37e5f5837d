//! Error types for the staking agent.

use arbiter_core::{ActionError, LedgerError};
use arbiter_fastconfirm::QuorumError;
use arbiter_txbatch::BatchError;
use arbiter_types::{Address, NodeNum, UnknownStrategy};
use thiserror::Error;

/// Errors reading or validating agent configuration.
///
/// These are fatal at setup and never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    UnknownStrategy(#[from] UnknownStrategy),

    #[error("invalid duration {value:?}: {source}")]
    InvalidDuration {
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("invalid wallet mode: {0}")]
    InvalidWalletMode(String),

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("fast confirmation requires a wallet address")]
    FastConfirmWithoutWallet,

    #[error("fast confirmation enabled, but the rollup has no fast confirmer")]
    NoFastConfirmer,

    #[error("wallet {wallet} is not an owner of fast confirm quorum {quorum}")]
    NotQuorumOwner { wallet: Address, quorum: Address },
}

/// Errors that abort a tick.
#[derive(Debug, Error)]
pub enum StakerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Quorum(#[from] QuorumError),

    /// The wallet has sent transactions the ledger has not included yet.
    #[error("local nonce {local} is ahead of on-chain nonce {chain}")]
    NonceAhead { local: u64, chain: u64 },

    /// Something other than this agent is sending from our address.
    #[error("local nonce {local} is behind on-chain nonce {chain}")]
    NonceBehind { local: u64, chain: u64 },

    #[error("block validation is still pending for {0}")]
    ValidationPending(NodeNum),

    /// The node-action generator or dispute engine failed.
    #[error("external collaborator failed: {0}")]
    External(String),

    /// The ledger contradicted itself.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<StakerError>,
    },
}

impl From<ActionError> for StakerError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::ValidationPending(node) => StakerError::ValidationPending(node),
            ActionError::Ledger(e) => StakerError::Ledger(e),
            ActionError::Failed(msg) => StakerError::External(msg),
        }
    }
}

/// Failure classes that resolve on their own and get a quieter retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EphemeralClass {
    /// Waiting for a pending transaction to be included.
    NonceAhead,
    /// The sender's mempool allowance is used up.
    MempoolFull,
    /// Local validation has not caught up.
    ValidationPending,
}

impl EphemeralClass {
    pub const ALL: [EphemeralClass; 3] = [
        EphemeralClass::NonceAhead,
        EphemeralClass::MempoolFull,
        EphemeralClass::ValidationPending,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EphemeralClass::NonceAhead => "nonce-ahead",
            EphemeralClass::MempoolFull => "mempool-full",
            EphemeralClass::ValidationPending => "validation-pending",
        }
    }
}

fn ledger_class(err: &LedgerError) -> Option<EphemeralClass> {
    match err {
        LedgerError::MempoolFull => Some(EphemeralClass::MempoolFull),
        _ => None,
    }
}

fn batch_class(err: &BatchError) -> Option<EphemeralClass> {
    match err {
        BatchError::Ledger(e) => ledger_class(e),
        BatchError::NoWallet => None,
    }
}

impl StakerError {
    /// Wrap with a description of what was being attempted.
    pub fn context(self, context: impl Into<String>) -> Self {
        StakerError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The ephemeral class of this error, looking through any context.
    pub fn ephemeral_class(&self) -> Option<EphemeralClass> {
        match self {
            StakerError::NonceAhead { .. } => Some(EphemeralClass::NonceAhead),
            StakerError::ValidationPending(_) => Some(EphemeralClass::ValidationPending),
            StakerError::Ledger(e) => ledger_class(e),
            StakerError::Batch(e) => batch_class(e),
            StakerError::Quorum(QuorumError::Ledger(e)) => ledger_class(e),
            StakerError::Quorum(QuorumError::Batch(e)) => batch_class(e),
            StakerError::Context { source, .. } => source.ephemeral_class(),
            _ => None,
        }
    }
}

/// Attach context to a fallible result.
pub(crate) trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, StakerError>;

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T, StakerError>;
}

impl<T, E: Into<StakerError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T, StakerError> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T, StakerError> {
        self.map_err(|e| e.into().context(f()))
    }
}
