//! Error types for Green transaction construction
//!
//! Two levels: [`BuildError`] is a user-correctable condition recorded on the
//! build record while construction carries on, [`Error`] is a fatal failure
//! that aborts the request.

use green_params::AssetId;
use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// User-correctable build conditions.
///
/// Stored as the first error on a [`BuildRecord`](crate::record::BuildRecord);
/// the caller can adjust the request and retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// No addressees were given
    #[error("No recipients")]
    NoRecipients,

    /// Selected inputs cannot cover the amount plus fee
    #[error("Insufficient funds")]
    InsufficientFunds,

    /// Nothing would be sent
    #[error("No amount specified")]
    NoAmountSpecified,

    /// Requested fee rate is under the relay floor
    #[error("Fee rate is below minimum accepted fee rate")]
    FeeRateBelowMinimum,

    /// Send-all was requested with more than one addressee
    #[error("Send all requires a single output")]
    SendAllRequiresSingleRecipient,

    /// The sweep key could not be parsed
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// No spendable outputs were found
    #[error("No UTXOs found")]
    NoUtxosFound,

    /// Manually selected inputs carry an asset nobody is paid in
    #[error("Missing recipient for asset {0}")]
    MissingAssetRecipient(AssetId),

    /// Replacement does not pay enough over the transaction it replaces
    #[error("Invalid replacement fee rate")]
    InvalidReplacementFeeRate,

    /// Amount is dust or out of range
    #[error("Invalid amount")]
    InvalidAmount,

    /// Address could not be resolved
    #[error("Invalid address")]
    InvalidAddress,

    /// Asset id is not valid for this network
    #[error("Invalid asset id")]
    InvalidAssetId,

    /// Confidential ledger payment to an unblinded address
    #[error("Non-confidential addresses are not supported")]
    NonConfidentialAddress,

    /// Sweeping is transparent-ledger only
    #[error("Sweep is not supported on confidential ledgers")]
    SweepNotSupported,

    /// Change destination is ambiguous or unknown
    #[error("Cannot determine subaccount")]
    CannotDetermineSubaccount,

    /// Signer cannot handle pre-blinded outputs
    #[error("Signing device does not support externally blinded transactions")]
    ExternalBlindingUnsupported,

    /// Pre-blinded output carries a zero blinding factor
    #[error("Pre-blinded output is not blinded")]
    PreblindedNotBlinded,
}

/// Green transaction construction errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A user-correctable condition surfaced where construction cannot continue
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Prior transaction is neither replaceable nor CPFP-eligible
    #[error("Transaction can not be fee-bumped: {0}")]
    NotBumpable(String),

    /// None of the prior transaction belongs to the request's subaccounts
    #[error("No suitable subaccount UTXOs found")]
    NoSubaccountUtxos,

    /// A prior transaction signature failed verification
    #[error("Signature mismatch on input {input}")]
    SignatureMismatch {
        /// Input index in the prior transaction
        input: usize,
    },

    /// Output is neither fully explicit nor fully blinded
    #[error("Output {0} is not fully blinded or not fully explicit")]
    MalformedConfidentialOutput(usize),

    /// Selection/fee loop failed to settle
    #[error("Fee convergence did not terminate after {iterations} iterations")]
    FeeLoopExhausted {
        /// Iterations attempted
        iterations: usize,
    },

    /// Sighash flag outside the supported set
    #[error("Unsupported sighash {0:#04x}")]
    UnsupportedSighash(u32),

    /// Internal invariant violated
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Key material rejected by a collaborator
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Amount arithmetic overflowed
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Cryptographic primitive failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Signer failure
    #[error("Signer error: {0}")]
    Signer(String),

    /// Wallet resolver failure
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// Malformed transaction or script bytes
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<secp256k1::Error> for Error {
    fn from(e: secp256k1::Error) -> Self {
        Error::Crypto(e.to_string())
    }
}

impl From<elements::secp256k1_zkp::Error> for Error {
    fn from(e: elements::secp256k1_zkp::Error) -> Self {
        Error::Crypto(e.to_string())
    }
}

impl From<bitcoin::consensus::encode::Error> for Error {
    fn from(e: bitcoin::consensus::encode::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}

impl From<elements::encode::Error> for Error {
    fn from(e: elements::encode::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}

impl Error {
    /// Check if error is a user-facing error (vs internal error)
    pub fn is_user_error(&self) -> bool {
        matches!(self, Error::Build(_) | Error::InvalidKey(_))
    }

    /// The user-correctable condition, if this is one
    pub fn build_error(&self) -> Option<&BuildError> {
        match self {
            Error::Build(e) => Some(e),
            _ => None,
        }
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Build(e) => e.category(),
            Error::NotBumpable(_) | Error::NoSubaccountUtxos | Error::SignatureMismatch { .. } => {
                ErrorCategory::Bump
            }
            Error::MalformedConfidentialOutput(_) => ErrorCategory::Blinding,
            Error::FeeLoopExhausted { .. } => ErrorCategory::Fee,
            Error::UnsupportedSighash(_) | Error::Signer(_) | Error::InvalidKey(_) => {
                ErrorCategory::Signing
            }
            Error::AmountOverflow(_) => ErrorCategory::Amount,
            Error::Crypto(_) => ErrorCategory::Crypto,
            Error::Resolver(_) => ErrorCategory::Wallet,
            Error::InvalidState(_) | Error::Encoding(_) | Error::Serialization(_) => {
                ErrorCategory::Internal
            }
        }
    }
}

impl BuildError {
    /// Get error category for logging/metrics
    pub fn category(&self) -> ErrorCategory {
        match self {
            BuildError::InsufficientFunds
            | BuildError::NoAmountSpecified
            | BuildError::InvalidAmount
            | BuildError::NoUtxosFound => ErrorCategory::Amount,
            BuildError::FeeRateBelowMinimum | BuildError::InvalidReplacementFeeRate => {
                ErrorCategory::Fee
            }
            BuildError::NoRecipients
            | BuildError::SendAllRequiresSingleRecipient
            | BuildError::MissingAssetRecipient(_)
            | BuildError::InvalidAddress
            | BuildError::InvalidAssetId
            | BuildError::NonConfidentialAddress => ErrorCategory::Address,
            BuildError::InvalidPrivateKey | BuildError::SweepNotSupported => ErrorCategory::Sweep,
            BuildError::CannotDetermineSubaccount => ErrorCategory::Wallet,
            BuildError::ExternalBlindingUnsupported | BuildError::PreblindedNotBlinded => {
                ErrorCategory::Blinding
            }
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Amount-related errors
    Amount,
    /// Address-related errors
    Address,
    /// Fee-related errors
    Fee,
    /// Sweep-related errors
    Sweep,
    /// Fee-bump reconstruction errors
    Bump,
    /// Signing errors
    Signing,
    /// Blinding errors
    Blinding,
    /// Crypto primitive errors
    Crypto,
    /// Wallet collaborator errors
    Wallet,
    /// Internal/system errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Amount => write!(f, "Amount"),
            ErrorCategory::Address => write!(f, "Address"),
            ErrorCategory::Fee => write!(f, "Fee"),
            ErrorCategory::Sweep => write!(f, "Sweep"),
            ErrorCategory::Bump => write!(f, "Bump"),
            ErrorCategory::Signing => write!(f, "Signing"),
            ErrorCategory::Blinding => write!(f, "Blinding"),
            ErrorCategory::Crypto => write!(f, "Crypto"),
            ErrorCategory::Wallet => write!(f, "Wallet"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_error_detection() {
        assert!(Error::Build(BuildError::InsufficientFunds).is_user_error());
        assert!(!Error::NoSubaccountUtxos.is_user_error());
        assert!(!Error::FeeLoopExhausted { iterations: 8 }.is_user_error());
        assert!(!Error::UnsupportedSighash(2).is_user_error());
    }

    #[test]
    fn test_build_error_passthrough() {
        let error: Error = BuildError::NoRecipients.into();
        assert_eq!(error.build_error(), Some(&BuildError::NoRecipients));
        assert_eq!(error.to_string(), "No recipients");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::Build(BuildError::InvalidReplacementFeeRate).category(),
            ErrorCategory::Fee
        );
        assert_eq!(Error::SignatureMismatch { input: 0 }.category(), ErrorCategory::Bump);
        assert_eq!(Error::MalformedConfidentialOutput(1).category(), ErrorCategory::Blinding);
        assert_eq!(BuildError::InvalidPrivateKey.category(), ErrorCategory::Sweep);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Amount.to_string(), "Amount");
        assert_eq!(ErrorCategory::Bump.to_string(), "Bump");
    }
}
