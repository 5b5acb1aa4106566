//! # veritee 検証クライアント
//!
//! TEEサーバーが公開するAttested Identityを検証し、
//! 保護対象アクションの結果がそのアイデンティティによって署名されたことを確認する。
//!
//! ```text
//! fetch_report → verify_attestation_report → chat_completion → fetch_signature → verify_signature
//! ```

pub mod client;
pub mod error;
pub mod protocol;

pub use client::{ChatExchange, ServiceClient};
pub use error::VerifyError;
pub use protocol::{
    parse_expected_measurement, verify_attestation_report, verify_signature, QuoteVerification,
    VerificationOutcome, VerificationProtocol,
};
