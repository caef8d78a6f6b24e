//! The invoice status pair and the rules that decide which operator actions are legal for it.
use std::{fmt::Display, str::FromStr};

use log::*;
use serde::{Deserialize, Serialize};

use crate::db_types::ConversionError;

//--------------------------------------     InvoiceStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvoiceStatus {
    /// Created, waiting for payment.
    #[default]
    New,
    /// Enough has been paid, but not enough of it is confirmed yet.
    Paid,
    /// The payment window closed before enough was paid.
    Expired,
    /// The payment failed to confirm in time, or an operator rejected the invoice.
    Invalid,
    /// Final. The funds are deep enough in the chain to be irreversible.
    Complete,
    /// Enough has been confirmed under the invoice's speed policy.
    Confirmed,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 6] = [
        InvoiceStatus::New,
        InvoiceStatus::Paid,
        InvoiceStatus::Expired,
        InvoiceStatus::Invalid,
        InvoiceStatus::Complete,
        InvoiceStatus::Confirmed,
    ];

    /// The status as reported by the newer, simplified status model.
    pub fn to_modern(&self) -> ModernInvoiceStatus {
        match self {
            InvoiceStatus::New => ModernInvoiceStatus::New,
            InvoiceStatus::Paid => ModernInvoiceStatus::Processing,
            InvoiceStatus::Confirmed | InvoiceStatus::Complete => ModernInvoiceStatus::Settled,
            InvoiceStatus::Expired => ModernInvoiceStatus::Expired,
            InvoiceStatus::Invalid => ModernInvoiceStatus::Invalid,
        }
    }
}

impl Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvoiceStatus::New => write!(f, "new"),
            InvoiceStatus::Paid => write!(f, "paid"),
            InvoiceStatus::Expired => write!(f, "expired"),
            InvoiceStatus::Invalid => write!(f, "invalid"),
            InvoiceStatus::Complete => write!(f, "complete"),
            InvoiceStatus::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// Accepts the legacy status names as well as the modern `processing` and `settled` aliases, ignoring case.
impl FromStr for InvoiceStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "paid" | "processing" => Ok(Self::Paid),
            "expired" => Ok(Self::Expired),
            "invalid" => Ok(Self::Invalid),
            "complete" | "completed" | "settled" => Ok(Self::Complete),
            "confirmed" => Ok(Self::Confirmed),
            s => Err(ConversionError(format!("Invalid invoice status: {s}"))),
        }
    }
}

impl From<String> for InvoiceStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid invoice status: {value}. But this conversion cannot fail. Defaulting to New");
            InvoiceStatus::New
        })
    }
}

//--------------------------------------  ModernInvoiceStatus  ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModernInvoiceStatus {
    New,
    Processing,
    Settled,
    Expired,
    Invalid,
}

impl Display for ModernInvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModernInvoiceStatus::New => write!(f, "New"),
            ModernInvoiceStatus::Processing => write!(f, "Processing"),
            ModernInvoiceStatus::Settled => write!(f, "Settled"),
            ModernInvoiceStatus::Expired => write!(f, "Expired"),
            ModernInvoiceStatus::Invalid => write!(f, "Invalid"),
        }
    }
}

//-------------------------------------- InvoiceExceptionStatus --------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvoiceExceptionStatus {
    #[default]
    None,
    PaidPartial,
    PaidLate,
    PaidOver,
    /// An operator set the status by hand.
    Marked,
}

impl InvoiceExceptionStatus {
    pub const ALL: [InvoiceExceptionStatus; 5] = [
        InvoiceExceptionStatus::None,
        InvoiceExceptionStatus::PaidPartial,
        InvoiceExceptionStatus::PaidLate,
        InvoiceExceptionStatus::PaidOver,
        InvoiceExceptionStatus::Marked,
    ];
}

impl Display for InvoiceExceptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvoiceExceptionStatus::None => write!(f, "none"),
            InvoiceExceptionStatus::PaidPartial => write!(f, "paidPartial"),
            InvoiceExceptionStatus::PaidLate => write!(f, "paidLate"),
            InvoiceExceptionStatus::PaidOver => write!(f, "paidOver"),
            InvoiceExceptionStatus::Marked => write!(f, "marked"),
        }
    }
}

impl FromStr for InvoiceExceptionStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "false" => Ok(Self::None),
            "paidpartial" => Ok(Self::PaidPartial),
            "paidlate" => Ok(Self::PaidLate),
            "paidover" => Ok(Self::PaidOver),
            "marked" => Ok(Self::Marked),
            s => Err(ConversionError(format!("Invalid exception status: {s}"))),
        }
    }
}

impl From<String> for InvoiceExceptionStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid exception status: {value}. But this conversion cannot fail. Defaulting to None");
            InvoiceExceptionStatus::None
        })
    }
}

//--------------------------------------      InvoiceState      --------------------------------------------------------
/// The (status, exception status) pair. Together they fully determine which operator actions are allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvoiceState {
    pub status: InvoiceStatus,
    pub exception_status: InvoiceExceptionStatus,
}

impl InvoiceState {
    pub fn new(status: InvoiceStatus, exception_status: InvoiceExceptionStatus) -> Self {
        Self { status, exception_status }
    }

    pub fn can_mark_complete(&self) -> bool {
        use InvoiceExceptionStatus::*;
        use InvoiceStatus::*;
        matches!(self.status, Paid | New) ||
            (matches!(self.status, New | Expired) && matches!(self.exception_status, PaidPartial | PaidLate)) ||
            (self.status != Complete && self.exception_status == Marked) ||
            self.status == Invalid
    }

    pub fn can_mark_invalid(&self) -> bool {
        use InvoiceExceptionStatus::*;
        use InvoiceStatus::*;
        matches!(self.status, Paid | New) ||
            (matches!(self.status, New | Expired) && matches!(self.exception_status, PaidPartial | PaidLate)) ||
            (self.status != Invalid && self.exception_status == Marked)
    }

    pub fn can_refund(&self) -> bool {
        use InvoiceExceptionStatus::*;
        use InvoiceStatus::*;
        matches!(self.status, Confirmed | Complete) ||
            (self.status == Expired && matches!(self.exception_status, PaidLate | PaidOver | PaidPartial)) ||
            self.status == Invalid
    }

    /// True once the invoice's funds count as received for good.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, InvoiceStatus::Confirmed | InvoiceStatus::Complete)
    }

    /// True for states the reconciliation loop never leaves on its own.
    pub fn is_final(&self) -> bool {
        matches!(self.status, InvoiceStatus::Complete | InvoiceStatus::Invalid)
    }

    /// Every combination of status and exception status.
    pub fn all() -> impl Iterator<Item = InvoiceState> {
        InvoiceStatus::ALL
            .into_iter()
            .flat_map(|s| InvoiceExceptionStatus::ALL.into_iter().map(move |e| InvoiceState::new(s, e)))
    }
}

impl Display for InvoiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.status, self.exception_status)
    }
}

#[cfg(test)]
mod test {
    use super::{InvoiceExceptionStatus as X, InvoiceStatus as S, *};

    fn st(s: S, e: X) -> InvoiceState {
        InvoiceState::new(s, e)
    }

    #[test]
    fn mark_complete_rules() {
        assert!(st(S::New, X::None).can_mark_complete());
        assert!(st(S::Paid, X::PaidOver).can_mark_complete());
        assert!(st(S::Expired, X::PaidPartial).can_mark_complete());
        assert!(st(S::Expired, X::PaidLate).can_mark_complete());
        assert!(st(S::Confirmed, X::Marked).can_mark_complete());
        assert!(st(S::Invalid, X::None).can_mark_complete());
        assert!(!st(S::Expired, X::None).can_mark_complete());
        assert!(!st(S::Expired, X::PaidOver).can_mark_complete());
        assert!(!st(S::Confirmed, X::None).can_mark_complete());
        assert!(!st(S::Complete, X::Marked).can_mark_complete());
        assert!(!st(S::Complete, X::None).can_mark_complete());
    }

    #[test]
    fn mark_invalid_rules() {
        assert!(st(S::New, X::PaidPartial).can_mark_invalid());
        assert!(st(S::Paid, X::None).can_mark_invalid());
        assert!(st(S::Expired, X::PaidLate).can_mark_invalid());
        assert!(st(S::Complete, X::Marked).can_mark_invalid());
        assert!(!st(S::Invalid, X::Marked).can_mark_invalid());
        assert!(!st(S::Invalid, X::None).can_mark_invalid());
        assert!(!st(S::Confirmed, X::None).can_mark_invalid());
        assert!(!st(S::Complete, X::None).can_mark_invalid());
        assert!(!st(S::Expired, X::None).can_mark_invalid());
    }

    #[test]
    fn refund_rules() {
        assert!(st(S::Confirmed, X::None).can_refund());
        assert!(st(S::Complete, X::PaidOver).can_refund());
        assert!(st(S::Expired, X::PaidLate).can_refund());
        assert!(st(S::Expired, X::PaidOver).can_refund());
        assert!(st(S::Expired, X::PaidPartial).can_refund());
        assert!(st(S::Invalid, X::Marked).can_refund());
        assert!(!st(S::Expired, X::None).can_refund());
        assert!(!st(S::Expired, X::Marked).can_refund());
        assert!(!st(S::New, X::PaidPartial).can_refund());
        assert!(!st(S::Paid, X::None).can_refund());
    }

    #[test]
    fn status_names() {
        assert_eq!("Processing".parse::<S>().unwrap(), S::Paid);
        assert_eq!("SETTLED".parse::<S>().unwrap(), S::Complete);
        assert_eq!(" confirmed ".parse::<S>().unwrap(), S::Confirmed);
        assert!("pending".parse::<S>().is_err());
        assert_eq!(S::from("bogus".to_string()), S::New);
        assert_eq!("paidOver".parse::<X>().unwrap(), X::PaidOver);
        for s in S::ALL {
            assert_eq!(s.to_string().parse::<S>().unwrap(), s);
        }
        for x in X::ALL {
            assert_eq!(x.to_string().parse::<X>().unwrap(), x);
        }
        assert_eq!(S::Confirmed.to_modern(), ModernInvoiceStatus::Settled);
        assert_eq!(S::Paid.to_modern(), ModernInvoiceStatus::Processing);
        assert_eq!(st(S::Expired, X::PaidLate).to_string(), "expired (paidLate)");
    }

    #[test]
    fn all_pairs_are_enumerated() {
        assert_eq!(InvoiceState::all().count(), 30);
    }
}
