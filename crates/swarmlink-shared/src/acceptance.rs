//! Admission check for decrypted content messages.
//!
//! A message whose signed timestamp disagrees with its envelope timestamp is
//! dropped silently. Direct messages and closed groups carry an authenticated
//! delivery timestamp and must match exactly; community servers are only
//! loosely trusted and get a fixed skew window.

use crate::constants::COMMUNITY_TIMESTAMP_TOLERANCE_MS;

/// Signed timestamp as carried by decoded content.
///
/// Protobuf decoders hand these out as various integer widths (or not at
/// all). Zero in any width means "no signed timestamp".
pub trait SigTimestamp {
    fn sig_millis(&self) -> Option<i128>;
}

macro_rules! impl_sig_timestamp {
    ($($t:ty),*) => {
        $(
            impl SigTimestamp for $t {
                fn sig_millis(&self) -> Option<i128> {
                    match i128::from(*self) {
                        0 => None,
                        v => Some(v),
                    }
                }
            }
        )*
    };
}

impl_sig_timestamp!(u32, u64, i32, i64);

impl SigTimestamp for u128 {
    fn sig_millis(&self) -> Option<i128> {
        match *self {
            0 => None,
            v => Some(i128::try_from(v).unwrap_or(i128::MAX)),
        }
    }
}

impl<T: SigTimestamp> SigTimestamp for Option<T> {
    fn sig_millis(&self) -> Option<i128> {
        self.as_ref().and_then(SigTimestamp::sig_millis)
    }
}

impl<T: SigTimestamp + ?Sized> SigTimestamp for &T {
    fn sig_millis(&self) -> Option<i128> {
        (**self).sig_millis()
    }
}

/// Decide whether a decrypted content message may proceed downstream.
pub fn should_process_content_message(
    envelope_timestamp: u64,
    sig_timestamp: impl SigTimestamp,
    is_community: bool,
) -> bool {
    let Some(sig) = sig_timestamp.sig_millis() else {
        return true;
    };
    let envelope = i128::from(envelope_timestamp);

    if !is_community {
        return envelope == sig;
    }

    (envelope - sig).unsigned_abs() < u128::from(COMMUNITY_TIMESTAMP_TOLERANCE_MS)
}
