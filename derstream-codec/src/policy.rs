//! DER length-encoding policy checker
//!
//! DER requires every length to use the unique shortest encoding of its
//! magnitude: the indefinite form is forbidden, lengths 0-127 must use the
//! short form, and a long form of `n` octets is valid only if `n - 1`
//! octets would be too few. This module is the single source of truth for
//! that rule; the filter stage applies it to every header event.

use derstream_core::{Asn1Error, Asn1Result, TlvLength};

/// Check one length descriptor for DER canonicality.
///
/// # Returns
/// `Ok(())` for a canonical encoding, or a policy failure naming the
/// specific violation. Pure and total; exercised directly by tests
/// independent of any streaming machinery.
pub fn check_length(length: &TlvLength) -> Asn1Result<()> {
    match *length {
        TlvLength::Indefinite => Err(Asn1Error::der_policy("indefinite length not allowed")),
        TlvLength::Short(_) => Ok(()),
        TlvLength::Long { octets: 1, value } => {
            if value < 128 {
                Err(Asn1Error::der_policy("long length should be a short length"))
            } else {
                Ok(())
            }
        }
        TlvLength::Long { octets, value } => {
            if octets >= 2 && is_shortest(octets, value) {
                Ok(())
            } else {
                Err(Asn1Error::der_policy("long length is not shortest"))
            }
        }
    }
}

/// Whether `value` needs exactly `octets` magnitude octets, i.e. lies in
/// `[2^((octets-1)*8), 2^(octets*8))`.
fn is_shortest(octets: u8, value: u64) -> bool {
    let upper_bits = u32::from(octets) * 8;
    let lower_bits = upper_bits - 8;
    let fits = upper_bits >= 64 || value >> upper_bits == 0;
    let needs_all = lower_bits < 64 && value >> lower_bits != 0;
    fits && needs_all
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(length: &TlvLength) -> String {
        match check_length(length).unwrap_err() {
            Asn1Error::Policy { domain, reason } => {
                assert_eq!(domain, "DER");
                reason
            }
            other => panic!("expected policy failure, got {:?}", other),
        }
    }

    #[test]
    fn test_short_form_always_accepted() {
        for len in 0..=127u8 {
            assert!(check_length(&TlvLength::Short(len)).is_ok());
        }
    }

    #[test]
    fn test_indefinite_rejected() {
        assert_eq!(
            reason(&TlvLength::Indefinite),
            "indefinite length not allowed"
        );
    }

    #[test]
    fn test_one_octet_long_form_boundaries() {
        assert_eq!(
            reason(&TlvLength::Long {
                octets: 1,
                value: 0
            }),
            "long length should be a short length"
        );
        assert_eq!(
            reason(&TlvLength::Long {
                octets: 1,
                value: 127
            }),
            "long length should be a short length"
        );
        // 128 and 255 both fit one octet; one octet is minimal for them.
        assert!(
            check_length(&TlvLength::Long {
                octets: 1,
                value: 128
            })
            .is_ok()
        );
        assert!(
            check_length(&TlvLength::Long {
                octets: 1,
                value: 255
            })
            .is_ok()
        );
    }

    #[test]
    fn test_two_octet_long_form_boundaries() {
        assert_eq!(
            reason(&TlvLength::Long {
                octets: 2,
                value: 255
            }),
            "long length is not shortest"
        );
        assert!(
            check_length(&TlvLength::Long {
                octets: 2,
                value: 256
            })
            .is_ok()
        );
        assert!(
            check_length(&TlvLength::Long {
                octets: 2,
                value: 65535
            })
            .is_ok()
        );
        assert_eq!(
            reason(&TlvLength::Long {
                octets: 2,
                value: 65536
            }),
            "long length is not shortest"
        );
    }

    #[test]
    fn test_wide_long_form_boundaries() {
        assert!(
            check_length(&TlvLength::Long {
                octets: 3,
                value: 65536
            })
            .is_ok()
        );
        assert_eq!(
            reason(&TlvLength::Long {
                octets: 3,
                value: 65535
            }),
            "long length is not shortest"
        );
        // Eight octets cover the top of the u64 range.
        assert!(
            check_length(&TlvLength::Long {
                octets: 8,
                value: u64::MAX
            })
            .is_ok()
        );
        assert_eq!(
            reason(&TlvLength::Long {
                octets: 8,
                value: 1 << 55
            }),
            "long length is not shortest"
        );
        // Nine or more octets can never be minimal for a u64 magnitude.
        assert_eq!(
            reason(&TlvLength::Long {
                octets: 9,
                value: u64::MAX
            }),
            "long length is not shortest"
        );
    }

    #[test]
    fn test_zero_octet_long_form_rejected() {
        assert_eq!(
            reason(&TlvLength::Long {
                octets: 0,
                value: 0
            }),
            "long length is not shortest"
        );
    }

    #[test]
    fn test_canonical_constructor_always_passes() {
        for len in [0usize, 1, 127, 128, 255, 256, 65535, 65536, 1 << 24] {
            assert!(check_length(&TlvLength::of(len)).is_ok());
        }
    }
}
