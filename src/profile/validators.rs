//! Digit-shape validators named by a profile's [`super::ValidatorKind`].

use super::ValidatorKind;

/// Reason a validator rejected an in-range buffer (spec §4.2 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    InvalidLength,
    InvalidLuhn,
    InvalidRouting,
    InvalidMonth,
    InvalidDay,
}

/// Run `kind`'s validator over `digits`, which is assumed to already be
/// within the profile's length bounds (that check happens earlier in outcome
/// classification, spec §4.2 steps 2-3).
pub fn validate(kind: ValidatorKind, digits: &str) -> Result<(), ValidationFailure> {
    match kind {
        ValidatorKind::None | ValidatorKind::Otp => Ok(()),
        ValidatorKind::Luhn => validate_luhn(digits),
        ValidatorKind::Routing => validate_routing(digits),
        ValidatorKind::Dob => validate_dob(digits),
        ValidatorKind::Expiry => validate_expiry(digits),
    }
}

fn validate_luhn(digits: &str) -> Result<(), ValidationFailure> {
    let sum: u32 = digits
        .chars()
        .rev()
        .enumerate()
        .map(|(i, c)| {
            let mut d = c.to_digit(10).unwrap_or(0);
            if i % 2 == 1 {
                d *= 2;
                if d > 9 {
                    d -= 9;
                }
            }
            d
        })
        .sum();
    if sum % 10 == 0 {
        Ok(())
    } else {
        Err(ValidationFailure::InvalidLuhn)
    }
}

/// ABA routing-number weighted checksum: weights `[3,7,1,3,7,1,3,7,1] mod 10`.
fn validate_routing(digits: &str) -> Result<(), ValidationFailure> {
    const WEIGHTS: [u32; 9] = [3, 7, 1, 3, 7, 1, 3, 7, 1];
    if digits.len() != 9 {
        return Err(ValidationFailure::InvalidRouting);
    }
    let sum: u32 = digits
        .chars()
        .zip(WEIGHTS.iter())
        .map(|(c, w)| c.to_digit(10).unwrap_or(0) * w)
        .sum();
    if sum % 10 == 0 {
        Ok(())
    } else {
        Err(ValidationFailure::InvalidRouting)
    }
}

/// `MMDD` plausibility check: month 1-12, day 1-31 (spec §8 boundary
/// behaviors: month 00/13 invalid, day 00/32 invalid).
fn validate_dob(digits: &str) -> Result<(), ValidationFailure> {
    if digits.len() != 4 {
        return Err(ValidationFailure::InvalidMonth);
    }
    let month: u32 = digits[0..2].parse().unwrap_or(0);
    let day: u32 = digits[2..4].parse().unwrap_or(0);
    if !(1..=12).contains(&month) {
        return Err(ValidationFailure::InvalidMonth);
    }
    if !(1..=31).contains(&day) {
        return Err(ValidationFailure::InvalidDay);
    }
    Ok(())
}

/// `MMYY` card expiry: month 1-12.
fn validate_expiry(digits: &str) -> Result<(), ValidationFailure> {
    if digits.len() != 4 {
        return Err(ValidationFailure::InvalidMonth);
    }
    let month: u32 = digits[0..2].parse().unwrap_or(0);
    if !(1..=12).contains(&month) {
        return Err(ValidationFailure::InvalidMonth);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luhn_accepts_known_valid_card() {
        assert_eq!(validate(ValidatorKind::Luhn, "4532015112830366"), Ok(()));
    }

    #[test]
    fn luhn_rejects_invalid_card() {
        assert_eq!(
            validate(ValidatorKind::Luhn, "4532015112830367"),
            Err(ValidationFailure::InvalidLuhn)
        );
    }

    #[test]
    fn routing_accepts_valid_aba() {
        // 021000021 is a well-known valid ABA routing number (JPMorgan Chase NY).
        assert_eq!(validate(ValidatorKind::Routing, "021000021"), Ok(()));
    }

    #[test]
    fn routing_rejects_bad_checksum() {
        assert_eq!(
            validate(ValidatorKind::Routing, "021000022"),
            Err(ValidationFailure::InvalidRouting)
        );
    }

    #[test]
    fn dob_rejects_month_00_and_13() {
        assert_eq!(validate(ValidatorKind::Dob, "0015"), Err(ValidationFailure::InvalidMonth));
        assert_eq!(validate(ValidatorKind::Dob, "1315"), Err(ValidationFailure::InvalidMonth));
    }

    #[test]
    fn dob_rejects_day_00_and_32() {
        assert_eq!(validate(ValidatorKind::Dob, "0100"), Err(ValidationFailure::InvalidDay));
        assert_eq!(validate(ValidatorKind::Dob, "0132"), Err(ValidationFailure::InvalidDay));
    }

    #[test]
    fn expiry_accepts_valid_month() {
        assert_eq!(validate(ValidatorKind::Expiry, "0127"), Ok(()));
    }
}
