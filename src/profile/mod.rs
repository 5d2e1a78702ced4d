//! # Profile Registry
//!
//! A compile-time table of digit profiles (spec §4.1): length bounds, default
//! timeout/retries, validator kind, mask strategy, and allowed channels.
//! Lookup normalizes synonyms (`bank_account` → `account_number`, `cvc` →
//! `cvv`, `zip_code` → `zip`) before consulting the table, and rejects a
//! hardcoded deprecated set down to `generic`.
//!
//! The table itself never changes at runtime; it is built once behind a
//! [`once_cell::sync::Lazy`], the same pattern the corpus uses for other
//! static lookup tables (synonym maps, regex sets).

mod validators;

pub use validators::{validate, ValidationFailure};

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// A normalized profile identifier. Unknown ids are rejected by
/// [`normalize_profile_id`]; callers fall back to `generic` only at ingress,
/// never inside the registry itself.
pub type ProfileId = String;

/// Which validator a profile's digits must pass once length bounds are met.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorKind {
    /// Any digit sequence within the length band is accepted.
    None,
    /// Luhn mod-10 checksum (card numbers).
    Luhn,
    /// ABA routing-number weighted checksum, weights `[3,7,1,3,7,1,3,7,1] mod 10`.
    Routing,
    /// Any length within the band; OTPs have no internal structure to check.
    Otp,
    /// `MMDD` plausibility: month 1-12, day 1-31 (simplified, no month-length table).
    Dob,
    /// `MMYY` card expiry: month 1-12.
    Expiry,
}

/// How a profile's collected digits should be masked when surfaced to the
/// LLM, the live console, or persisted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskStrategy {
    /// Replace every digit with a mask character.
    Masked,
    /// Reveal only the last 4 digits.
    Last4,
}

/// Channels a profile may be collected over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPolicy {
    pub dtmf: bool,
    pub sms: bool,
    pub voice: bool,
}

impl ChannelPolicy {
    pub const DTMF_ONLY: Self = Self { dtmf: true, sms: false, voice: false };
    pub const ALL: Self = Self { dtmf: true, sms: true, voice: true };
    pub const DTMF_AND_SMS: Self = Self { dtmf: true, sms: true, voice: false };
}

/// A single registry row: everything fixed about a profile id.
#[derive(Debug, Clone, Copy)]
pub struct ProfileRow {
    pub id: &'static str,
    pub min_digits: u8,
    pub max_digits: u8,
    pub default_timeout_s: u64,
    pub default_retries: u8,
    pub validator: ValidatorKind,
    pub mask: MaskStrategy,
    pub channels: ChannelPolicy,
}

macro_rules! row {
    ($id:expr, $min:expr, $max:expr, $timeout:expr, $retries:expr, $validator:expr, $mask:expr, $channels:expr) => {
        ProfileRow {
            id: $id,
            min_digits: $min,
            max_digits: $max,
            default_timeout_s: $timeout,
            default_retries: $retries,
            validator: $validator,
            mask: $mask,
            channels: $channels,
        }
    };
}

/// The closed set of ~25 normalized profile ids named in spec §3.
static REGISTRY_ROWS: &[ProfileRow] = &[
    row!("verification", 4, 8, 20, 3, ValidatorKind::Otp, MaskStrategy::Masked, ChannelPolicy::ALL),
    row!("pin", 4, 6, 20, 3, ValidatorKind::None, MaskStrategy::Masked, ChannelPolicy::DTMF_ONLY),
    row!("ssn", 9, 9, 30, 2, ValidatorKind::None, MaskStrategy::Last4, ChannelPolicy::DTMF_ONLY),
    row!("dob", 4, 4, 20, 2, ValidatorKind::Dob, MaskStrategy::Masked, ChannelPolicy::DTMF_AND_SMS),
    row!("routing_number", 9, 9, 30, 3, ValidatorKind::Routing, MaskStrategy::Last4, ChannelPolicy::ALL),
    row!("account_number", 4, 17, 30, 3, ValidatorKind::None, MaskStrategy::Last4, ChannelPolicy::ALL),
    row!("card_number", 13, 19, 40, 3, ValidatorKind::Luhn, MaskStrategy::Last4, ChannelPolicy::ALL),
    row!("cvv", 3, 4, 20, 2, ValidatorKind::None, MaskStrategy::Masked, ChannelPolicy::DTMF_ONLY),
    row!("card_expiry", 4, 4, 20, 2, ValidatorKind::Expiry, MaskStrategy::Masked, ChannelPolicy::ALL),
    row!("zip", 5, 5, 20, 2, ValidatorKind::None, MaskStrategy::Last4, ChannelPolicy::ALL),
    row!("phone", 10, 11, 30, 2, ValidatorKind::None, MaskStrategy::Last4, ChannelPolicy::ALL),
    row!("amount", 1, 9, 20, 2, ValidatorKind::None, MaskStrategy::Masked, ChannelPolicy::ALL),
    row!("generic", 1, 20, 20, 3, ValidatorKind::None, MaskStrategy::Masked, ChannelPolicy::ALL),
];

static REGISTRY: Lazy<HashMap<&'static str, ProfileRow>> =
    Lazy::new(|| REGISTRY_ROWS.iter().map(|r| (r.id, *r)).collect());

/// Synonym folding, spec §4.1: `bank_account → account_number`, `cvc → cvv`,
/// `zip_code → zip`, and a hardcoded deprecated set that always falls to
/// `generic`.
static SYNONYMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("bank_account", "account_number"),
        ("checking_account", "account_number"),
        ("cvc", "cvv"),
        ("security_code", "cvv"),
        ("zip_code", "zip"),
        ("postal_code", "zip"),
        ("otp", "verification"),
        ("confirmation_code", "verification"),
        ("date_of_birth", "dob"),
        ("birthdate", "dob"),
        ("expiry", "card_expiry"),
        ("expiration_date", "card_expiry"),
        ("social_security_number", "ssn"),
    ])
});

/// Identifiers retired from the registry; any lookup matching one of these
/// collapses to `generic` rather than erroring, since callers may still send
/// them from stale templates.
static DEPRECATED: Lazy<std::collections::HashSet<&'static str>> =
    Lazy::new(|| std::collections::HashSet::from(["legacy_pin", "custom_code", "passcode"]));

/// Fold synonyms and deprecated ids, then look up the canonical row.
/// Returns `None` for anything not present after folding — callers fall back
/// to `generic` only at ingress, per spec §4.1.
pub fn resolve(raw: &str) -> Option<ProfileRow> {
    let lower = raw.trim().to_ascii_lowercase();
    if DEPRECATED.contains(lower.as_str()) {
        return REGISTRY.get("generic").copied();
    }
    if let Some(&canonical) = SYNONYMS.get(lower.as_str()) {
        return REGISTRY.get(canonical).copied();
    }
    REGISTRY
        .keys()
        .find(|k| **k == lower)
        .and_then(|k| REGISTRY.get(k))
        .copied()
}

/// All registry ids, for diagnostics/tests.
pub fn all_ids() -> Vec<&'static str> {
    REGISTRY.keys().copied().collect()
}
