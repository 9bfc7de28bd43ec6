//! Account, meter, application and bill numbers, plus one-time credentials
//!
//! Everything here is pure over an explicit clock value and an [`Entropy`]
//! handle. Randomness always comes from a ChaCha20 stream seeded by the
//! operating system; if the OS cannot provide a seed the caller gets
//! [`IdentifierError::EntropyUnavailable`] and nothing is generated.
use crate::error::IdentifierError;
use argon2::Argon2;
use chrono::{DateTime, Datelike, Utc};
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rand_chacha::{
    ChaCha20Rng,
    rand_core::{RngCore, SeedableRng},
};
use std::fmt;

pub const MIN_CREDENTIAL_LENGTH: usize = 12;
pub const MAX_METER_SEQUENCE: u64 = 999_999;

const SALT_LEN: usize = 16;

// Look-alike characters (0/O, 1/l/I) are left out.
const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%^&*-_+=?";

const CITY_CODES: &[(&str, &str)] = &[
    ("Karachi", "KHI"),
    ("Lahore", "LHE"),
    ("Islamabad", "ISB"),
    ("Rawalpindi", "RWP"),
    ("Faisalabad", "FSD"),
    ("Multan", "MLT"),
    ("Peshawar", "PES"),
    ("Quetta", "QTA"),
    ("Hyderabad", "HYD"),
    ("Gujranwala", "GJW"),
    ("Sialkot", "SKT"),
    ("Sargodha", "SRG"),
    ("Bahawalpur", "BWP"),
    ("Sukkur", "SKR"),
    ("Larkana", "LKN"),
    ("Nawabshah", "NWS"),
    ("Mirpur Khas", "MKS"),
    ("Jacobabad", "JBD"),
    ("Shikarpur", "SKP"),
    ("Khairpur", "KHP"),
];
const GENERAL_CITY_CODE: &str = "GEN";

/// Cryptographically secure random stream.
pub struct Entropy {
    rng: ChaCha20Rng,
}

impl Entropy {
    /// Seed from the operating system. Fails closed.
    pub fn from_os() -> Result<Self, IdentifierError> {
        ChaCha20Rng::try_from_os_rng()
            .map(|rng| Self { rng })
            .map_err(|e| IdentifierError::EntropyUnavailable(e.to_string()))
    }
    /// Deterministic stream for reproducible tests.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            rng: ChaCha20Rng::from_seed(seed),
        }
    }
    pub fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest);
    }
    pub fn random_bytes(&mut self, size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; size];
        self.fill_bytes(&mut buf);
        buf
    }
    /// Uniform value in `0..bound` by rejection sampling.
    pub fn below(&mut self, bound: u32) -> u32 {
        debug_assert!(bound > 0);
        let zone = u32::MAX - (u32::MAX % bound);
        loop {
            let value = self.rng.next_u32();
            if value < zone {
                return value % bound;
            }
        }
    }
    fn pick(&mut self, alphabet: &[u8]) -> u8 {
        alphabet[self.below(alphabet.len() as u32) as usize]
    }
}

/// Where a service obtains fresh [`Entropy`]. Swappable so tests can pin
/// seeds or simulate an unavailable source.
pub trait EntropySource: Send + Sync {
    fn open(&self) -> Result<Entropy, IdentifierError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn open(&self) -> Result<Entropy, IdentifierError> {
        Entropy::from_os()
    }
}

/// `PREFIX-YEAR-TIMESUFFIX-RANDOMSUFFIX`, e.g. `ELX-2024-123456-9F3A`.
///
/// Probabilistically unique only; persistence enforces uniqueness.
pub fn generate_account_number(
    prefix: &str,
    now: DateTime<Utc>,
    entropy: &mut Entropy,
) -> String {
    let time_suffix = now.timestamp_millis().rem_euclid(1_000_000);
    let random_suffix = hex::encode_upper(entropy.random_bytes(2));

    format!("{prefix}-{}-{time_suffix:06}-{random_suffix}", now.year())
}

/// `PREFIX-YEAR-NNNNNN` with six random digits.
pub fn generate_application_number(
    prefix: &str,
    now: DateTime<Utc>,
    entropy: &mut Entropy,
) -> String {
    let digits = 100_000 + entropy.below(900_000);
    format!("{prefix}-{}-{digits}", now.year())
}

pub fn generate_bill_number(prefix: &str, now: DateTime<Utc>, entropy: &mut Entropy) -> String {
    let suffix = hex::encode_upper(entropy.random_bytes(4));
    format!("{prefix}-{}-{suffix}", now.year())
}

/// Three letter code used in meter numbers. Unknown cities share `GEN`.
pub fn city_code(city: &str) -> &'static str {
    let city = city.trim();
    CITY_CODES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(city))
        .map(|(_, code)| *code)
        .unwrap_or(GENERAL_CITY_CODE)
}

/// `PREFIX-CODE-NNNNNN`. The sequence comes from the per-city counter in the store.
pub fn format_meter_number(
    prefix: &str,
    city_code: &str,
    sequence: u64,
) -> Result<String, IdentifierError> {
    if sequence == 0 || sequence > MAX_METER_SEQUENCE {
        return Err(IdentifierError::SequenceExhausted(city_code.to_string()));
    }
    Ok(format!("{prefix}-{city_code}-{sequence:06}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterNumberParts {
    pub city_code: String,
    pub sequence: u64,
}

pub fn parse_meter_number(meter_number: &str) -> Option<MeterNumberParts> {
    let mut parts = meter_number.split('-');
    let (_prefix, code, digits) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(MeterNumberParts {
        city_code: code.to_string(),
        sequence: digits.parse().ok()?,
    })
}

pub fn is_valid_meter_number(meter_number: &str) -> bool {
    parse_meter_number(meter_number).is_some()
}

/// A freshly generated password in plaintext. Hand it to
/// the caller once and store [`TemporaryCredential::hash`] instead.
#[derive(Clone, PartialEq, Eq)]
pub struct TemporaryCredential(String);

impl TemporaryCredential {
    pub fn expose(&self) -> &str {
        &self.0
    }
    pub fn hash(&self, entropy: &mut Entropy) -> Result<String, IdentifierError> {
        hash_password(&self.0, entropy)
    }
}

impl fmt::Debug for TemporaryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TemporaryCredential(<redacted>)")
    }
}

/// Mixed case, digits and symbols, at least one of each.
pub fn generate_temporary_credential(
    length: usize,
    entropy: &mut Entropy,
) -> Result<TemporaryCredential, IdentifierError> {
    if length < MIN_CREDENTIAL_LENGTH {
        return Err(IdentifierError::CredentialTooShort {
            minimum: MIN_CREDENTIAL_LENGTH,
            requested: length,
        });
    }

    let classes = [UPPER, LOWER, DIGITS, SYMBOLS];
    let all: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = classes.iter().map(|class| entropy.pick(class)).collect();
    while chars.len() < length {
        chars.push(entropy.pick(&all));
    }
    // Fisher-Yates, so the guaranteed characters are not always up front.
    for i in (1..chars.len()).rev() {
        let j = entropy.below(i as u32 + 1) as usize;
        chars.swap(i, j);
    }

    let plaintext = chars.into_iter().map(char::from).collect();
    Ok(TemporaryCredential(plaintext))
}

/// Argon2id PHC string, salted from `entropy`.
pub fn hash_password(password: &str, entropy: &mut Entropy) -> Result<String, IdentifierError> {
    let salt = SaltString::encode_b64(&entropy.random_bytes(SALT_LEN))
        .map_err(|e| IdentifierError::Hashing(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentifierError::Hashing(e.to_string()))
}

/// Check `password` against a stored argon2 hash. Anything unparsable is a mismatch.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    match PasswordHash::new(encoded) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Human readable description of a credential policy violation, if any.
pub fn credential_policy_violation(password: &str) -> Option<&'static str> {
    if password.len() < MIN_CREDENTIAL_LENGTH {
        return Some("too short");
    }
    let has = |class: &[u8]| password.bytes().any(|b| class.contains(&b));
    if !has(UPPER) {
        return Some("missing an uppercase letter");
    }
    if !has(LOWER) {
        return Some("missing a lowercase letter");
    }
    if !has(DIGITS) {
        return Some("missing a digit");
    }
    if !has(SYMBOLS) {
        return Some("missing a symbol");
    }
    None
}
