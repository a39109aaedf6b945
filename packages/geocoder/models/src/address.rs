//! Canonical address keys.
//!
//! Upstream provider tables carry addresses as free text with
//! inconsistent spacing, casing, and postal code formats
//! (`"12345-6789"`, `"123456789"`, `"1234"`). Every set operation in the
//! pipeline joins on [`AddressKey`], so normalization is total: any input
//! produces a key, however malformed.

use serde::{Deserialize, Serialize};

/// Width of a normalized postal code.
pub const POSTAL_CODE_WIDTH: usize = 5;

/// An address exactly as read from an upstream table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAddress {
    /// Provider identifier (CMS Certification Number).
    pub provider_id: String,
    /// Street line (e.g., `"100 N State St"`).
    pub street: String,
    /// City name.
    pub city: String,
    /// State abbreviation.
    pub state: String,
    /// Postal code in whatever format the source used.
    pub postal_code: String,
}

/// Canonical `(provider id, street, city, state, postal code)` tuple.
///
/// The derived ordering compares fields in declaration order, so a
/// `BTreeSet<AddressKey>` iterates lexicographically. Remaining-work
/// batches and their numbering depend on that ordering being stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddressKey {
    /// Provider identifier. Empty when the source did not carry one.
    pub provider_id: String,
    /// Uppercased street line with collapsed whitespace.
    pub street: String,
    /// Uppercased city.
    pub city: String,
    /// Uppercased state.
    pub state: String,
    /// Exactly [`POSTAL_CODE_WIDTH`] characters.
    pub postal_code: String,
}

/// The address portion of a key, without the provider identifier:
/// `(street, city, state, postal code)`.
pub type Location = (String, String, String, String);

impl AddressKey {
    /// Normalizes a raw address into its canonical key. Never fails.
    #[must_use]
    pub fn normalize(raw: &RawAddress) -> Self {
        Self {
            provider_id: clean_field(&raw.provider_id),
            street: clean_field(&raw.street).to_uppercase(),
            city: clean_field(&raw.city).to_uppercase(),
            state: clean_field(&raw.state).to_uppercase(),
            postal_code: normalize_postal_code(&raw.postal_code),
        }
    }

    /// Returns the key's [`Location`]. Keys from sources that carry no
    /// provider id are matched to identified keys through it.
    #[must_use]
    pub fn location(&self) -> Location {
        (
            self.street.clone(),
            self.city.clone(),
            self.state.clone(),
            self.postal_code.clone(),
        )
    }

    /// Builds the single-line form submitted to geocoders,
    /// e.g. `"100 N STATE ST, CHICAGO, IL 60602"`.
    #[must_use]
    pub fn one_line(&self) -> String {
        format!(
            "{}, {}, {} {}",
            self.street, self.city, self.state, self.postal_code
        )
    }
}

impl std::fmt::Display for AddressKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.provider_id.is_empty() {
            f.write_str(&self.one_line())
        } else {
            write!(f, "[{}] {}", self.provider_id, self.one_line())
        }
    }
}

/// Truncates a postal code to its first five characters, then left-pads
/// with zeros to exactly five.
///
/// ZIP+4 forms collapse to the 5-digit ZIP, and codes that lost a leading
/// zero (a common spreadsheet artifact for New England ZIPs) get it back.
#[must_use]
pub fn normalize_postal_code(raw: &str) -> String {
    let head: String = raw.trim().chars().take(POSTAL_CODE_WIDTH).collect();
    format!("{head:0>width$}", width = POSTAL_CODE_WIDTH)
}

fn clean_field(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
