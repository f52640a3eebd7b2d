//! Secret string handling with redacted display and serialization.
//!
//! Provides `RedactedString` for the database password so it can travel through
//! configuration, job descriptions and log lines without being exposed.

use bon::Builder;
use derive_more::From;
use getset::Getters;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};
use std::result;
use zeroize::Zeroize;

/// Placeholder text shown instead of the actual secret in logs/debug output
pub static REDACTED_SECRET: &str = "###REDACTED###";

/// A string that gets redacted in debug/display output and serialization
///
/// The real value is only reachable through [`RedactedString::secret`], which is
/// what the dump command uses when it builds the process arguments.
/// Memory is zeroed on drop.
#[derive(Clone, Zeroize, From, Builder, PartialEq, Eq, Getters, Default)]
#[getset(get = "pub")]
pub struct RedactedString {
    #[builder(into)]
    secret: String,
}

impl RedactedString {
    pub fn is_empty(&self) -> bool {
        self.secret.is_empty()
    }
}

impl From<&str> for RedactedString {
    fn from(value: &str) -> Self {
        RedactedString::builder().secret(value).build()
    }
}

impl Debug for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", REDACTED_SECRET)
    }
}

impl Display for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", REDACTED_SECRET)
    }
}

impl Serialize for RedactedString {
    /// Always serializes as redacted placeholder
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED_SECRET)
    }
}

impl<'de> Deserialize<'de> for RedactedString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(RedactedStringVisitor)
    }
}

impl Drop for RedactedString {
    fn drop(&mut self) {
        self.zeroize();
    }
}

pub struct RedactedStringVisitor;

impl Visitor<'_> for RedactedStringVisitor {
    type Value = RedactedString;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a string")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(RedactedString::from(v))
    }
}
