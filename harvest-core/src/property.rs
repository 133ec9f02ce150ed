//! Validated feature property names.

use std::fmt;
use std::ops::Deref;

use thiserror::Error;

/// A feature property name safe to splice into a filter expression or a
/// sort clause.
///
/// Only ASCII letters, digits and underscores are accepted, and the first
/// character must not be a digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyName(String);

/// Raised when a property name fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid property name `{0}`")]
pub struct PropertyNameError(pub String);

impl PropertyName {
    /// Validate and wrap a property name.
    ///
    /// # Examples
    ///
    /// ```
    /// use harvest_core::PropertyName;
    ///
    /// assert!(PropertyName::new("image_date").is_ok());
    /// assert!(PropertyName::new("1year").is_err());
    /// assert!(PropertyName::new("uid; drop").is_err());
    /// ```
    pub fn new(value: impl Into<String>) -> Result<Self, PropertyNameError> {
        let value = value.into();
        let mut chars = value.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(Self(value))
        } else {
            Err(PropertyNameError(value))
        }
    }

    /// Wrap a literal known to be valid.
    pub(crate) fn from_static(value: &'static str) -> Self {
        debug_assert!(Self::new(value).is_ok(), "invalid static property name");
        Self(value.to_owned())
    }

    /// Borrow the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for PropertyName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PropertyName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
