//! Tri-state partial-update fields and the merge rules that apply them.
//!
//! A [`Patch`] distinguishes a field that was left out of an update from one
//! that was explicitly cleared:
//!
//! | JSON              | `Patch`        |
//! |-------------------|----------------|
//! | field missing     | `Keep`         |
//! | `"field": null`   | `Clear`        |
//! | `"field": value`  | `Set(value)`   |
//!
//! Struct fields must carry `#[serde(default)]` so that a missing key maps to
//! `Keep`.
//!
//! # Merge rules
//!
//! - [`merge_required_text`]: only a non-empty `Set` replaces the value.
//! - [`merge_optional_text`]: a non-empty `Set` replaces, `Clear` removes.
//! - [`merge_value`]: any `Set` replaces; `Clear` cannot empty a required value.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// A single field of a partial update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    /// Field omitted: leave the stored value alone.
    #[default]
    Keep,
    /// Field explicitly set to `null`.
    Clear,
    /// Field supplied with a value.
    Set(T),
}

impl<T> Patch<T> {
    /// Returns `true` for [`Patch::Keep`].
    #[must_use]
    pub const fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }

    /// Borrow the supplied value, if any.
    #[must_use]
    pub const fn as_set(&self) -> Option<&T> {
        match self {
            Self::Set(value) => Some(value),
            Self::Keep | Self::Clear => None,
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Keep, Self::Set)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(|value| value.map_or(Self::Clear, Self::Set))
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Callers skip `Keep` with `skip_serializing_if = "Patch::is_keep"`.
            Self::Keep | Self::Clear => serializer.serialize_none(),
            Self::Set(value) => serializer.serialize_some(value),
        }
    }
}

/// Apply a patch to a required text column.
///
/// Returns `true` if the value changed.
pub fn merge_required_text(current: &mut String, patch: &Patch<String>) -> bool {
    match patch {
        Patch::Set(value) if !value.is_empty() && value != current => {
            current.clone_from(value);
            true
        }
        _ => false,
    }
}

/// Apply a patch to a nullable text column.
///
/// Returns `true` if the value changed.
pub fn merge_optional_text(current: &mut Option<String>, patch: &Patch<String>) -> bool {
    match patch {
        Patch::Set(value) if !value.is_empty() && current.as_ref() != Some(value) => {
            *current = Some(value.clone());
            true
        }
        Patch::Clear if current.is_some() => {
            *current = None;
            true
        }
        _ => false,
    }
}

/// Apply a patch to a required non-text column.
///
/// Returns `true` if the value changed.
pub fn merge_value<T: Clone + PartialEq>(current: &mut T, patch: &Patch<T>) -> bool {
    match patch {
        Patch::Set(value) if value != current => {
            current.clone_from(value);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Probe {
        #[serde(default)]
        description: Patch<String>,
    }

    #[test]
    fn json_distinguishes_missing_null_and_value() {
        let missing: Probe = serde_json::from_str("{}").unwrap();
        let null: Probe = serde_json::from_str(r#"{"description":null}"#).unwrap();
        let value: Probe = serde_json::from_str(r#"{"description":"hi"}"#).unwrap();

        assert_eq!(missing.description, Patch::Keep);
        assert_eq!(null.description, Patch::Clear);
        assert_eq!(value.description, Patch::Set("hi".to_string()));
    }

    #[test]
    fn required_text_ignores_empty_and_clear() {
        let mut login = "alice".to_string();
        assert!(!merge_required_text(&mut login, &Patch::Set(String::new())));
        assert!(!merge_required_text(&mut login, &Patch::Clear));
        assert!(!merge_required_text(&mut login, &Patch::Keep));
        assert_eq!(login, "alice");

        assert!(merge_required_text(&mut login, &Patch::Set("bob".into())));
        assert_eq!(login, "bob");
    }

    #[test]
    fn optional_text_can_be_cleared() {
        let mut description = Some("likes widgets".to_string());
        assert!(!merge_optional_text(&mut description, &Patch::Set(String::new())));
        assert!(merge_optional_text(&mut description, &Patch::Clear));
        assert_eq!(description, None);
        assert!(!merge_optional_text(&mut description, &Patch::Clear));
    }

    #[test]
    fn value_clear_keeps_required_value() {
        let mut quantity = 7_u32;
        assert!(!merge_value(&mut quantity, &Patch::Clear));
        assert!(merge_value(&mut quantity, &Patch::Set(0)));
        assert_eq!(quantity, 0);
    }

    proptest! {
        #[test]
        fn keep_never_changes_anything(start in ".*", opt in proptest::option::of(".*"), n in any::<u32>()) {
            let mut text = start.clone();
            let mut optional = opt.clone();
            let mut number = n;

            prop_assert!(!merge_required_text(&mut text, &Patch::Keep));
            prop_assert!(!merge_optional_text(&mut optional, &Patch::Keep));
            prop_assert!(!merge_value(&mut number, &Patch::Keep));
            prop_assert_eq!(text, start);
            prop_assert_eq!(optional, opt);
            prop_assert_eq!(number, n);
        }

        #[test]
        fn non_empty_set_always_wins(start in ".*", next in ".+") {
            let mut text = start;
            merge_required_text(&mut text, &Patch::Set(next.clone()));
            prop_assert_eq!(text, next);
        }
    }
}
