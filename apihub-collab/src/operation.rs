//! Text operations: retain / insert / delete runs over a document.
//!
//! An [`Operation`] walks the whole document it is applied to. Retain and
//! delete consume characters of the base document, insert produces new
//! ones, so every operation has a fixed *base length* (the length it can be
//! applied to) and *target length* (the length of the result).
//!
//! ```text
//! base  "abc"      [Retain(1), Insert("X"), Retain(2)]
//! target "aXbc"
//! ```
//!
//! Lengths are counted in Unicode scalar values (`char`s), never bytes.
//!
//! Operations are values: the builder normalises components as they are
//! pushed (adjacent runs merge, inserts go before an adjacent delete,
//! empty runs vanish), so two operations with the same effect compare
//! equal. Once built they are only read; [`Operation::compose`] and
//! [`Operation::transform`] return new values.
//!
//! Wire form is a JSON array: retain is a positive integer, delete a
//! negative integer, insert a string.
//!
//! ```text
//! [1, "X", 2]     retain 1, insert "X", retain 2
//! [-1, 3]         delete 1, retain 3
//! ```

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CollabError;

/// One run of an [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    /// Keep `n` characters of the base document.
    Retain(usize),
    /// Insert text at the current position.
    Insert(String),
    /// Remove `n` characters of the base document.
    Delete(usize),
}

impl Component {
    /// Number of characters this run covers.
    pub fn len(&self) -> usize {
        match self {
            Component::Retain(n) | Component::Delete(n) => *n,
            Component::Insert(s) => char_len(s),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An immutable, normalised text operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operation {
    components: Vec<Component>,
    base_len: usize,
    target_len: usize,
}

impl Operation {
    /// Empty operation (applies to the empty document).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a retain run.
    pub fn retain(mut self, n: usize) -> Self {
        self.push_retain(n);
        self
    }

    /// Append an insert run.
    pub fn insert(mut self, text: &str) -> Self {
        self.push_insert(text);
        self
    }

    /// Append a delete run.
    pub fn delete(mut self, n: usize) -> Self {
        self.push_delete(n);
        self
    }

    /// Build the operation for a single contiguous edit of a document of
    /// `base_len` characters: `deleted_len` characters removed at `start`
    /// and `inserted` put in their place.
    pub fn from_edit(
        base_len: usize,
        start: usize,
        deleted_len: usize,
        inserted: &str,
    ) -> Result<Self, CollabError> {
        let end = start.checked_add(deleted_len).filter(|end| *end <= base_len).ok_or_else(|| {
            CollabError::InvalidOperation(format!(
                "edit {start}+{deleted_len} exceeds document length {base_len}"
            ))
        })?;

        Ok(Operation::new()
            .retain(start)
            .delete(deleted_len)
            .insert(inserted)
            .retain(base_len - end))
    }

    /// Operation turning `old` into `new`, found by trimming the common
    /// prefix and suffix. Produces at most one delete and one insert.
    pub fn from_diff(old: &str, new: &str) -> Self {
        let old_chars: Vec<char> = old.chars().collect();
        let new_chars: Vec<char> = new.chars().collect();

        let prefix = old_chars
            .iter()
            .zip(&new_chars)
            .take_while(|(a, b)| a == b)
            .count();
        let suffix = old_chars[prefix..]
            .iter()
            .rev()
            .zip(new_chars[prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .count();

        let inserted: String = new_chars[prefix..new_chars.len() - suffix].iter().collect();

        Operation::new()
            .retain(prefix)
            .delete(old_chars.len() - prefix - suffix)
            .insert(&inserted)
            .retain(suffix)
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Length of the document this operation applies to.
    pub fn base_len(&self) -> usize {
        self.base_len
    }

    /// Length of the document this operation produces.
    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// True if applying the operation leaves the document unchanged.
    pub fn is_noop(&self) -> bool {
        self.components
            .iter()
            .all(|c| matches!(c, Component::Retain(_)))
    }

    /// Whether `other` can be composed after `self`.
    pub fn can_merge_with(&self, other: &Operation) -> bool {
        self.target_len == other.base_len
    }

    /// Apply to `text`, returning the transformed text.
    pub fn apply(&self, text: &str) -> Result<String, CollabError> {
        let len = char_len(text);
        if len != self.base_len {
            return Err(CollabError::InvalidOperation(format!(
                "base length {} does not match document length {len}",
                self.base_len
            )));
        }

        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars();
        for component in &self.components {
            match component {
                Component::Retain(n) => out.extend(chars.by_ref().take(*n)),
                Component::Insert(s) => out.push_str(s),
                Component::Delete(n) => {
                    for _ in 0..*n {
                        chars.next();
                    }
                }
            }
        }
        Ok(out)
    }

    /// Compose `self` followed by `other` into one operation with the same
    /// effect as applying them in sequence.
    pub fn compose(&self, other: &Operation) -> Result<Operation, CollabError> {
        if !self.can_merge_with(other) {
            return Err(CollabError::InvalidOperation(format!(
                "cannot compose: target length {} differs from base length {}",
                self.target_len, other.base_len
            )));
        }

        let mut result = Operation::new();
        let mut left = self.components.iter().cloned();
        let mut right = other.components.iter().cloned();
        let mut a = left.next();
        let mut b = right.next();

        loop {
            match (a.take(), b.take()) {
                (None, None) => break,
                (Some(Component::Delete(n)), rest) => {
                    result.push_delete(n);
                    a = left.next();
                    b = rest;
                }
                (rest, Some(Component::Insert(s))) => {
                    result.push_insert(&s);
                    a = rest;
                    b = right.next();
                }
                (None, Some(_)) | (Some(_), None) => {
                    return Err(CollabError::InvalidOperation(
                        "cannot compose: operation lengths disagree".into(),
                    ));
                }
                (Some(Component::Retain(x)), Some(Component::Retain(y))) => {
                    let m = x.min(y);
                    result.push_retain(m);
                    a = advance(Component::Retain(x), m, &mut left);
                    b = advance(Component::Retain(y), m, &mut right);
                }
                (Some(Component::Insert(s)), Some(Component::Delete(y))) => {
                    // Inserted then deleted: nothing survives.
                    let m = char_len(&s).min(y);
                    a = advance(Component::Insert(s), m, &mut left);
                    b = advance(Component::Delete(y), m, &mut right);
                }
                (Some(Component::Insert(s)), Some(Component::Retain(y))) => {
                    let m = char_len(&s).min(y);
                    result.push_insert(split_at_char(&s, m).0);
                    a = advance(Component::Insert(s), m, &mut left);
                    b = advance(Component::Retain(y), m, &mut right);
                }
                (Some(Component::Retain(x)), Some(Component::Delete(y))) => {
                    let m = x.min(y);
                    result.push_delete(m);
                    a = advance(Component::Retain(x), m, &mut left);
                    b = advance(Component::Delete(y), m, &mut right);
                }
            }
        }

        Ok(result)
    }

    /// Transform two concurrent operations with the same base.
    ///
    /// Returns `(a', b')` such that applying `self` then `b'` yields the
    /// same document as applying `other` then `a'`. When both insert at the
    /// same position, `self`'s text ends up first.
    pub fn transform(&self, other: &Operation) -> Result<(Operation, Operation), CollabError> {
        if self.base_len != other.base_len {
            return Err(CollabError::InvalidOperation(format!(
                "cannot transform: base lengths {} and {} differ",
                self.base_len, other.base_len
            )));
        }

        let mut a_prime = Operation::new();
        let mut b_prime = Operation::new();
        let mut left = self.components.iter().cloned();
        let mut right = other.components.iter().cloned();
        let mut a = left.next();
        let mut b = right.next();

        loop {
            match (a.take(), b.take()) {
                (None, None) => break,
                (Some(Component::Insert(s)), rest) => {
                    b_prime.push_retain(char_len(&s));
                    a_prime.push_insert(&s);
                    a = left.next();
                    b = rest;
                }
                (rest, Some(Component::Insert(s))) => {
                    a_prime.push_retain(char_len(&s));
                    b_prime.push_insert(&s);
                    a = rest;
                    b = right.next();
                }
                (None, Some(_)) | (Some(_), None) => {
                    return Err(CollabError::InvalidOperation(
                        "cannot transform: operation lengths disagree".into(),
                    ));
                }
                (Some(Component::Retain(x)), Some(Component::Retain(y))) => {
                    let m = x.min(y);
                    a_prime.push_retain(m);
                    b_prime.push_retain(m);
                    a = advance(Component::Retain(x), m, &mut left);
                    b = advance(Component::Retain(y), m, &mut right);
                }
                (Some(Component::Delete(x)), Some(Component::Delete(y))) => {
                    // Both removed the same characters.
                    let m = x.min(y);
                    a = advance(Component::Delete(x), m, &mut left);
                    b = advance(Component::Delete(y), m, &mut right);
                }
                (Some(Component::Delete(x)), Some(Component::Retain(y))) => {
                    let m = x.min(y);
                    a_prime.push_delete(m);
                    a = advance(Component::Delete(x), m, &mut left);
                    b = advance(Component::Retain(y), m, &mut right);
                }
                (Some(Component::Retain(x)), Some(Component::Delete(y))) => {
                    let m = x.min(y);
                    b_prime.push_delete(m);
                    a = advance(Component::Retain(x), m, &mut left);
                    b = advance(Component::Delete(y), m, &mut right);
                }
            }
        }

        Ok((a_prime, b_prime))
    }

    /// Map a cursor index in the base document to the target document.
    ///
    /// Text inserted exactly at the cursor pushes it to the right.
    pub fn transform_index(&self, index: usize) -> usize {
        let mut remaining = index as isize;
        let mut new_index = index as isize;

        for component in &self.components {
            match component {
                Component::Retain(n) => remaining -= *n as isize,
                Component::Insert(s) => new_index += char_len(s) as isize,
                Component::Delete(n) => {
                    new_index -= remaining.min(*n as isize);
                    remaining -= *n as isize;
                }
            }
            if remaining < 0 {
                break;
            }
        }

        new_index.max(0) as usize
    }

    /// JSON array form.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.components
                .iter()
                .map(|c| match c {
                    Component::Retain(n) => Value::from(*n as u64),
                    Component::Delete(n) => Value::from(-(*n as i64)),
                    Component::Insert(s) => Value::from(s.as_str()),
                })
                .collect(),
        )
    }

    /// Parse the JSON array form.
    pub fn from_json(value: &Value) -> Result<Self, CollabError> {
        Operation::deserialize(value).map_err(|e| CollabError::InvalidOperation(e.to_string()))
    }

    fn push_retain(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.base_len += n;
        self.target_len += n;
        if let Some(Component::Retain(last)) = self.components.last_mut() {
            *last += n;
        } else {
            self.components.push(Component::Retain(n));
        }
    }

    fn push_insert(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.target_len += char_len(text);

        let count = self.components.len();
        if let Some(Component::Insert(last)) = self.components.last_mut() {
            last.push_str(text);
            return;
        }
        if let Some(Component::Delete(_)) = self.components.last() {
            // Keep inserts ahead of deletes so equal edits normalise equally.
            if count >= 2 {
                if let Component::Insert(prev) = &mut self.components[count - 2] {
                    prev.push_str(text);
                    return;
                }
            }
            self.components.insert(count - 1, Component::Insert(text.to_owned()));
            return;
        }
        self.components.push(Component::Insert(text.to_owned()));
    }

    fn push_delete(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.base_len += n;
        if let Some(Component::Delete(last)) = self.components.last_mut() {
            *last += n;
        } else {
            self.components.push(Component::Delete(n));
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.components.len()))?;
        for component in &self.components {
            match component {
                Component::Retain(n) => seq.serialize_element(&(*n as u64))?,
                Component::Delete(n) => seq.serialize_element(&-(*n as i64))?,
                Component::Insert(s) => seq.serialize_element(s)?,
            }
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawComponent {
            Count(i64),
            Text(String),
        }

        let raw = Vec::<RawComponent>::deserialize(deserializer)?;
        let mut op = Operation::new();
        for component in raw {
            match component {
                RawComponent::Count(0) => {
                    return Err(de::Error::custom("zero-length retain/delete component"));
                }
                RawComponent::Count(n) if n > 0 => op.push_retain(n as usize),
                RawComponent::Count(n) => op.push_delete(n.unsigned_abs() as usize),
                RawComponent::Text(s) if s.is_empty() => {
                    return Err(de::Error::custom("empty insert component"));
                }
                RawComponent::Text(s) => op.push_insert(&s),
            }
        }
        Ok(op)
    }
}

/// Remainder of `component` after `consumed` characters, or the next
/// component when it is used up.
fn advance<I: Iterator<Item = Component>>(
    component: Component,
    consumed: usize,
    rest: &mut I,
) -> Option<Component> {
    let remaining = component.len() - consumed;
    if remaining == 0 {
        return rest.next();
    }
    Some(match component {
        Component::Retain(_) => Component::Retain(remaining),
        Component::Delete(_) => Component::Delete(remaining),
        Component::Insert(s) => Component::Insert(split_at_char(&s, consumed).1.to_owned()),
    })
}

fn split_at_char(s: &str, n: usize) -> (&str, &str) {
    match s.char_indices().nth(n) {
        Some((idx, _)) => s.split_at(idx),
        None => (s, ""),
    }
}

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}
