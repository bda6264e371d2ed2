// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Typed job attribute set.
//
// The scheduler treats attributes as a pass-through blob except for the few
// it reads (copies, job-name, charset/language, document-format) and the one
// it writes (job-hold-until).  Values keep their IPP value tag so the filter
// options string can be rendered the way legacy filters expect.

use serde::{Deserialize, Serialize};

/// Attribute group an attribute was received in (RFC 8010 §3.5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrGroup {
    Operation,
    Job,
    Document,
}

/// IPP value tag (RFC 8010 §3.5.2), narrowed to what jobs carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueTag {
    Integer,
    Boolean,
    Enum,
    Range,
    Resolution,
    Text,
    Name,
    TextWithLanguage,
    NameWithLanguage,
    Keyword,
    Uri,
    UriScheme,
    Charset,
    NaturalLanguage,
    MimeMediaType,
}

/// Units of a resolution value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionUnits {
    PerInch,
    PerCm,
}

/// One value of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrValue {
    Boolean(bool),
    Integer(i32),
    Range(i32, i32),
    Resolution {
        x: i32,
        y: i32,
        units: ResolutionUnits,
    },
    String(String),
}

/// A named, tagged, possibly multi-valued attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub group: AttrGroup,
    pub tag: ValueTag,
    pub values: Vec<AttrValue>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, group: AttrGroup, tag: ValueTag, value: AttrValue) -> Self {
        Self {
            name: name.into(),
            group,
            tag,
            values: vec![value],
        }
    }

    pub fn keyword(name: impl Into<String>, group: AttrGroup, value: impl Into<String>) -> Self {
        Self::new(name, group, ValueTag::Keyword, AttrValue::String(value.into()))
    }

    pub fn integer(name: impl Into<String>, group: AttrGroup, value: i32) -> Self {
        Self::new(name, group, ValueTag::Integer, AttrValue::Integer(value))
    }

    pub fn boolean(name: impl Into<String>, group: AttrGroup, value: bool) -> Self {
        Self::new(name, group, ValueTag::Boolean, AttrValue::Boolean(value))
    }

    /// Append another value (1setOf).
    pub fn with_value(mut self, value: AttrValue) -> Self {
        self.values.push(value);
        self
    }

    /// First value as a string, if it is one.
    pub fn first_string(&self) -> Option<&str> {
        match self.values.first() {
            Some(AttrValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// First value as an integer, if it is one.
    pub fn first_integer(&self) -> Option<i32> {
        match self.values.first() {
            Some(AttrValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }
}

/// Ordered attribute list. Names are unique; `set` replaces in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSet {
    attributes: Vec<Attribute>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the first attribute with the given name.
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Read the named attribute's first value as a string.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Attribute::first_string)
    }

    /// Read the named attribute's first value as an integer.
    pub fn get_integer(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(Attribute::first_integer)
    }

    /// Insert or replace an attribute, keeping the original position on
    /// replacement.
    pub fn set(&mut self, attribute: Attribute) {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Attribute> {
        let idx = self.attributes.iter().position(|a| a.name == name)?;
        Some(self.attributes.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl FromIterator<Attribute> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut set = Self::new();
        for attr in iter {
            set.set(attr);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_in_place() {
        let mut attrs = AttributeSet::new();
        attrs.set(Attribute::keyword("media", AttrGroup::Job, "a4"));
        attrs.set(Attribute::integer("copies", AttrGroup::Job, 2));
        attrs.set(Attribute::keyword("media", AttrGroup::Job, "letter"));

        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.iter().next().map(|a| a.name.as_str()), Some("media"));
        assert_eq!(attrs.get_string("media"), Some("letter"));
    }

    #[test]
    fn typed_getters_ignore_mismatched_values() {
        let attrs: AttributeSet = [
            Attribute::integer("copies", AttrGroup::Job, 3),
            Attribute::keyword("sides", AttrGroup::Job, "one-sided"),
        ]
        .into_iter()
        .collect();

        assert_eq!(attrs.get_integer("copies"), Some(3));
        assert_eq!(attrs.get_string("copies"), None);
        assert_eq!(attrs.get_integer("sides"), None);
    }

    #[test]
    fn json_roundtrip_keeps_tags() {
        let mut attrs = AttributeSet::new();
        attrs.set(Attribute::new(
            "printer-resolution",
            AttrGroup::Job,
            ValueTag::Resolution,
            AttrValue::Resolution {
                x: 600,
                y: 600,
                units: ResolutionUnits::PerInch,
            },
        ));
        let json = serde_json::to_string(&attrs).expect("serialize");
        let back: AttributeSet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, attrs);
    }
}
