// Copyright 2025 Neo4j Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Loosely-typed object trees for APIs the operator has no typed bindings for.
//!
//! A [`Generic`] tree only ever holds strings, `f64` numbers, booleans, null, lists and
//! string-keyed maps. Internal records cross into it through [`ToGeneric`]: integers are
//! widened to `f64` and string-to-string maps become generic maps. When the tree is
//! rendered for the wire, integral numbers are written without a fractional part so that
//! the API server can decode them into integer fields.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Generic {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Generic>),
    Map(BTreeMap<String, Generic>),
}

/// Largest integer magnitude an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

impl Generic {
    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Generic)>,
        K: Into<String>,
    {
        Generic::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn get(&self, key: &str) -> Option<&Generic> {
        match self {
            Generic::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Walks a `/`-free dotted path such as `spec.to.weight`.
    pub fn pointer(&self, path: &str) -> Option<&Generic> {
        path.split('.').try_fold(self, |node, key| node.get(key))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Generic) -> bool {
        match self {
            Generic::Map(m) => {
                m.insert(key.into(), value);
                true
            }
            _ => false,
        }
    }

    /// Visits every node of the tree, depth first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Generic)) {
        visit(self);
        match self {
            Generic::List(items) => {
                for item in items {
                    item.walk(&mut *visit);
                }
            }
            Generic::Map(m) => {
                for value in m.values() {
                    value.walk(&mut *visit);
                }
            }
            _ => {}
        }
    }

    pub fn to_wire_json(&self) -> serde_json::Value {
        match self {
            Generic::Null => serde_json::Value::Null,
            Generic::Bool(b) => serde_json::Value::Bool(*b),
            Generic::Number(n) => wire_number(*n),
            Generic::String(s) => serde_json::Value::String(s.clone()),
            Generic::List(items) => {
                serde_json::Value::Array(items.iter().map(Generic::to_wire_json).collect())
            }
            Generic::Map(m) => serde_json::Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_wire_json()))
                    .collect(),
            ),
        }
    }
}

fn wire_number(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Conversion of an internal record into the generic value universe.
pub trait ToGeneric {
    fn to_generic(&self) -> Generic;
}

impl ToGeneric for Generic {
    fn to_generic(&self) -> Generic {
        self.clone()
    }
}

impl ToGeneric for str {
    fn to_generic(&self) -> Generic {
        Generic::String(self.to_owned())
    }
}

impl ToGeneric for String {
    fn to_generic(&self) -> Generic {
        Generic::String(self.clone())
    }
}

impl ToGeneric for bool {
    fn to_generic(&self) -> Generic {
        Generic::Bool(*self)
    }
}

impl ToGeneric for f64 {
    fn to_generic(&self) -> Generic {
        Generic::Number(*self)
    }
}

macro_rules! integer_to_generic {
    ($($t:ty),*) => {
        $(
            impl ToGeneric for $t {
                fn to_generic(&self) -> Generic {
                    Generic::Number(f64::from(*self))
                }
            }
        )*
    };
}

integer_to_generic!(i8, i16, i32, u8, u16, u32);

impl ToGeneric for i64 {
    #[allow(clippy::cast_precision_loss)]
    fn to_generic(&self) -> Generic {
        Generic::Number(*self as f64)
    }
}

impl<T: ToGeneric> ToGeneric for Option<T> {
    fn to_generic(&self) -> Generic {
        self.as_ref().map(ToGeneric::to_generic).unwrap_or(Generic::Null)
    }
}

impl<T: ToGeneric> ToGeneric for Vec<T> {
    fn to_generic(&self) -> Generic {
        Generic::List(self.iter().map(ToGeneric::to_generic).collect())
    }
}

impl<V: ToGeneric> ToGeneric for BTreeMap<String, V> {
    fn to_generic(&self) -> Generic {
        Generic::Map(
            self.iter()
                .map(|(k, v)| (k.clone(), v.to_generic()))
                .collect(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_become_floats() {
        assert_eq!(100_i32.to_generic(), Generic::Number(100.0));
        assert_eq!(7687_u16.to_generic(), Generic::Number(7687.0));
        assert_eq!(Some(3_i64).to_generic(), Generic::Number(3.0));
        assert_eq!(None::<i32>.to_generic(), Generic::Null);
    }

    #[test]
    fn test_string_maps_become_generic_maps() {
        let labels: BTreeMap<String, String> =
            [("app".to_owned(), "neo4j".to_owned())].into_iter().collect();

        let Generic::Map(converted) = labels.to_generic() else {
            panic!("labels should convert to a generic map");
        };
        assert_eq!(
            converted.get("app"),
            Some(&Generic::String("neo4j".to_owned()))
        );
    }

    #[test]
    fn test_wire_json_renders_integral_numbers_compactly() {
        let tree = Generic::map([
            ("weight", Generic::Number(100.0)),
            ("ratio", Generic::Number(0.5)),
            ("enabled", Generic::Bool(true)),
        ]);
        let wire = tree.to_wire_json();
        assert_eq!(wire["weight"], serde_json::json!(100));
        assert_eq!(wire["ratio"], serde_json::json!(0.5));
        assert_eq!(wire["enabled"], serde_json::json!(true));
    }

    #[test]
    fn test_pointer_and_walk() {
        let tree = Generic::map([(
            "spec",
            Generic::map([("port", Generic::map([("targetPort", 7474_i32.to_generic())]))]),
        )]);
        assert_eq!(
            tree.pointer("spec.port.targetPort"),
            Some(&Generic::Number(7474.0))
        );
        assert_eq!(tree.pointer("spec.missing"), None);

        let mut nodes = 0;
        tree.walk(&mut |_| nodes += 1);
        assert_eq!(nodes, 4);
    }
}
