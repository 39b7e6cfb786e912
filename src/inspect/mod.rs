//! Value introspection for `inspect` and `getAllPropertyNames` requests.
//!
//! Values are first classified into a closed [`ValueKind`]; primitives and
//! functions have fixed answers, everything else walks its prototype chain.
//! Every chain walk is bounded by an identity-keyed visited set and by
//! [`MAX_PROTOTYPE_DEPTH`], so cyclic chains terminate.

/// `util.inspect`-style rendering.
pub mod render;

pub use render::{DEFAULT_DEPTH, render};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::interpreter::Realm;
use crate::interpreter::value::{MAX_PROTOTYPE_DEPTH, ObjectKind, ObjectRef, Value};

/// Classification of a value, decided before any other inspection work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean primitive.
    Boolean,
    /// Number primitive.
    Number,
    /// String primitive.
    String,
    /// Callable object.
    Function,
    /// Any other object.
    Object,
}

impl ValueKind {
    /// Classify a value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Undefined => ValueKind::Undefined,
            Value::Null => ValueKind::Null,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Object(object) if object.is_callable() => ValueKind::Function,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// Constructor chain reported for kinds that are not walked.
    pub fn fixed_constructors(self) -> Option<&'static [&'static str]> {
        match self {
            ValueKind::Boolean => Some(&["Boolean", "Object"]),
            ValueKind::Number => Some(&["Number", "Object"]),
            ValueKind::String => Some(&["String", "Object"]),
            ValueKind::Function => Some(&["Function", "Object"]),
            ValueKind::Undefined | ValueKind::Null | ValueKind::Object => None,
        }
    }
}

/// Structured description sent in response to an `inspect` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    /// Text rendering of the value.
    pub string: String,
    /// Classification name (`String`, `Function`, nearest constructor, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Constructor names from the nearest prototype to the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor_list: Option<Vec<String>>,
    /// Length, for strings, functions and objects exposing a countable `length`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

/// Describe a value.
pub fn classify(value: &Value) -> Inspection {
    classify_with_value_of(value, None)
}

/// Describe a value whose `valueOf` has already been called. An object's
/// `string` renders `value_of` when it is given.
pub fn classify_with_value_of(value: &Value, value_of: Option<&Value>) -> Inspection {
    let kind = ValueKind::of(value);
    let fixed = kind
        .fixed_constructors()
        .map(|names| names.iter().map(|name| name.to_string()).collect());
    match (kind, value) {
        (ValueKind::Undefined, _) => Inspection {
            string: "undefined".to_string(),
            kind: "Undefined".to_string(),
            constructor_list: None,
            length: None,
        },
        (ValueKind::Null, _) => Inspection {
            string: "null".to_string(),
            kind: "Null".to_string(),
            constructor_list: None,
            length: None,
        },
        (ValueKind::Boolean, _) | (ValueKind::Number, _) => Inspection {
            string: render(value, DEFAULT_DEPTH),
            kind: if kind == ValueKind::Boolean {
                "Boolean"
            } else {
                "Number"
            }
            .to_string(),
            constructor_list: fixed,
            length: None,
        },
        (ValueKind::String, Value::String(text)) => Inspection {
            string: text.clone(),
            kind: "String".to_string(),
            constructor_list: fixed,
            length: Some(text.encode_utf16().count() as u64),
        },
        (ValueKind::Function, Value::Object(object)) => Inspection {
            string: object.function().map(|f| f.source).unwrap_or_default(),
            kind: "Function".to_string(),
            constructor_list: fixed,
            length: countable_length(object),
        },
        (_, Value::Object(object)) => {
            let constructors = constructor_list(object);
            Inspection {
                string: match value_of {
                    Some(primitive) => render(primitive, DEFAULT_DEPTH),
                    None => value_of_rendering(object),
                },
                kind: constructors.first().cloned().unwrap_or_default(),
                constructor_list: Some(constructors),
                length: countable_length(object),
            }
        }
        (_, other) => Inspection {
            string: render(other, DEFAULT_DEPTH),
            kind: String::new(),
            constructor_list: None,
            length: None,
        },
    }
}

/// Constructor names along the prototype chain, nearest first. The walk
/// ends at a prototype without a truthy `constructor`, at the chain's end,
/// or on a revisited prototype.
pub fn constructor_list(object: &ObjectRef) -> Vec<String> {
    let mut names = Vec::new();
    let mut visited = Vec::new();
    let mut cursor = object.prototype();
    while let Some(prototype) = cursor {
        if visited.contains(&prototype.id()) || visited.len() >= MAX_PROTOTYPE_DEPTH {
            break;
        }
        visited.push(prototype.id());
        let constructor = match prototype.get("constructor") {
            Some(constructor) if constructor.truthy() => constructor,
            _ => break,
        };
        let name = constructor
            .as_object()
            .and_then(|object| object.get("name"))
            .and_then(|name| name.as_str().map(str::to_string))
            .unwrap_or_default();
        names.push(name);
        cursor = prototype.prototype();
    }
    names
}

/// Property names reachable from a value: each level's own names sorted,
/// levels visited from the value (or its primitive's prototype) to the root,
/// duplicates dropped in favour of the first occurrence.
pub fn property_names(realm: &Realm, value: &Value) -> Vec<String> {
    let start = match ValueKind::of(value) {
        ValueKind::Undefined | ValueKind::Null => return Vec::new(),
        ValueKind::Boolean | ValueKind::Number | ValueKind::String => {
            realm.primitive_prototype(value)
        }
        ValueKind::Function | ValueKind::Object => value.as_object().cloned(),
    };

    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut visited = Vec::new();
    let mut cursor = start;
    while let Some(object) = cursor {
        if visited.contains(&object.id()) || visited.len() >= MAX_PROTOTYPE_DEPTH {
            break;
        }
        visited.push(object.id());
        for name in object.own_property_names() {
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }
        cursor = object.prototype();
    }
    names
}

fn value_of_rendering(object: &ObjectRef) -> String {
    let boxed = match &object.read().kind {
        ObjectKind::Boxed(primitive) => Some(primitive.to_value()),
        _ => None,
    };
    let has_value_of = object.get("valueOf").is_some_and(|v| v.is_callable());
    match boxed {
        Some(primitive) if has_value_of => render(&primitive, DEFAULT_DEPTH),
        _ => render(&Value::Object(object.clone()), DEFAULT_DEPTH),
    }
}

fn countable_length(object: &ObjectRef) -> Option<u64> {
    match object.get("length")? {
        Value::Number(len) if len >= 0.0 && len.fract() == 0.0 && len <= u64::MAX as f64 => {
            Some(len as u64)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::value::{Function, Object};
    use proptest::prelude::*;
    use serde_json::json;

    fn noop(_: crate::interpreter::value::NativeArgs<'_>) -> crate::interpreter::Result<Value> {
        Ok(Value::Undefined)
    }

    #[test]
    fn string_inspection_matches_wire_shape() {
        let inspection = classify(&Value::string("hello"));
        assert_eq!(
            serde_json::to_value(&inspection).unwrap(),
            json!({
                "string": "hello",
                "type": "String",
                "constructorList": ["String", "Object"],
                "length": 5
            })
        );
    }

    #[test]
    fn primitive_table() {
        let realm = Realm::new();
        let function = Value::Object(realm.new_function(Function::native("f", 2, noop)));
        let cases: Vec<(Value, &str, Option<Vec<&str>>)> = vec![
            (Value::Undefined, "Undefined", None),
            (Value::Null, "Null", None),
            (Value::Boolean(true), "Boolean", Some(vec!["Boolean", "Object"])),
            (Value::Boolean(false), "Boolean", Some(vec!["Boolean", "Object"])),
            (Value::Number(0.0), "Number", Some(vec!["Number", "Object"])),
            (Value::string(""), "String", Some(vec!["String", "Object"])),
            (function, "Function", Some(vec!["Function", "Object"])),
        ];
        for (value, kind, constructors) in cases {
            let inspection = classify(&value);
            assert_eq!(inspection.kind, kind);
            assert_eq!(
                inspection.constructor_list,
                constructors.map(|list| list.into_iter().map(String::from).collect())
            );
        }
    }

    #[test]
    fn objects_walk_their_constructor_chain() {
        let realm = Realm::new();
        let array = Value::Object(realm.new_array(vec![Value::Number(1.0), Value::Number(2.0)]));
        let inspection = classify(&array);
        assert_eq!(inspection.kind, "Array");
        assert_eq!(
            inspection.constructor_list,
            Some(vec!["Array".to_string(), "Object".to_string()])
        );
        assert_eq!(inspection.length, Some(2));
        assert_eq!(inspection.string, "[ 1, 2 ]");

        let boxed = Value::Object(realm.boxed(crate::interpreter::Primitive::Number(5.0)));
        assert_eq!(classify(&boxed).string, "5");

        let bare = ObjectRef::new(Object::new(ObjectKind::Ordinary, None));
        let inspection = classify(&Value::Object(bare));
        assert_eq!(inspection.kind, "");
        assert_eq!(inspection.constructor_list, Some(Vec::new()));
    }

    #[test]
    fn boolean_names_come_from_both_prototypes() {
        let realm = Realm::new();
        let names = property_names(&realm, &Value::Boolean(true));
        assert_eq!(
            names,
            vec![
                "constructor",
                "toString",
                "valueOf",
                "hasOwnProperty",
                "isPrototypeOf"
            ]
        );
        assert!(property_names(&realm, &Value::Null).is_empty());
    }

    #[test]
    fn cyclic_prototype_chains_terminate() {
        let a = ObjectRef::new(Object::new(ObjectKind::Ordinary, None));
        let b = ObjectRef::new(Object::new(ObjectKind::Ordinary, Some(a.clone())));
        a.set_prototype(Some(b.clone()));
        a.set("x", Value::Number(1.0)).unwrap();
        b.set("y", Value::Number(2.0)).unwrap();

        let realm = Realm::new();
        assert_eq!(property_names(&realm, &Value::Object(a.clone())), vec!["x", "y"]);
        assert!(constructor_list(&a).is_empty());
    }

    fn arb_primitive() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Undefined),
            Just(Value::Null),
            any::<bool>().prop_map(Value::Boolean),
            any::<f64>().prop_map(Value::Number),
            ".{0,12}".prop_map(Value::String),
        ]
    }

    proptest! {
        #[test]
        fn primitives_never_walk_a_chain(value in arb_primitive()) {
            let inspection = classify(&value);
            let kind = ValueKind::of(&value);
            prop_assert_eq!(
                inspection.constructor_list,
                kind.fixed_constructors()
                    .map(|names| names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
            );
        }

        #[test]
        fn property_names_are_unique(
            levels in proptest::collection::vec(
                proptest::collection::vec("[a-e]{1,2}", 0..6), 1..6),
            close_cycle in any::<bool>(),
        ) {
            let realm = Realm::new();
            let objects: Vec<ObjectRef> = levels
                .iter()
                .map(|keys| {
                    let object = realm.new_object();
                    for key in keys {
                        object.set(key.clone(), Value::Null).unwrap();
                    }
                    object
                })
                .collect();
            for pair in objects.windows(2) {
                pair[0].set_prototype(Some(pair[1].clone()));
            }
            if close_cycle {
                if let Some(last) = objects.last() {
                    last.set_prototype(Some(objects[0].clone()));
                }
            }
            let names = property_names(&realm, &Value::Object(objects[0].clone()));
            let unique: HashSet<&String> = names.iter().collect();
            prop_assert_eq!(unique.len(), names.len());
            let chain = constructor_list(&objects[0]);
            prop_assert!(chain.len() <= objects.len() + 1);
        }
    }
}
