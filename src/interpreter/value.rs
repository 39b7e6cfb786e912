//! Runtime values manipulated by the evaluation engine.
//!
//! Primitives are stored inline; everything else lives behind an [`ObjectRef`],
//! a shared handle whose identity (not contents) defines equality. Objects link
//! to their prototype the same way, so prototype chains are ordinary handle
//! chains and may in principle form cycles.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;

use super::ast::FunctionDecl;
use super::realm::Realm;
use super::scope::Scope;
use super::EvalError;

/// A value produced or consumed by evaluated code.
#[derive(Clone, Default)]
pub enum Value {
    /// The absent value.
    #[default]
    Undefined,
    /// The explicit null value.
    Null,
    /// Boolean primitive.
    Boolean(bool),
    /// IEEE-754 number primitive.
    Number(f64),
    /// String primitive.
    String(String),
    /// Any heap object, including arrays and functions.
    Object(ObjectRef),
}

impl Value {
    /// Build a string value.
    pub fn string(text: impl Into<String>) -> Self {
        Value::String(text.into())
    }

    /// Return the object handle when this value is an object.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Return the string slice when this value is a string primitive.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// True when the value is a callable object.
    pub fn is_callable(&self) -> bool {
        self.as_object().is_some_and(ObjectRef::is_callable)
    }

    /// Truthiness as used by conditions and logical operators.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(flag) => *flag,
            Value::Number(num) => !(num.is_nan() || *num == 0.0),
            Value::String(text) => !text.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// Result of the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(object) if object.is_callable() => "function",
            Value::Object(_) => "object",
        }
    }

    /// Strict (`===`) equality: primitives by value, objects by identity.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Loose (`==`) equality with the usual primitive coercions.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(_), _) => self.to_primitive().loose_equals(other),
            (_, Value::Object(_)) => self.loose_equals(&other.to_primitive()),
            _ => self.to_number() == other.to_number(),
        }
    }

    /// Convert objects to a primitive; primitives are returned unchanged.
    pub fn to_primitive(&self) -> Value {
        let Value::Object(object) = self else {
            return self.clone();
        };
        let boxed = match &object.read().kind {
            ObjectKind::Boxed(primitive) => Some(primitive.to_value()),
            _ => None,
        };
        boxed.unwrap_or_else(|| Value::String(self.to_display_string()))
    }

    /// Numeric conversion (`Number(value)`).
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Boolean(flag) => f64::from(u8::from(*flag)),
            Value::Number(num) => *num,
            Value::String(text) => string_to_number(text),
            Value::Object(_) => self.to_primitive().to_number(),
        }
    }

    /// String conversion (`String(value)`).
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(flag) => flag.to_string(),
            Value::Number(num) => number_to_string(*num),
            Value::String(text) => text.clone(),
            Value::Object(object) => object.to_display_string(&mut Vec::new()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Boolean(flag) => write!(f, "Boolean({flag})"),
            Value::Number(num) => write!(f, "Number({num})"),
            Value::String(text) => write!(f, "String({text:?})"),
            Value::Object(object) => write!(f, "{object:?}"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Boolean(flag)
    }
}

impl From<f64> for Value {
    fn from(num: f64) -> Self {
        Value::Number(num)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Value::Object(object)
    }
}

/// Primitive payload wrapped by a boxed object (`new Number(1)`).
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// Boxed boolean.
    Boolean(bool),
    /// Boxed number.
    Number(f64),
    /// Boxed string.
    String(String),
}

impl Primitive {
    /// Unwrap into a plain value.
    pub fn to_value(&self) -> Value {
        match self {
            Primitive::Boolean(flag) => Value::Boolean(*flag),
            Primitive::Number(num) => Value::Number(*num),
            Primitive::String(text) => Value::String(text.clone()),
        }
    }
}

/// Shared, identity-compared handle to a heap object.
#[derive(Clone)]
pub struct ObjectRef(Arc<RwLock<Object>>);

impl ObjectRef {
    /// Allocate a new object.
    pub fn new(object: Object) -> Self {
        Self(Arc::new(RwLock::new(object)))
    }

    /// Identity key for visited sets.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Shared access to the object.
    pub fn read(&self) -> RwLockReadGuard<'_, Object> {
        self.0.read()
    }

    /// Exclusive access to the object.
    pub fn write(&self) -> RwLockWriteGuard<'_, Object> {
        self.0.write()
    }

    /// The object's prototype, if any.
    pub fn prototype(&self) -> Option<ObjectRef> {
        self.read().prototype.clone()
    }

    /// Replace the object's prototype. No cycle check is performed.
    pub fn set_prototype(&self, prototype: Option<ObjectRef>) {
        self.write().prototype = prototype;
    }

    /// True for function objects.
    pub fn is_callable(&self) -> bool {
        matches!(self.read().kind, ObjectKind::Function(_))
    }

    /// Clone out the function record, if this object is callable.
    pub fn function(&self) -> Option<Function> {
        match &self.read().kind {
            ObjectKind::Function(function) => Some(function.clone()),
            _ => None,
        }
    }

    /// Own property lookup, including virtual properties (indices, `length`, `name`).
    pub fn get_own(&self, key: &str) -> Option<Value> {
        self.read().get_own(key)
    }

    /// Property lookup along the prototype chain. Stops on a revisited
    /// prototype or after [`MAX_PROTOTYPE_DEPTH`] hops.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut visited = Vec::new();
        let mut current = Some(self.clone());
        while let Some(object) = current {
            if visited.contains(&object.id()) || visited.len() >= MAX_PROTOTYPE_DEPTH {
                return None;
            }
            visited.push(object.id());
            if let Some(value) = object.get_own(key) {
                return Some(value);
            }
            current = object.prototype();
        }
        None
    }

    /// True when `key` resolves anywhere on the chain (the `in` operator).
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Assign an own property.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<(), EvalError> {
        self.write().set_own(key.into(), value)
    }

    /// Sorted own property names.
    pub fn own_property_names(&self) -> Vec<String> {
        self.read().own_property_names()
    }

    fn to_display_string(&self, seen: &mut Vec<usize>) -> String {
        if seen.contains(&self.id()) {
            return String::new();
        }
        seen.push(self.id());
        let kind = self.read().kind.clone();
        let text = match kind {
            ObjectKind::Boxed(primitive) => primitive.to_value().to_display_string(),
            ObjectKind::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Undefined | Value::Null => String::new(),
                    Value::Object(object) => object.to_display_string(seen),
                    other => other.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            ObjectKind::Function(function) => function.source,
            ObjectKind::Error => {
                let name = self
                    .get("name")
                    .map(|v| v.to_display_string())
                    .unwrap_or_else(|| "Error".to_string());
                let message = self
                    .get("message")
                    .map(|v| v.to_display_string())
                    .unwrap_or_default();
                if message.is_empty() {
                    name
                } else {
                    format!("{name}: {message}")
                }
            }
            ObjectKind::Ordinary => "[object Object]".to_string(),
        };
        seen.pop();
        text
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.0.try_read() {
            Some(guard) => guard.kind.label(),
            None => "locked",
        };
        write!(f, "Object({kind}@{:#x})", self.id())
    }
}

/// Upper bound on prototype hops for every chain walk.
pub const MAX_PROTOTYPE_DEPTH: usize = 1024;

/// Largest array length the engine materialises. Arrays are stored densely,
/// so longer lengths are rejected with a `RangeError`.
pub const MAX_ARRAY_LENGTH: usize = 1 << 22;

/// Largest string, in bytes, that concatenation may produce.
pub const MAX_STRING_LENGTH: usize = 1 << 28;

/// Validate a requested array length.
pub fn array_length(len: f64) -> Result<usize, EvalError> {
    if len < 0.0 || len.fract() != 0.0 || len > MAX_ARRAY_LENGTH as f64 {
        return Err(EvalError::Range("Invalid array length".to_string()));
    }
    Ok(len as usize)
}

/// Fail with a `RangeError` when a string of `len` bytes would be too long.
pub fn check_string_length(len: usize) -> Result<(), EvalError> {
    if len > MAX_STRING_LENGTH {
        return Err(EvalError::Range("Invalid string length".to_string()));
    }
    Ok(())
}

/// Intrinsic shape of an object.
#[derive(Clone)]
pub enum ObjectKind {
    /// Plain object.
    Ordinary,
    /// Dense array.
    Array(Vec<Value>),
    /// Callable object.
    Function(Function),
    /// Boxed primitive.
    Boxed(Primitive),
    /// Error instance (`name`/`message` live in properties).
    Error,
}

impl ObjectKind {
    fn label(&self) -> &'static str {
        match self {
            ObjectKind::Ordinary => "ordinary",
            ObjectKind::Array(_) => "array",
            ObjectKind::Function(_) => "function",
            ObjectKind::Boxed(_) => "boxed",
            ObjectKind::Error => "error",
        }
    }
}

/// Heap object: intrinsic kind, own properties and prototype link.
#[derive(Clone)]
pub struct Object {
    /// Intrinsic shape.
    pub kind: ObjectKind,
    /// Own, insertion-ordered properties.
    pub properties: PropertyMap,
    /// Prototype link.
    pub prototype: Option<ObjectRef>,
}

impl Object {
    /// Create an object with the given kind and prototype.
    pub fn new(kind: ObjectKind, prototype: Option<ObjectRef>) -> Self {
        Self {
            kind,
            properties: PropertyMap::default(),
            prototype,
        }
    }

    fn get_own(&self, key: &str) -> Option<Value> {
        match &self.kind {
            ObjectKind::Array(items) => {
                if key == "length" {
                    return Some(Value::Number(items.len() as f64));
                }
                if let Some(index) = array_index(key) {
                    return items.get(index).cloned();
                }
            }
            ObjectKind::Function(function) => match key {
                "length" => return Some(Value::Number(function.arity as f64)),
                "name" => return Some(Value::String(function.name.clone())),
                _ => {}
            },
            ObjectKind::Boxed(Primitive::String(text)) => {
                if key == "length" {
                    return Some(Value::Number(utf16_len(text) as f64));
                }
                if let Some(index) = array_index(key) {
                    return char_at(text, index).map(Value::String);
                }
            }
            _ => {}
        }
        self.properties.get(key).cloned()
    }

    fn set_own(&mut self, key: String, value: Value) -> Result<(), EvalError> {
        match &mut self.kind {
            ObjectKind::Array(items) => {
                if key == "length" {
                    items.resize(array_length(value.to_number())?, Value::Undefined);
                    return Ok(());
                }
                if let Some(index) = array_index(&key) {
                    if index >= items.len() {
                        let len = array_length(index as f64 + 1.0)?;
                        items.resize(len, Value::Undefined);
                    }
                    items[index] = value;
                    return Ok(());
                }
            }
            ObjectKind::Function(function) => {
                if key == "name" {
                    function.name = value.to_display_string();
                    return Ok(());
                }
                if key == "length" {
                    return Ok(());
                }
            }
            _ => {}
        }
        self.properties.insert(key, value);
        Ok(())
    }

    fn own_property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match &self.kind {
            ObjectKind::Array(items) => (0..items.len())
                .map(|i| i.to_string())
                .chain(std::iter::once("length".to_string()))
                .collect(),
            ObjectKind::Function(_) => vec!["length".to_string(), "name".to_string()],
            ObjectKind::Boxed(Primitive::String(text)) => (0..utf16_len(text))
                .map(|i| i.to_string())
                .chain(std::iter::once("length".to_string()))
                .collect(),
            _ => Vec::new(),
        };
        for key in self.properties.keys() {
            if !names.iter().any(|existing| existing == key) {
                names.push(key.clone());
            }
        }
        names.sort();
        names
    }
}

/// Insertion-ordered property storage. Each entry carries an enumerable
/// flag; intrinsic methods and back-references are stored hidden.
#[derive(Clone, Default)]
pub struct PropertyMap {
    entries: Vec<Slot>,
}

#[derive(Clone)]
struct Slot {
    key: String,
    value: Value,
    enumerable: bool,
}

impl PropertyMap {
    /// Look up a property.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.slot(key).map(|slot| &slot.value)
    }

    /// Insert or overwrite a property. New entries are enumerable; an
    /// overwrite keeps the entry's position and flag.
    pub fn insert(&mut self, key: String, value: Value) {
        match self.entries.iter_mut().find(|slot| slot.key == key) {
            Some(slot) => slot.value = value,
            None => self.entries.push(Slot {
                key,
                value,
                enumerable: true,
            }),
        }
    }

    /// Insert or overwrite a non-enumerable property.
    pub fn insert_hidden(&mut self, key: String, value: Value) {
        match self.entries.iter_mut().find(|slot| slot.key == key) {
            Some(slot) => {
                slot.value = value;
                slot.enumerable = false;
            }
            None => self.entries.push(Slot {
                key,
                value,
                enumerable: false,
            }),
        }
    }

    /// Remove a property.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|slot| slot.key == key)?;
        Some(self.entries.remove(index).value)
    }

    /// All property names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|slot| &slot.key)
    }

    /// All entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().map(|slot| (&slot.key, &slot.value))
    }

    /// Enumerable entries in insertion order.
    pub fn enumerable(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries
            .iter()
            .filter(|slot| slot.enumerable)
            .map(|slot| (&slot.key, &slot.value))
    }

    /// True when `key` is present and enumerable.
    pub fn is_enumerable(&self, key: &str) -> bool {
        self.slot(key).is_some_and(|slot| slot.enumerable)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no properties are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn slot(&self, key: &str) -> Option<&Slot> {
        self.entries.iter().find(|slot| slot.key == key)
    }
}

/// Arguments passed to a native function.
pub struct NativeArgs<'a> {
    /// Realm the call executes in.
    pub realm: &'a Realm,
    /// The receiver (`this`).
    pub this: &'a Value,
    /// Positional arguments.
    pub args: &'a [Value],
    /// True when invoked through `new`.
    pub construct: bool,
}

impl NativeArgs<'_> {
    /// Positional argument or `undefined`.
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }
}

/// Signature of built-in functions.
pub type NativeFn = fn(NativeArgs<'_>) -> Result<Value, EvalError>;

/// Operations that reach outside the realm into the hosting context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelOp {
    /// `$$.async()`
    Async,
    /// `$$.sendResult(value)`
    SendResult,
    /// `$$.sendError(error)`
    SendError,
    /// `$$.done(value)`
    Done,
    /// `$$.request(payload)`
    Request,
    /// `console.log(...)`
    ConsoleLog,
}

/// Executable part of a function.
#[derive(Clone)]
pub enum FunctionBody {
    /// Built-in implemented in Rust.
    Native(NativeFn),
    /// Host-provided operation executed by the evaluator.
    Kernel(KernelOp),
    /// Script function closing over its defining scope.
    Script {
        /// Parsed declaration.
        decl: Arc<FunctionDecl>,
        /// Scope captured at creation.
        scope: Scope,
    },
}

/// Function record stored inside a callable object.
#[derive(Clone)]
pub struct Function {
    /// Function name (empty for anonymous functions).
    pub name: String,
    /// Declared parameter count.
    pub arity: usize,
    /// Source text returned by `toString`.
    pub source: String,
    /// Behaviour.
    pub body: FunctionBody,
}

impl Function {
    /// Describe a native function.
    pub fn native(name: &str, arity: usize, body: NativeFn) -> Self {
        Self {
            name: name.to_string(),
            arity,
            source: format!("function {name}() {{ [native code] }}"),
            body: FunctionBody::Native(body),
        }
    }

    /// Describe a host operation.
    pub fn kernel(name: &str, arity: usize, op: KernelOp) -> Self {
        Self {
            name: name.to_string(),
            arity,
            source: format!("function {name}() {{ [native code] }}"),
            body: FunctionBody::Kernel(op),
        }
    }
}

/// Canonical array index for a property key.
pub fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Length in UTF-16 code units, as reported by `"...".length`.
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

fn char_at(text: &str, index: usize) -> Option<String> {
    let unit = *text.encode_utf16().collect::<Vec<_>>().get(index)?;
    Some(String::from_utf16_lossy(&[unit]))
}

/// Number-to-string conversion following the JavaScript rules.
pub fn number_to_string(num: f64) -> String {
    if num.is_nan() {
        return "NaN".to_string();
    }
    if num.is_infinite() {
        return if num > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if num == 0.0 {
        return "0".to_string();
    }
    let magnitude = num.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let text = format!("{num:e}");
        return match text.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => text,
        };
    }
    format!("{num}")
}

fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    if trimmed
        .chars()
        .any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
    {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_limits() {
        assert_eq!(array_length(0.0), Ok(0));
        assert_eq!(array_length(MAX_ARRAY_LENGTH as f64), Ok(MAX_ARRAY_LENGTH));
        for bad in [-1.0, 1.5, f64::NAN, f64::INFINITY, 4294967295.0] {
            assert!(matches!(array_length(bad), Err(EvalError::Range(_))), "{bad}");
        }
        assert!(check_string_length(MAX_STRING_LENGTH).is_ok());
        assert_eq!(
            check_string_length(MAX_STRING_LENGTH + 1),
            Err(EvalError::Range("Invalid string length".into()))
        );
    }

    #[test]
    fn number_formatting_matches_script_rules() {
        assert_eq!(number_to_string(2.0), "2");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn string_conversion_to_number() {
        assert_eq!(Value::string(" 42 ").to_number(), 42.0);
        assert_eq!(Value::string("").to_number(), 0.0);
        assert_eq!(Value::string("0x10").to_number(), 16.0);
        assert!(Value::string("abc").to_number().is_nan());
    }

    #[test]
    fn array_properties_are_virtual() {
        let array = ObjectRef::new(Object::new(
            ObjectKind::Array(vec![Value::Number(1.0), Value::Number(2.0)]),
            None,
        ));
        assert_eq!(array.get_own("length"), Some(Value::Number(2.0)));
        array.set("3", Value::Boolean(true)).unwrap();
        assert_eq!(array.get_own("length"), Some(Value::Number(4.0)));
        assert_eq!(array.own_property_names(), vec!["0", "1", "2", "3", "length"]);
    }

    #[test]
    fn hidden_properties_stay_hidden_on_overwrite() {
        let mut map = PropertyMap::default();
        map.insert_hidden("constructor".into(), Value::Null);
        map.insert("a".into(), Value::Number(1.0));
        map.insert("constructor".into(), Value::Boolean(true));
        assert!(!map.is_enumerable("constructor"));
        assert_eq!(map.get("constructor"), Some(&Value::Boolean(true)));
        let visible: Vec<&String> = map.enumerable().map(|(k, _)| k).collect();
        assert_eq!(visible, vec!["a"]);
    }

    #[test]
    fn identity_equality_for_objects() {
        let a = ObjectRef::new(Object::new(ObjectKind::Ordinary, None));
        let b = ObjectRef::new(Object::new(ObjectKind::Ordinary, None));
        assert_eq!(Value::Object(a.clone()), Value::Object(a.clone()));
        assert_ne!(Value::Object(a), Value::Object(b));
    }

    #[test]
    fn chain_lookup_survives_cycles() {
        let a = ObjectRef::new(Object::new(ObjectKind::Ordinary, None));
        let b = ObjectRef::new(Object::new(ObjectKind::Ordinary, Some(a.clone())));
        a.set_prototype(Some(b.clone()));
        assert_eq!(b.get("missing"), None);
    }
}
