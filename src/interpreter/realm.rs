//! Intrinsic objects and global bindings for one evaluation context.
//!
//! Every context gets its own realm, so globals declared by one context's
//! code are invisible to another. Prototypes follow the usual shape: each
//! constructor's `prototype` points back through `constructor`, and every
//! chain ends at `Object.prototype`.

use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};

use super::scope::Scope;
use super::value::{
    Function, FunctionBody, KernelOp, NativeArgs, NativeFn, Object, ObjectKind, ObjectRef,
    Primitive, Value, array_index, array_length, check_string_length, number_to_string,
    utf16_len,
};
use super::{EvalError, Result};

/// Intrinsics plus the global scope.
pub struct Realm {
    /// `Object.prototype`
    pub object_prototype: ObjectRef,
    /// `Function.prototype`
    pub function_prototype: ObjectRef,
    /// `Array.prototype`
    pub array_prototype: ObjectRef,
    /// `Boolean.prototype`
    pub boolean_prototype: ObjectRef,
    /// `Number.prototype`
    pub number_prototype: ObjectRef,
    /// `String.prototype`
    pub string_prototype: ObjectRef,
    /// `Error.prototype`
    pub error_prototype: ObjectRef,
    globals: Scope,
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

impl Realm {
    /// Build a fresh realm with all intrinsics installed.
    pub fn new() -> Self {
        let object_prototype = ObjectRef::new(Object::new(ObjectKind::Ordinary, None));
        let function_prototype = ObjectRef::new(Object::new(
            ObjectKind::Function(Function::native("", 0, native_noop)),
            Some(object_prototype.clone()),
        ));
        let with_kind = |kind| ObjectRef::new(Object::new(kind, Some(object_prototype.clone())));

        let realm = Self {
            array_prototype: with_kind(ObjectKind::Array(Vec::new())),
            boolean_prototype: with_kind(ObjectKind::Boxed(Primitive::Boolean(false))),
            number_prototype: with_kind(ObjectKind::Boxed(Primitive::Number(0.0))),
            string_prototype: with_kind(ObjectKind::Boxed(Primitive::String(String::new()))),
            error_prototype: with_kind(ObjectKind::Ordinary),
            object_prototype,
            function_prototype,
            globals: Scope::root(),
        };
        realm.install_intrinsics();
        realm
    }

    /// The global scope shared by every evaluation in this realm.
    pub fn globals(&self) -> &Scope {
        &self.globals
    }

    /// `{}`
    pub fn new_object(&self) -> ObjectRef {
        ObjectRef::new(Object::new(
            ObjectKind::Ordinary,
            Some(self.object_prototype.clone()),
        ))
    }

    /// `[...]`
    pub fn new_array(&self, items: Vec<Value>) -> ObjectRef {
        ObjectRef::new(Object::new(
            ObjectKind::Array(items),
            Some(self.array_prototype.clone()),
        ))
    }

    /// Wrap a function record in a callable object. Script functions also get
    /// a fresh `prototype` object so they can be used with `new`.
    pub fn new_function(&self, function: Function) -> ObjectRef {
        let is_script = matches!(function.body, FunctionBody::Script { .. });
        let object = ObjectRef::new(Object::new(
            ObjectKind::Function(function),
            Some(self.function_prototype.clone()),
        ));
        if is_script {
            let prototype = self.new_object();
            prototype
                .write()
                .properties
                .insert_hidden("constructor".into(), Value::Object(object.clone()));
            object
                .write()
                .properties
                .insert_hidden("prototype".into(), Value::Object(prototype));
        }
        object
    }

    /// `new Error(message)`
    pub fn new_error(&self, message: Option<String>) -> ObjectRef {
        let error = ObjectRef::new(Object::new(
            ObjectKind::Error,
            Some(self.error_prototype.clone()),
        ));
        if let Some(message) = message {
            error
                .write()
                .properties
                .insert_hidden("message".into(), Value::String(message));
        }
        error
    }

    /// `Object(primitive)`
    pub fn boxed(&self, primitive: Primitive) -> ObjectRef {
        let prototype = match primitive {
            Primitive::Boolean(_) => &self.boolean_prototype,
            Primitive::Number(_) => &self.number_prototype,
            Primitive::String(_) => &self.string_prototype,
        };
        ObjectRef::new(Object::new(
            ObjectKind::Boxed(primitive),
            Some(prototype.clone()),
        ))
    }

    /// Prototype consulted for property access on a primitive.
    pub fn primitive_prototype(&self, value: &Value) -> Option<ObjectRef> {
        match value {
            Value::Boolean(_) => Some(self.boolean_prototype.clone()),
            Value::Number(_) => Some(self.number_prototype.clone()),
            Value::String(_) => Some(self.string_prototype.clone()),
            _ => None,
        }
    }

    /// Property read with primitive auto-boxing (`value[key]`).
    pub fn get_property(&self, target: &Value, key: &str) -> Result<Value> {
        match target {
            Value::Undefined | Value::Null => Err(EvalError::Type(format!(
                "Cannot read properties of {} (reading '{}')",
                target.to_display_string(),
                key
            ))),
            Value::Object(object) => Ok(object.get(key).unwrap_or_default()),
            Value::String(text) => {
                if key == "length" {
                    return Ok(Value::Number(utf16_len(text) as f64));
                }
                if let Some(index) = array_index(key) {
                    let units: Vec<u16> = text.encode_utf16().collect();
                    return Ok(units
                        .get(index)
                        .map(|unit| Value::String(String::from_utf16_lossy(&[*unit])))
                        .unwrap_or_default());
                }
                Ok(self.string_prototype.get(key).unwrap_or_default())
            }
            primitive => Ok(self
                .primitive_prototype(primitive)
                .and_then(|prototype| prototype.get(key))
                .unwrap_or_default()),
        }
    }

    /// Property write (`value[key] = v`). Writes to primitives are dropped.
    pub fn set_property(&self, target: &Value, key: &str, value: Value) -> Result<()> {
        match target {
            Value::Undefined | Value::Null => Err(EvalError::Type(format!(
                "Cannot set properties of {} (setting '{}')",
                target.to_display_string(),
                key
            ))),
            Value::Object(object) => object.set(key, value),
            _ => Ok(()),
        }
    }

    /// Convert a JSON document into realm values.
    pub fn from_json(&self, json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(flag) => Value::Boolean(*flag),
            JsonValue::Number(num) => Value::Number(num.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(text) => Value::String(text.clone()),
            JsonValue::Array(items) => Value::Object(
                self.new_array(items.iter().map(|item| self.from_json(item)).collect()),
            ),
            JsonValue::Object(map) => {
                let object = self.new_object();
                {
                    let mut guard = object.write();
                    for (key, item) in map {
                        guard.properties.insert(key.clone(), self.from_json(item));
                    }
                }
                Value::Object(object)
            }
        }
    }

    fn define(&self, target: &ObjectRef, name: &str, value: Value) {
        target.write().properties.insert_hidden(name.to_string(), value);
    }

    fn define_method(&self, target: &ObjectRef, name: &str, arity: usize, body: NativeFn) {
        let function = self.new_function(Function::native(name, arity, body));
        self.define(target, name, Value::Object(function));
    }

    fn define_constructor(
        &self,
        name: &str,
        arity: usize,
        body: NativeFn,
        prototype: &ObjectRef,
    ) -> ObjectRef {
        let constructor = self.new_function(Function::native(name, arity, body));
        self.define(&constructor, "prototype", Value::Object(prototype.clone()));
        self.define(prototype, "constructor", Value::Object(constructor.clone()));
        self.globals.declare(name, Value::Object(constructor.clone()));
        constructor
    }

    fn install_intrinsics(&self) {
        let object = self.define_constructor("Object", 1, object_constructor, &self.object_prototype);
        self.define_method(&object, "create", 1, object_create);
        self.define_method(&object, "getOwnPropertyNames", 1, object_get_own_property_names);
        self.define_method(&object, "getPrototypeOf", 1, object_get_prototype_of);
        self.define_method(&object, "keys", 1, object_keys);
        self.define_method(&object, "setPrototypeOf", 2, object_set_prototype_of);
        let proto = &self.object_prototype;
        self.define_method(proto, "hasOwnProperty", 1, object_has_own_property);
        self.define_method(proto, "isPrototypeOf", 1, object_is_prototype_of);
        self.define_method(proto, "toString", 0, object_to_string);
        self.define_method(proto, "valueOf", 0, object_value_of);

        self.define_constructor("Function", 1, function_constructor, &self.function_prototype);
        self.define_method(&self.function_prototype, "toString", 0, function_to_string);

        let array = self.define_constructor("Array", 1, array_constructor, &self.array_prototype);
        self.define_method(&array, "isArray", 1, array_is_array);
        let proto = &self.array_prototype;
        self.define_method(proto, "concat", 1, array_concat);
        self.define_method(proto, "includes", 1, array_includes);
        self.define_method(proto, "indexOf", 1, array_index_of);
        self.define_method(proto, "join", 1, array_join);
        self.define_method(proto, "pop", 0, array_pop);
        self.define_method(proto, "push", 1, array_push);
        self.define_method(proto, "slice", 2, array_slice);
        self.define_method(proto, "toString", 0, array_to_string);

        self.define_constructor("Boolean", 1, boolean_constructor, &self.boolean_prototype);
        self.define_method(&self.boolean_prototype, "toString", 0, boolean_to_string);
        self.define_method(&self.boolean_prototype, "valueOf", 0, boolean_value_of);

        self.define_constructor("Number", 1, number_constructor, &self.number_prototype);
        self.define_method(&self.number_prototype, "toFixed", 1, number_to_fixed);
        self.define_method(&self.number_prototype, "toString", 1, number_to_string_method);
        self.define_method(&self.number_prototype, "valueOf", 0, number_value_of);

        self.define_constructor("String", 1, string_constructor, &self.string_prototype);
        let proto = &self.string_prototype;
        self.define_method(proto, "charAt", 1, string_char_at);
        self.define_method(proto, "includes", 1, string_includes);
        self.define_method(proto, "indexOf", 1, string_index_of);
        self.define_method(proto, "slice", 2, string_slice);
        self.define_method(proto, "split", 2, string_split);
        self.define_method(proto, "toLowerCase", 0, string_to_lower_case);
        self.define_method(proto, "toString", 0, string_value_of);
        self.define_method(proto, "toUpperCase", 0, string_to_upper_case);
        self.define_method(proto, "trim", 0, string_trim);
        self.define_method(proto, "valueOf", 0, string_value_of);

        self.define_constructor("Error", 1, error_constructor, &self.error_prototype);
        self.define(&self.error_prototype, "name", Value::string("Error"));
        self.define(&self.error_prototype, "message", Value::string(""));
        self.define_method(&self.error_prototype, "toString", 0, error_to_string);

        let math = self.new_object();
        self.define(&math, "PI", Value::Number(std::f64::consts::PI));
        self.define(&math, "E", Value::Number(std::f64::consts::E));
        self.define_method(&math, "abs", 1, math_abs);
        self.define_method(&math, "ceil", 1, math_ceil);
        self.define_method(&math, "floor", 1, math_floor);
        self.define_method(&math, "max", 2, math_max);
        self.define_method(&math, "min", 2, math_min);
        self.define_method(&math, "pow", 2, math_pow);
        self.define_method(&math, "round", 1, math_round);
        self.define_method(&math, "sqrt", 1, math_sqrt);
        self.globals.declare("Math", Value::Object(math));

        let json = self.new_object();
        self.define_method(&json, "parse", 1, json_parse);
        self.define_method(&json, "stringify", 1, json_stringify);
        self.globals.declare("JSON", Value::Object(json));

        let kernel = self.new_object();
        for (name, arity, op) in [
            ("async", 0, KernelOp::Async),
            ("done", 1, KernelOp::Done),
            ("request", 1, KernelOp::Request),
            ("sendError", 1, KernelOp::SendError),
            ("sendResult", 1, KernelOp::SendResult),
        ] {
            let function = self.new_function(Function::kernel(name, arity, op));
            self.define(&kernel, name, Value::Object(function));
        }
        self.globals.declare("$$", Value::Object(kernel));

        let console = self.new_object();
        let log = self.new_function(Function::kernel("log", 0, KernelOp::ConsoleLog));
        self.define(&console, "log", Value::Object(log));
        self.globals.declare("console", Value::Object(console));

        self.globals.declare("NaN", Value::Number(f64::NAN));
        self.globals.declare("Infinity", Value::Number(f64::INFINITY));
    }
}

/// Deepest object nesting `JSON.stringify` descends into.
pub const MAX_JSON_DEPTH: usize = 128;

/// Convert a value into JSON. Functions and `undefined` yield `None`;
/// circular structures are a `TypeError`.
pub fn to_json(value: &Value) -> Result<Option<JsonValue>> {
    to_json_inner(value, &mut Vec::new())
}

fn to_json_inner(value: &Value, stack: &mut Vec<usize>) -> Result<Option<JsonValue>> {
    let object = match value {
        Value::Undefined => return Ok(None),
        Value::Null => return Ok(Some(JsonValue::Null)),
        Value::Boolean(flag) => return Ok(Some(JsonValue::Bool(*flag))),
        Value::Number(num) => {
            return Ok(Some(
                json_number(*num).map_or(JsonValue::Null, JsonValue::Number),
            ));
        }
        Value::String(text) => return Ok(Some(JsonValue::String(text.clone()))),
        Value::Object(object) => object,
    };
    if stack.contains(&object.id()) {
        return Err(EvalError::Type(
            "Converting circular structure to JSON".to_string(),
        ));
    }
    if stack.len() >= MAX_JSON_DEPTH {
        return Err(EvalError::Range(
            "Maximum call stack size exceeded".to_string(),
        ));
    }
    let (kind, properties) = {
        let guard = object.read();
        let properties: Vec<(String, Value)> = guard
            .properties
            .enumerable()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        (guard.kind.clone(), properties)
    };
    stack.push(object.id());
    let result = match kind {
        ObjectKind::Function(_) => None,
        ObjectKind::Boxed(primitive) => to_json_inner(&primitive.to_value(), stack)?,
        ObjectKind::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                out.push(to_json_inner(item, stack)?.unwrap_or(JsonValue::Null));
            }
            Some(JsonValue::Array(out))
        }
        ObjectKind::Ordinary | ObjectKind::Error => {
            let mut map = JsonMap::new();
            for (key, item) in &properties {
                if let Some(json) = to_json_inner(item, stack)? {
                    map.insert(key.clone(), json);
                }
            }
            Some(JsonValue::Object(map))
        }
    };
    stack.pop();
    Ok(result)
}

/// JSON number for a finite float, preferring the integer form.
pub fn json_number(num: f64) -> Option<JsonNumber> {
    if num.fract() == 0.0 && num.abs() < 9_007_199_254_740_992.0 {
        if num == 0.0 {
            return Some(JsonNumber::from(0));
        }
        return Some(JsonNumber::from(num as i64));
    }
    JsonNumber::from_f64(num)
}

fn native_noop(_: NativeArgs<'_>) -> Result<Value> {
    Ok(Value::Undefined)
}

fn this_object(call: &NativeArgs<'_>, method: &str) -> Result<ObjectRef> {
    call.this.as_object().cloned().ok_or_else(|| {
        EvalError::Type(format!(
            "{method} called on {}",
            call.this.to_display_string()
        ))
    })
}

fn this_primitive(call: &NativeArgs<'_>, method: &str, kind: &str) -> Result<Value> {
    let unboxed = match call.this {
        Value::Object(object) => match &object.read().kind {
            ObjectKind::Boxed(primitive) => primitive.to_value(),
            _ => Value::Undefined,
        },
        other => other.clone(),
    };
    if unboxed.type_of() == kind {
        Ok(unboxed)
    } else {
        Err(EvalError::Type(format!(
            "{method} requires that 'this' be a {kind}"
        )))
    }
}

fn this_string(call: &NativeArgs<'_>, method: &str) -> Result<String> {
    match call.this {
        Value::Undefined | Value::Null => Err(EvalError::Type(format!(
            "String.prototype.{method} called on null or undefined"
        ))),
        other => Ok(other.to_primitive().to_display_string()),
    }
}

fn this_array(call: &NativeArgs<'_>, method: &str) -> Result<(ObjectRef, Vec<Value>)> {
    let object = this_object(call, method)?;
    let items = match &object.read().kind {
        ObjectKind::Array(items) => items.clone(),
        _ => {
            return Err(EvalError::Type(format!(
                "Array.prototype.{method} called on non-array"
            )));
        }
    };
    Ok((object, items))
}

fn relative_index(arg: &Value, len: usize, default: usize) -> usize {
    if matches!(arg, Value::Undefined) {
        return default;
    }
    let num = arg.to_number();
    if num.is_nan() {
        return 0;
    }
    let len = len as f64;
    let idx = if num < 0.0 { (len + num).max(0.0) } else { num.min(len) };
    idx.trunc() as usize
}

fn object_constructor(call: NativeArgs<'_>) -> Result<Value> {
    Ok(match call.arg(0) {
        Value::Undefined | Value::Null => Value::Object(call.realm.new_object()),
        Value::Boolean(flag) => Value::Object(call.realm.boxed(Primitive::Boolean(flag))),
        Value::Number(num) => Value::Object(call.realm.boxed(Primitive::Number(num))),
        Value::String(text) => Value::Object(call.realm.boxed(Primitive::String(text))),
        object @ Value::Object(_) => object,
    })
}

fn object_create(call: NativeArgs<'_>) -> Result<Value> {
    let prototype = match call.arg(0) {
        Value::Null => None,
        Value::Object(object) => Some(object),
        other => {
            return Err(EvalError::Type(format!(
                "Object prototype may only be an Object or null: {}",
                other.to_display_string()
            )));
        }
    };
    Ok(Value::Object(ObjectRef::new(Object::new(
        ObjectKind::Ordinary,
        prototype,
    ))))
}

fn object_get_own_property_names(call: NativeArgs<'_>) -> Result<Value> {
    let target = call.arg(0);
    let names = match &target {
        Value::Object(object) => object.own_property_names(),
        Value::String(text) => (0..utf16_len(text))
            .map(|i| i.to_string())
            .chain(std::iter::once("length".to_string()))
            .collect(),
        Value::Undefined | Value::Null => {
            return Err(EvalError::Type(
                "Cannot convert undefined or null to object".to_string(),
            ));
        }
        _ => Vec::new(),
    };
    Ok(Value::Object(call.realm.new_array(
        names.into_iter().map(Value::String).collect(),
    )))
}

fn object_get_prototype_of(call: NativeArgs<'_>) -> Result<Value> {
    let target = call.arg(0);
    let prototype = match &target {
        Value::Object(object) => object.prototype(),
        Value::Undefined | Value::Null => {
            return Err(EvalError::Type(
                "Cannot convert undefined or null to object".to_string(),
            ));
        }
        primitive => call.realm.primitive_prototype(primitive),
    };
    Ok(prototype.map(Value::Object).unwrap_or(Value::Null))
}

fn object_keys(call: NativeArgs<'_>) -> Result<Value> {
    let keys: Vec<Value> = match call.arg(0) {
        Value::Object(object) => {
            let guard = object.read();
            let mut keys: Vec<Value> = match &guard.kind {
                ObjectKind::Array(items) => (0..items.len())
                    .map(|i| Value::String(i.to_string()))
                    .collect(),
                _ => Vec::new(),
            };
            keys.extend(
                guard
                    .properties
                    .enumerable()
                    .map(|(k, _)| Value::String(k.clone())),
            );
            keys
        }
        _ => Vec::new(),
    };
    Ok(Value::Object(call.realm.new_array(keys)))
}

fn object_set_prototype_of(call: NativeArgs<'_>) -> Result<Value> {
    let target = call.arg(0);
    let Value::Object(object) = &target else {
        return Ok(target);
    };
    let prototype = match call.arg(1) {
        Value::Null => None,
        Value::Object(proto) => Some(proto),
        _ => {
            return Err(EvalError::Type(
                "Object prototype may only be an Object or null".to_string(),
            ));
        }
    };
    let mut cursor = prototype.clone();
    let mut hops = 0;
    while let Some(link) = cursor {
        if link.ptr_eq(object) {
            return Err(EvalError::Type("Cyclic __proto__ value".to_string()));
        }
        hops += 1;
        if hops > super::value::MAX_PROTOTYPE_DEPTH {
            break;
        }
        cursor = link.prototype();
    }
    object.set_prototype(prototype);
    Ok(target)
}

fn object_has_own_property(call: NativeArgs<'_>) -> Result<Value> {
    let key = call.arg(0).to_display_string();
    let own = match call.this {
        Value::Object(object) => object.get_own(&key).is_some(),
        Value::String(text) => {
            key == "length" || array_index(&key).is_some_and(|i| i < utf16_len(text))
        }
        _ => false,
    };
    Ok(Value::Boolean(own))
}

fn object_is_prototype_of(call: NativeArgs<'_>) -> Result<Value> {
    let this = this_object(&call, "Object.prototype.isPrototypeOf")?;
    let Value::Object(target) = call.arg(0) else {
        return Ok(Value::Boolean(false));
    };
    let mut cursor = target.prototype();
    let mut hops = 0;
    while let Some(link) = cursor {
        if link.ptr_eq(&this) {
            return Ok(Value::Boolean(true));
        }
        hops += 1;
        if hops > super::value::MAX_PROTOTYPE_DEPTH {
            break;
        }
        cursor = link.prototype();
    }
    Ok(Value::Boolean(false))
}

fn object_to_string(call: NativeArgs<'_>) -> Result<Value> {
    let tag = match call.this {
        Value::Undefined => "Undefined",
        Value::Null => "Null",
        Value::Boolean(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Object(object) => match &object.read().kind {
            ObjectKind::Ordinary => "Object",
            ObjectKind::Array(_) => "Array",
            ObjectKind::Function(_) => "Function",
            ObjectKind::Error => "Error",
            ObjectKind::Boxed(Primitive::Boolean(_)) => "Boolean",
            ObjectKind::Boxed(Primitive::Number(_)) => "Number",
            ObjectKind::Boxed(Primitive::String(_)) => "String",
        },
    };
    Ok(Value::String(format!("[object {tag}]")))
}

fn object_value_of(call: NativeArgs<'_>) -> Result<Value> {
    match call.this {
        Value::Undefined | Value::Null => Err(EvalError::Type(
            "Cannot convert undefined or null to object".to_string(),
        )),
        other => Ok(other.clone()),
    }
}

fn function_constructor(_: NativeArgs<'_>) -> Result<Value> {
    Err(EvalError::Type(
        "Code generation from strings is not supported".to_string(),
    ))
}

fn function_to_string(call: NativeArgs<'_>) -> Result<Value> {
    let object = this_object(&call, "Function.prototype.toString")?;
    object
        .function()
        .map(|function| Value::String(function.source))
        .ok_or_else(|| {
            EvalError::Type("Function.prototype.toString requires that 'this' be a Function".into())
        })
}

fn array_constructor(call: NativeArgs<'_>) -> Result<Value> {
    let items = match call.args {
        [Value::Number(len)] => vec![Value::Undefined; array_length(*len)?],
        args => args.to_vec(),
    };
    Ok(Value::Object(call.realm.new_array(items)))
}

fn array_is_array(call: NativeArgs<'_>) -> Result<Value> {
    let is_array = call
        .arg(0)
        .as_object()
        .is_some_and(|object| matches!(object.read().kind, ObjectKind::Array(_)));
    Ok(Value::Boolean(is_array))
}

fn array_concat(call: NativeArgs<'_>) -> Result<Value> {
    let (_, mut items) = this_array(&call, "concat")?;
    for arg in call.args {
        let spread = match arg {
            Value::Object(object) => match &object.read().kind {
                ObjectKind::Array(inner) => Some(inner.clone()),
                _ => None,
            },
            _ => None,
        };
        let added = spread.as_ref().map_or(1, Vec::len);
        array_length((items.len() + added) as f64)?;
        match spread {
            Some(inner) => items.extend(inner),
            None => items.push(arg.clone()),
        }
    }
    Ok(Value::Object(call.realm.new_array(items)))
}

fn array_includes(call: NativeArgs<'_>) -> Result<Value> {
    let (_, items) = this_array(&call, "includes")?;
    let needle = call.arg(0);
    let found = items.iter().any(|item| match (item, &needle) {
        (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
        (a, b) => a.strict_equals(b),
    });
    Ok(Value::Boolean(found))
}

fn array_index_of(call: NativeArgs<'_>) -> Result<Value> {
    let (_, items) = this_array(&call, "indexOf")?;
    let needle = call.arg(0);
    let index = items
        .iter()
        .position(|item| item.strict_equals(&needle))
        .map_or(-1.0, |i| i as f64);
    Ok(Value::Number(index))
}

fn join_items(items: &[Value], separator: &str) -> String {
    items
        .iter()
        .map(|item| match item {
            Value::Undefined | Value::Null => String::new(),
            other => other.to_display_string(),
        })
        .collect::<Vec<_>>()
        .join(separator)
}

fn array_join(call: NativeArgs<'_>) -> Result<Value> {
    let (_, items) = this_array(&call, "join")?;
    let separator = match call.arg(0) {
        Value::Undefined => ",".to_string(),
        other => other.to_display_string(),
    };
    let separators = separator.len().saturating_mul(items.len().saturating_sub(1));
    check_string_length(separators)?;
    let joined = join_items(&items, &separator);
    check_string_length(joined.len())?;
    Ok(Value::String(joined))
}

fn array_pop(call: NativeArgs<'_>) -> Result<Value> {
    let object = this_object(&call, "Array.prototype.pop")?;
    let mut guard = object.write();
    match &mut guard.kind {
        ObjectKind::Array(items) => Ok(items.pop().unwrap_or_default()),
        _ => Err(EvalError::Type(
            "Array.prototype.pop called on non-array".to_string(),
        )),
    }
}

fn array_push(call: NativeArgs<'_>) -> Result<Value> {
    let object = this_object(&call, "Array.prototype.push")?;
    let mut guard = object.write();
    match &mut guard.kind {
        ObjectKind::Array(items) => {
            array_length((items.len() + call.args.len()) as f64)?;
            items.extend(call.args.iter().cloned());
            Ok(Value::Number(items.len() as f64))
        }
        _ => Err(EvalError::Type(
            "Array.prototype.push called on non-array".to_string(),
        )),
    }
}

fn array_slice(call: NativeArgs<'_>) -> Result<Value> {
    let (_, items) = this_array(&call, "slice")?;
    let start = relative_index(&call.arg(0), items.len(), 0);
    let end = relative_index(&call.arg(1), items.len(), items.len());
    let slice = if start < end {
        items[start..end].to_vec()
    } else {
        Vec::new()
    };
    Ok(Value::Object(call.realm.new_array(slice)))
}

fn array_to_string(call: NativeArgs<'_>) -> Result<Value> {
    let (_, items) = this_array(&call, "toString")?;
    Ok(Value::String(join_items(&items, ",")))
}

fn boolean_constructor(call: NativeArgs<'_>) -> Result<Value> {
    let flag = call.arg(0).truthy();
    if call.construct {
        Ok(Value::Object(call.realm.boxed(Primitive::Boolean(flag))))
    } else {
        Ok(Value::Boolean(flag))
    }
}

fn boolean_to_string(call: NativeArgs<'_>) -> Result<Value> {
    let flag = this_primitive(&call, "Boolean.prototype.toString", "boolean")?;
    Ok(Value::String(flag.to_display_string()))
}

fn boolean_value_of(call: NativeArgs<'_>) -> Result<Value> {
    this_primitive(&call, "Boolean.prototype.valueOf", "boolean")
}

fn number_constructor(call: NativeArgs<'_>) -> Result<Value> {
    let num = if call.args.is_empty() {
        0.0
    } else {
        call.arg(0).to_number()
    };
    if call.construct {
        Ok(Value::Object(call.realm.boxed(Primitive::Number(num))))
    } else {
        Ok(Value::Number(num))
    }
}

fn number_to_fixed(call: NativeArgs<'_>) -> Result<Value> {
    let num = this_primitive(&call, "Number.prototype.toFixed", "number")?.to_number();
    let digits = call.arg(0).to_number();
    let digits = if digits.is_nan() { 0.0 } else { digits.trunc() };
    if !(0.0..=100.0).contains(&digits) {
        return Err(EvalError::Range(
            "toFixed() digits argument must be between 0 and 100".to_string(),
        ));
    }
    if !num.is_finite() {
        return Ok(Value::String(number_to_string(num)));
    }
    Ok(Value::String(format!("{:.*}", digits as usize, num)))
}

fn number_to_string_method(call: NativeArgs<'_>) -> Result<Value> {
    let num = this_primitive(&call, "Number.prototype.toString", "number")?.to_number();
    let radix = match call.arg(0) {
        Value::Undefined => 10.0,
        other => other.to_number(),
    };
    if !(2.0..=36.0).contains(&radix) {
        return Err(EvalError::Range(
            "toString() radix must be between 2 and 36".to_string(),
        ));
    }
    let radix = radix as u32;
    if radix == 10 || !num.is_finite() || num.fract() != 0.0 {
        return Ok(Value::String(number_to_string(num)));
    }
    let mut magnitude = num.abs() as u128;
    let mut digits = Vec::new();
    loop {
        let digit = (magnitude % radix as u128) as u32;
        digits.push(std::char::from_digit(digit, radix).unwrap_or('0'));
        magnitude /= radix as u128;
        if magnitude == 0 {
            break;
        }
    }
    if num < 0.0 {
        digits.push('-');
    }
    Ok(Value::String(digits.into_iter().rev().collect()))
}

fn number_value_of(call: NativeArgs<'_>) -> Result<Value> {
    this_primitive(&call, "Number.prototype.valueOf", "number")
}

fn string_constructor(call: NativeArgs<'_>) -> Result<Value> {
    let text = if call.args.is_empty() {
        String::new()
    } else {
        call.arg(0).to_display_string()
    };
    if call.construct {
        Ok(Value::Object(call.realm.boxed(Primitive::String(text))))
    } else {
        Ok(Value::String(text))
    }
}

fn string_char_at(call: NativeArgs<'_>) -> Result<Value> {
    let text = this_string(&call, "charAt")?;
    let index = call.arg(0).to_number();
    let index = if index.is_nan() { 0.0 } else { index.trunc() };
    if index < 0.0 {
        return Ok(Value::string(""));
    }
    call.realm
        .get_property(&Value::String(text), &(index as usize).to_string())
        .map(|value| match value {
            Value::Undefined => Value::string(""),
            other => other,
        })
}

fn string_includes(call: NativeArgs<'_>) -> Result<Value> {
    let text = this_string(&call, "includes")?;
    let needle = call.arg(0).to_display_string();
    Ok(Value::Boolean(text.contains(&needle)))
}

fn string_index_of(call: NativeArgs<'_>) -> Result<Value> {
    let text = this_string(&call, "indexOf")?;
    let needle = call.arg(0).to_display_string();
    let index = text
        .find(&needle)
        .map_or(-1.0, |byte| utf16_len(&text[..byte]) as f64);
    Ok(Value::Number(index))
}

fn string_slice(call: NativeArgs<'_>) -> Result<Value> {
    let text = this_string(&call, "slice")?;
    let units: Vec<u16> = text.encode_utf16().collect();
    let start = relative_index(&call.arg(0), units.len(), 0);
    let end = relative_index(&call.arg(1), units.len(), units.len());
    let slice = if start < end {
        String::from_utf16_lossy(&units[start..end])
    } else {
        String::new()
    };
    Ok(Value::String(slice))
}

fn string_split(call: NativeArgs<'_>) -> Result<Value> {
    let text = this_string(&call, "split")?;
    let parts: Vec<Value> = match call.arg(0) {
        Value::Undefined => vec![Value::String(text)],
        separator => {
            let separator = separator.to_display_string();
            if separator.is_empty() {
                text.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                text.split(separator.as_str())
                    .map(|part| Value::String(part.to_string()))
                    .collect()
            }
        }
    };
    Ok(Value::Object(call.realm.new_array(parts)))
}

fn string_to_lower_case(call: NativeArgs<'_>) -> Result<Value> {
    Ok(Value::String(this_string(&call, "toLowerCase")?.to_lowercase()))
}

fn string_to_upper_case(call: NativeArgs<'_>) -> Result<Value> {
    Ok(Value::String(this_string(&call, "toUpperCase")?.to_uppercase()))
}

fn string_trim(call: NativeArgs<'_>) -> Result<Value> {
    Ok(Value::String(this_string(&call, "trim")?.trim().to_string()))
}

fn string_value_of(call: NativeArgs<'_>) -> Result<Value> {
    this_primitive(&call, "String.prototype.valueOf", "string")
}

fn error_constructor(call: NativeArgs<'_>) -> Result<Value> {
    let message = match call.arg(0) {
        Value::Undefined => None,
        other => Some(other.to_display_string()),
    };
    Ok(Value::Object(call.realm.new_error(message)))
}

fn error_to_string(call: NativeArgs<'_>) -> Result<Value> {
    let object = this_object(&call, "Error.prototype.toString")?;
    let name = object
        .get("name")
        .map(|v| v.to_display_string())
        .unwrap_or_else(|| "Error".to_string());
    let message = object
        .get("message")
        .map(|v| v.to_display_string())
        .unwrap_or_default();
    Ok(Value::String(match (name.is_empty(), message.is_empty()) {
        (_, true) => name,
        (true, false) => message,
        (false, false) => format!("{name}: {message}"),
    }))
}

fn math_unary(call: &NativeArgs<'_>, op: fn(f64) -> f64) -> Result<Value> {
    Ok(Value::Number(op(call.arg(0).to_number())))
}

fn math_abs(call: NativeArgs<'_>) -> Result<Value> {
    math_unary(&call, f64::abs)
}

fn math_ceil(call: NativeArgs<'_>) -> Result<Value> {
    math_unary(&call, f64::ceil)
}

fn math_floor(call: NativeArgs<'_>) -> Result<Value> {
    math_unary(&call, f64::floor)
}

fn math_round(call: NativeArgs<'_>) -> Result<Value> {
    math_unary(&call, |x| (x + 0.5).floor())
}

fn math_sqrt(call: NativeArgs<'_>) -> Result<Value> {
    math_unary(&call, f64::sqrt)
}

fn math_pow(call: NativeArgs<'_>) -> Result<Value> {
    Ok(Value::Number(
        call.arg(0).to_number().powf(call.arg(1).to_number()),
    ))
}

fn math_max(call: NativeArgs<'_>) -> Result<Value> {
    let mut best = f64::NEG_INFINITY;
    for arg in call.args {
        let num = arg.to_number();
        if num.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        best = best.max(num);
    }
    Ok(Value::Number(best))
}

fn math_min(call: NativeArgs<'_>) -> Result<Value> {
    let mut best = f64::INFINITY;
    for arg in call.args {
        let num = arg.to_number();
        if num.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        best = best.min(num);
    }
    Ok(Value::Number(best))
}

fn json_parse(call: NativeArgs<'_>) -> Result<Value> {
    let text = call.arg(0).to_display_string();
    let json: JsonValue = serde_json::from_str(&text)
        .map_err(|err| EvalError::Syntax(format!("JSON.parse: {err}")))?;
    Ok(call.realm.from_json(&json))
}

fn json_stringify(call: NativeArgs<'_>) -> Result<Value> {
    Ok(match to_json(&call.arg(0))? {
        Some(json) => Value::String(json.to_string()),
        None => Value::Undefined,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stringify_stops_at_the_nesting_limit() {
        let realm = Realm::new();
        let mut value = Value::Object(realm.new_object());
        for _ in 0..MAX_JSON_DEPTH - 1 {
            value = Value::Object(realm.new_array(vec![value]));
        }
        assert!(to_json(&value).unwrap().is_some());

        let value = Value::Object(realm.new_array(vec![value]));
        assert_eq!(
            to_json(&value),
            Err(EvalError::Range("Maximum call stack size exceeded".into()))
        );
    }

    #[test]
    fn constructors_link_back_to_prototypes() {
        let realm = Realm::new();
        let constructor = realm
            .boolean_prototype
            .get("constructor")
            .and_then(|v| v.as_object().cloned())
            .expect("constructor");
        assert_eq!(constructor.function().map(|f| f.name), Some("Boolean".into()));
        assert!(realm
            .boolean_prototype
            .prototype()
            .is_some_and(|p| p.ptr_eq(&realm.object_prototype)));
    }

    #[test]
    fn native_functions_have_no_prototype_object() {
        let realm = Realm::new();
        let function = realm.new_function(Function::native("f", 0, native_noop));
        assert!(function.get_own("prototype").is_none());
    }

    #[test]
    fn json_conversion_skips_functions_and_detects_cycles() {
        let realm = Realm::new();
        let object = realm.new_object();
        object.set("a", Value::Number(1.0)).unwrap();
        object
            .set(
                "f",
                Value::Object(realm.new_function(Function::native("f", 0, native_noop))),
            )
            .unwrap();
        assert_eq!(
            to_json(&Value::Object(object.clone())).unwrap(),
            Some(serde_json::json!({"a": 1}))
        );

        object.set("self", Value::Object(object.clone())).unwrap();
        assert!(matches!(
            to_json(&Value::Object(object)),
            Err(EvalError::Type(_))
        ));
    }

    #[test]
    fn primitive_property_access_uses_prototypes() {
        let realm = Realm::new();
        let text = Value::string("hello");
        assert_eq!(realm.get_property(&text, "length").unwrap(), Value::Number(5.0));
        assert!(realm.get_property(&text, "toUpperCase").unwrap().is_callable());
        assert!(realm.get_property(&Value::Null, "x").is_err());
    }
}
