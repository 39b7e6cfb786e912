use crate::interpreter::value::{
    MAX_PROTOTYPE_DEPTH, ObjectKind, ObjectRef, Primitive, Value, number_to_string,
};

/// Nesting depth used when no explicit depth is configured.
pub const DEFAULT_DEPTH: usize = 2;

const MAX_ARRAY_ITEMS: usize = 100;
const BREAK_LENGTH: usize = 72;

/// Render a value the way `util.inspect` would.
///
/// Objects nested deeper than `depth` collapse to `[Object]`/`[Array]`, and a
/// reference back into the object currently being rendered prints as
/// `[Circular]`.
pub fn render(value: &Value, depth: usize) -> String {
    Renderer {
        depth,
        stack: Vec::new(),
    }
    .value(value, 0)
}

struct Renderer {
    depth: usize,
    stack: Vec<usize>,
}

impl Renderer {
    fn value(&mut self, value: &Value, level: usize) -> String {
        match value {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(flag) => flag.to_string(),
            Value::Number(num) => format_number(*num),
            Value::String(text) => quote(text),
            Value::Object(object) => self.object(object, level),
        }
    }

    fn object(&mut self, object: &ObjectRef, level: usize) -> String {
        if self.stack.contains(&object.id()) {
            return "[Circular]".to_string();
        }
        let (kind, entries, has_prototype) = {
            let guard = object.read();
            let entries: Vec<(String, Value)> = guard
                .properties
                .enumerable()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            (guard.kind.clone(), entries, guard.prototype.is_some())
        };
        let constructor = nearest_constructor(object);

        let prefix = match &kind {
            ObjectKind::Function(function) => {
                let base = if function.name.is_empty() {
                    "[Function (anonymous)]".to_string()
                } else {
                    format!("[Function: {}]", function.name)
                };
                if entries.is_empty() {
                    return base;
                }
                format!("{base} ")
            }
            ObjectKind::Boxed(primitive) => {
                let (tag, inner) = match primitive {
                    Primitive::Boolean(flag) => ("Boolean", flag.to_string()),
                    Primitive::Number(num) => ("Number", format_number(*num)),
                    Primitive::String(text) => ("String", quote(text)),
                };
                let base = format!("[{tag}: {inner}]");
                if entries.is_empty() {
                    return base;
                }
                format!("{base} ")
            }
            ObjectKind::Error => {
                let name = object
                    .get("name")
                    .map(|v| v.to_display_string())
                    .unwrap_or_else(|| "Error".to_string());
                let message = object
                    .get("message")
                    .map(|v| v.to_display_string())
                    .unwrap_or_default();
                let base = if message.is_empty() {
                    format!("[{name}]")
                } else {
                    format!("[{name}: {message}]")
                };
                if entries.is_empty() {
                    return base;
                }
                format!("{base} ")
            }
            ObjectKind::Array(items) => match constructor.as_deref() {
                Some("Array") => String::new(),
                Some(name) => format!("{name}({}) ", items.len()),
                None => format!("[Array({}): null prototype] ", items.len()),
            },
            ObjectKind::Ordinary => match constructor.as_deref() {
                Some("Object") => String::new(),
                Some(name) => format!("{name} "),
                None if !has_prototype => "[Object: null prototype] ".to_string(),
                None => String::new(),
            },
        };

        let is_array = matches!(kind, ObjectKind::Array(_));
        if level > self.depth {
            return match (&kind, constructor.as_deref()) {
                (ObjectKind::Array(_), _) => "[Array]".to_string(),
                (_, Some(name)) => format!("[{name}]"),
                (_, None) => "[Object]".to_string(),
            };
        }

        self.stack.push(object.id());
        let mut parts = Vec::new();
        if let ObjectKind::Array(items) = &kind {
            for item in items.iter().take(MAX_ARRAY_ITEMS) {
                parts.push(self.value(item, level + 1));
            }
            if items.len() > MAX_ARRAY_ITEMS {
                let rest = items.len() - MAX_ARRAY_ITEMS;
                parts.push(format!(
                    "... {rest} more item{}",
                    if rest == 1 { "" } else { "s" }
                ));
            }
        }
        for (key, value) in &entries {
            parts.push(format!("{}: {}", format_key(key), self.value(value, level + 1)));
        }
        self.stack.pop();

        let (open, close) = if is_array { ("[", "]") } else { ("{", "}") };
        if parts.is_empty() {
            return format!("{prefix}{open}{close}");
        }
        let single = format!("{prefix}{open} {} {close}", parts.join(", "));
        if single.len() <= BREAK_LENGTH && !single.contains('\n') {
            return single;
        }
        let indent = "  ".repeat(level + 1);
        let closing_indent = "  ".repeat(level);
        format!(
            "{prefix}{open}\n{indent}{}\n{closing_indent}{close}",
            parts.join(&format!(",\n{indent}"))
        )
    }
}

/// Name of the nearest constructor on the prototype chain.
fn nearest_constructor(object: &ObjectRef) -> Option<String> {
    let mut visited = Vec::new();
    let mut cursor = object.prototype();
    while let Some(link) = cursor {
        if visited.contains(&link.id()) || visited.len() >= MAX_PROTOTYPE_DEPTH {
            return None;
        }
        visited.push(link.id());
        if let Some(Value::Object(constructor)) = link.get_own("constructor") {
            if let Some(function) = constructor.function() {
                if !function.name.is_empty() {
                    return Some(function.name);
                }
            }
        }
        cursor = link.prototype();
    }
    None
}

/// Number rendering; unlike string conversion, negative zero keeps its sign.
pub fn format_number(num: f64) -> String {
    if num == 0.0 && num.is_sign_negative() {
        "-0".to_string()
    } else {
        number_to_string(num)
    }
}

fn quote(text: &str) -> String {
    let delimiter = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(delimiter);
    for ch in text.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

fn format_key(key: &str) -> String {
    let mut chars = key.chars();
    let identifier = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if identifier {
        key.to_string()
    } else {
        quote(key)
    }
}
