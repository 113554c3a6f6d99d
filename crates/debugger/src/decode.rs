//! Wire value tokens
//!
//! A token is decoded by its leading character. Decoding never fails: a
//! malformed token turns into a fallback value and a log line. Composite
//! tokens allocate a container on the heap and register one
//! [`DebuggerValue::ObjectMember`] binding per member address, so later
//! VALUE_CHANGED messages for those addresses land inside the container.

use transport::message::{Address, unquote};

use crate::assets::{AssetMap, TypeAsset};
use crate::bindings::{BindingRegistry, DebuggerValue};
use crate::project::RuntimeModule;
use crate::value::{Container, Heap, MemberKey, Value};

/// Largest member count accepted for a composite token
const MAX_COMPOSITE_LEN: u64 = 1 << 20;

/// Session state a token may write into
pub(crate) struct DecodeContext<'a> {
    pub(crate) assets: &'a AssetMap,
    pub(crate) heap: &'a mut Heap,
    pub(crate) bindings: &'a mut BindingRegistry,
    pub(crate) module: Option<&'a dyn RuntimeModule>,
}

pub(crate) fn decode(token: &str, ctx: &mut DecodeContext<'_>) -> Value {
    match token {
        "undefined" => return Value::Undefined,
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    let Some(sigil) = token.chars().next() else {
        tracing::warn!("empty value token");
        return Value::Number(f64::NAN);
    };
    let rest = &token[sigil.len_utf8()..];

    match sigil {
        '"' => match unquote(token) {
            Some(s) => Value::String(s),
            None => {
                tracing::warn!(%token, "malformed string token");
                Value::String(token.to_string())
            }
        },
        '{' => decode_composite(token, ctx),
        '@' => match rest.parse() {
            Ok(size) => Value::Blob { size },
            Err(_) => fallback(token, "blob"),
        },
        '>' => match rest.parse() {
            Ok(id) => Value::Stream { id },
            Err(_) => fallback(token, "stream"),
        },
        '#' => match rest.parse::<u64>() {
            Ok(id) => match ctx.module {
                Some(module) => match module.object(id) {
                    Some(object) => Value::Object(object),
                    None => {
                        tracing::debug!(id, module = module.id(), "runtime object not found");
                        Value::ObjectRef { id }
                    }
                },
                None => Value::ObjectRef { id },
            },
            Err(_) => fallback(token, "object"),
        },
        '*' => match rest.strip_prefix('p') {
            Some(path) => Value::Widget {
                path: path.to_string(),
            },
            None => match rest.get(1..).and_then(|s| s.parse().ok()) {
                Some(id) => Value::WidgetId { id },
                None => fallback(token, "widget"),
            },
        },
        '!' => match rest.strip_prefix('!') {
            Some(name) => Value::Event {
                name: name.to_string(),
            },
            None => Value::Timestamp(hex_float(rest)),
        },
        'H' => Value::Number(hex_float(rest)),
        _ => match token.trim().parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => {
                tracing::warn!(%token, "malformed number token");
                Value::Number(f64::NAN)
            }
        },
    }
}

fn fallback(token: &str, kind: &'static str) -> Value {
    tracing::warn!(%token, kind, "malformed value token");
    Value::String(token.to_string())
}

/// Little-endian float from hex digit pairs
///
/// Sixteen digits are a double, anything shorter is read as a single
/// precision float. Invalid pairs count as zero.
pub(crate) fn hex_float(digits: &str) -> f64 {
    let mut buf = [0u8; 8];
    let bytes = digits.as_bytes();
    for (slot, pair) in buf.iter_mut().zip(bytes.chunks(2)) {
        *slot = std::str::from_utf8(pair)
            .ok()
            .and_then(|p| u8::from_str_radix(p, 16).ok())
            .unwrap_or(0);
    }

    if digits.len() == 16 {
        f64::from_le_bytes(buf)
    } else {
        let [a, b, c, d, ..] = buf;
        f64::from(f32::from_le_bytes([a, b, c, d]))
    }
}

/// `{self,count,type,m0,m1,...}` with every number in hex
fn decode_composite(token: &str, ctx: &mut DecodeContext<'_>) -> Value {
    let Some(inner) = token.strip_prefix('{').and_then(|t| t.strip_suffix('}')) else {
        tracing::warn!(%token, "unterminated composite token");
        return Value::Undefined;
    };

    let parts: Result<Vec<u64>, _> = inner
        .split(',')
        .map(|part| u64::from_str_radix(part.trim(), 16))
        .collect();
    let parts = match parts {
        Ok(parts) if parts.len() >= 3 => parts,
        Ok(_) => {
            tracing::warn!(%token, "composite token is missing its header");
            return Value::Undefined;
        }
        Err(error) => {
            tracing::warn!(%token, %error, "invalid composite token");
            return Value::Undefined;
        }
    };

    let (count, type_index, members) = (parts[1], parts[2], &parts[3..]);
    if count > MAX_COMPOSITE_LEN {
        tracing::warn!(%token, count, "composite count out of range");
        return Value::Undefined;
    }
    let Some(ty) = ctx.assets.type_at(type_index) else {
        tracing::warn!(%token, type_index, "unknown composite type");
        return Value::Undefined;
    };

    let mut bindings = Vec::with_capacity(members.len());
    for (i, &address) in members.iter().enumerate() {
        let (key, value_type) = match ty {
            TypeAsset::Array { element_type } => {
                (MemberKey::Index(i), element_type.value_type.clone())
            }
            TypeAsset::Object { fields } => match fields.get(i) {
                Some(field) => (MemberKey::Field(field.name.clone()), field.value_type.clone()),
                None => {
                    tracing::warn!(%token, member = i, "composite member has no field");
                    return Value::Undefined;
                }
            },
            TypeAsset::Basic { value_type } => (MemberKey::Index(i), value_type.clone()),
        };
        bindings.push((address as Address, key, value_type));
    }

    let (container, is_array) = if ty.is_array() {
        (Container::array(count as usize), true)
    } else {
        let mut container = Container::empty_struct();
        if let (Container::Struct(slots), TypeAsset::Object { fields }) = (&mut container, ty) {
            slots.extend(fields.iter().map(|f| (f.name.clone(), Value::Undefined)));
        }
        (container, false)
    };
    let id = ctx.heap.alloc(container);

    for (address, key, value_type) in bindings {
        ctx.bindings.register(
            address,
            DebuggerValue::ObjectMember {
                container: id,
                key,
                value_type,
            },
        );
    }

    if is_array {
        Value::Array(id)
    } else {
        Value::Struct(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{ElementType, FieldAsset};

    struct Fixture {
        assets: AssetMap,
        heap: Heap,
        bindings: BindingRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                assets: AssetMap {
                    types: vec![
                        TypeAsset::Array {
                            element_type: ElementType {
                                value_type: "integer".to_string(),
                            },
                        },
                        TypeAsset::Object {
                            fields: vec![
                                FieldAsset {
                                    name: "voltage".to_string(),
                                    value_type: "float".to_string(),
                                },
                                FieldAsset {
                                    name: "current".to_string(),
                                    value_type: "float".to_string(),
                                },
                            ],
                        },
                    ],
                    ..Default::default()
                },
                heap: Heap::default(),
                bindings: BindingRegistry::default(),
            }
        }

        fn decode(&mut self, token: &str) -> Value {
            let mut ctx = DecodeContext {
                assets: &self.assets,
                heap: &mut self.heap,
                bindings: &mut self.bindings,
                module: None,
            };
            decode(token, &mut ctx)
        }
    }

    struct Module;

    impl RuntimeModule for Module {
        fn id(&self) -> u32 {
            7
        }

        fn object(&self, object_id: u64) -> Option<serde_json::Value> {
            (object_id == 5).then(|| serde_json::json!({ "port": 5025 }))
        }
    }

    #[test]
    fn test_literals() {
        let mut f = Fixture::new();
        assert_eq!(f.decode("undefined"), Value::Undefined);
        assert_eq!(f.decode("null"), Value::Null);
        assert_eq!(f.decode("true"), Value::Bool(true));
        assert_eq!(f.decode("false"), Value::Bool(false));
        assert_eq!(f.decode("42"), Value::Number(42.0));
        assert_eq!(f.decode("-1.5"), Value::Number(-1.5));
    }

    #[test]
    fn test_strings() {
        let mut f = Fixture::new();
        assert_eq!(
            f.decode(r#""a\tb\"c\n""#),
            Value::String("a\tb\"c\n".to_string())
        );
        assert_eq!(f.decode(r#""C:\x""#), Value::String(r"C:\x".to_string()));
        assert_eq!(f.decode(r#""C:\\""#), Value::String(r"C:\".to_string()));
        // broken quoting keeps the raw token
        assert_eq!(f.decode(r#""abc"#), Value::String(r#""abc"#.to_string()));
    }

    #[test]
    fn test_sigils() {
        let mut f = Fixture::new();
        assert_eq!(f.decode("@128"), Value::Blob { size: 128 });
        assert_eq!(f.decode(">3"), Value::Stream { id: 3 });
        assert_eq!(f.decode("#9"), Value::ObjectRef { id: 9 });
        assert_eq!(
            f.decode("*p/pages/main/button"),
            Value::Widget {
                path: "/pages/main/button".to_string()
            }
        );
        assert_eq!(f.decode("*i12"), Value::WidgetId { id: 12 });
        assert_eq!(
            f.decode("!!clicked"),
            Value::Event {
                name: "clicked".to_string()
            }
        );
        assert_eq!(f.decode("@big"), Value::String("@big".to_string()));
    }

    #[test]
    fn test_module_resolves_objects() {
        let mut f = Fixture::new();
        let module = Module;
        let mut ctx = DecodeContext {
            assets: &f.assets,
            heap: &mut f.heap,
            bindings: &mut f.bindings,
            module: Some(&module),
        };
        assert_eq!(
            decode("#5", &mut ctx),
            Value::Object(serde_json::json!({ "port": 5025 }))
        );
        assert_eq!(decode("#6", &mut ctx), Value::ObjectRef { id: 6 });
    }

    #[test]
    fn test_hex_floats() {
        let mut f = Fixture::new();
        let double = 1.5f64.to_le_bytes().iter().map(|b| format!("{b:02x}")).collect::<String>();
        assert_eq!(f.decode(&format!("H{double}")), Value::Number(1.5));

        let single = 2.25f32.to_le_bytes().iter().map(|b| format!("{b:02x}")).collect::<String>();
        assert_eq!(f.decode(&format!("H{single}")), Value::Number(2.25));

        let ms = 1_700_000_000_000f64;
        let stamp = ms.to_le_bytes().iter().map(|b| format!("{b:02x}")).collect::<String>();
        assert_eq!(f.decode(&format!("!{stamp}")), Value::Timestamp(ms));

        assert_eq!(hex_float("zz00c03f"), hex_float("0000c03f"));
    }

    #[test]
    fn test_bad_number_is_nan() {
        let mut f = Fixture::new();
        assert!(f.decode("abc").as_number().unwrap().is_nan());
    }

    #[test]
    fn test_array_composite() {
        let mut f = Fixture::new();
        let value = f.decode("{A,2,0,B,C}");

        let Value::Array(id) = value else {
            panic!("expected array, got {value:?}");
        };
        assert_eq!(f.heap.get(id).unwrap().len(), 2);
        assert_eq!(
            f.bindings.get(0xB).unwrap(),
            &[DebuggerValue::ObjectMember {
                container: id,
                key: MemberKey::Index(0),
                value_type: "integer".to_string(),
            }]
        );
        assert!(f.bindings.contains(0xC));
        assert!(!f.bindings.contains(0xA));
    }

    #[test]
    fn test_struct_composite() {
        let mut f = Fixture::new();
        let value = f.decode("{20,2,1,21,22}");

        let Value::Struct(id) = value else {
            panic!("expected struct, got {value:?}");
        };
        assert_eq!(
            f.bindings.get(0x22).unwrap()[0],
            DebuggerValue::ObjectMember {
                container: id,
                key: MemberKey::Field("current".to_string()),
                value_type: "float".to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_composites_register_nothing() {
        let mut f = Fixture::new();
        assert_eq!(f.decode("{A,2}"), Value::Undefined);
        assert_eq!(f.decode("{A,2,9,B}"), Value::Undefined);
        assert_eq!(f.decode("{A,2,0,zz}"), Value::Undefined);
        // third member of a two field struct
        assert_eq!(f.decode("{A,3,1,B,C,D}"), Value::Undefined);
        assert!(f.bindings.is_empty());
        assert!(f.heap.is_empty());
    }
}
