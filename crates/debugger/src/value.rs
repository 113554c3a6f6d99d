//! Values mirrored from the engine
//!
//! Arrays and structs received from the engine are shared: several bindings
//! may write into the same container instance, so containers live in a
//! [`Heap`] and values only carry a [`ContainerId`].

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;

/// Deepest nesting rendered by [`Heap::to_json`]
const MAX_RENDER_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContainerId(usize);

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(ContainerId),
    Struct(ContainerId),
    Blob {
        size: u64,
    },
    Stream {
        id: u64,
    },
    /// Runtime object that could not be resolved locally
    ObjectRef {
        id: u64,
    },
    Object(serde_json::Value),
    Widget {
        path: String,
    },
    WidgetId {
        id: u64,
    },
    Event {
        name: String,
    },
    /// Milliseconds since the Unix epoch
    Timestamp(f64),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn container(&self) -> Option<ContainerId> {
        match self {
            Value::Array(id) | Value::Struct(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_system_time(&self) -> Option<SystemTime> {
        let Value::Timestamp(ms) = self else {
            return None;
        };
        if !ms.is_finite() {
            return None;
        }
        let offset = Duration::try_from_secs_f64(ms.abs() / 1000.0).ok()?;
        if *ms >= 0.0 {
            UNIX_EPOCH.checked_add(offset)
        } else {
            UNIX_EPOCH.checked_sub(offset)
        }
    }
}

/// Where a value sits inside a container
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberKey {
    Index(usize),
    Field(String),
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKey::Index(i) => write!(f, "{i}"),
            MemberKey::Field(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
}

impl Container {
    pub fn array(len: usize) -> Self {
        Container::Array(vec![Value::Undefined; len])
    }

    pub fn empty_struct() -> Self {
        Container::Struct(Vec::new())
    }

    pub fn len(&self) -> usize {
        match self {
            Container::Array(items) => items.len(),
            Container::Struct(fields) => fields.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &MemberKey) -> Option<&Value> {
        match (self, key) {
            (Container::Array(items), MemberKey::Index(i)) => items.get(*i),
            (Container::Struct(fields), key) => {
                let name = key.to_string();
                fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
            }
            (Container::Array(_), MemberKey::Field(_)) => None,
        }
    }

    fn set(&mut self, key: &MemberKey, value: Value) -> bool {
        match (self, key) {
            (Container::Array(items), MemberKey::Index(i)) => {
                if *i >= items.len() {
                    items.resize(*i + 1, Value::Undefined);
                }
                items[*i] = value;
                true
            }
            (Container::Array(_), MemberKey::Field(_)) => false,
            (Container::Struct(fields), key) => {
                let name = key.to_string();
                match fields.iter_mut().find(|(n, _)| *n == name) {
                    Some((_, slot)) => *slot = value,
                    None => fields.push((name, value)),
                }
                true
            }
        }
    }
}

/// Arena of composite containers owned by a session
#[derive(Debug, Default)]
pub struct Heap {
    containers: Vec<Container>,
}

impl Heap {
    pub fn alloc(&mut self, container: Container) -> ContainerId {
        self.containers.push(container);
        ContainerId(self.containers.len() - 1)
    }

    pub fn get(&self, id: ContainerId) -> Option<&Container> {
        self.containers.get(id.0)
    }

    pub fn member(&self, id: ContainerId, key: &MemberKey) -> Option<&Value> {
        self.get(id)?.get(key)
    }

    /// Returns false when the container is gone or cannot hold `key`
    pub fn set_member(&mut self, id: ContainerId, key: &MemberKey, value: Value) -> bool {
        match self.containers.get_mut(id.0) {
            Some(container) => container.set(key, value),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn clear(&mut self) {
        self.containers.clear();
    }

    /// Render a value, following container references
    pub fn to_json(&self, value: &Value) -> serde_json::Value {
        self.render(value, 0)
    }

    fn render(&self, value: &Value, depth: usize) -> serde_json::Value {
        match value {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Number(n) => json!(n),
            Value::String(s) => json!(s),
            Value::Array(id) | Value::Struct(id) => {
                if depth >= MAX_RENDER_DEPTH {
                    return json!("...");
                }
                match self.get(*id) {
                    Some(Container::Array(items)) => serde_json::Value::Array(
                        items.iter().map(|v| self.render(v, depth + 1)).collect(),
                    ),
                    Some(Container::Struct(fields)) => serde_json::Value::Object(
                        fields
                            .iter()
                            .map(|(name, v)| (name.clone(), self.render(v, depth + 1)))
                            .collect(),
                    ),
                    None => serde_json::Value::Null,
                }
            }
            Value::Blob { size } => json!(format!("blob (size={size})")),
            Value::Stream { id } => json!(format!("stream (id={id})")),
            Value::ObjectRef { id } => json!(format!("json (id={id})")),
            Value::Object(object) => object.clone(),
            Value::Widget { path } => json!(format!("widget ({path})")),
            Value::WidgetId { id } => json!(format!("widget (id={id})")),
            Value::Event { name } => json!(format!("event ({name})")),
            Value::Timestamp(ms) => json!({ "timestamp": ms }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_members() {
        let mut heap = Heap::default();
        let id = heap.alloc(Container::array(2));

        assert!(heap.set_member(id, &MemberKey::Index(1), Value::Number(7.0)));
        assert_eq!(heap.member(id, &MemberKey::Index(0)), Some(&Value::Undefined));
        assert_eq!(heap.member(id, &MemberKey::Index(1)), Some(&Value::Number(7.0)));
        assert!(!heap.set_member(id, &MemberKey::Field("x".into()), Value::Null));
    }

    #[test]
    fn test_struct_members_keep_order() {
        let mut heap = Heap::default();
        let id = heap.alloc(Container::empty_struct());

        heap.set_member(id, &MemberKey::Field("voltage".into()), Value::Number(1.5));
        heap.set_member(id, &MemberKey::Field("current".into()), Value::Number(0.2));
        heap.set_member(id, &MemberKey::Field("voltage".into()), Value::Number(3.3));

        let Some(Container::Struct(fields)) = heap.get(id) else {
            panic!("expected struct");
        };
        assert_eq!(fields[0], ("voltage".to_string(), Value::Number(3.3)));
        assert_eq!(fields[1].0, "current");
    }

    #[test]
    fn test_render_nested() {
        let mut heap = Heap::default();
        let inner = heap.alloc(Container::array(1));
        heap.set_member(inner, &MemberKey::Index(0), Value::Bool(true));
        let outer = heap.alloc(Container::empty_struct());
        heap.set_member(outer, &MemberKey::Field("flags".into()), Value::Array(inner));
        heap.set_member(outer, &MemberKey::Field("data".into()), Value::Blob { size: 12 });

        assert_eq!(
            heap.to_json(&Value::Struct(outer)),
            json!({ "flags": [true], "data": "blob (size=12)" })
        );
    }

    #[test]
    fn test_self_referencing_container_renders() {
        let mut heap = Heap::default();
        let id = heap.alloc(Container::array(1));
        heap.set_member(id, &MemberKey::Index(0), Value::Array(id));
        // terminates
        let _ = heap.to_json(&Value::Array(id));
    }

    #[test]
    fn test_timestamp_as_system_time() {
        let ts = Value::Timestamp(1500.0);
        assert_eq!(
            ts.as_system_time(),
            Some(UNIX_EPOCH + Duration::from_millis(1500))
        );
        assert_eq!(Value::Timestamp(f64::NAN).as_system_time(), None);
        assert_eq!(Value::Null.as_system_time(), None);
    }
}
