//! Remote memory addresses and the local names bound to them
//!
//! One address on the engine may be known locally under several names: a
//! global variable passed as a component input, a local variable that is
//! also a member of an array, and so on. Every binding at an address is
//! updated whenever the engine reports a change of that address.

use std::collections::{BTreeMap, HashMap};

use transport::message::Address;

use crate::flow_state::{FlowStateId, FlowStateTree};
use crate::value::{ContainerId, Heap, MemberKey, Value};

/// One local mirror of a remote memory slot
#[derive(Debug, Clone, PartialEq)]
pub enum DebuggerValue {
    GlobalVariable {
        name: String,
        value_type: String,
    },
    LocalVariable {
        flow_state: FlowStateId,
        name: String,
        value_type: String,
    },
    ComponentInput {
        flow_state: FlowStateId,
        component: String,
        input: String,
        value_type: String,
    },
    ObjectMember {
        container: ContainerId,
        key: MemberKey,
        value_type: String,
    },
}

/// The stores a binding may write into
pub(crate) struct Owners<'a> {
    pub(crate) globals: &'a mut BTreeMap<String, Value>,
    pub(crate) flow_states: &'a mut FlowStateTree,
    pub(crate) heap: &'a mut Heap,
}

impl DebuggerValue {
    pub fn value_type(&self) -> &str {
        match self {
            DebuggerValue::GlobalVariable { value_type, .. }
            | DebuggerValue::LocalVariable { value_type, .. }
            | DebuggerValue::ComponentInput { value_type, .. }
            | DebuggerValue::ObjectMember { value_type, .. } => value_type,
        }
    }

    /// Store `value` in the owner of this binding
    ///
    /// Returns false when the owner no longer exists.
    pub(crate) fn apply(&self, value: Value, owners: &mut Owners<'_>) -> bool {
        match self {
            DebuggerValue::GlobalVariable { name, .. } => {
                owners.globals.insert(name.clone(), value);
                true
            }
            DebuggerValue::LocalVariable {
                flow_state, name, ..
            } => match owners.flow_states.get_mut(*flow_state) {
                Some(state) => {
                    state.locals.insert(name.clone(), value);
                    true
                }
                None => false,
            },
            DebuggerValue::ComponentInput {
                flow_state,
                component,
                input,
                ..
            } => match owners.flow_states.get_mut(*flow_state) {
                Some(state) => {
                    state
                        .component_state_mut(component)
                        .inputs
                        .insert(input.clone(), value);
                    true
                }
                None => false,
            },
            DebuggerValue::ObjectMember { container, key, .. } => {
                owners.heap.set_member(*container, key, value)
            }
        }
    }
}

/// Address to bindings map
#[derive(Debug, Default)]
pub struct BindingRegistry {
    bindings: HashMap<Address, Vec<DebuggerValue>>,
}

impl BindingRegistry {
    /// Append a binding after any already registered at `address`
    pub fn register(&mut self, address: Address, binding: DebuggerValue) {
        self.bindings.entry(address).or_default().push(binding);
    }

    pub fn get(&self, address: Address) -> Option<&[DebuggerValue]> {
        self.bindings.get(&address).map(Vec::as_slice)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.bindings.contains_key(&address)
    }

    /// Number of addresses with at least one binding
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Container;

    fn global(name: &str) -> DebuggerValue {
        DebuggerValue::GlobalVariable {
            name: name.to_string(),
            value_type: "integer".to_string(),
        }
    }

    #[test]
    fn test_bindings_accumulate_in_order() {
        let mut registry = BindingRegistry::default();
        registry.register(0x10, global("a"));
        registry.register(0x10, global("b"));
        registry.register(0x20, global("c"));

        let at_10 = registry.get(0x10).unwrap();
        assert_eq!(at_10, &[global("a"), global("b")]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.binding_count(), 3);

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get(0x10).is_none());
    }

    #[test]
    fn test_apply_to_global_and_member() {
        let mut globals = BTreeMap::new();
        let mut flow_states = FlowStateTree::default();
        let mut heap = Heap::default();
        let container = heap.alloc(Container::array(2));

        let member = DebuggerValue::ObjectMember {
            container,
            key: MemberKey::Index(1),
            value_type: "integer".to_string(),
        };

        let mut owners = Owners {
            globals: &mut globals,
            flow_states: &mut flow_states,
            heap: &mut heap,
        };
        assert!(global("counter").apply(Value::Number(3.0), &mut owners));
        assert!(member.apply(Value::Number(4.0), &mut owners));

        assert_eq!(globals.get("counter"), Some(&Value::Number(3.0)));
        assert_eq!(
            heap.member(container, &MemberKey::Index(1)),
            Some(&Value::Number(4.0))
        );
    }
}
