//! Build-time index translating the numbers spoken on the wire into
//! design-time paths

use std::path::Path;

use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use transport::BreakpointRef;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMap {
    /// Positional: the flow at position `i` has flow index `i`
    #[serde(default)]
    pub flows: Vec<FlowAsset>,
    #[serde(default)]
    pub global_variables: Vec<GlobalVariableAsset>,
    /// Positional: referenced by the type index of composite values
    #[serde(default)]
    pub types: Vec<TypeAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowAsset {
    pub flow_index: u32,
    pub path: String,
    /// Positional: the component at position `i` has component index `i`
    #[serde(default)]
    pub components: Vec<ComponentAsset>,
    #[serde(default)]
    pub component_inputs: Vec<ComponentInputAsset>,
    #[serde(default)]
    pub local_variables: Vec<LocalVariableAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentAsset {
    pub component_index: u32,
    pub path: String,
    #[serde(default)]
    pub outputs: Vec<OutputAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputAsset {
    pub output_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInputAsset {
    pub input_index: u32,
    pub component_index: u32,
    pub input_name: String,
    pub input_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalVariableAsset {
    pub index: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalVariableAsset {
    pub index: u32,
    pub name: String,
}

/// Shape of a composite value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeAsset {
    Basic {
        #[serde(rename = "valueType")]
        value_type: String,
    },
    Array {
        #[serde(rename = "elementType")]
        element_type: ElementType,
    },
    Object {
        fields: Vec<FieldAsset>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementType {
    pub value_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldAsset {
    pub name: String,
    pub value_type: String,
}

impl TypeAsset {
    /// Whether values of this type are laid out as an array
    pub fn is_array(&self) -> bool {
        match self {
            TypeAsset::Array { .. } => true,
            TypeAsset::Basic { value_type } => value_type == "array:any",
            TypeAsset::Object { .. } => false,
        }
    }
}

impl AssetMap {
    pub fn from_path(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading asset map {}", path.display()))?;
        Self::from_json(&contents)
            .wrap_err_with(|| format!("parsing asset map {}", path.display()))
    }

    pub fn from_json(contents: &str) -> eyre::Result<Self> {
        serde_json::from_str(contents).wrap_err("invalid asset map")
    }

    pub fn flow(&self, flow_index: u32) -> Option<&FlowAsset> {
        self.flows.get(flow_index as usize)
    }

    pub fn global_variable(&self, index: u32) -> Option<&GlobalVariableAsset> {
        self.global_variables.iter().find(|v| v.index == index)
    }

    pub fn type_at(&self, index: u64) -> Option<&TypeAsset> {
        usize::try_from(index).ok().and_then(|i| self.types.get(i))
    }

    /// Locate a component by its design-time path
    pub fn find_component(&self, path: &str) -> Option<BreakpointRef> {
        self.flows.iter().find_map(|flow| {
            flow.components
                .iter()
                .find(|component| component.path == path)
                .map(|component| BreakpointRef {
                    flow_index: flow.flow_index,
                    component_index: component.component_index,
                })
        })
    }
}

impl FlowAsset {
    pub fn component(&self, component_index: u32) -> Option<&ComponentAsset> {
        self.components.get(component_index as usize)
    }

    pub fn component_input(&self, input_index: u32) -> Option<&ComponentInputAsset> {
        self.component_inputs
            .iter()
            .find(|input| input.input_index == input_index)
    }

    pub fn local_variable(&self, index: u32) -> Option<&LocalVariableAsset> {
        self.local_variables.iter().find(|v| v.index == index)
    }
}

impl ComponentAsset {
    pub fn output(&self, output_index: u32) -> Option<&OutputAsset> {
        self.outputs.get(output_index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../tests/fixtures/assets.json");

    #[test]
    fn test_fixture_parses() {
        let assets = AssetMap::from_json(FIXTURE).unwrap();
        assert_eq!(assets.flows.len(), 3);
        assert_eq!(assets.flow(1).unwrap().path, "/flows/measure");
        assert!(assets.flow(7).is_none());
        assert_eq!(assets.global_variable(0).unwrap().name, "counter");
    }

    #[test]
    fn test_type_kinds() {
        let assets = AssetMap::from_json(FIXTURE).unwrap();
        assert!(assets.type_at(0).unwrap().is_array());
        assert!(!assets.type_at(1).unwrap().is_array());
        assert!(assets.type_at(2).unwrap().is_array());
        assert!(!assets.type_at(3).unwrap().is_array());
    }

    #[test]
    fn test_find_component() {
        let assets = AssetMap::from_json(FIXTURE).unwrap();
        assert_eq!(
            assets.find_component("/flows/measure/components/log"),
            Some(BreakpointRef {
                flow_index: 1,
                component_index: 2,
            })
        );
        assert_eq!(assets.find_component("/nope"), None);
    }

    #[test]
    fn test_missing_file() {
        assert!(AssetMap::from_path("/definitely/not/here.json").is_err());
    }
}
