//! Read-only view of the design-time project
//!
//! The editor owns the real object model. The debugger only needs to turn
//! the paths found in the asset map into a handful of descriptors, which is
//! what [`Project`] offers. [`StaticProject`] is a JSON-backed implementation
//! used by the command line tool and the tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use eyre::WrapErr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowKind {
    Page,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentKind {
    Widget,
    #[default]
    Action,
    /// Entry point of an action flow, never reports execution state
    InputAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionLineDef {
    pub source: String,
    pub output: String,
    pub target: String,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDef {
    pub path: String,
    #[serde(default)]
    pub kind: ComponentKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDef {
    pub path: String,
    #[serde(default)]
    pub name: String,
    pub kind: FlowKind,
    /// User properties and local variables
    #[serde(default)]
    pub local_variables: Vec<VariableDef>,
    #[serde(default)]
    pub connection_lines: Vec<ConnectionLineDef>,
}

impl FlowDef {
    pub fn local_variable(&self, name: &str) -> Option<&VariableDef> {
        self.local_variables.iter().find(|v| v.name == name)
    }
}

/// Path-addressed lookup into the design-time project
pub trait Project: Send + Sync {
    fn flow(&self, path: &str) -> Option<Arc<FlowDef>>;

    fn component(&self, path: &str) -> Option<Arc<ComponentDef>>;

    fn global_variable(&self, name: &str) -> Option<VariableDef>;
}

/// Decoding services of the engine module running the flows
///
/// Only available when the engine runs in-process (the simulator). Objects
/// are handed out as JSON.
pub trait RuntimeModule: Send + Sync {
    fn id(&self) -> u32;

    /// Value of a runtime object by id
    fn object(&self, object_id: u64) -> Option<serde_json::Value>;

    /// Human readable form of a component execution state
    fn execution_state(&self, _state: u32) -> Option<serde_json::Value> {
        None
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectFile {
    #[serde(default)]
    global_variables: Vec<VariableDef>,
    #[serde(default)]
    flows: Vec<FlowFile>,
}

#[derive(Debug, Deserialize)]
struct FlowFile {
    #[serde(flatten)]
    flow: FlowDef,
    #[serde(default)]
    components: Vec<ComponentDef>,
}

/// Project loaded from a JSON description
#[derive(Debug, Default)]
pub struct StaticProject {
    flows: HashMap<String, Arc<FlowDef>>,
    components: HashMap<String, Arc<ComponentDef>>,
    global_variables: HashMap<String, VariableDef>,
}

impl StaticProject {
    pub fn from_path(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading project {}", path.display()))?;
        Self::from_json(&contents).wrap_err_with(|| format!("parsing project {}", path.display()))
    }

    pub fn from_json(contents: &str) -> eyre::Result<Self> {
        let file: ProjectFile = serde_json::from_str(contents).wrap_err("invalid project")?;

        let mut project = StaticProject::default();
        for variable in file.global_variables {
            project
                .global_variables
                .insert(variable.name.clone(), variable);
        }
        for FlowFile { flow, components } in file.flows {
            for component in components {
                project
                    .components
                    .insert(component.path.clone(), Arc::new(component));
            }
            project.flows.insert(flow.path.clone(), Arc::new(flow));
        }
        Ok(project)
    }
}

impl Project for StaticProject {
    fn flow(&self, path: &str) -> Option<Arc<FlowDef>> {
        self.flows.get(path).cloned()
    }

    fn component(&self, path: &str) -> Option<Arc<ComponentDef>> {
        self.components.get(path).cloned()
    }

    fn global_variable(&self, name: &str) -> Option<VariableDef> {
        self.global_variables.get(name).cloned()
    }
}

/// Caches path lookups for the lifetime of a session
pub(crate) struct PathCache {
    project: Arc<dyn Project>,
    flows: HashMap<String, Arc<FlowDef>>,
    components: HashMap<String, Arc<ComponentDef>>,
}

impl PathCache {
    pub(crate) fn new(project: Arc<dyn Project>) -> Self {
        Self {
            project,
            flows: HashMap::new(),
            components: HashMap::new(),
        }
    }

    pub(crate) fn flow(&mut self, path: &str) -> Option<Arc<FlowDef>> {
        if let Some(flow) = self.flows.get(path) {
            return Some(Arc::clone(flow));
        }
        let flow = self.project.flow(path)?;
        self.flows.insert(path.to_string(), Arc::clone(&flow));
        Some(flow)
    }

    pub(crate) fn component(&mut self, path: &str) -> Option<Arc<ComponentDef>> {
        if let Some(component) = self.components.get(path) {
            return Some(Arc::clone(component));
        }
        let component = self.project.component(path)?;
        self.components
            .insert(path.to_string(), Arc::clone(&component));
        Some(component)
    }

    pub(crate) fn global_variable(&self, name: &str) -> Option<VariableDef> {
        self.project.global_variable(name)
    }

    pub(crate) fn clear(&mut self) {
        self.flows.clear();
        self.components.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../tests/fixtures/project.json");

    #[test]
    fn test_static_project_lookups() {
        let project = StaticProject::from_json(FIXTURE).unwrap();

        let measure = project.flow("/flows/measure").unwrap();
        assert_eq!(measure.kind, FlowKind::Action);
        assert_eq!(measure.connection_lines.len(), 4);
        assert_eq!(
            measure.local_variable("samples").unwrap().value_type,
            "array:integer"
        );

        assert_eq!(
            project
                .component("/flows/measure/components/input")
                .unwrap()
                .kind,
            ComponentKind::InputAction
        );
        assert_eq!(
            project.global_variable("counter").unwrap().value_type,
            "integer"
        );
        assert!(project.flow("/flows/missing").is_none());
    }

    #[test]
    fn test_settings_page_defaults() {
        let project = StaticProject::from_json(FIXTURE).unwrap();
        let settings = project.flow("/pages/settings").unwrap();
        assert_eq!(settings.kind, FlowKind::Page);
        assert!(settings.connection_lines.is_empty());
    }

    #[test]
    fn test_cache_returns_same_descriptor() {
        let project: Arc<dyn Project> = Arc::new(StaticProject::from_json(FIXTURE).unwrap());
        let mut cache = PathCache::new(project);

        let first = cache.component("/flows/measure/components/read").unwrap();
        let second = cache.component("/flows/measure/components/read").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.component("/nope").is_none());
    }
}
