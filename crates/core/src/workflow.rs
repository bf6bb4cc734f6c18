//! Workflow template binding and parametrization.
//!
//! A ComfyUI API-format workflow is a JSON object mapping node IDs to
//! `{ "class_type": ..., "inputs": { ... } }`. [`TemplateBindings`] names
//! the nine input fields a job overwrites, and [`WorkflowTemplate`]
//! checks those coordinates against the actual graph when it is loaded,
//! so a template edit that moves a node fails before any job is queued.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::job::JobParams;
use crate::naming::output_filename_prefix;

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// One input field of one node: `graph[node]["inputs"][input]`.
///
/// Written as `"<node>.<input>"` in bindings files, e.g. `"61.temporal_size"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeField {
    pub node: String,
    pub input: String,
}

impl NodeField {
    pub fn new(node: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            input: input.into(),
        }
    }
}

impl fmt::Display for NodeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.input)
    }
}

impl TryFrom<String> for NodeField {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.split_once('.') {
            Some((node, input)) if !node.is_empty() && !input.is_empty() => {
                Ok(Self::new(node, input))
            }
            _ => Err(format!(
                "invalid node field '{value}', expected '<node>.<input>'"
            )),
        }
    }
}

impl From<NodeField> for String {
    fn from(field: NodeField) -> Self {
        field.to_string()
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Semantic roles mapped to template coordinates.
///
/// The defaults match the stock seamless-loop template. A bindings file
/// only needs to list the roles that differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplateBindings {
    /// Image loader feeding the first frame.
    pub start_frame: NodeField,
    /// Image loader feeding the last frame. Bound to the same file as
    /// `start_frame` so the animation returns to where it began.
    pub end_frame: NodeField,
    /// Positive text prompt.
    pub prompt: NodeField,
    /// Sampler seed.
    pub seed: NodeField,
    /// Number of frames to render.
    pub frame_count: NodeField,
    /// Number of frames kept after trimming the last one.
    pub loop_trim: NodeField,
    /// Temporal window of the VAE decode stage.
    pub decode_window: NodeField,
    /// Output frame rate.
    pub fps: NodeField,
    /// Output filename prefix.
    pub filename_prefix: NodeField,
}

impl Default for TemplateBindings {
    fn default() -> Self {
        Self {
            start_frame: NodeField::new("52", "image"),
            end_frame: NodeField::new("102", "image"),
            prompt: NodeField::new("6", "text"),
            seed: NodeField::new("3", "seed"),
            frame_count: NodeField::new("59", "length"),
            loop_trim: NodeField::new("69", "length"),
            decode_window: NodeField::new("61", "temporal_size"),
            fps: NodeField::new("126", "fps"),
            filename_prefix: NodeField::new("126", "filename_prefix"),
        }
    }
}

impl TemplateBindings {
    /// Read bindings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            CoreError::Template(format!("invalid bindings file {}: {e}", path.display()))
        })
    }

    /// All roles with their names, in a fixed order.
    pub fn roles(&self) -> [(&'static str, &NodeField); 9] {
        [
            ("start_frame", &self.start_frame),
            ("end_frame", &self.end_frame),
            ("prompt", &self.prompt),
            ("seed", &self.seed),
            ("frame_count", &self.frame_count),
            ("loop_trim", &self.loop_trim),
            ("decode_window", &self.decode_window),
            ("fps", &self.fps),
            ("filename_prefix", &self.filename_prefix),
        ]
    }

    /// Check every role against `graph`.
    ///
    /// Each coordinate must point at an existing key in an existing
    /// node's `inputs` object, and no two roles may share a coordinate.
    pub fn validate(&self, graph: &Value) -> Result<(), CoreError> {
        let nodes = graph
            .as_object()
            .ok_or_else(|| CoreError::Template("workflow must be a JSON object".into()))?;

        let roles = self.roles();
        for (i, (role, field)) in roles.iter().enumerate() {
            if let Some((other, _)) = roles[..i].iter().find(|(_, f)| f == field) {
                return Err(CoreError::Template(format!(
                    "roles '{other}' and '{role}' are both bound to {field}"
                )));
            }

            let node = nodes.get(&field.node).ok_or_else(|| {
                CoreError::Template(format!(
                    "role '{role}' is bound to {field}, but node '{}' does not exist",
                    field.node
                ))
            })?;

            let inputs = node
                .get("inputs")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    CoreError::Template(format!(
                        "role '{role}' is bound to {field}, but node '{}' has no inputs object",
                        field.node
                    ))
                })?;

            if !inputs.contains_key(&field.input) {
                return Err(CoreError::Template(format!(
                    "role '{role}' is bound to {field}, but node '{}' has no input '{}'",
                    field.node, field.input
                )));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A workflow graph whose bindings have been checked.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    graph: Value,
    bindings: TemplateBindings,
}

/// A template with one job's values written in, ready to submit.
#[derive(Debug, Clone)]
pub struct ParametrizedWorkflow {
    pub graph: Value,
    /// The fresh prefix written into the `filename_prefix` role.
    pub filename_prefix: String,
}

impl WorkflowTemplate {
    /// Wrap an already-parsed graph, validating the bindings against it.
    pub fn from_value(graph: Value, bindings: TemplateBindings) -> Result<Self, CoreError> {
        bindings.validate(&graph)?;
        Ok(Self { graph, bindings })
    }

    /// Parse a template from JSON text.
    pub fn from_json(json: &str, bindings: TemplateBindings) -> Result<Self, CoreError> {
        let graph: Value = serde_json::from_str(json)
            .map_err(|e| CoreError::Template(format!("workflow is not valid JSON: {e}")))?;
        Self::from_value(graph, bindings)
    }

    /// Read and validate a template file.
    pub fn load(path: &Path, bindings: TemplateBindings) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw, bindings)
    }

    pub fn bindings(&self) -> &TemplateBindings {
        &self.bindings
    }

    /// Produce a job-specific copy of the graph.
    ///
    /// Both anchor frames get `image_filename`; frame-count-dependent
    /// fields get their derived values; the filename prefix is fresh on
    /// every call. The template itself is left untouched.
    ///
    /// Fails only when a derived frame field does not fit in an `i64`.
    pub fn parametrize(
        &self,
        params: &JobParams,
        image_filename: &str,
    ) -> Result<ParametrizedWorkflow, CoreError> {
        let loop_trim = params.loop_trim_length()?;
        let decode_window = params.decode_window()?;

        let mut graph = self.graph.clone();
        let filename_prefix = output_filename_prefix();
        let b = &self.bindings;

        set_input(&mut graph, &b.start_frame, image_filename.into());
        set_input(&mut graph, &b.end_frame, image_filename.into());
        set_input(&mut graph, &b.prompt, params.prompt.clone().into());
        set_input(&mut graph, &b.seed, params.seed.clone().into());
        set_input(&mut graph, &b.frame_count, params.frame_count.into());
        set_input(&mut graph, &b.loop_trim, loop_trim.into());
        set_input(&mut graph, &b.decode_window, decode_window.into());
        set_input(&mut graph, &b.fps, params.fps.into());
        set_input(&mut graph, &b.filename_prefix, filename_prefix.clone().into());

        Ok(ParametrizedWorkflow {
            graph,
            filename_prefix,
        })
    }
}

/// Overwrite one bound input. Coordinates were validated at load time.
fn set_input(graph: &mut Value, field: &NodeField, value: Value) {
    if let Some(slot) = graph
        .get_mut(&field.node)
        .and_then(|node| node.get_mut("inputs"))
        .and_then(|inputs| inputs.get_mut(&field.input))
    {
        *slot = value;
    }
}
