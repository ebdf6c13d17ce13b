//! Tool catalog and dispatch layer
//!
//! Each resource family module contributes a list of [`ToolDescriptor`]s; the
//! [`ToolRegistry`] is built once at startup and is read-only afterwards. The
//! marshaling category is an explicit tag on the descriptor, set at
//! registration time, and every ById/Update descriptor names its single
//! identifier key — nothing is inferred from the tool name at dispatch time.

pub mod condition;
pub mod encounter;
pub mod episode_of_care;
pub mod medication;
pub mod medication_request;
pub mod merge;
pub mod normalize;
pub mod observation;
pub mod organization;
pub mod patient;
pub mod practitioner;
pub mod router;

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::fhir::FhirRepository;

pub use router::{ToolCallResult, dispatch};

/// Handler outcome: a JSON payload for the result envelope
pub type HandlerResult = Result<Value, ToolError>;

type ByIdFn = fn(FhirContext, String) -> BoxFuture<'static, HandlerResult>;
type UpdateFn = fn(FhirContext, String, Map<String, Value>) -> BoxFuture<'static, HandlerResult>;
type WholeFn = fn(FhirContext, Value) -> BoxFuture<'static, HandlerResult>;

/// How the router reshapes the argument bag before invoking the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marshaling {
    /// Pass `arguments[id_key]` (falling back to a literal `id` key) as the
    /// handler's sole positional argument
    ById { id_key: &'static str },
    /// Extract `arguments[id_key]`; the remaining keys form the updates map
    Update { id_key: &'static str },
    /// Pass the entire argument bag unchanged
    WholeObject,
}

/// Handler reference, shaped to match the descriptor's marshaling category
pub enum ToolHandler {
    ById(ByIdFn),
    Update(UpdateFn),
    Whole(WholeFn),
}

/// One named, schema-described operation exposed through the call protocol
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub marshaling: Marshaling,
    pub handler: ToolHandler,
}

/// Injected repository handle shared by all handlers
///
/// Cheap to clone; the repository (and its auth session) is the only state
/// shared across concurrent dispatches.
#[derive(Clone)]
pub struct FhirContext {
    pub repo: Arc<dyn FhirRepository>,
}

impl FhirContext {
    pub fn new(repo: Arc<dyn FhirRepository>) -> Self {
        Self { repo }
    }
}

/// Static catalog of every exposed tool; lookup is exact-match by name
pub struct ToolRegistry {
    tools: HashMap<&'static str, ToolDescriptor>,
    order: Vec<&'static str>,
}

impl ToolRegistry {
    /// Build the full catalog from every resource family
    pub fn new() -> Self {
        let mut tools = HashMap::new();
        let mut order = Vec::new();
        let families = [
            patient::tools(),
            practitioner::tools(),
            organization::tools(),
            encounter::tools(),
            observation::tools(),
            medication::tools(),
            medication_request::tools(),
            episode_of_care::tools(),
            condition::tools(),
        ];
        for family in families {
            for descriptor in family {
                order.push(descriptor.name);
                tools.insert(descriptor.name, descriptor);
            }
        }
        Self { tools, order }
    }

    /// Exact-match lookup; absence is reported by the router as UnknownTool
    pub fn lookup(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Descriptors in registration order, for `tools/list`
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
