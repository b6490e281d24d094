pub mod registry;
pub mod vex;

use std::sync::Arc;

use crate::core::tool::Tool;
use crate::domain::VexBackend;

/// The VEX tools, in the order `tools/list` reports them.
pub fn vex_tools(backend: Arc<dyn VexBackend>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(vex::CreateVexStatement::new(Arc::clone(&backend))),
        Arc::new(vex::MergeVexDocuments::new(Arc::clone(&backend))),
        Arc::new(vex::ValidateVexDocument::new(backend)),
    ]
}
