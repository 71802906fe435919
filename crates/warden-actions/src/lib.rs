//! Built-in playbook actions for Warden.
//!
//! | action                  | events              | effect                                   |
//! |-------------------------|---------------------|------------------------------------------|
//! | `create_finding`        | any                 | sets title, description, severity, key   |
//! | `add_markdown`          | any                 | appends a markdown block                 |
//! | `add_labels_table`      | resource change     | appends the resource's labels            |
//! | `add_diff_table`        | resource change     | appends the filtered field diff          |
//! | `add_alert_annotations` | prometheus alert    | copies summary, description and severity |
//! | `route_to_sinks`        | any                 | overrides the finding's sinks            |
//! | `stop_processing`       | any                 | skips later playbooks for the event      |
//! | `add_callback`          | any                 | adds a button bound to another action    |
//! | `http_probe`            | any                 | GETs a URL and records the status        |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod alerts;
pub mod finding;
pub mod kubernetes;
pub mod probe;
pub mod routing;

use warden_core::{ActionRegistry, EventKind, NoParams, Result};

use crate::finding::{CreateFindingParams, MarkdownParams};
use crate::probe::ProbeParams;
use crate::routing::{CallbackParams, RouteParams};

/// Registers every built-in action.
pub fn register_builtin(registry: &mut ActionRegistry) -> Result<()> {
    registry.register_fn::<CreateFindingParams, _>("create_finding", Vec::new(), finding::create_finding)?;
    registry.register_fn::<MarkdownParams, _>("add_markdown", Vec::new(), finding::add_markdown)?;
    registry.register_fn::<NoParams, _>(
        "add_labels_table",
        vec![EventKind::ResourceChange],
        kubernetes::add_labels_table,
    )?;
    registry.register_fn::<NoParams, _>(
        "add_diff_table",
        vec![EventKind::ResourceChange],
        kubernetes::add_diff_table,
    )?;
    registry.register_fn::<NoParams, _>(
        "add_alert_annotations",
        vec![EventKind::PrometheusAlert],
        alerts::add_alert_annotations,
    )?;
    registry.register_fn::<RouteParams, _>("route_to_sinks", Vec::new(), routing::route_to_sinks)?;
    registry.register_fn::<NoParams, _>("stop_processing", Vec::new(), routing::stop_processing)?;
    registry.register_fn::<CallbackParams, _>("add_callback", Vec::new(), routing::add_callback)?;
    registry.register_fn::<ProbeParams, _>("http_probe", Vec::new(), probe::http_probe)?;
    Ok(())
}

/// Returns a registry holding only the built-in actions.
pub fn builtin_registry() -> Result<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    register_builtin(&mut registry)?;
    Ok(registry)
}
