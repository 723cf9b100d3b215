//! Port resolution: the on-disk allocation registry and the template engine
//! that expands `$PORT`-family tokens in environment values at start time.

pub mod registry;
pub mod template;

pub use registry::{EnsureOptions, PortRegistry, ensure_registry_port};
pub use template::apply_port_template;
