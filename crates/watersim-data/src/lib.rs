pub mod loader;
pub mod network_engine;
pub mod schema;

pub use loader::{DataLoadError, load_bridge_config, load_network};
pub use network_engine::NetworkEngine;
