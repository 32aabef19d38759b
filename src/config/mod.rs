pub mod schema;

pub use schema::{
    botpanel_home, Config, DirectoryConfig, GatewayConfig, SyncConfig, WorkerConfig,
};
