// logflume - log aggregation pipeline
//
// Umbrella crate: the binary lives here, the functionality lives in the
// workspace members. Re-exported for embedders that want to run the
// pipeline inside their own process.

pub use logflume_config as config;
pub use logflume_server as server;
