// 🛡️ Modules are public for the orchestrator; implementations hide behind the traits.

pub mod traits;      // Global contracts
pub mod secrets;     // Memory hygiene (StorageCredentials)
pub mod cancel;      // Cooperative cancellation
pub mod props;       // Runtime connection properties
pub mod credentials; // Static or federated credentials with a file cache
pub mod tvm;         // Token vending over HTTP
pub mod storage;     // In-memory and directory object stores
pub mod s3;          // S3 object store
pub mod blocking;    // Blocking filesystem work off the async workers
pub mod remote;      // Directory to prefix synchronisation
pub mod actions;     // Runtime CLI action deployment
