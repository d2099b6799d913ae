pub mod connectivity;
pub mod local_store;
pub mod operation_queue;
pub mod remote_service;
pub mod sync_checkpoint;

pub use connectivity::ConnectivityObserver;
pub use local_store::{LocalStore, RecordQuery};
pub use operation_queue::OperationQueue;
pub use remote_service::{
    CreateRequest, PullQuery, RemoteError, RemotePage, RemoteRecord, RemoteService,
    UpdateRequest,
};
pub use sync_checkpoint::SyncCheckpoint;
