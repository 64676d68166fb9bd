pub mod error;
pub mod requests;
pub mod responses;


pub use error::{NodeFailure, NodepoolError, Result};
pub use requests::{MethodName, Request, RequestId, RequestIdGenerator, RpcParams};
pub use responses::{Response, RpcResult};
