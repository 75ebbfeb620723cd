pub mod adapter;
pub mod body;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod http;
pub mod media;
pub mod range;
pub mod router;
pub mod sender;
pub mod upload;
pub mod value;

/// Re-exports of common components for easier access
pub use adapter::callback::CallbackContext;
pub use adapter::stream::StreamContext;
pub use body::Body;
pub use config::ServerConfig;
pub use context::{Action, Attributes, Context};
pub use error::{ServerError, ServerResult};
pub use executor::{Executor, SameThreadExecutor, WorkerPool};
pub use http::{Method, Status};
pub use media::MediaType;
pub use range::ByteRange;
pub use router::{Route, Router};
pub use sender::{CompleteListener, ResponseStream, Sender};
pub use upload::FileUpload;
pub use value::{Formdata, Headers, Multipart, QueryString, ValueMap};
