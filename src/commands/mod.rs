//! Command Layer
//!
//! Everything between a decoded frame and a handler's reply:
//!
//! ```text
//!  RespValue frame
//!        │  Request::try_from
//!        ▼
//! ┌─────────────────┐        ┌──────────────────┐
//! │     Request     │───────>│     Registry     │
//! │ name (lowercase)│ lookup │ name -> Handler  │
//! │ args (Bytes)    │        └────────┬─────────┘
//! └─────────────────┘                 │ call
//!                                     ▼
//!                          Ok(RespValue) | Err(CommandError)
//!                                     │ error_reply
//!                                     ▼
//!                                 RespValue
//! ```
//!
//! Handlers are plain functions of a [`Request`]; they know nothing about
//! connections or transactions. A handler that returns
//! [`CommandError::WrongArgs`] gets the standard arity error for its command
//! name. Any other error message is prefixed with `ERR` and has its line
//! breaks replaced so the reply stays a single RESP line.

pub mod error;
pub mod registry;
pub mod request;

pub use error::{CommandError, HandlerResult};
pub use registry::{CommandCount, Handler, Registry};
pub use request::{Request, RequestError};

pub(crate) use error::{unknown_command, wrong_args};
