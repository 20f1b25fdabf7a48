//! All MCP data types shared by the server and client roles.

pub mod capabilities;
pub mod error;
pub mod message;
pub mod notification;
pub mod request;
pub mod response;
pub mod schema;

pub use capabilities::*;
pub use error::*;
pub use message::*;
pub use notification::*;
pub use request::*;
pub use response::*;
pub use schema::*;
