pub mod cache;
pub mod cgi;
pub mod config;
pub mod connection;
pub mod content;
pub mod exception;
pub mod gophermap;
pub mod param;
pub mod path;
pub mod policy;
pub mod request;
pub mod server;
pub mod util;

pub use cache::FileCache;
pub use config::Config;
pub use connection::Connection;
pub use exception::{Exception, ExceptionKind};
pub use param::ItemType;
pub use path::ResourcePath;
pub use request::Request;
pub use server::Server;
