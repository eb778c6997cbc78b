pub mod connection;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;
pub mod table;
