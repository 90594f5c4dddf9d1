pub mod http;
pub mod logger;
