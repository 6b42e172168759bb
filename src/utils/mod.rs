pub mod http;
pub mod json;
pub mod logging;
pub mod text;
pub mod timing;
