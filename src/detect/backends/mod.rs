pub mod http;
pub mod stub;

pub use http::HttpTransport;
pub use stub::StubTransport;
