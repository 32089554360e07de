pub mod http;
pub mod stub;

pub use http::HttpDetector;
pub use stub::StubDetector;
