//! Detection HTTP service: accepts an uploaded frame, asks a vision model
//! about it and answers with a threat verdict.

pub mod cache;
pub mod image;
pub mod server;
pub mod upstream;
pub mod verdict;

pub use self::cache::{cache_key, VerdictCache};
pub use self::image::prepare_upload;
pub use self::server::{DetectService, ServiceHandle};
pub use self::upstream::{ChatCompletionsModel, ThreatModel};
pub use self::verdict::ThreatVerdict;
