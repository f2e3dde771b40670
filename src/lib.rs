pub mod config;
pub mod pan;

pub use config::Config;
pub use pan::{UploadResult, UploadSettings, Uploader, handle_upload};
