//! HTTP front for a media downloader: `POST /download` hands a URL to
//! `yt-dlp`, `GET /downloads/{filename}` serves the written file back.

pub mod config;
pub mod error;
pub mod extractor;
pub mod files;
pub mod routes;

pub use config::ServerConfig;
pub use error::ApiError;
pub use extractor::{ExtractError, MediaExtractor, YtDlpExtractor};
pub use routes::{AppState, build_router};
