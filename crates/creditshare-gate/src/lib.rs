#![warn(missing_docs)]

//! CreditShare service: credit-gated downloads, rewarded uploads and the
//! `FileShare` facade tying the metadata and blob subsystems together.

mod bounded;
#[allow(missing_docs)]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod service;
pub mod upload;

pub use config::{ShareConfig, DEFAULT_CREDIT_REWARD, DEFAULT_DOWNLOAD_COST};
pub use download::{Download, DownloadGate};
pub use error::{ErrorKind, Result, ShareError};
pub use service::FileShare;
pub use upload::{UploadHandler, UploadLimits, UploadRequest, DEFAULT_CONTENT_TYPE};
