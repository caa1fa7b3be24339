pub mod config;
pub mod encoder;
pub mod error;
pub mod publisher;
pub mod record;

pub mod kafka;

pub use config::Config;
pub use error::{Error, Result};
pub use publisher::{PublishReport, Publisher, PublisherState};
