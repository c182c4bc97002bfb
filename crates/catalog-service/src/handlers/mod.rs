//! HTTP request handlers for the Catalog Service.

pub mod assets;
pub mod health;
pub mod me;
pub mod metrics;

pub use assets::{
    create_asset, delete_main_media, get_asset, list_assets, main_media_url, screenshot_media_url,
};
pub use health::health_check;
pub use me::get_me;
pub use metrics::metrics_handler;
