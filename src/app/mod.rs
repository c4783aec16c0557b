pub mod adb;
pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod scrape;
pub mod state;
pub mod ui_xml;
