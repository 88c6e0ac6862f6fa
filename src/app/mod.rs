mod assistant;
mod controller;
mod error;
mod export;
mod fetch;
mod layout;
mod logging;
mod markup;
mod runtime;
mod scrape;
mod store;
mod tui;
mod types;
mod ui_utils;

pub use runtime::run;
