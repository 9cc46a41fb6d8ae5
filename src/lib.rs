pub mod app;
pub mod cli;
pub mod config;
pub mod highlight;
pub mod model;
pub mod search;
pub mod storage;
pub mod store;
pub mod tags;
pub mod ui;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use model::{Channel, Message, Server};
pub use store::{EntityStore, Selection, StoreEvent};
