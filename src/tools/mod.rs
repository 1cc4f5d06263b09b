pub mod call;
pub mod interaction;
pub mod locator;
pub mod navigation;
pub mod observation;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod stats;
pub mod types;
pub mod url;
