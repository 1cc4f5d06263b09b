pub mod cdp;
pub mod context;
pub mod driver;
pub mod page;
pub mod selector;
pub mod stability;
