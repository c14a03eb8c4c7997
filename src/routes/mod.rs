pub mod api;
pub mod common;

pub use api::dispatch;
pub use common::common_routes;
