mod app;
pub mod command;

pub use app::App;
