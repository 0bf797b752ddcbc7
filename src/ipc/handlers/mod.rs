pub mod api;
pub mod daemon;
pub mod state;
pub mod tabs;
