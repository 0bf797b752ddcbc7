pub mod cookies;
pub mod share_link;
