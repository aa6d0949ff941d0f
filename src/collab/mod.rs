pub mod directory;
pub mod leave;
pub mod notify;
