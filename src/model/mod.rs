pub mod history;
pub mod punch;
pub mod settings;
pub mod shift;
