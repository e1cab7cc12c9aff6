pub mod host;
pub mod logging;
pub mod replay;
pub mod settings;
