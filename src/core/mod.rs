pub mod config;
pub mod error;
pub mod io;
pub mod params;
pub mod paths;
pub mod script;
pub mod session;
