pub mod config;
pub mod deadline;
pub mod models;
pub mod push;
pub mod timings;
pub mod util;
