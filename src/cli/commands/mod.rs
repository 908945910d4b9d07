pub mod compose;
pub mod config;
pub mod db_uri;
pub mod exec;
pub mod make;
pub mod port_forward;
pub mod secret;
