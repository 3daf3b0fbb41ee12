pub mod constants;
pub mod error;
pub mod geodesy;
pub mod fix;
pub mod policy;
pub mod validator;
pub mod history;
pub mod drain;
pub mod coordinator;
pub mod output;
pub mod net;
pub mod export;
pub mod compare;
pub mod config;
