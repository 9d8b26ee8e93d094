pub mod boundary;
pub mod confirm;
pub mod coverage;
pub mod history;
pub mod init_config;
pub mod run;
pub mod structure;
