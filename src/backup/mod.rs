pub mod backup_config;
pub mod dump;
pub mod events;
pub mod outcome;
pub mod planner;
pub mod redacted;
pub mod result_error;
pub mod staging;
pub mod tar;
pub mod validate;
