pub mod alarm_authority;
pub mod alarm_store;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod http_alarm_authority;
pub mod kv_store;
pub mod storage;
