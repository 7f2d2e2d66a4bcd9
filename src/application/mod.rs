pub mod alarm_manager;
pub mod authorization;
pub mod bootstrap;
pub mod commands;
pub mod reconciliation;
pub mod views;

#[cfg(test)]
pub mod testing;
