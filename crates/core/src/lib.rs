pub mod history;
pub mod pane_group;
pub mod query_service;
pub mod row_log;
pub mod settings;
pub mod stopwatch;
pub mod stream_session;

#[cfg(test)]
mod testing;
