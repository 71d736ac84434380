pub mod daily_csv;
pub mod webhook;
